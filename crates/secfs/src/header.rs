//! On-disk file header
//!
//! Fixed 48 bytes at the start of every backing file, each part encrypted
//! block by block with the mount key:
//!
//! ```text
//! offset 0   block 0   magic:u32-be | pad_count:u8 | mode:u8 | reserved[10] (0xFF)
//! offset 16  32 bytes  content digest (SHA-256), zero-padded to whole blocks
//! offset 48  content   whole cipher blocks; the last one carries pad_count
//!                      trailing pad bytes, each equal to pad_count
//! ```
//!
//! Decrypting block 0 and finding the magic is the only proof that the key
//! is right and the file is ours. Any mismatch is a "bad file" error.

use secfs_backing::BackingFile;
use secfs_core::{SecfsError, SecfsResult};
use secfs_crypto::{BlockCipher, ContentDigest, Digest, BLOCK_SIZE, DIGEST_SIZE};

use crate::cursor::BackingCursor;

/// Magic constant at the start of decrypted block 0 ("SECF")
pub const MAGIC: u32 = 0x5345_4346;

const PAD_OFFSET: usize = 4;
const MODE_OFFSET: usize = 5;
const RESERVED_FILL: u8 = 0xFF;

/// Digest area rounded up to whole cipher blocks
const DIGEST_AREA: usize = DIGEST_SIZE.div_ceil(BLOCK_SIZE) * BLOCK_SIZE;

/// Header length in bytes
pub const HEADER_LEN: usize = BLOCK_SIZE + DIGEST_AREA;

/// Physical offset of the first content block
pub const HEADER_SIZE: u64 = HEADER_LEN as u64;

/// Cipher mode tag stored in the header.
///
/// Only independent per-block encryption exists; the tag leaves room for
/// another mode without a format break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CipherMode {
    #[default]
    Ecb = 0,
}

impl TryFrom<u8> for CipherMode {
    type Error = SecfsError;

    fn try_from(tag: u8) -> SecfsResult<Self> {
        match tag {
            0 => Ok(CipherMode::Ecb),
            other => Err(SecfsError::bad_file(format!("unknown cipher mode {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub pad_count: u8,
    pub mode: CipherMode,
    pub digest: Digest,
}

impl Header {
    pub fn new(pad_count: u8, digest: Digest) -> Self {
        Self {
            pad_count,
            mode: CipherMode::Ecb,
            digest,
        }
    }

    /// Header of a freshly created, empty file.
    pub fn empty() -> Self {
        Self::new(0, ContentDigest::of(b""))
    }

    pub fn encode(&self, cipher: &dyn BlockCipher) -> SecfsResult<[u8; HEADER_LEN]> {
        let mut raw = [0u8; HEADER_LEN];

        let (block0, digest_area) = raw.split_at_mut(BLOCK_SIZE);
        block0.fill(RESERVED_FILL);
        block0[..4].copy_from_slice(&MAGIC.to_be_bytes());
        block0[PAD_OFFSET] = self.pad_count;
        block0[MODE_OFFSET] = self.mode as u8;
        digest_area[..DIGEST_SIZE].copy_from_slice(&self.digest);

        cipher.encrypt(&mut raw)?;
        Ok(raw)
    }

    pub fn decode(raw: &[u8; HEADER_LEN], cipher: &dyn BlockCipher) -> SecfsResult<Self> {
        let mut block0 = [0u8; BLOCK_SIZE];
        block0.copy_from_slice(&raw[..BLOCK_SIZE]);
        cipher.decrypt(&mut block0)?;

        let magic = u32::from_be_bytes([block0[0], block0[1], block0[2], block0[3]]);
        if magic != MAGIC {
            tracing::warn!(magic, "header magic mismatch");
            return Err(SecfsError::bad_file(
                "header magic mismatch (wrong key or not an encrypted file)",
            ));
        }

        let pad_count = block0[PAD_OFFSET];
        if pad_count as usize >= BLOCK_SIZE {
            return Err(SecfsError::bad_file(format!(
                "pad count {pad_count} exceeds block size"
            )));
        }
        let mode = CipherMode::try_from(block0[MODE_OFFSET])?;

        let mut digest_area = [0u8; DIGEST_AREA];
        digest_area.copy_from_slice(&raw[BLOCK_SIZE..]);
        cipher.decrypt(&mut digest_area)?;
        let mut digest = [0u8; DIGEST_SIZE];
        digest.copy_from_slice(&digest_area[..DIGEST_SIZE]);

        Ok(Self {
            pad_count,
            mode,
            digest,
        })
    }
}

/// Write `header` at offset 0 of the backing file.
pub(crate) fn store_header<F: BackingFile>(
    cur: &mut BackingCursor<F>,
    cipher: &dyn BlockCipher,
    header: &Header,
) -> SecfsResult<()> {
    let raw = header.encode(cipher)?;
    cur.seek_to(0)?;
    cur.write_all(&raw)?;
    tracing::trace!(pad_count = header.pad_count, "stored header");
    Ok(())
}

/// Read and validate the header at offset 0.
pub(crate) fn load_header<F: BackingFile>(
    cur: &mut BackingCursor<F>,
    cipher: &dyn BlockCipher,
) -> SecfsResult<Header> {
    let mut raw = [0u8; HEADER_LEN];
    cur.seek_to(0)?;
    let n = cur.read_some(&mut raw)?;
    if n < HEADER_LEN {
        return Err(SecfsError::bad_file(format!(
            "truncated header: {n} of {HEADER_LEN} bytes"
        )));
    }
    Header::decode(&raw, cipher)
}

/// Logical length of a file whose backing file is `backing_len` bytes long.
pub(crate) fn logical_size(backing_len: u64, pad_count: u8) -> SecfsResult<u64> {
    let content = backing_len.checked_sub(HEADER_SIZE).ok_or_else(|| {
        SecfsError::bad_file(format!("backing file of {backing_len} bytes has no header"))
    })?;
    if content % BLOCK_SIZE as u64 != 0 {
        return Err(SecfsError::bad_file(format!(
            "content length {content} is not a whole number of blocks"
        )));
    }
    if pad_count > 0 && content == 0 {
        return Err(SecfsError::bad_file(format!(
            "pad count {pad_count} on a file without content blocks"
        )));
    }
    Ok(content - u64::from(pad_count))
}

/// Digest of everything stored after the header, streamed through `scratch`.
pub(crate) fn content_digest<F: BackingFile>(
    cur: &mut BackingCursor<F>,
    scratch: &mut [u8],
) -> SecfsResult<Digest> {
    let mut digest = ContentDigest::new();
    cur.seek_to(HEADER_SIZE)?;
    loop {
        let n = cur.read_some(scratch)?;
        if n == 0 {
            break;
        }
        digest.update(&scratch[..n]);
    }
    Ok(digest.finalize())
}

/// Compare the digest of the stored content with `expected`.
pub(crate) fn check_hash<F: BackingFile>(
    cur: &mut BackingCursor<F>,
    scratch: &mut [u8],
    expected: &Digest,
) -> SecfsResult<bool> {
    Ok(content_digest(cur, scratch)? == *expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use secfs_crypto::{MountKey, SoftwareAes};

    fn cipher() -> SoftwareAes {
        SoftwareAes::new(&MountKey::from_bytes([0x11; 16]))
    }

    #[test]
    fn header_is_48_bytes() {
        assert_eq!(HEADER_LEN, 48);
        assert_eq!(HEADER_SIZE, 48);
    }

    #[test]
    fn plaintext_layout() {
        // Decrypt block 0 by hand and check the field offsets
        let c = cipher();
        let raw = Header::new(11, [0xAA; 32]).encode(&c).unwrap();
        let mut block0 = [0u8; 16];
        block0.copy_from_slice(&raw[..16]);
        c.decrypt(&mut block0).unwrap();

        assert_eq!(&block0[..4], &[0x53, 0x45, 0x43, 0x46]);
        assert_eq!(block0[4], 11);
        assert_eq!(block0[5], CipherMode::Ecb as u8);
        assert!(block0[6..].iter().all(|&b| b == RESERVED_FILL));
    }

    #[test]
    fn wrong_key_is_bad_file() {
        let raw = Header::empty().encode(&cipher()).unwrap();
        let other = SoftwareAes::new(&MountKey::from_bytes([0x22; 16]));
        let err = Header::decode(&raw, &other).unwrap_err();
        assert!(err.is_corruption(), "got {err:?}");
    }

    #[test]
    fn unknown_mode_is_bad_file() {
        let c = cipher();
        let mut block0 = [RESERVED_FILL; 16];
        block0[..4].copy_from_slice(&MAGIC.to_be_bytes());
        block0[PAD_OFFSET] = 0;
        block0[MODE_OFFSET] = 7;
        c.encrypt(&mut block0).unwrap();

        let mut raw = Header::empty().encode(&c).unwrap();
        raw[..16].copy_from_slice(&block0);
        assert!(Header::decode(&raw, &c).unwrap_err().is_corruption());
    }

    #[test]
    fn oversized_pad_is_bad_file() {
        let c = cipher();
        let raw = Header::new(16, [0; 32]).encode(&c).unwrap();
        assert!(Header::decode(&raw, &c).unwrap_err().is_corruption());
    }

    #[test]
    fn logical_size_accounts_for_header_and_pad() {
        assert_eq!(logical_size(48, 0).unwrap(), 0);
        assert_eq!(logical_size(48 + 32, 11).unwrap(), 21);
        assert_eq!(logical_size(48 + 16, 0).unwrap(), 16);
        assert!(logical_size(40, 0).unwrap_err().is_corruption());
        assert!(logical_size(48 + 5, 0).unwrap_err().is_corruption());
        assert!(logical_size(48, 3).unwrap_err().is_corruption());
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(pad in 0u8..16, digest in any::<[u8; 32]>()) {
            let c = cipher();
            let header = Header::new(pad, digest);
            let raw = header.encode(&c).unwrap();
            prop_assert_eq!(Header::decode(&raw, &c).unwrap(), header);
        }
    }
}
