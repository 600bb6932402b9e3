//! Fixed-block encrypt/decrypt contract and the software AES implementation
//!
//! Every call transforms a whole number of 16-byte blocks, each block on its
//! own. There is no IV and no chaining, so equal plaintext blocks anywhere in
//! a file produce equal ciphertext. The file layer depends on this: block
//! boundaries, not call boundaries, decide what ends up on disk.

use std::sync::Mutex;

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Block};
use secfs_core::{SecfsError, SecfsResult};

use crate::keys::MountKey;
use crate::BLOCK_SIZE;

/// A keyed block transform shared by every file of a mount.
///
/// Implementations must serialize access to whatever keyed state they hold:
/// a software context sits behind a lock, a hardware unit is acquired and
/// released around each call.
pub trait BlockCipher: Send + Sync {
    /// Encrypt `buf` in place. `buf.len()` must be a multiple of [`BLOCK_SIZE`].
    fn encrypt(&self, buf: &mut [u8]) -> SecfsResult<()>;

    /// Decrypt `buf` in place. `buf.len()` must be a multiple of [`BLOCK_SIZE`].
    fn decrypt(&self, buf: &mut [u8]) -> SecfsResult<()>;
}

/// AES-128 in software, one key schedule per mount behind a mutex.
pub struct SoftwareAes {
    ctx: Mutex<Aes128>,
}

impl SoftwareAes {
    pub fn new(key: &MountKey) -> Self {
        Self {
            ctx: Mutex::new(Aes128::new(key.as_bytes().into())),
        }
    }

    /// Run `f` with exclusive access to the key schedule.
    fn with_context<R>(&self, f: impl FnOnce(&Aes128) -> R) -> SecfsResult<R> {
        let guard = self
            .ctx
            .lock()
            .map_err(|_| SecfsError::Codec("cipher context lock poisoned".into()))?;
        Ok(f(&guard))
    }
}

impl std::fmt::Debug for SoftwareAes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareAes")
            .field("ctx", &"[REDACTED]")
            .finish()
    }
}

fn check_len(buf: &[u8]) -> SecfsResult<()> {
    if buf.len() % BLOCK_SIZE != 0 {
        return Err(SecfsError::Codec(format!(
            "buffer length {} is not a multiple of the {BLOCK_SIZE}-byte block size",
            buf.len()
        )));
    }
    Ok(())
}

impl BlockCipher for SoftwareAes {
    fn encrypt(&self, buf: &mut [u8]) -> SecfsResult<()> {
        check_len(buf)?;
        self.with_context(|aes| {
            for chunk in buf.chunks_exact_mut(BLOCK_SIZE) {
                aes.encrypt_block(Block::from_mut_slice(chunk));
            }
        })
    }

    fn decrypt(&self, buf: &mut [u8]) -> SecfsResult<()> {
        check_len(buf)?;
        self.with_context(|aes| {
            for chunk in buf.chunks_exact_mut(BLOCK_SIZE) {
                aes.decrypt_block(Block::from_mut_slice(chunk));
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_cipher() -> SoftwareAes {
        SoftwareAes::new(&MountKey::from_bytes([0x2b; 16]))
    }

    #[test]
    fn test_fips197_vector() {
        // FIPS-197 appendix C.1
        let key: [u8; 16] = [
            0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d,
            0x0e, 0x0f,
        ];
        let cipher = SoftwareAes::new(&MountKey::from_bytes(key));
        let mut block: [u8; 16] = [
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd,
            0xee, 0xff,
        ];
        cipher.encrypt(&mut block).unwrap();
        assert_eq!(
            block,
            [
                0x69, 0xc4, 0xe0, 0xd8, 0x6a, 0x7b, 0x04, 0x30, 0xd8, 0xcd, 0xb7, 0x80, 0x70, 0xb4,
                0xc5, 0x5a
            ]
        );
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let cipher = test_cipher();
        let original = *b"sixteen byte blkand another one!";
        let mut buf = original;

        cipher.encrypt(&mut buf).unwrap();
        assert_ne!(buf, original);
        cipher.decrypt(&mut buf).unwrap();
        assert_eq!(buf, original);
    }

    #[test]
    fn test_identical_blocks_identical_ciphertext() {
        let cipher = test_cipher();
        let mut buf = [0x41u8; 48];
        cipher.encrypt(&mut buf).unwrap();

        assert_eq!(buf[0..16], buf[16..32]);
        assert_eq!(buf[16..32], buf[32..48]);
    }

    #[test]
    fn test_unaligned_length_rejected() {
        let cipher = test_cipher();
        let mut buf = [0u8; 17];
        let err = cipher.encrypt(&mut buf).unwrap_err();
        assert!(matches!(err, SecfsError::Codec(_)));
        assert!(cipher.decrypt(&mut buf[..15]).is_err());
    }

    #[test]
    fn test_empty_buffer_is_noop() {
        let cipher = test_cipher();
        let mut buf: [u8; 0] = [];
        cipher.encrypt(&mut buf).unwrap();
        cipher.decrypt(&mut buf).unwrap();
    }

    #[test]
    fn test_different_keys_different_ciphertext() {
        let a = SoftwareAes::new(&MountKey::from_bytes([1u8; 16]));
        let b = SoftwareAes::new(&MountKey::from_bytes([2u8; 16]));
        let mut x = [7u8; 16];
        let mut y = [7u8; 16];
        a.encrypt(&mut x).unwrap();
        b.encrypt(&mut y).unwrap();
        assert_ne!(x, y);
    }

    proptest! {
        #[test]
        fn blockwise_equals_bulk(blocks in proptest::collection::vec(any::<[u8; 16]>(), 1..8)) {
            let cipher = test_cipher();
            let mut bulk: Vec<u8> = blocks.iter().flatten().copied().collect();
            cipher.encrypt(&mut bulk).unwrap();

            for (i, block) in blocks.iter().enumerate() {
                let mut one = *block;
                cipher.encrypt(&mut one).unwrap();
                prop_assert_eq!(&bulk[i * 16..(i + 1) * 16], &one[..]);
            }
        }
    }
}
