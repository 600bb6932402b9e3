//! Per-file block cache
//!
//! One buffer of `N * BLOCK_SIZE` bytes per open file. Its first block is the
//! only one the cache ever vouches for; the rest is scratch space for bulk
//! writes and digest streaming. The state says what the bytes mean:
//!
//! ```text
//!             load (read → decrypt)
//!   Invalid ──────────► Ciphertext ──────────► Plaintext{start, dirty}
//!      ▲                                              │
//!      └──────── write ◄── Ciphertext ◄── encrypt ────┘
//!                        (store / write_through)
//! ```
//!
//! Plaintext bytes are only reachable through accessors that check the
//! state and the block offset, so a stale buffer can't be read by accident.

use secfs_backing::BackingFile;
use secfs_core::{SecfsError, SecfsResult};
use secfs_crypto::{BlockCipher, BLOCK_SIZE};

use crate::cursor::BackingCursor;
use crate::header::HEADER_SIZE;

const BS: u64 = BLOCK_SIZE as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CacheState {
    /// Buffer contents mean nothing
    Invalid,
    /// Buffer holds bytes exactly as they are (or are about to be) on disk
    Ciphertext,
    /// First block holds the decrypted content of the block at logical `start`
    Plaintext { start: u64, dirty: bool },
}

pub(crate) struct BlockCache {
    buf: Vec<u8>,
    state: CacheState,
}

/// Logical offset of the block containing `pos`.
pub(crate) fn block_start(pos: u64) -> u64 {
    pos - pos % BS
}

impl BlockCache {
    pub(crate) fn new(blocks: usize) -> Self {
        Self {
            buf: vec![0; blocks.max(1) * BLOCK_SIZE],
            state: CacheState::Invalid,
        }
    }

    pub(crate) fn capacity_blocks(&self) -> usize {
        self.buf.len() / BLOCK_SIZE
    }

    pub(crate) fn state(&self) -> CacheState {
        self.state
    }

    /// Logical offset of the cached plaintext block, if any.
    pub(crate) fn cached_block(&self) -> Option<u64> {
        match self.state {
            CacheState::Plaintext { start, .. } => Some(start),
            _ => None,
        }
    }

    pub(crate) fn holds(&self, start: u64) -> bool {
        self.cached_block() == Some(start)
    }

    pub(crate) fn plaintext(&self, start: u64) -> Option<&[u8]> {
        self.holds(start).then(|| &self.buf[..BLOCK_SIZE])
    }

    /// Mutable view of the cached block; marks it dirty.
    pub(crate) fn plaintext_mut(&mut self, start: u64) -> Option<&mut [u8]> {
        if !self.holds(start) {
            return None;
        }
        self.state = CacheState::Plaintext { start, dirty: true };
        Some(&mut self.buf[..BLOCK_SIZE])
    }

    pub(crate) fn invalidate(&mut self) {
        self.state = CacheState::Invalid;
    }

    /// The whole buffer as scratch space. Drops whatever the cache held.
    pub(crate) fn scratch(&mut self) -> &mut [u8] {
        self.state = CacheState::Invalid;
        &mut self.buf
    }

    /// Start a block that does not exist on disk yet (at or past the end).
    pub(crate) fn begin_block(&mut self, start: u64) {
        self.buf[..BLOCK_SIZE].fill(0);
        self.state = CacheState::Plaintext { start, dirty: true };
    }

    /// Read the block at logical `start` from the backing file and decrypt it.
    pub(crate) fn load<F: BackingFile>(
        &mut self,
        cur: &mut BackingCursor<F>,
        cipher: &dyn BlockCipher,
        start: u64,
    ) -> SecfsResult<()> {
        self.state = CacheState::Invalid;
        cur.seek_to(HEADER_SIZE + start)?;
        cur.read_exact(&mut self.buf[..BLOCK_SIZE])?;
        self.state = CacheState::Ciphertext;
        cipher.decrypt(&mut self.buf[..BLOCK_SIZE])?;
        self.state = CacheState::Plaintext {
            start,
            dirty: false,
        };
        tracing::trace!(start, "block loaded");
        Ok(())
    }

    /// Encrypt the cached block and write it back to its place on disk.
    pub(crate) fn store<F: BackingFile>(
        &mut self,
        cur: &mut BackingCursor<F>,
        cipher: &dyn BlockCipher,
    ) -> SecfsResult<()> {
        let CacheState::Plaintext { start, .. } = self.state else {
            return Err(SecfsError::Inconsistent(format!(
                "no plaintext block to write (cache is {:?})",
                self.state
            )));
        };
        cipher.encrypt(&mut self.buf[..BLOCK_SIZE])?;
        self.state = CacheState::Ciphertext;
        cur.seek_to(HEADER_SIZE + start)?;
        cur.write_all(&self.buf[..BLOCK_SIZE])?;
        self.state = CacheState::Invalid;
        tracing::trace!(start, "block stored");
        Ok(())
    }

    /// Flush a dirty cached block for a file of logical length `size`.
    ///
    /// When the block is the tail of the file, the bytes past the end are
    /// filled with the pad count before encryption. Returns the pad count
    /// of the written block, or `None` if there was nothing to write.
    pub(crate) fn sync<F: BackingFile>(
        &mut self,
        cur: &mut BackingCursor<F>,
        cipher: &dyn BlockCipher,
        size: u64,
    ) -> SecfsResult<Option<u8>> {
        let CacheState::Plaintext { start, dirty: true } = self.state else {
            return Ok(None);
        };
        if size <= start {
            return Err(SecfsError::Inconsistent(format!(
                "dirty block at {start} lies beyond the end of a {size}-byte file"
            )));
        }
        let used = (size - start).min(BS) as usize;
        let pad = (BLOCK_SIZE - used) as u8;
        self.buf[used..BLOCK_SIZE].fill(pad);
        self.store(cur, cipher)?;
        Ok(Some(pad))
    }

    /// Encrypt whole blocks of caller data through the buffer and write them
    /// at logical `start`. `data` must fit in the buffer.
    pub(crate) fn write_through<F: BackingFile>(
        &mut self,
        cur: &mut BackingCursor<F>,
        cipher: &dyn BlockCipher,
        start: u64,
        data: &[u8],
    ) -> SecfsResult<()> {
        if data.len() % BLOCK_SIZE != 0 || data.len() > self.buf.len() {
            return Err(SecfsError::Inconsistent(format!(
                "bulk write of {} bytes does not fit whole cache blocks",
                data.len()
            )));
        }
        self.state = CacheState::Invalid;
        let out = &mut self.buf[..data.len()];
        out.copy_from_slice(data);
        cipher.encrypt(out)?;
        self.state = CacheState::Ciphertext;
        cur.seek_to(HEADER_SIZE + start)?;
        cur.write_all(&self.buf[..data.len()])?;
        self.state = CacheState::Invalid;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secfs_backing::{Backing, MemBacking};
    use secfs_core::OpenFlags;
    use secfs_crypto::{MountKey, SoftwareAes};

    fn setup() -> (MemBacking, BackingCursor<secfs_backing::memory::MemFile>, SoftwareAes) {
        let backing = MemBacking::new();
        let file = backing
            .open("f.sec", OpenFlags::read_write().create())
            .unwrap()
            .file;
        let cipher = SoftwareAes::new(&MountKey::from_bytes([9; 16]));
        (backing, BackingCursor::new(file), cipher)
    }

    #[test]
    fn starts_invalid() {
        let cache = BlockCache::new(4);
        assert_eq!(cache.state(), CacheState::Invalid);
        assert_eq!(cache.capacity_blocks(), 4);
        assert!(cache.plaintext(0).is_none());
    }

    #[test]
    fn zero_blocks_rounds_up_to_one() {
        assert_eq!(BlockCache::new(0).capacity_blocks(), 1);
    }

    #[test]
    fn store_then_load_roundtrip() {
        let (backing, mut cur, cipher) = setup();
        let mut cache = BlockCache::new(1);

        cache.begin_block(16);
        cache.plaintext_mut(16).unwrap().copy_from_slice(b"0123456789abcdef");
        cache.store(&mut cur, &cipher).unwrap();
        assert_eq!(cache.state(), CacheState::Invalid);

        let raw = backing.raw("f.sec").unwrap();
        assert_eq!(raw.len() as u64, HEADER_SIZE + 32);
        assert_ne!(&raw[64..80], b"0123456789abcdef");

        cache.load(&mut cur, &cipher, 16).unwrap();
        assert_eq!(
            cache.state(),
            CacheState::Plaintext {
                start: 16,
                dirty: false
            }
        );
        assert_eq!(cache.plaintext(16).unwrap(), b"0123456789abcdef");
        assert!(cache.plaintext(0).is_none(), "other offsets are not served");
    }

    #[test]
    fn sync_pads_tail_with_pad_count() {
        let (_backing, mut cur, cipher) = setup();
        let mut cache = BlockCache::new(1);

        cache.begin_block(0);
        cache.plaintext_mut(0).unwrap()[..5].copy_from_slice(b"hello");
        let pad = cache.sync(&mut cur, &cipher, 5).unwrap();
        assert_eq!(pad, Some(11));

        cache.load(&mut cur, &cipher, 0).unwrap();
        let block = cache.plaintext(0).unwrap();
        assert_eq!(&block[..5], b"hello");
        assert!(block[5..].iter().all(|&b| b == 11));
    }

    #[test]
    fn sync_full_block_has_no_pad() {
        let (_backing, mut cur, cipher) = setup();
        let mut cache = BlockCache::new(1);
        cache.begin_block(0);
        cache.plaintext_mut(0).unwrap().fill(b'x');
        assert_eq!(cache.sync(&mut cur, &cipher, 40).unwrap(), Some(0));
    }

    #[test]
    fn sync_of_clean_cache_writes_nothing() {
        let (backing, mut cur, cipher) = setup();
        let mut cache = BlockCache::new(1);
        assert_eq!(cache.sync(&mut cur, &cipher, 0).unwrap(), None);
        assert!(backing.raw("f.sec").unwrap().is_empty());
    }

    #[test]
    fn store_without_plaintext_is_inconsistent() {
        let (_backing, mut cur, cipher) = setup();
        let mut cache = BlockCache::new(1);
        let err = cache.store(&mut cur, &cipher).unwrap_err();
        assert!(matches!(err, SecfsError::Inconsistent(_)));
    }

    #[test]
    fn failed_write_leaves_ciphertext_state() {
        let (backing, mut cur, cipher) = setup();
        let mut cache = BlockCache::new(2);
        backing.fail_writes_after(0);

        let err = cache
            .write_through(&mut cur, &cipher, 0, &[1u8; 32])
            .unwrap_err();
        assert!(matches!(err, SecfsError::Backing(_)));
        assert_eq!(cache.state(), CacheState::Ciphertext);
    }

    #[test]
    fn short_read_fails_load() {
        let (_backing, mut cur, cipher) = setup();
        let mut cache = BlockCache::new(1);
        assert!(cache.load(&mut cur, &cipher, 0).is_err());
        assert!(cache.plaintext(0).is_none());
    }

    #[test]
    fn write_through_rejects_oversized_input() {
        let (_backing, mut cur, cipher) = setup();
        let mut cache = BlockCache::new(1);
        assert!(cache.write_through(&mut cur, &cipher, 0, &[0u8; 32]).is_err());
    }

    #[test]
    fn block_start_rounds_down() {
        assert_eq!(block_start(0), 0);
        assert_eq!(block_start(15), 0);
        assert_eq!(block_start(16), 16);
        assert_eq!(block_start(21), 16);
    }
}
