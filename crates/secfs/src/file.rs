//! Open-file session
//!
//! A [`SecFile`] is a handle on one encrypted file. It exposes the logical
//! (decrypted, unpadded) byte stream; every offset the caller sees is a
//! logical offset, and the header sits invisibly in front of it.
//!
//! Invariants kept between calls:
//! - `pos <= size`
//! - when `pos` is not block-aligned, the block containing it is cached as
//!   plaintext, so a partial write can always merge into it
//! - at most one block (the cached one) differs from what is on disk
//!
//! The header digest is refreshed when a writable handle is closed.

use std::io;

use secfs_backing::{Backing, BackingFile, Opened};
use secfs_core::{Access, OpenFlags, SecfsError, SecfsResult, SeekFrom};
use secfs_crypto::{ContentDigest, Digest, BLOCK_SIZE};
use tracing::{debug, warn};

use crate::cache::{block_start, BlockCache, CacheState};
use crate::cursor::BackingCursor;
use crate::header::{self, CipherMode, Header, HEADER_SIZE};
use crate::mount::Mount;
use crate::names;

const BS: u64 = BLOCK_SIZE as u64;

fn closed() -> SecfsError {
    SecfsError::Inconsistent("file handle already closed".into())
}

pub struct SecFile<'m, B: Backing> {
    mount: &'m Mount<B>,
    cur: Option<BackingCursor<B::File>>,
    path: String,
    flags: OpenFlags,
    cache: BlockCache,
    /// Logical length
    size: u64,
    /// Logical position
    pos: u64,
    pad_count: u8,
    mode: CipherMode,
    digest: Digest,
}

impl<B: Backing> std::fmt::Debug for SecFile<'_, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecFile")
            .field("path", &self.path)
            .field("size", &self.size)
            .field("pos", &self.pos)
            .field("cache", &self.cache.state())
            .finish_non_exhaustive()
    }
}

impl<'m, B: Backing> SecFile<'m, B> {
    pub(crate) fn open(mount: &'m Mount<B>, name: &str, flags: OpenFlags) -> SecfsResult<Self> {
        let path = names::backing_name(mount.prefix(), name)?;

        // Read-modify-write of blocks needs both directions, and the header
        // lives at offset 0, so the backing handle is never append-only
        let mut backing_flags = flags;
        backing_flags.append = false;
        if flags.is_writable() {
            backing_flags.access = Access::ReadWrite;
        }
        let Opened { file, created } = mount.backing().open(&path, backing_flags)?;

        let mut this = Self {
            mount,
            cur: Some(BackingCursor::new(file)),
            path,
            flags,
            cache: BlockCache::new(mount.cache_blocks()),
            size: 0,
            pos: 0,
            pad_count: 0,
            mode: CipherMode::Ecb,
            digest: ContentDigest::of(b""),
        };

        if let Err(err) = this.init(created) {
            if let Some(cur) = this.cur.take() {
                if let Err(e) = cur.into_inner().close() {
                    warn!(path = %this.path, "close after failed open: {e}");
                }
            }
            if created || (flags.truncate && flags.is_writable()) {
                // Don't leave a headerless file behind
                if let Err(e) = mount.backing().unlink(&this.path) {
                    warn!(path = %this.path, "rollback unlink failed: {e}");
                }
            }
            return Err(err);
        }

        debug!(
            path = %this.path,
            size = this.size,
            created,
            writable = flags.is_writable(),
            "opened"
        );
        Ok(this)
    }

    fn init(&mut self, created: bool) -> SecfsResult<()> {
        let cipher = self.mount.cipher();
        let cur = self.cur.as_mut().ok_or_else(closed)?;

        let backing_len = cur.len()?;
        let truncated = backing_len == 0 && self.flags.truncate && self.flags.is_writable();
        if created || truncated {
            let header = Header::empty();
            header::store_header(cur, cipher, &header)?;
            self.digest = header.digest;
            return Ok(());
        }

        let header = header::load_header(cur, cipher)?;
        self.size = header::logical_size(backing_len, header.pad_count)?;
        self.pad_count = header.pad_count;
        self.mode = header.mode;
        self.digest = header.digest;

        if self.mount.verify_hash() {
            if !header::check_hash(cur, self.cache.scratch(), &header.digest)? {
                warn!(path = %self.path, "content digest mismatch");
                return Err(SecfsError::bad_file("content digest mismatch"));
            }
        }

        if self.flags.append {
            self.pos = self.size;
            self.load_cursor_block()?;
        }
        Ok(())
    }

    /// Logical length in bytes.
    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Logical position of the next read or write.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Pad bytes in the last stored block.
    pub fn pad_count(&self) -> u8 {
        self.pad_count
    }

    pub fn cipher_mode(&self) -> CipherMode {
        self.mode
    }

    /// Digest from the header as of open, or as stored by the last close.
    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    /// Backing path of this file.
    pub fn backing_path(&self) -> &str {
        &self.path
    }

    #[cfg(test)]
    pub(crate) fn cache_state(&self) -> CacheState {
        self.cache.state()
    }

    /// Write the dirty cached block (if any), padding it when it is the tail.
    fn sync_cache(&mut self) -> SecfsResult<()> {
        let cipher = self.mount.cipher();
        let cur = self.cur.as_mut().ok_or_else(closed)?;
        let tail = self.cache.cached_block() == Some(block_start(self.size.saturating_sub(1)));
        if let Some(pad) = self.cache.sync(cur, cipher, self.size)? {
            if tail {
                self.pad_count = pad;
            }
        }
        Ok(())
    }

    /// Cache the block containing the position, if it exists on disk.
    fn load_cursor_block(&mut self) -> SecfsResult<()> {
        let start = block_start(self.pos);
        if start >= self.size || self.cache.holds(start) {
            return Ok(());
        }
        let cipher = self.mount.cipher();
        let cur = self.cur.as_mut().ok_or_else(closed)?;
        self.cache.load(cur, cipher, start)
    }

    pub fn read(&mut self, buf: &mut [u8]) -> SecfsResult<usize> {
        if !self.flags.is_readable() {
            return Err(SecfsError::NotPermitted("file not open for reading".into()));
        }
        let cipher = self.mount.cipher();
        let n = (buf.len() as u64).min(self.size - self.pos) as usize;
        let mut done = 0;

        while done < n {
            let off = (self.pos % BS) as usize;
            let start = self.pos - off as u64;
            let want = n - done;

            if let Some(block) = self.cache.plaintext(start) {
                let k = (BLOCK_SIZE - off).min(want);
                buf[done..done + k].copy_from_slice(&block[off..off + k]);
                done += k;
                self.pos += k as u64;
                continue;
            }

            if off == 0 && want >= BLOCK_SIZE {
                // Whole blocks go straight into the caller's buffer, stopping
                // short of a cached block that may be newer than the disk
                let mut blocks = want / BLOCK_SIZE;
                if let Some(cached) = self.cache.cached_block().filter(|&c| c > start) {
                    blocks = blocks.min(((cached - start) / BS) as usize);
                }
                let len = blocks * BLOCK_SIZE;
                let out = &mut buf[done..done + len];
                let cur = self.cur.as_mut().ok_or_else(closed)?;
                cur.seek_to(HEADER_SIZE + start)?;
                cur.read_exact(out)?;
                cipher.decrypt(out)?;
                done += len;
                self.pos += len as u64;
                continue;
            }

            // Partial block: bring it into the cache, the next turn copies out
            self.sync_cache()?;
            let cur = self.cur.as_mut().ok_or_else(closed)?;
            self.cache.load(cur, cipher, start)?;
        }
        Ok(n)
    }

    pub fn write(&mut self, data: &[u8]) -> SecfsResult<usize> {
        if !self.flags.is_writable() {
            return Err(SecfsError::NotPermitted("file not open for writing".into()));
        }
        let cipher = self.mount.cipher();
        let mut done = 0;

        while done < data.len() {
            let off = (self.pos % BS) as usize;
            let start = self.pos - off as u64;
            let want = data.len() - done;

            if off != 0 || want < BLOCK_SIZE {
                if !self.cache.holds(start) {
                    if off != 0 {
                        return Err(SecfsError::Inconsistent(format!(
                            "unaligned write at {} without its block cached",
                            self.pos
                        )));
                    }
                    self.sync_cache()?;
                    if start < self.size {
                        let cur = self.cur.as_mut().ok_or_else(closed)?;
                        self.cache.load(cur, cipher, start)?;
                    } else {
                        self.cache.begin_block(start);
                    }
                }

                let k = (BLOCK_SIZE - off).min(want);
                let block = self.cache.plaintext_mut(start).ok_or_else(|| {
                    SecfsError::Inconsistent(format!("block {start} vanished from the cache"))
                })?;
                block[off..off + k].copy_from_slice(&data[done..done + k]);
                done += k;
                self.pos += k as u64;
                self.size = self.size.max(self.pos);

                if off + k == BLOCK_SIZE {
                    let cur = self.cur.as_mut().ok_or_else(closed)?;
                    self.cache.store(cur, cipher)?;
                    if start + BS == self.size {
                        self.pad_count = 0;
                    }
                }
                continue;
            }

            let blocks = (want / BLOCK_SIZE).min(self.cache.capacity_blocks());
            let len = blocks * BLOCK_SIZE;
            let end = start + len as u64;

            // A dirty block inside the range is about to be overwritten whole;
            // one outside it must reach the disk before the buffer is reused
            match self.cache.state() {
                CacheState::Plaintext { start: c, dirty: true } if c >= start && c < end => {
                    self.cache.invalidate();
                }
                _ => self.sync_cache()?,
            }

            let cur = self.cur.as_mut().ok_or_else(closed)?;
            self.cache
                .write_through(cur, cipher, start, &data[done..done + len])?;
            done += len;
            self.pos = end;
            self.size = self.size.max(end);
            if end == self.size {
                self.pad_count = 0;
            }
        }
        Ok(done)
    }

    /// Move the logical position. Targets outside `0..=len` are rejected.
    pub fn seek(&mut self, target: SeekFrom) -> SecfsResult<u64> {
        let pos = match target {
            SeekFrom::Start(off) => Some(off),
            SeekFrom::End(off) => self.size.checked_add_signed(off),
            SeekFrom::Current(off) => self.pos.checked_add_signed(off),
        }
        .filter(|&p| p <= self.size)
        .ok_or_else(|| {
            SecfsError::InvalidArgument(format!(
                "seek {target:?} outside a {}-byte file",
                self.size
            ))
        })?;

        self.sync_cache()?;
        self.pos = pos;
        self.load_cursor_block()?;
        Ok(pos)
    }

    /// Push the dirty cached block to the backing file.
    ///
    /// The header is not rewritten until [`close`](Self::close).
    pub fn flush(&mut self) -> SecfsResult<()> {
        self.sync_cache()?;
        self.load_cursor_block()
    }

    /// Recompute the digest of the stored content and compare it with the
    /// header's. Unflushed writes are flushed first; a handle with writes
    /// since open will not match until it is closed.
    pub fn verify(&mut self) -> SecfsResult<bool> {
        self.sync_cache()?;
        let cur = self.cur.as_mut().ok_or_else(closed)?;
        let matches = header::check_hash(cur, self.cache.scratch(), &self.digest)?;
        self.load_cursor_block()?;
        Ok(matches)
    }

    /// Flush, refresh the header (writable handles only) and release the
    /// backing handle. The first error wins, but the handle is released
    /// regardless.
    pub fn close(mut self) -> SecfsResult<()> {
        let Some(mut cur) = self.cur.take() else {
            return Ok(());
        };
        let finished = self.finish(&mut cur);
        let released = cur.into_inner().close().map_err(SecfsError::from);
        debug!(path = %self.path, size = self.size, "closed");
        finished.and(released)
    }

    fn finish(&mut self, cur: &mut BackingCursor<B::File>) -> SecfsResult<()> {
        if !self.flags.is_writable() {
            return Ok(());
        }
        let cipher = self.mount.cipher();
        self.cache.sync(cur, cipher, self.size)?;
        self.pad_count = ((BS - self.size % BS) % BS) as u8;

        let digest = header::content_digest(cur, self.cache.scratch())?;
        let header = Header {
            pad_count: self.pad_count,
            mode: self.mode,
            digest,
        };
        header::store_header(cur, cipher, &header)?;
        self.digest = digest;
        Ok(())
    }
}

impl<B: Backing> Drop for SecFile<'_, B> {
    fn drop(&mut self) {
        let Some(mut cur) = self.cur.take() else {
            return;
        };
        warn!(path = %self.path, "file dropped without close");
        if let Err(e) = self.finish(&mut cur) {
            warn!(path = %self.path, "flush on drop failed: {e}");
        }
        if let Err(e) = cur.into_inner().close() {
            warn!(path = %self.path, "close on drop failed: {e}");
        }
    }
}

impl<B: Backing> io::Read for SecFile<'_, B> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        SecFile::read(self, buf).map_err(io::Error::from)
    }
}

impl<B: Backing> io::Write for SecFile<'_, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        SecFile::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        SecFile::flush(self).map_err(io::Error::from)
    }
}

impl<B: Backing> io::Seek for SecFile<'_, B> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        SecFile::seek(self, pos).map_err(io::Error::from)
    }
}
