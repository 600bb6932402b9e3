//! Backing file handle that remembers where its cursor is
//!
//! The block paths seek before every transfer; tracking the cursor lets
//! consecutive blocks go out without a seek in between.

use std::io;

use secfs_backing::BackingFile;
use secfs_core::{SecfsError, SecfsResult, SeekFrom};

pub(crate) struct BackingCursor<F> {
    file: F,
    /// Physical offset of the backing cursor; `None` after a failed transfer
    pos: Option<u64>,
}

impl<F: BackingFile> BackingCursor<F> {
    pub(crate) fn new(file: F) -> Self {
        Self { file, pos: None }
    }

    pub(crate) fn seek_to(&mut self, phys: u64) -> SecfsResult<()> {
        if self.pos != Some(phys) {
            self.pos = None;
            self.file.seek(SeekFrom::Start(phys))?;
            self.pos = Some(phys);
        }
        Ok(())
    }

    /// Physical length of the backing file. Leaves the cursor at the end.
    pub(crate) fn len(&mut self) -> SecfsResult<u64> {
        self.pos = None;
        let end = self.file.seek(SeekFrom::End(0))?;
        self.pos = Some(end);
        Ok(end)
    }

    /// Read until `buf` is full or end-of-file.
    pub(crate) fn read_some(&mut self, buf: &mut [u8]) -> SecfsResult<usize> {
        let start = self.pos.take();
        let n = self.file.read_full(buf)?;
        self.pos = start.map(|p| p + n as u64);
        Ok(n)
    }

    pub(crate) fn read_exact(&mut self, buf: &mut [u8]) -> SecfsResult<()> {
        let n = self.read_some(buf)?;
        if n < buf.len() {
            return Err(SecfsError::Backing(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("short block read: {n} of {} bytes", buf.len()),
            )));
        }
        Ok(())
    }

    pub(crate) fn write_all(&mut self, buf: &[u8]) -> SecfsResult<()> {
        let start = self.pos.take();
        self.file.write_all(buf)?;
        self.pos = start.map(|p| p + buf.len() as u64);
        Ok(())
    }

    pub(crate) fn into_inner(self) -> F {
        self.file
    }
}
