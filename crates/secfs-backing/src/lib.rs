//! secfs-backing: the byte-addressable file store underneath the encrypted layer
//!
//! The encrypted layer only needs POSIX-shaped calls: open/read/write/seek/
//! close on files, unlink, and a directory iterator. Two stores ship here:
//!
//! - [`LocalBacking`]: a directory on the host file system (std::fs)
//! - [`MemBacking`]: an in-memory store with write-failure injection, used
//!   by the test suites
//!
//! Paths are relative, `/`-separated strings; `""` is the store's root.

pub mod health;
pub mod local;
pub mod memory;

use std::io;

use secfs_core::{OpenFlags, SeekFrom};

pub use health::check_health;
pub use local::LocalBacking;
pub use memory::MemBacking;

/// An open file in the backing store.
pub trait BackingFile: Send {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64>;

    fn close(self) -> io::Result<()>
    where
        Self: Sized;

    /// Read until `buf` is full or end-of-file. Returns the bytes read.
    fn read_full(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn write_all(&mut self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.write(buf) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "backing store accepted zero bytes",
                    ))
                }
                Ok(n) => buf = &buf[n..],
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Result of a backing open: the handle, and whether this call created the file.
#[derive(Debug)]
pub struct Opened<F> {
    pub file: F,
    pub created: bool,
}

/// A backing file system.
pub trait Backing: Send + Sync {
    type File: BackingFile;
    type Dir: Send;

    /// Open `path`. With `flags.create`, `created` reports whether the file
    /// did not exist before this call.
    fn open(&self, path: &str, flags: OpenFlags) -> io::Result<Opened<Self::File>>;

    fn unlink(&self, path: &str) -> io::Result<()>;

    fn opendir(&self, path: &str) -> io::Result<Self::Dir>;

    /// Next entry name in the directory, `None` at the end.
    fn readdir(&self, dir: &mut Self::Dir) -> io::Result<Option<String>>;

    fn closedir(&self, dir: Self::Dir) -> io::Result<()>;
}

/// Reject paths that would escape the store root.
pub(crate) fn validate_path(path: &str) -> io::Result<()> {
    if path.starts_with('/') || path.split('/').any(|c| c == "..") {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path escapes the backing root: {path:?}"),
        ));
    }
    Ok(())
}
