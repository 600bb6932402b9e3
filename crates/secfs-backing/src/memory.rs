//! In-memory backing store
//!
//! Files live in a shared map, so clones of a `MemBacking` see the same
//! contents. Directories are implicit in the `/`-separated paths. Tests can
//! inspect and tamper with raw bytes, cap the number of bytes writes may
//! still accept, and count the handles that are currently open.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use secfs_core::{OpenFlags, SeekFrom};

use crate::{validate_path, Backing, BackingFile, Opened};

type Content = Arc<Mutex<Vec<u8>>>;

#[derive(Default)]
struct Shared {
    files: Mutex<BTreeMap<String, Content>>,
    /// Bytes writes may still accept; `None` = unlimited
    write_budget: Mutex<Option<usize>>,
    open_handles: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct MemBacking {
    shared: Arc<Shared>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking test thread must not wedge the others
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemBacking {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw stored bytes of `path`, if it exists.
    pub fn raw(&self, path: &str) -> Option<Vec<u8>> {
        lock(&self.shared.files)
            .get(path)
            .map(|content| lock(content).clone())
    }

    /// Replace (or create) the raw bytes of `path`.
    pub fn put_raw(&self, path: &str, bytes: &[u8]) {
        let mut files = lock(&self.shared.files);
        match files.get(path) {
            Some(content) => *lock(content) = bytes.to_vec(),
            None => {
                files.insert(path.to_string(), Arc::new(Mutex::new(bytes.to_vec())));
            }
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        lock(&self.shared.files).contains_key(path)
    }

    /// Allow at most `bytes` more bytes to be written; later writes fail
    /// with `StorageFull`.
    pub fn fail_writes_after(&self, bytes: usize) {
        *lock(&self.shared.write_budget) = Some(bytes);
    }

    pub fn clear_write_failures(&self) {
        *lock(&self.shared.write_budget) = None;
    }

    /// Number of file and directory handles currently open.
    pub fn open_handles(&self) -> usize {
        self.shared.open_handles.load(Ordering::SeqCst)
    }

    fn take_budget(&self, len: usize) -> io::Result<()> {
        let mut budget = lock(&self.shared.write_budget);
        match budget.as_mut() {
            Some(left) if *left < len => Err(io::Error::new(
                io::ErrorKind::StorageFull,
                "injected write failure",
            )),
            Some(left) => {
                *left -= len;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for MemBacking {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemBacking")
            .field("files", &lock(&self.shared.files).len())
            .field("open_handles", &self.open_handles())
            .finish()
    }
}

pub struct MemFile {
    content: Content,
    pos: u64,
    readable: bool,
    writable: bool,
    append: bool,
    owner: MemBacking,
}

impl std::fmt::Debug for MemFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemFile")
            .field("pos", &self.pos)
            .field("readable", &self.readable)
            .field("writable", &self.writable)
            .finish_non_exhaustive()
    }
}

impl Drop for MemFile {
    fn drop(&mut self) {
        self.owner.shared.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

impl BackingFile for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.readable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file not open for reading",
            ));
        }
        let data = lock(&self.content);
        let start = (self.pos as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.writable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file not open for writing",
            ));
        }
        self.owner.take_budget(buf.len())?;
        let mut data = lock(&self.content);
        if self.append {
            self.pos = data.len() as u64;
        }
        let start = self.pos as usize;
        let end = start + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        self.pos = end as u64;
        Ok(buf.len())
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = lock(&self.content).len() as i64;
        let target = match pos {
            SeekFrom::Start(off) => i64::try_from(off).ok(),
            SeekFrom::End(off) => len.checked_add(off),
            SeekFrom::Current(off) => (self.pos as i64).checked_add(off),
        };
        match target {
            Some(t) if t >= 0 => {
                self.pos = t as u64;
                Ok(self.pos)
            }
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing offset",
            )),
        }
    }

    fn close(self) -> io::Result<()> {
        Ok(())
    }
}

/// Snapshot of a directory's entry names taken at `opendir`.
pub struct MemDir {
    entries: std::vec::IntoIter<String>,
    owner: MemBacking,
}

impl std::fmt::Debug for MemDir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemDir")
            .field("remaining", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl Drop for MemDir {
    fn drop(&mut self) {
        self.owner.shared.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Backing for MemBacking {
    type File = MemFile;
    type Dir = MemDir;

    fn open(&self, path: &str, flags: OpenFlags) -> io::Result<Opened<MemFile>> {
        validate_path(path)?;
        if path.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty path"));
        }

        let mut files = lock(&self.shared.files);
        let (content, created) = match files.get(path) {
            Some(_) if flags.create && flags.exclusive => {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{path} already exists"),
                ))
            }
            Some(content) => (content.clone(), false),
            None if flags.create => {
                let content: Content = Arc::default();
                files.insert(path.to_string(), content.clone());
                (content, true)
            }
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{path} not found"),
                ))
            }
        };
        drop(files);

        if flags.truncate && flags.is_writable() {
            lock(&content).clear();
        }

        self.shared.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(Opened {
            file: MemFile {
                content,
                pos: 0,
                readable: flags.is_readable(),
                writable: flags.is_writable(),
                append: flags.append,
                owner: self.clone(),
            },
            created,
        })
    }

    fn unlink(&self, path: &str) -> io::Result<()> {
        match lock(&self.shared.files).remove(path) {
            Some(_) => Ok(()),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{path} not found"),
            )),
        }
    }

    fn opendir(&self, path: &str) -> io::Result<MemDir> {
        validate_path(path)?;
        let prefix = match path.trim_end_matches('/') {
            "" => String::new(),
            p => format!("{p}/"),
        };

        let files = lock(&self.shared.files);
        let mut names = BTreeSet::new();
        for key in files.keys() {
            if let Some(rest) = key.strip_prefix(prefix.as_str()) {
                let child = rest.split('/').next().unwrap_or(rest);
                if !child.is_empty() {
                    names.insert(child.to_string());
                }
            }
        }
        if names.is_empty() && !prefix.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("directory {path} not found"),
            ));
        }

        self.shared.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(MemDir {
            entries: names.into_iter().collect::<Vec<_>>().into_iter(),
            owner: self.clone(),
        })
    }

    fn readdir(&self, dir: &mut MemDir) -> io::Result<Option<String>> {
        Ok(dir.entries.next())
    }

    fn closedir(&self, dir: MemDir) -> io::Result<()> {
        drop(dir);
        Ok(())
    }
}
