//! Backing store rooted at a host directory

use std::fs::{File, OpenOptions, ReadDir};
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};

use secfs_core::{OpenFlags, SeekFrom};

use crate::{validate_path, Backing, BackingFile, Opened};

#[derive(Debug, Clone)]
pub struct LocalBacking {
    root: PathBuf,
}

impl LocalBacking {
    /// Use `root` as the backing root. The directory must already exist.
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("backing root is not a directory: {}", root.display()),
            ));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        validate_path(path)?;
        if path.is_empty() {
            Ok(self.root.clone())
        } else {
            Ok(self.root.join(path))
        }
    }
}

#[derive(Debug)]
pub struct LocalFile {
    file: File,
}

impl BackingFile for LocalFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }

    fn close(self) -> io::Result<()> {
        drop(self.file);
        Ok(())
    }
}

impl Backing for LocalBacking {
    type File = LocalFile;
    type Dir = ReadDir;

    fn open(&self, path: &str, flags: OpenFlags) -> io::Result<Opened<LocalFile>> {
        let full = self.resolve(path)?;
        let writable = flags.is_writable();

        let mut opts = OpenOptions::new();
        opts.read(flags.is_readable())
            .write(writable)
            .append(flags.append && writable)
            .truncate(flags.truncate && writable && !flags.append);

        if flags.create && flags.exclusive {
            let file = opts.create_new(true).open(&full)?;
            return Ok(Opened {
                file: LocalFile { file },
                created: true,
            });
        }

        if flags.create {
            // create_new tells us whether this call brought the file into being
            match opts.clone().create_new(true).open(&full) {
                Ok(file) => {
                    return Ok(Opened {
                        file: LocalFile { file },
                        created: true,
                    })
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e),
            }
        }

        let file = opts.open(&full)?;
        Ok(Opened {
            file: LocalFile { file },
            created: false,
        })
    }

    fn unlink(&self, path: &str) -> io::Result<()> {
        let full = self.resolve(path)?;
        tracing::trace!(path = %full.display(), "remove");
        std::fs::remove_file(full)
    }

    fn opendir(&self, path: &str) -> io::Result<ReadDir> {
        std::fs::read_dir(self.resolve(path)?)
    }

    fn readdir(&self, dir: &mut ReadDir) -> io::Result<Option<String>> {
        match dir.next() {
            Some(entry) => Ok(Some(entry?.file_name().to_string_lossy().into_owned())),
            None => Ok(None),
        }
    }

    fn closedir(&self, dir: ReadDir) -> io::Result<()> {
        drop(dir);
        Ok(())
    }
}
