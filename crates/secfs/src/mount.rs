//! Mount: key, backing store, superblock marker and directory slots
//!
//! A mount is formatted once by writing an encrypted marker block at
//! `<prefix>/.secfs`. Mounting decrypts that block with the supplied key and
//! refuses to go on if it does not decrypt to the expected pattern, so a
//! wrong key is caught before any file is touched.

use std::sync::{Mutex, MutexGuard};

use secfs_backing::{Backing, BackingFile, Opened};
use secfs_core::config::MountConfig;
use secfs_core::{OpenFlags, SecfsError, SecfsResult};
use secfs_crypto::{BlockCipher, MountKey, SoftwareAes, BLOCK_SIZE};
use tracing::{debug, info, warn};

use crate::cursor::BackingCursor;
use crate::dir::{DirHandle, DirSlots, DIR_SLOTS};
use crate::file::SecFile;
use crate::header::{self, CipherMode, MAGIC};
use crate::names;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountOptions {
    /// Directory inside the backing store that holds this mount
    pub prefix: String,
    /// Check the content digest when an existing file is opened
    pub verify_hash: bool,
    /// Per-file cache size in cipher blocks
    pub cache_blocks: usize,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            verify_hash: true,
            cache_blocks: 4,
        }
    }
}

impl From<&MountConfig> for MountOptions {
    fn from(cfg: &MountConfig) -> Self {
        Self {
            prefix: cfg.prefix.clone(),
            verify_hash: cfg.verify_hash,
            cache_blocks: cfg.cache_blocks,
        }
    }
}

/// Metadata read from a file header without opening a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Logical length in bytes
    pub size: u64,
    pub pad_count: u8,
    pub mode: CipherMode,
}

/// The plaintext the superblock marker encrypts: the magic, four times.
fn marker_plaintext() -> [u8; BLOCK_SIZE] {
    let mut block = [0u8; BLOCK_SIZE];
    for word in block.chunks_exact_mut(4) {
        word.copy_from_slice(&MAGIC.to_be_bytes());
    }
    block
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct Mount<B: Backing> {
    backing: B,
    cipher: Box<dyn BlockCipher>,
    options: MountOptions,
    dirs: Mutex<DirSlots<B::Dir>>,
    /// Kept open for the lifetime of the mount
    marker: Mutex<Option<B::File>>,
}

impl<B: Backing> std::fmt::Debug for Mount<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mount")
            .field("options", &self.options)
            .field("open_dirs", &lock(&self.dirs).in_use())
            .finish_non_exhaustive()
    }
}

impl<B: Backing> Mount<B> {
    /// Write the superblock marker for `prefix`, replacing any existing one.
    pub fn format(backing: &B, cipher: &dyn BlockCipher, prefix: &str) -> SecfsResult<()> {
        let mut block = marker_plaintext();
        cipher.encrypt(&mut block)?;

        let path = names::marker_path(prefix);
        let Opened { file, .. } =
            backing.open(&path, OpenFlags::write_only().create().truncate())?;
        let mut cur = BackingCursor::new(file);
        let written = cur.write_all(&block);
        let released = cur.into_inner().close().map_err(SecfsError::from);
        written.and(released)?;

        info!(marker = %path, "formatted");
        Ok(())
    }

    /// Mount with an existing cipher. Fails with a bad-file error if the
    /// marker does not decrypt under this key.
    pub fn mount(
        backing: B,
        cipher: Box<dyn BlockCipher>,
        options: MountOptions,
    ) -> SecfsResult<Self> {
        if options.cache_blocks == 0 {
            return Err(SecfsError::InvalidArgument(
                "cache must hold at least one block".into(),
            ));
        }

        let path = names::marker_path(&options.prefix);
        let Opened { file, .. } = backing.open(&path, OpenFlags::read_only())?;
        let mut cur = BackingCursor::new(file);

        let checked = Self::check_marker(&mut cur, cipher.as_ref());
        if let Err(err) = checked {
            if let Err(e) = cur.into_inner().close() {
                warn!(marker = %path, "close after rejected mount: {e}");
            }
            return Err(err);
        }

        info!(
            prefix = %options.prefix,
            verify_hash = options.verify_hash,
            cache_blocks = options.cache_blocks,
            "mounted"
        );
        Ok(Self {
            backing,
            cipher,
            options,
            dirs: Mutex::new(DirSlots::new()),
            marker: Mutex::new(Some(cur.into_inner())),
        })
    }

    /// Mount with the software AES implementation keyed by `key`.
    pub fn with_key(backing: B, key: &MountKey, options: MountOptions) -> SecfsResult<Self> {
        Self::mount(backing, Box::new(SoftwareAes::new(key)), options)
    }

    fn check_marker(
        cur: &mut BackingCursor<B::File>,
        cipher: &dyn BlockCipher,
    ) -> SecfsResult<()> {
        let mut block = [0u8; BLOCK_SIZE];
        cur.seek_to(0)?;
        let n = cur.read_some(&mut block)?;
        if n < BLOCK_SIZE {
            return Err(SecfsError::bad_file(format!(
                "superblock marker truncated: {n} of {BLOCK_SIZE} bytes"
            )));
        }
        cipher.decrypt(&mut block)?;
        if block != marker_plaintext() {
            warn!("superblock marker mismatch");
            return Err(SecfsError::bad_file(
                "superblock marker mismatch (wrong key or unformatted prefix)",
            ));
        }
        Ok(())
    }

    /// Release the marker and any directory iterators still open.
    pub fn unmount(self) -> SecfsResult<()> {
        let mut result = Ok(());

        let mut dirs = self
            .dirs
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for dir in dirs.drain() {
            warn!("closing directory left open at unmount");
            if let Err(e) = self.backing.closedir(dir) {
                result = result.and(Err(SecfsError::from(e)));
            }
        }

        let marker = self
            .marker
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(file) = marker {
            result = result.and(file.close().map_err(SecfsError::from));
        }

        info!(prefix = %self.options.prefix, "unmounted");
        result
    }

    pub fn options(&self) -> &MountOptions {
        &self.options
    }

    pub fn backing(&self) -> &B {
        &self.backing
    }

    pub(crate) fn cipher(&self) -> &dyn BlockCipher {
        self.cipher.as_ref()
    }

    pub(crate) fn prefix(&self) -> &str {
        &self.options.prefix
    }

    pub(crate) fn verify_hash(&self) -> bool {
        self.options.verify_hash
    }

    pub(crate) fn cache_blocks(&self) -> usize {
        self.options.cache_blocks
    }

    /// Open (or create) the encrypted file `name`.
    pub fn open(&self, name: &str, flags: OpenFlags) -> SecfsResult<SecFile<'_, B>> {
        SecFile::open(self, name, flags)
    }

    pub fn unlink(&self, name: &str) -> SecfsResult<()> {
        let path = names::backing_name(self.prefix(), name)?;
        self.backing.unlink(&path)?;
        debug!(path = %path, "unlinked");
        Ok(())
    }

    /// Read the header of `name` and report its logical size.
    pub fn stat(&self, name: &str) -> SecfsResult<FileStat> {
        let path = names::backing_name(self.prefix(), name)?;
        let Opened { file, .. } = self.backing.open(&path, OpenFlags::read_only())?;
        let mut cur = BackingCursor::new(file);

        let stat = cur.len().and_then(|len| {
            let header = header::load_header(&mut cur, self.cipher())?;
            Ok(FileStat {
                size: header::logical_size(len, header.pad_count)?,
                pad_count: header.pad_count,
                mode: header.mode,
            })
        });
        let released = cur.into_inner().close().map_err(SecfsError::from);
        let stat = stat?;
        released?;
        Ok(stat)
    }

    /// Start listing directory `path` (relative to the mount prefix).
    pub fn opendir(&self, path: &str) -> SecfsResult<DirHandle> {
        let mut slots = lock(&self.dirs);
        if slots.is_full() {
            return Err(SecfsError::TooManyOpenDirs(DIR_SLOTS));
        }
        let dir = self.backing.opendir(&names::join(self.prefix(), path))?;
        slots.claim(dir).map_err(|dir| {
            let _ = self.backing.closedir(dir);
            SecfsError::TooManyOpenDirs(DIR_SLOTS)
        })
    }

    /// Next logical file name, or `None` at the end. Only `.sec` entries are
    /// reported, with the suffix stripped.
    pub fn readdir(&self, handle: DirHandle) -> SecfsResult<Option<String>> {
        let mut slots = lock(&self.dirs);
        let dir = slots
            .get_mut(handle)
            .ok_or(SecfsError::BadDirHandle(handle.slot()))?;
        while let Some(entry) = self.backing.readdir(dir)? {
            if let Some(name) = names::logical_name(&entry) {
                return Ok(Some(name.to_string()));
            }
        }
        Ok(None)
    }

    pub fn closedir(&self, handle: DirHandle) -> SecfsResult<()> {
        let dir = lock(&self.dirs)
            .release(handle)
            .ok_or(SecfsError::BadDirHandle(handle.slot()))?;
        self.backing.closedir(dir)?;
        Ok(())
    }

    /// Collect every logical name in directory `path`.
    pub fn list(&self, path: &str) -> SecfsResult<Vec<String>> {
        let handle = self.opendir(path)?;
        let mut names = Vec::new();
        let listed = loop {
            match self.readdir(handle) {
                Ok(Some(name)) => names.push(name),
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        let closed = self.closedir(handle);
        listed.and(closed)?;
        Ok(names)
    }
}
