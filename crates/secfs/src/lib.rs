//! secfs: transparent per-block encryption over any backing file system
//!
//! Every logical file `name` is stored as `<prefix>/name.sec`:
//!
//! ```text
//! [ header: 48 bytes ][ block 0 ][ block 1 ] ... [ block n (padded) ]
//! ```
//!
//! The header carries the magic, the tail pad count and a SHA-256 of the
//! stored content. Blocks are AES-128 encrypted independently, so a write
//! only re-encrypts the blocks it touches. Callers see plain bytes through
//! [`SecFile`], which also implements `std::io::{Read, Write, Seek}`.
//!
//! ```no_run
//! use std::io::Write;
//! use secfs::{Mount, MountOptions, OpenFlags};
//! use secfs_backing::LocalBacking;
//! use secfs_crypto::{generate_mount_key, SoftwareAes};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backing = LocalBacking::new("/var/lib/secfs")?;
//! let key = generate_mount_key();
//! Mount::format(&backing, &SoftwareAes::new(&key), "")?;
//!
//! let mount = Mount::with_key(backing, &key, MountOptions::default())?;
//! let mut f = mount.open("notes.txt", OpenFlags::write_only().create())?;
//! f.write_all(b"hello")?;
//! f.close()?;
//! mount.unmount()?;
//! # Ok(())
//! # }
//! ```

mod cache;
mod cursor;
pub mod dir;
pub mod file;
pub mod header;
pub mod mount;
pub mod names;

pub use dir::{DirHandle, DIR_SLOTS};
pub use file::SecFile;
pub use header::{CipherMode, Header, HEADER_SIZE, MAGIC};
pub use mount::{FileStat, Mount, MountOptions};
pub use secfs_core::{Access, OpenFlags, SecfsError, SecfsResult, SeekFrom};
