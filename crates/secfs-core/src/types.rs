pub use std::io::SeekFrom;

/// Access mode requested at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Access {
    #[default]
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

/// Open flags understood by the encrypted layer and the backing stores.
///
/// The POSIX vocabulary (`O_RDONLY`, `O_CREAT`, `O_APPEND`, ...) expressed
/// as plain fields; combine with the builder methods:
///
/// ```
/// use secfs_core::OpenFlags;
/// let flags = OpenFlags::write_only().create().truncate();
/// assert!(flags.is_writable());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags {
    pub access: Access,
    pub create: bool,
    pub exclusive: bool,
    pub truncate: bool,
    pub append: bool,
}

impl OpenFlags {
    pub const fn read_only() -> Self {
        Self::with_access(Access::ReadOnly)
    }

    pub const fn write_only() -> Self {
        Self::with_access(Access::WriteOnly)
    }

    pub const fn read_write() -> Self {
        Self::with_access(Access::ReadWrite)
    }

    const fn with_access(access: Access) -> Self {
        Self {
            access,
            create: false,
            exclusive: false,
            truncate: false,
            append: false,
        }
    }

    pub const fn create(mut self) -> Self {
        self.create = true;
        self
    }

    /// `O_EXCL`: only meaningful together with `create`.
    pub const fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub const fn truncate(mut self) -> Self {
        self.truncate = true;
        self
    }

    pub const fn append(mut self) -> Self {
        self.append = true;
        self
    }

    pub fn is_readable(&self) -> bool {
        matches!(self.access, Access::ReadOnly | Access::ReadWrite)
    }

    pub fn is_writable(&self) -> bool {
        matches!(self.access, Access::WriteOnly | Access::ReadWrite)
    }
}
