use thiserror::Error;

pub type SecfsResult<T> = Result<T, SecfsError>;

#[derive(Debug, Error)]
pub enum SecfsError {
    /// Error reported by the backing file system, passed through unchanged.
    #[error("backing store error: {0}")]
    Backing(#[from] std::io::Error),

    /// Wrong key, foreign file, corrupted header or content digest mismatch.
    #[error("bad file: {0}")]
    BadFile(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("internal consistency error: {0}")]
    Inconsistent(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("operation not permitted: {0}")]
    NotPermitted(String),

    #[error("too many open directories (limit {0})")]
    TooManyOpenDirs(usize),

    #[error("bad directory handle: {0}")]
    BadDirHandle(usize),

    #[error("config error: {0}")]
    Config(String),
}

impl SecfsError {
    /// True for the "bad file" class: the data on disk is not something this
    /// key can make sense of, as opposed to a device or usage failure.
    pub fn is_corruption(&self) -> bool {
        matches!(self, SecfsError::BadFile(_))
    }

    pub fn bad_file(msg: impl Into<String>) -> Self {
        SecfsError::BadFile(msg.into())
    }
}

impl From<SecfsError> for std::io::Error {
    fn from(err: SecfsError) -> Self {
        use std::io::ErrorKind;

        if let SecfsError::Backing(inner) = err {
            return inner;
        }
        let kind = match &err {
            SecfsError::Backing(_) => ErrorKind::Other,
            SecfsError::BadFile(_) => ErrorKind::InvalidData,
            SecfsError::InvalidArgument(_) | SecfsError::Config(_) => ErrorKind::InvalidInput,
            SecfsError::NotPermitted(_) => ErrorKind::PermissionDenied,
            SecfsError::Codec(_)
            | SecfsError::Inconsistent(_)
            | SecfsError::TooManyOpenDirs(_)
            | SecfsError::BadDirHandle(_) => ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}
