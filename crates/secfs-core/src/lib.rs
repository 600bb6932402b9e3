pub mod config;
pub mod error;
pub mod types;

pub use config::SecfsConfig;
pub use error::{SecfsError, SecfsResult};
pub use types::{Access, OpenFlags, SeekFrom};
