//! Backing store health check

use std::io;

use crate::Backing;

/// Verify the backing store is reachable by listing `path`.
pub fn check_health<B: Backing>(backing: &B, path: &str) -> io::Result<()> {
    // Opening and closing a directory is the lightest check the contract offers
    let dir = backing.opendir(path).map_err(|e| {
        tracing::warn!(path, "backing health check failed: {e}");
        io::Error::new(e.kind(), format!("backing health check failed for {path:?}: {e}"))
    })?;
    backing.closedir(dir)
}
