//! Logical name ↔ backing name translation
//!
//! Every encrypted file is stored as `<prefix>/<logical-name>.sec`. The
//! superblock marker sits at `<prefix>/.secfs`; directory listings only
//! surface `.sec` entries, with the suffix stripped.
//!
//! ```text
//! logical            backing (prefix = "vault")
//! notes.txt     →    vault/notes.txt.sec
//! /a/b.bin      →    vault/a/b.bin.sec
//! ```

use secfs_core::{SecfsError, SecfsResult};

/// Suffix appended to every encrypted backing file
pub const SEC_SUFFIX: &str = ".sec";

/// Reserved name of the per-mount superblock marker
pub const MARKER_NAME: &str = ".secfs";

/// Join a mount prefix and a relative path with exactly one separator.
pub fn join(prefix: &str, rel: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let rel = rel.trim_start_matches('/');
    match (prefix.is_empty(), rel.is_empty()) {
        (true, _) => rel.to_string(),
        (false, true) => prefix.to_string(),
        (false, false) => format!("{prefix}/{rel}"),
    }
}

/// Translate a logical file name to its backing path.
///
/// `notes.txt` → `{prefix}/notes.txt.sec`
pub fn backing_name(prefix: &str, name: &str) -> SecfsResult<String> {
    let rel = name.trim_start_matches('/');
    if rel.is_empty() || rel.ends_with('/') {
        return Err(SecfsError::InvalidArgument(format!(
            "not a file name: {name:?}"
        )));
    }
    Ok(format!("{}{SEC_SUFFIX}", join(prefix, rel)))
}

/// Path of the superblock marker for a mount prefix.
pub fn marker_path(prefix: &str) -> String {
    join(prefix, MARKER_NAME)
}

/// Map a backing directory entry to the logical name it represents.
///
/// `notes.txt.sec` → `Some("notes.txt")`; anything else → `None`.
pub fn logical_name(entry: &str) -> Option<&str> {
    entry
        .strip_suffix(SEC_SUFFIX)
        .filter(|stripped| !stripped.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backing_name_appends_suffix() {
        assert_eq!(backing_name("", "f").unwrap(), "f.sec");
        assert_eq!(backing_name("vault", "notes.txt").unwrap(), "vault/notes.txt.sec");
        assert_eq!(backing_name("/vault/", "/a/b.bin").unwrap(), "vault/a/b.bin.sec");
    }

    #[test]
    fn backing_name_rejects_non_files() {
        assert!(backing_name("vault", "").is_err());
        assert!(backing_name("vault", "/").is_err());
        assert!(backing_name("vault", "dir/").is_err());
    }

    #[test]
    fn marker_lives_under_prefix() {
        assert_eq!(marker_path(""), ".secfs");
        assert_eq!(marker_path("vault"), "vault/.secfs");
    }

    #[test]
    fn listing_filter() {
        assert_eq!(logical_name("notes.txt.sec"), Some("notes.txt"));
        assert_eq!(logical_name(".secfs"), None);
        assert_eq!(logical_name("plain.txt"), None);
        assert_eq!(logical_name(".sec"), None);
    }

    #[test]
    fn join_normalises_separators() {
        assert_eq!(join("", ""), "");
        assert_eq!(join("a/", "/b"), "a/b");
        assert_eq!(join("a", ""), "a");
    }
}
