use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{SecfsError, SecfsResult};

/// Top-level configuration (loaded from secfs.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecfsConfig {
    pub mount: MountConfig,
    pub crypto: CryptoConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    /// Local directory acting as the backing file system
    pub backing_root: PathBuf,
    /// Mount path inside the backing file system ("" = backing root)
    pub prefix: String,
    /// Recompute and compare the content digest on every non-create open
    pub verify_hash: bool,
    /// Per-file cache size in cipher blocks (default: 4)
    pub cache_blocks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// File holding the base64-encoded mount key
    pub key_file: Option<PathBuf>,
    /// Base64 Argon2id salt, used when the key comes from a passphrase
    pub salt: Option<String>,
    /// Argon2id memory cost in KiB (default: 65536 = 64 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Argon2id time cost (iterations, default: 3)
    pub argon2_time_cost: u32,
    /// Argon2id parallelism (default: 4)
    pub argon2_parallelism: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            backing_root: PathBuf::from("/var/lib/secfs"),
            prefix: String::new(),
            verify_hash: true,
            cache_blocks: 4,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            key_file: None,
            salt: None,
            argon2_mem_cost_kib: 65536,
            argon2_time_cost: 3,
            argon2_parallelism: 4,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl SecfsConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> SecfsResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| SecfsError::Config(format!("reading {}: {e}", path.display())))?;
        let config: SecfsConfig = toml::from_str(&content)
            .map_err(|e| SecfsError::Config(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SecfsResult<()> {
        if self.mount.cache_blocks == 0 {
            return Err(SecfsError::Config("mount.cache_blocks must be at least 1".into()));
        }
        if let Some(salt) = &self.crypto.salt {
            let decoded = STANDARD
                .decode(salt)
                .map_err(|e| SecfsError::Config(format!("crypto.salt is not base64: {e}")))?;
            if decoded.len() < 8 {
                return Err(SecfsError::Config(format!(
                    "crypto.salt too short: {} bytes (minimum 8)",
                    decoded.len()
                )));
            }
        }
        match self.log.format.as_str() {
            "json" | "text" => Ok(()),
            other => Err(SecfsError::Config(format!("unknown log.format: {other}"))),
        }
    }

    /// Decoded Argon2id salt, if one is configured.
    pub fn salt_bytes(&self) -> SecfsResult<Option<Vec<u8>>> {
        self.crypto
            .salt
            .as_deref()
            .map(|s| {
                STANDARD
                    .decode(s)
                    .map_err(|e| SecfsError::Config(format!("crypto.salt is not base64: {e}")))
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[mount]
backing_root = "/srv/vault"
prefix = "secure"
verify_hash = false
cache_blocks = 8

[crypto]
key_file = "/etc/secfs/mount.key"
salt = "AAECAwQFBgcICQoLDA0ODw=="
argon2_mem_cost_kib = 131072
argon2_time_cost = 4
argon2_parallelism = 8

[log]
level = "debug"
format = "json"
"#;
        let config: SecfsConfig = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();

        assert_eq!(config.mount.backing_root, PathBuf::from("/srv/vault"));
        assert_eq!(config.mount.prefix, "secure");
        assert!(!config.mount.verify_hash);
        assert_eq!(config.mount.cache_blocks, 8);
        assert_eq!(
            config.crypto.key_file,
            Some(PathBuf::from("/etc/secfs/mount.key"))
        );
        assert_eq!(config.crypto.argon2_mem_cost_kib, 131072);
        assert_eq!(config.log.format, "json");
        assert_eq!(config.salt_bytes().unwrap().unwrap(), (0u8..16).collect::<Vec<_>>());
    }

    #[test]
    fn test_parse_defaults() {
        let config: SecfsConfig = toml::from_str("").unwrap();

        assert_eq!(config.mount.backing_root, PathBuf::from("/var/lib/secfs"));
        assert_eq!(config.mount.prefix, "");
        assert!(config.mount.verify_hash);
        assert_eq!(config.mount.cache_blocks, 4);
        assert!(config.crypto.key_file.is_none());
        assert_eq!(config.crypto.argon2_mem_cost_kib, 65536);
        assert_eq!(config.log.level, "info");
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[mount]
verify_hash = false
"#;
        let config: SecfsConfig = toml::from_str(toml_str).unwrap();

        // Overridden
        assert!(!config.mount.verify_hash);
        // Defaults
        assert_eq!(config.mount.cache_blocks, 4);
        assert_eq!(config.log.format, "text");
    }

    #[test]
    fn test_zero_cache_blocks_rejected() {
        let config: SecfsConfig = toml::from_str("[mount]\ncache_blocks = 0\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, SecfsError::Config(_)));
    }

    #[test]
    fn test_short_salt_rejected() {
        let config: SecfsConfig = toml::from_str("[crypto]\nsalt = \"AAEC\"\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SecfsConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.mount.cache_blocks, 4);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secfs.toml");
        std::fs::write(&path, "[mount]\nprefix = \"vault\"\n").unwrap();
        let config = SecfsConfig::load(&path).unwrap();
        assert_eq!(config.mount.prefix, "vault");
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = SecfsConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: SecfsConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.mount.backing_root, parsed.mount.backing_root);
        assert_eq!(config.mount.cache_blocks, parsed.mount.cache_blocks);
        assert_eq!(config.log.level, parsed.log.level);
    }
}
