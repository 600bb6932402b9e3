//! Mount key type and random key/salt generation

use rand::RngCore;
use zeroize::Zeroize;

use crate::{KEY_SIZE, SALT_SIZE};

/// The 128-bit AES key of one mount. Zeroized on drop.
#[derive(Clone)]
pub struct MountKey {
    bytes: [u8; KEY_SIZE],
}

impl MountKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Build a key from a slice, e.g. the decoded contents of a key file.
    pub fn from_slice(bytes: &[u8]) -> anyhow::Result<Self> {
        let arr: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            anyhow::anyhow!(
                "mount key has wrong size: {} bytes (expected {KEY_SIZE})",
                bytes.len()
            )
        })?;
        Ok(Self::from_bytes(arr))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for MountKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random mount key.
pub fn generate_mount_key() -> MountKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    MountKey::from_bytes(bytes)
}

/// Generate a random Argon2id salt.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_key_generation() {
        let k1 = generate_mount_key();
        let k2 = generate_mount_key();
        assert_ne!(k1.as_bytes(), k2.as_bytes(), "random keys must differ");
    }

    #[test]
    fn test_from_slice_checks_length() {
        assert!(MountKey::from_slice(&[0u8; KEY_SIZE]).is_ok());
        assert!(MountKey::from_slice(&[0u8; 32]).is_err());
        assert!(MountKey::from_slice(&[]).is_err());
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = MountKey::from_bytes([0xAB; KEY_SIZE]);
        let dbg = format!("{key:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains("171"));
    }

    #[test]
    fn test_salt_generation() {
        assert_ne!(generate_salt(), generate_salt());
    }
}
