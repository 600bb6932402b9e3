//! secfs-crypto: the block codec behind the encrypted file layer
//!
//! Two primitives, both treated as black boxes by the layer above:
//!
//! ```text
//! BlockCipher   AES-128, one 16-byte block at a time, no chaining
//!               (identical plaintext blocks give identical ciphertext)
//! ContentDigest SHA-256, streaming, 32-byte output
//! ```
//!
//! The mount key is a raw 128-bit AES key. It is read from a key file or
//! derived from a passphrase with Argon2id.

pub mod block;
pub mod digest;
pub mod kdf;
pub mod keys;

pub use block::{BlockCipher, SoftwareAes};
pub use digest::{ContentDigest, Digest};
pub use kdf::{derive_mount_key, KdfParams};
pub use keys::{generate_mount_key, generate_salt, MountKey};

/// Size of one cipher block in bytes
pub const BLOCK_SIZE: usize = 16;

/// Size of a mount key in bytes (AES-128)
pub const KEY_SIZE: usize = 16;

/// Size of a content digest in bytes (SHA-256)
pub const DIGEST_SIZE: usize = 32;

/// Size of an Argon2id salt in bytes
pub const SALT_SIZE: usize = 16;
