//! Streaming SHA-256 over file content

use sha2::{Digest as _, Sha256};

use crate::DIGEST_SIZE;

/// A finished content digest.
pub type Digest = [u8; DIGEST_SIZE];

/// Incremental digest state: `new()`, any number of `update()`s, `finalize()`.
#[derive(Clone, Default)]
pub struct ContentDigest {
    inner: Sha256,
}

impl ContentDigest {
    pub fn new() -> Self {
        Self {
            inner: Sha256::new(),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    pub fn finalize(self) -> Digest {
        self.inner.finalize().into()
    }

    /// One-shot digest of a byte slice.
    pub fn of(bytes: &[u8]) -> Digest {
        let mut d = Self::new();
        d.update(bytes);
        d.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_digest_matches_known_value() {
        let d = ContentDigest::of(b"");
        assert_eq!(d[..4], [0xe3, 0xb0, 0xc4, 0x42]);
    }

    #[test]
    fn different_content_different_digest() {
        assert_ne!(ContentDigest::of(b"foo"), ContentDigest::of(b"bar"));
    }

    proptest! {
        #[test]
        fn streaming_matches_one_shot(
            data in proptest::collection::vec(any::<u8>(), 0..=2048),
            split in 0usize..=2048,
        ) {
            let split = split.min(data.len());
            let mut d = ContentDigest::new();
            d.update(&data[..split]);
            d.update(&data[split..]);
            prop_assert_eq!(d.finalize(), ContentDigest::of(&data));
        }
    }
}
