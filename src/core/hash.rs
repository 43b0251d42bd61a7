//! Galaxy State Digest
//!
//! SHA-256 over the serialized star records. Host and client compute the
//! same digest once a client mirror has caught up, which makes divergence
//! easy to spot in logs and tests.

use sha2::{Digest, Sha256};

/// Hash output type (256 bits / 32 bytes)
pub type StateHash = [u8; 32];

/// Domain separator for star map digests.
pub const MAP_DOMAIN: &[u8] = b"STARSIEGE_MAP_V1";

/// Incremental hasher with a domain separator.
///
/// Order of updates matters; callers feed records in ascending id order.
pub struct StateHasher {
    hasher: Sha256,
}

impl StateHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Hasher for star map contents.
    pub fn for_star_map() -> Self {
        Self::new(MAP_DOMAIN)
    }

    /// Update with raw bytes.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Update with a u32 value.
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_be_bytes());
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> StateHash {
        self.hasher.finalize().into()
    }
}

/// Short hex prefix for log lines.
pub fn short_hex(hash: &StateHash) -> String {
    hex::encode(&hash[..8])
}
