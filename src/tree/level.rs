use sha2::{Digest, Sha256};

use crate::types::Level;

/// Deterministic pseudo-random level of a key.
///
/// The level is the number of leading zero bits in the first eight bytes of the
/// SHA-256 digest of the key text, so half of all keys land on level 0, a quarter on
/// level 1 and so on. The same text always yields the same level.
pub fn extract_level(key_text: &str) -> Level {
    let digest = Sha256::digest(key_text.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    Level::from(u64::from_be_bytes(prefix).leading_zeros())
}
