//! Day-scoped visitor fingerprints
//!
//! A fingerprint is `SHA-256(secret, domain, ip, user_agent)` rendered as
//! lowercase hex. Every field is prefixed with its length as a big-endian
//! `u64`, so `("ab", "c")` and `("a", "bc")` hash differently.

use sha2::{Digest, Sha256};

/// Length in characters of every fingerprint
pub const FINGERPRINT_LEN: usize = 64;

pub fn fingerprint(secret: &[u8], domain: &str, ip: &str, user_agent: &str) -> String {
    let mut hasher = Sha256::new();

    for field in [secret, domain.as_bytes(), ip.as_bytes(), user_agent.as_bytes()] {
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field);
    }

    hex::encode(hasher.finalize())
}
