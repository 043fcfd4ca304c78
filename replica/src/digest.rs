//! Stateless checkpoint fingerprinting.

use digest::Digest;
use sha3::Sha3_256;

/// Number of bytes in a snapshot digest.
pub const DIGEST_LEN: usize = 32;

/// Computes the SHA3-256 digest of a byte snapshot.
///
/// Pure function of its input, so it can be called from any thread without
/// coordination.
pub fn digest(data: &[u8]) -> Vec<u8> {
    Sha3_256::digest(data).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_length() {
        assert_eq!(digest(b"").len(), DIGEST_LEN);
        assert_eq!(digest(b"some snapshot bytes").len(), DIGEST_LEN);
    }

    #[test]
    fn test_digest_deterministic() {
        assert_eq!(digest(b"snapshot"), digest(b"snapshot"));
        assert_ne!(digest(b"snapshot"), digest(b"snapshot!"));
    }
}
