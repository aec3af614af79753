//! Token digests
//!
//! Token tables are keyed by SHA-256 of the token string, so a leaked table
//! yields no usable bearer or refresh tokens.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of a token
pub fn token_digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Short digest prefix, safe to log
pub fn log_fingerprint(token: &str) -> String {
    token_digest(token)[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_stable_hex() {
        let a = token_digest("abc");
        assert_eq!(a.len(), 64);
        assert_eq!(a, token_digest("abc"));
        assert_eq!(
            a,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_ne!(a, token_digest("abd"));
    }

    #[test]
    fn test_fingerprint() {
        assert_eq!(log_fingerprint("abc"), "ba7816bf");
    }
}
