//! Token primitives shared by the CSRF store and the session collaborator.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::TryRngCore;
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Number of random bytes behind every opaque token.
pub const TOKEN_BYTES: usize = 32;

#[derive(Debug, Error)]
#[error("entropy source unavailable: {0}")]
pub struct EntropyError(String);

/// Returns `TOKEN_BYTES` bytes from the operating system RNG, base64url encoded without padding.
pub fn random_token() -> Result<String, EntropyError> {
    let mut buf = [0u8; TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| EntropyError(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(buf))
}

/// Byte comparison whose running time does not depend on the position of the first mismatch.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_url_safe_and_unique() {
        let a = random_token().unwrap();
        let b = random_token().unwrap();
        assert_ne!(a, b);
        // 32 bytes -> 43 base64 chars without padding
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn constant_time_eq_matches_plain_equality() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
        assert!(!constant_time_eq("", "a"));
    }
}
