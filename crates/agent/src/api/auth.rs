use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

use super::error::ApiError;
use super::App;

pub const ADMIN_PIN_HEADER: &str = "X-Admin-PIN";

/// Gate an admin operation on the `X-Admin-PIN` header. The configured value
/// is a SHA-256 hex digest; the comparison runs over every byte regardless
/// of where a mismatch occurs.
pub fn require_admin_pin(app: &App, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = app.admin_pin_hash.as_deref() else {
        return Err(ApiError::internal("admin PIN not configured"));
    };
    let Some(pin) = headers.get(ADMIN_PIN_HEADER).and_then(|v| v.to_str().ok()) else {
        return Err(ApiError::unauthorized("admin PIN required"));
    };

    let digest = hex::encode(Sha256::digest(pin.as_bytes()));
    if constant_time_eq(digest.as_bytes(), expected.to_ascii_lowercase().as_bytes()) {
        Ok(())
    } else {
        Err(ApiError::forbidden("invalid admin PIN"))
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Digest helper for provisioning `ADMIN_PIN_HASH`.
pub fn hash_pin(pin: &str) -> String {
    hex::encode(Sha256::digest(pin.as_bytes()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn digest_is_sha256_hex() {
        assert_eq!(
            hash_pin("1234"),
            "03ac674216f3e15c761ee1a5e255f067953623c8b388b4459e13f978d7c846f4"
        );
    }

    #[test]
    fn comparison_requires_equal_bytes() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
