//! Random identifier generation.
//!
//! Stateless: callers that need uniqueness check the result against their
//! own set and draw again.

use rand::Rng;

use crate::error::{CoreError, CoreResult};

/// Uppercase ASCII letters and digits.
pub const UPPER_ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generates a random identifier of `len` characters drawn from `charset`.
///
/// Returns an empty string when `charset` is empty.
pub fn generate_identifier(len: usize, charset: &[u8]) -> String {
    if charset.is_empty() {
        return String::new();
    }

    let mut rng = rand::rng();
    (0..len)
        .map(|_| charset[rng.random_range(0..charset.len())] as char)
        .collect()
}

/// Draws allowed per [`generate_unique`] call.
pub const MAX_UNIQUE_ATTEMPTS: usize = 10_000;

/// Generates an identifier not contained in `taken`.
///
/// Gives up after [`MAX_UNIQUE_ATTEMPTS`] draws.
pub fn generate_unique<F>(len: usize, charset: &[u8], mut taken: F) -> CoreResult<String>
where
    F: FnMut(&str) -> bool,
{
    for _ in 0..MAX_UNIQUE_ATTEMPTS {
        let candidate = generate_identifier(len, charset);
        if !taken(&candidate) {
            return Ok(candidate);
        }
    }
    Err(CoreError::IdentifiersExhausted {
        len,
        attempts: MAX_UNIQUE_ATTEMPTS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_length_and_charset() {
        let id = generate_identifier(6, UPPER_ALPHANUMERIC);
        assert_eq!(id.len(), 6);
        assert!(id.bytes().all(|b| UPPER_ALPHANUMERIC.contains(&b)));
    }

    #[test]
    fn test_empty_charset() {
        assert_eq!(generate_identifier(4, b""), "");
    }

    #[test]
    fn test_unique_skips_taken() {
        let taken: HashSet<String> = ["A", "B"].iter().map(|s| s.to_string()).collect();
        let id = generate_unique(1, b"ABC", |c| taken.contains(c)).unwrap();
        assert_eq!(id, "C");
    }

    #[test]
    fn test_unique_gives_up_when_exhausted() {
        let err = generate_unique(1, b"AB", |_| true).unwrap_err();
        assert!(matches!(
            err,
            CoreError::IdentifiersExhausted { len: 1, attempts: MAX_UNIQUE_ATTEMPTS }
        ));
    }
}
