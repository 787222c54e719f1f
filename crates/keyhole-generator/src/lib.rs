//! Short-code generation for the Keyhole URL shortener.
//!
//! Generators are pure: they never touch storage. Collision handling, if
//! any, belongs to the backend consuming the code.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

/// Number of random bytes drawn per short code. Four bytes encode to six
/// base64url characters; collisions at this length are an accepted risk.
pub const CODE_LENGTH: usize = 4;

/// Trait for generating short codes.
///
/// Implementations are stateless with respect to storage and are free to
/// produce any URL-safe string.
pub trait Generator: Send + Sync + 'static {
    /// Generates the next short code.
    fn generate(&self) -> String;
}

/// Generates codes from a cryptographically secure random source, encoded
/// as URL-safe base64 without padding.
#[derive(Debug, Clone)]
pub struct RandomGenerator {
    length: usize,
}

impl RandomGenerator {
    /// Creates a generator drawing [`CODE_LENGTH`] bytes per code.
    pub fn new() -> Self {
        Self::with_length(CODE_LENGTH)
    }

    /// Creates a generator drawing `length` random bytes per code.
    pub fn with_length(length: usize) -> Self {
        Self { length }
    }
}

impl Default for RandomGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Generator for RandomGenerator {
    fn generate(&self) -> String {
        let mut bytes = vec![0u8; self.length];
        // OsRng defers to the operating system's CSPRNG and cannot be
        // observed failing short of a broken platform.
        OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_length_is_six_characters() {
        let code = RandomGenerator::new().generate();
        assert_eq!(code.len(), 6);
    }

    #[test]
    fn custom_length() {
        // 9 bytes -> 12 base64 characters, no padding remainder.
        let code = RandomGenerator::with_length(9).generate();
        assert_eq!(code.len(), 12);
    }

    #[test]
    fn codes_are_url_safe() {
        let generator = RandomGenerator::new();
        for _ in 0..100 {
            let code = generator.generate();
            assert!(
                code.chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
                "unexpected character in '{}'",
                code
            );
        }
    }

    #[test]
    fn codes_vary() {
        let generator = RandomGenerator::new();
        let first = generator.generate();
        let distinct = (0..32).any(|_| generator.generate() != first);
        assert!(distinct);
    }
}
