//! Input validation and normalization for credentials.
//!
//! Login identifiers are unique case-insensitively, so every identifier is
//! normalized before it reaches a store or a token.

use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

/// Validation error types.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    /// Input is empty after trimming.
    #[error("Input is empty")]
    Empty,

    /// Input exceeds maximum allowed length.
    #[error("Input exceeds maximum length ({max} bytes, got {actual})")]
    TooLong {
        /// Maximum allowed length.
        max: usize,
        /// Actual input length.
        actual: usize,
    },

    /// Input is shorter than the minimum length.
    #[error("Input is shorter than minimum length ({min} characters, got {actual})")]
    TooShort {
        /// Minimum required length.
        min: usize,
        /// Actual input length.
        actual: usize,
    },

    /// Disallowed characters in input.
    #[error("Disallowed characters in input")]
    DisallowedChars,
}

/// Size limits per input type.
pub mod limits {
    /// Maximum login identifier length (an email address fits).
    pub const MAX_IDENTIFIER_LENGTH: usize = 254;

    /// Minimum secret length in characters.
    pub const MIN_SECRET_LENGTH: usize = 8;

    /// Maximum secret length in bytes.
    pub const MAX_SECRET_LENGTH: usize = 1024;
}

/// Normalize a login identifier.
///
/// Performs:
/// 1. Trim surrounding whitespace
/// 2. Unicode normalization (NFKC)
/// 3. Lowercasing
///
/// # Errors
///
/// Returns an error if the identifier is empty, too long, or contains
/// whitespace or control characters.
pub fn normalize_identifier(input: &str) -> Result<String, ValidationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty);
    }

    let normalized: String = trimmed.nfkc().collect::<String>().to_lowercase();

    if normalized.len() > limits::MAX_IDENTIFIER_LENGTH {
        return Err(ValidationError::TooLong {
            max: limits::MAX_IDENTIFIER_LENGTH,
            actual: normalized.len(),
        });
    }

    if normalized
        .chars()
        .any(|c| c.is_control() || c.is_whitespace())
    {
        return Err(ValidationError::DisallowedChars);
    }

    Ok(normalized)
}

/// Validate a new secret before it is hashed.
///
/// # Errors
///
/// Returns an error if the secret is too short or too long.
pub fn validate_secret(secret: &str) -> Result<(), ValidationError> {
    if secret.len() > limits::MAX_SECRET_LENGTH {
        return Err(ValidationError::TooLong {
            max: limits::MAX_SECRET_LENGTH,
            actual: secret.len(),
        });
    }

    let chars = secret.chars().count();
    if chars < limits::MIN_SECRET_LENGTH {
        return Err(ValidationError::TooShort {
            min: limits::MIN_SECRET_LENGTH,
            actual: chars,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_normalize_case_insensitive() {
        assert_eq!(normalize_identifier("  Alice@Example.COM ").unwrap(), "alice@example.com");
    }

    #[test]
    fn test_normalize_nfkc() {
        // Fullwidth letters fold to ASCII
        assert_eq!(normalize_identifier("ＡＤＭＩＮ").unwrap(), "admin");
    }

    #[test]
    fn test_normalize_rejects_empty() {
        assert_eq!(normalize_identifier("   "), Err(ValidationError::Empty));
    }

    #[test]
    fn test_normalize_rejects_inner_whitespace() {
        assert_eq!(
            normalize_identifier("al ice"),
            Err(ValidationError::DisallowedChars)
        );
        assert_eq!(
            normalize_identifier("bob\u{0}"),
            Err(ValidationError::DisallowedChars)
        );
    }

    #[test]
    fn test_normalize_rejects_long() {
        let long = "a".repeat(limits::MAX_IDENTIFIER_LENGTH + 1);
        assert!(matches!(
            normalize_identifier(&long),
            Err(ValidationError::TooLong { .. })
        ));
    }

    #[test]
    fn test_validate_secret() {
        assert!(validate_secret("longenough").is_ok());
        assert!(matches!(
            validate_secret("short"),
            Err(ValidationError::TooShort { min: 8, actual: 5 })
        ));
    }
}
