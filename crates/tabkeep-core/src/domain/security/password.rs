//! Password strength checks.
//!
//! Advisory only: the vault accepts any non-empty password, callers decide
//! whether a weak one is acceptable.

use serde::Serialize;

/// Minimum password length in characters.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Length at which a password with enough variety counts as strong.
pub const STRONG_PASSWORD_LENGTH: usize = 10;

/// Result of [`validate_password_strength`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PasswordStrength {
    pub valid: bool,
    pub strong: bool,
    pub message: String,
}

/// Grade a candidate password.
///
/// # Requirements
///
/// - valid: at least 8 characters, not only whitespace
/// - strong: valid, at least 10 characters, and at least three of
///   lowercase, uppercase, digits and symbols
///
/// # Examples
///
/// ```
/// use tabkeep_core::domain::security::validate_password_strength;
///
/// assert!(validate_password_strength("Str0ng!Pass").strong);
/// assert!(!validate_password_strength("short").valid);
/// ```
pub fn validate_password_strength(password: &str) -> PasswordStrength {
    let length = password.chars().count();

    if password.trim().is_empty() {
        return PasswordStrength {
            valid: false,
            strong: false,
            message: "Password cannot be empty".to_string(),
        };
    }

    if length < MIN_PASSWORD_LENGTH {
        return PasswordStrength {
            valid: false,
            strong: false,
            message: format!(
                "Password must be at least {} characters (got {})",
                MIN_PASSWORD_LENGTH, length
            ),
        };
    }

    let classes = [
        password.chars().any(|c| c.is_lowercase()),
        password.chars().any(|c| c.is_uppercase()),
        password.chars().any(|c| c.is_ascii_digit()),
        password.chars().any(|c| !c.is_alphanumeric()),
    ]
    .iter()
    .filter(|present| **present)
    .count();

    if length >= STRONG_PASSWORD_LENGTH && classes >= 3 {
        PasswordStrength {
            valid: true,
            strong: true,
            message: "Strong password".to_string(),
        }
    } else {
        PasswordStrength {
            valid: true,
            strong: false,
            message: format!(
                "Acceptable, but consider {} or more characters mixing case, digits and symbols",
                STRONG_PASSWORD_LENGTH
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strong_password() {
        let result = validate_password_strength("Str0ng!Pass");
        assert!(result.valid);
        assert!(result.strong);
    }

    #[test]
    fn test_too_short() {
        let result = validate_password_strength("Ab1!");
        assert!(!result.valid);
        assert!(!result.strong);
        assert!(result.message.contains("at least 8 characters"));
    }

    #[test]
    fn test_whitespace_only() {
        assert!(!validate_password_strength("          ").valid);
        assert!(!validate_password_strength("").valid);
    }

    #[test]
    fn test_valid_but_weak() {
        let result = validate_password_strength("alllowercaseletters");
        assert!(result.valid);
        assert!(!result.strong);
    }

    #[test]
    fn test_length_counts_characters_not_bytes() {
        // Seven characters, more than eight bytes.
        assert!(!validate_password_strength("ééééééé").valid);
    }
}
