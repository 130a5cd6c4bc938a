//! Username and credential shape rules for the accounts boundary.

use crate::domain::error::DomainError;

pub const MAX_USERNAME_LENGTH: usize = 150;
pub const MIN_PASSWORD_LENGTH: usize = 8;

pub const INVALID_USERNAME_MESSAGE: &str =
    "Enter a valid username: 150 characters or fewer, letters, digits and @/./+/-/_ only.";
pub const SHORT_PASSWORD_MESSAGE: &str = "Password must be at least 8 characters long.";

/// Validate a username, returning it trimmed.
pub fn validate_username(username: &str) -> Result<String, DomainError> {
    let trimmed = username.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_USERNAME_LENGTH {
        return Err(DomainError::validation(INVALID_USERNAME_MESSAGE));
    }
    let well_formed = trimmed
        .chars()
        .all(|ch| ch.is_alphanumeric() || matches!(ch, '@' | '.' | '+' | '-' | '_'));
    if !well_formed {
        return Err(DomainError::validation(INVALID_USERNAME_MESSAGE));
    }
    Ok(trimmed.to_string())
}

pub fn validate_password(password: &str) -> Result<(), DomainError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(DomainError::validation(SHORT_PASSWORD_MESSAGE));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_typical_usernames() {
        for name in ["kurt", "leo.tolstoy", "user+tag", "a_b-c@d"] {
            assert!(validate_username(name).is_ok(), "rejected `{name}`");
        }
    }

    #[test]
    fn rejects_spaces_and_punctuation() {
        for name in ["", "two words", "semi;colon", "slash/name"] {
            assert!(validate_username(name).is_err(), "accepted `{name}`");
        }
    }

    #[test]
    fn rejects_overlong_usernames() {
        let name = "a".repeat(MAX_USERNAME_LENGTH + 1);
        assert!(validate_username(&name).is_err());
    }

    #[test]
    fn short_password_is_rejected() {
        assert!(validate_password("1234567").is_err());
        assert!(validate_password("12345678").is_ok());
    }
}
