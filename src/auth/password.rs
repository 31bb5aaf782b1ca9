use bcrypt::{hash, verify, DEFAULT_COST};

use crate::errors::{AppError, Result};

pub struct PasswordService;

impl PasswordService {
    pub fn hash_password(password: &str) -> Result<String> {
        hash(password, DEFAULT_COST)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to hash password: {}", e)))
    }

    /// A malformed stored hash counts as a mismatch.
    pub fn verify_password(password: &str, hash: &str) -> bool {
        match verify(password, hash) {
            Ok(matches) => matches,
            Err(e) => {
                tracing::warn!("Stored password hash could not be checked: {}", e);
                false
            }
        }
    }

    pub fn validate_password_strength(password: &str) -> Result<()> {
        if password.chars().count() < 8 {
            return Err(AppError::Validation(
                "Password must be at least 8 characters long".to_string(),
            ));
        }

        let has_letter = password.chars().any(|c| c.is_alphabetic());
        let has_digit = password.chars().any(|c| c.is_ascii_digit());

        if !has_letter {
            return Err(AppError::Validation(
                "Password must contain at least one letter".to_string(),
            ));
        }

        if !has_digit {
            return Err(AppError::Validation(
                "Password must contain at least one digit".to_string(),
            ));
        }

        Ok(())
    }

    pub fn validate_username(username: &str) -> Result<()> {
        let len = username.chars().count();
        if !(3..=32).contains(&len) {
            return Err(AppError::Validation(
                "Username must be between 3 and 32 characters".to_string(),
            ));
        }
        if !username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        {
            return Err(AppError::Validation(
                "Username may only contain letters, digits, '_', '.' and '-'".to_string(),
            ));
        }
        Ok(())
    }

    pub fn validate_email(email: &str) -> Result<()> {
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
            _ => Err(AppError::Validation("Email address is invalid".to_string())),
        }
    }
}
