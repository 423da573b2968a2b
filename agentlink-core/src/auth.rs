//! Credential checks run before the tunnel connects

use agentlink_common::{TunnelError, MAX_API_KEY_LEN};

/// Validate credential format
///
/// Returns Ok(()) if the key is usable, Err with reason if not
pub fn validate_token_format(token: &str, max_len: usize) -> Result<(), TokenValidationError> {
    if token.trim().is_empty() {
        return Err(TokenValidationError::Empty);
    }
    if token.len() > max_len {
        return Err(TokenValidationError::TooLong {
            len: token.len(),
            max: max_len,
        });
    }
    if token.chars().any(char::is_control) {
        return Err(TokenValidationError::InvalidCharacters);
    }
    Ok(())
}

/// Setup check for the `starting` state: a usable API key must be configured.
pub fn validate_api_key(api_key: Option<&str>) -> Result<(), TunnelError> {
    let key = api_key.ok_or(TokenValidationError::Missing)?;
    validate_token_format(key, MAX_API_KEY_LEN)?;
    Ok(())
}

/// Token validation errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum TokenValidationError {
    #[error("API key is required to start the tunnel")]
    Missing,
    #[error("API key is empty")]
    Empty,
    #[error("API key too long: {len} bytes exceeds maximum of {max} bytes")]
    TooLong { len: usize, max: usize },
    #[error("API key contains control characters")]
    InvalidCharacters,
}

impl From<TokenValidationError> for TunnelError {
    fn from(err: TokenValidationError) -> Self {
        TunnelError::Config(err.to_string())
    }
}
