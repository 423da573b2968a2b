//! Inbound request validation

use crate::message::RequestData;

/// Validation errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Request id is empty")]
    EmptyId,

    #[error("Invalid method: {0:?}")]
    InvalidMethod(String),

    #[error("Path must start with '/': {0:?}")]
    InvalidPath(String),
}

/// Check that a request can be replayed against the local server.
pub fn validate_request(request: &RequestData) -> Result<(), ValidationError> {
    if request.id.is_empty() {
        return Err(ValidationError::EmptyId);
    }
    if request.method.is_empty() || !request.method.bytes().all(is_token_char) {
        return Err(ValidationError::InvalidMethod(request.method.clone()));
    }
    let path_ok = request.path.starts_with('/')
        && !request
            .path
            .bytes()
            .any(|b| b.is_ascii_control() || b == b' ');
    if !path_ok {
        return Err(ValidationError::InvalidPath(request.path.clone()));
    }
    Ok(())
}

// RFC 9110 tchar
fn is_token_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}
