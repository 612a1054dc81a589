//! API client error types

use bbs_infra::TransportErrorKind;
use thiserror::Error;

/// Result type for API client operations
pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors surfaced by the API clients.
///
/// Cloneable so a single in-flight lookup can hand the same failure to every
/// caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("Resource not found: {url}")]
    NotFound { url: String },

    #[error("HTTP {status} from {url}: {body}")]
    Request {
        url: String,
        status: u16,
        body: String,
    },

    #[error("Transport failure ({kind}) calling {url}: {message}")]
    Transport {
        url: String,
        kind: TransportErrorKind,
        message: String,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Protocol violation from {url}: {message}")]
    Protocol { url: String, message: String },

    #[error("Invalid response body from {url}: {message}")]
    Json { url: String, message: String },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// HTTP status carried by the error, if a response was received.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::NotFound { .. } => Some(404),
            Self::Request { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Map `NotFound` to `None`, keep every other outcome.
pub(crate) fn optional<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code() {
        let not_found = ApiError::NotFound {
            url: "https://x".to_string(),
        };
        let request = ApiError::Request {
            url: "https://x".to_string(),
            status: 500,
            body: String::new(),
        };

        assert_eq!(not_found.status_code(), Some(404));
        assert_eq!(request.status_code(), Some(500));
        assert_eq!(ApiError::Cancelled.status_code(), None);
        assert!(not_found.is_not_found());
    }

    #[test]
    fn test_optional() {
        let missing: Result<u8> = Err(ApiError::NotFound {
            url: "u".to_string(),
        });
        assert_eq!(optional(missing), Ok(None));
        assert_eq!(optional(Ok(1)), Ok(Some(1)));
        assert!(optional::<u8>(Err(ApiError::Cancelled)).is_err());
    }
}
