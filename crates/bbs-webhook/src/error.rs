use bbs_client::ApiError;
use thiserror::Error;

/// Webhook errors
#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Signature verification failed: {0}")]
    Verification(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No processor can handle webhook with event key '{0}'")]
    NoProcessor(String),

    #[error("Webhook matched several processors equally: {0}")]
    AmbiguousProcessor(String),

    #[error("Webhook origin '{0}' is not a configured endpoint")]
    UnknownEndpoint(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl WebhookError {
    /// Short label for logs and listener reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Verification(_) => "verification",
            Self::Configuration(_) => "configuration",
            Self::NoProcessor(_) => "no_processor",
            Self::AmbiguousProcessor(_) => "ambiguous_processor",
            Self::UnknownEndpoint(_) => "unknown_endpoint",
            Self::InvalidPayload(_) => "invalid_payload",
            Self::Api(_) => "api",
        }
    }
}

impl From<serde_json::Error> for WebhookError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidPayload(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WebhookError>;
