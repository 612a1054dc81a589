use thiserror::Error;

/// Errors raised while building endpoints and loading configuration.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid server URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Duplicate endpoint for server URL: {0}")]
    DuplicateEndpoint(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
