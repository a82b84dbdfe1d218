//! Error types shared across schoolsync crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors raised by the shared plumbing (logging, environment parsing)
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid value '{value}' for environment variable {name}")]
    InvalidEnv { name: String, value: String },

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl CommonError {
    pub fn invalid_env(name: &str, value: impl Into<String>) -> Self {
        Self::InvalidEnv {
            name: name.to_string(),
            value: value.into(),
        }
    }
}
