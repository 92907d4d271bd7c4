//! Error types for binwise

use std::time::Duration;

/// Result type alias using binwise's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for binwise operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A model could not be loaded (missing weights, download failure, bad device)
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// Inference was requested before `load()` completed
    #[error("model '{0}' is not loaded")]
    ModelNotLoaded(String),

    /// A single predict/validate call failed
    #[error("inference error: {0}")]
    Inference(String),

    /// The circuit breaker guarding a dependency is rejecting calls
    #[error("circuit breaker '{name}' is open, retry after {}s", retry_after.as_secs_f32())]
    BreakerOpen { name: String, retry_after: Duration },

    /// The supplied image could not be decoded or violates input limits
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// A protected call exceeded its time budget
    #[error("{operation} timed out after {}ms", after.as_millis())]
    Timeout { operation: String, after: Duration },

    /// Network/IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new model-unavailable error
    pub fn model_unavailable(msg: impl Into<String>) -> Self {
        Self::ModelUnavailable(msg.into())
    }

    /// Create a new model-not-loaded error
    pub fn not_loaded(model: impl Into<String>) -> Self {
        Self::ModelNotLoaded(model.into())
    }

    /// Create a new inference error
    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a new invalid-image error
    pub fn invalid_image(msg: impl Into<String>) -> Self {
        Self::InvalidImage(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the caller should retry after a delay rather than give up.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BreakerOpen { .. } | Self::Timeout { .. })
    }

    /// Suggested delay before retrying, when the error carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::BreakerOpen { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    /// Whether the error was caused by the client's input rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidImage(_))
    }
}
