//! Error types for queue transport operations and message handlers.

use std::time::Duration;
use thiserror::Error;

/// Error type for all queue transport operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue not found: {queue}")]
    QueueNotFound { queue: String },

    #[error("Receipt handle is invalid or expired: {receipt}")]
    ReceiptInvalid { receipt: String },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Provider error ({provider}): {code} - {message}")]
    ProviderError {
        provider: String,
        code: String,
        message: String,
    },

    #[error("Serialization failed: {message}")]
    Serialization { message: String },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl QueueError {
    /// Check if error is transient and the operation may succeed on a later attempt
    pub fn is_transient(&self) -> bool {
        match self {
            Self::QueueNotFound { .. } => false,
            Self::ReceiptInvalid { .. } => false,
            Self::Timeout { .. } => true,
            Self::ConnectionFailed { .. } => true,
            Self::AuthenticationFailed { .. } => false,
            Self::ProviderError { .. } => true, // Throttling and 5xx land here
            Self::Serialization { .. } => false,
            Self::Configuration(_) => false,
            Self::Validation(_) => false,
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },
}

/// Validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

// ============================================================================
// Handler Errors
// ============================================================================

/// Failure returned by a [`MessageHandler`](crate::handler::MessageHandler).
///
/// The variant decides what happens to the message:
/// - [`HandlerError::InvalidEvent`] - the payload can never be processed, the
///   message is acknowledged (deleted) so it is not redelivered.
/// - [`HandlerError::Failed`] - anything else, the message is left on the queue
///   and becomes visible again once its visibility timeout expires.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    InvalidEvent(#[from] InvalidEventError),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl HandlerError {
    /// Shorthand for an invalid-event failure
    pub fn invalid_event(event: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidEvent(InvalidEventError::new(event, message))
    }

    /// Wrap any error as a generic (redeliverable) failure
    pub fn failed<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Failed(anyhow::Error::new(error))
    }

    /// Whether this is an invalid-event classification
    pub fn is_invalid_event(&self) -> bool {
        matches!(self, Self::InvalidEvent(_))
    }
}

/// A message that was received intact but cannot be processed, e.g. because
/// its payload does not match any known schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[Invalid Event: {event}] {message}")]
pub struct InvalidEventError {
    event: String,
    message: String,
}

impl InvalidEventError {
    pub fn new(event: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            message: message.into(),
        }
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
