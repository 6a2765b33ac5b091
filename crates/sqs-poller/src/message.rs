//! Message types and identifiers for queue operations.

use crate::error::ValidationError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated queue endpoint identifier, e.g.
/// `https://sqs.us-east-1.amazonaws.com/123456789012/orders`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueUrl(String);

impl QueueUrl {
    /// Create new queue URL with validation
    pub fn new(url: impl Into<String>) -> Result<Self, ValidationError> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "queue_url".to_string(),
            });
        }

        let parsed = url::Url::parse(&url).map_err(|e| ValidationError::InvalidFormat {
            field: "queue_url".to_string(),
            message: e.to_string(),
        })?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ValidationError::InvalidFormat {
                field: "queue_url".to_string(),
                message: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }

        Ok(Self(url))
    }

    /// Get queue URL as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment of the URL, which SQS uses as the queue name
    pub fn queue_name(&self) -> &str {
        self.0
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&self.0)
    }
}

impl std::fmt::Display for QueueUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueUrl {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for QueueUrl {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<QueueUrl> for String {
    fn from(value: QueueUrl) -> Self {
        value.0
    }
}

/// Service-assigned identifier of a message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Opaque token identifying one delivery of a message. Required to delete it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(String);

impl ReceiptHandle {
    /// Create new receipt handle
    pub fn new(handle: impl Into<String>) -> Result<Self, ValidationError> {
        let handle = handle.into();
        if handle.is_empty() {
            return Err(ValidationError::Required {
                field: "receipt_handle".to_string(),
            });
        }
        Ok(Self(handle))
    }

    /// Random handle for transports that issue their own receipts
    pub(crate) fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get handle string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Received Messages
// ============================================================================

/// System attribute carrying the number of times a message has been received
pub const ATTR_APPROXIMATE_RECEIVE_COUNT: &str = "ApproximateReceiveCount";

/// A message received from the queue. Immutable once received.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    message_id: MessageId,
    receipt_handle: ReceiptHandle,
    body: Bytes,
    attributes: HashMap<String, String>,
    message_attributes: HashMap<String, String>,
    received_at: DateTime<Utc>,
}

impl ReceivedMessage {
    /// Create a received message with no attributes
    pub fn new(message_id: MessageId, receipt_handle: ReceiptHandle, body: Bytes) -> Self {
        Self {
            message_id,
            receipt_handle,
            body,
            attributes: HashMap::new(),
            message_attributes: HashMap::new(),
            received_at: Utc::now(),
        }
    }

    /// Attach service-defined system attributes
    pub fn with_attributes(mut self, attributes: HashMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }

    /// Attach sender-defined message attributes
    pub fn with_message_attributes(mut self, message_attributes: HashMap<String, String>) -> Self {
        self.message_attributes = message_attributes;
        self
    }

    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    pub fn receipt_handle(&self) -> &ReceiptHandle {
        &self.receipt_handle
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// View the body as UTF-8 text
    pub fn body_as_str(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.body)
    }

    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    pub fn message_attributes(&self) -> &HashMap<String, String> {
        &self.message_attributes
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Number of times this message has been delivered, 1 when unknown
    pub fn receive_count(&self) -> u32 {
        self.attributes
            .get(ATTR_APPROXIMATE_RECEIVE_COUNT)
            .and_then(|v| v.parse().ok())
            .unwrap_or(1)
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
