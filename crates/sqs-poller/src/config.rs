//! Worker and transport configuration.
//!
//! Both structures are plain values: they are built once at startup (by hand,
//! or deserialized from a configuration source) and are never mutated after the
//! worker starts.

use crate::error::ValidationError;
use crate::message::QueueUrl;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Largest batch the SQS ReceiveMessage API will return
pub const MAX_BATCH_SIZE: u32 = 10;

/// Longest long-poll wait the SQS ReceiveMessage API accepts
pub const MAX_WAIT_SECONDS: u32 = 20;

// ============================================================================
// Worker Configuration
// ============================================================================

/// Configuration consumed by the poll loop and the dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Queue the worker consumes from
    pub queue_url: QueueUrl,

    /// Maximum number of messages requested per receive call (1-10)
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: u32,

    /// Long-poll wait per receive call in seconds (0-20). A receive returns
    /// sooner as soon as a message is available.
    #[serde(default = "default_wait_seconds")]
    pub wait_seconds: u32,

    /// Log handler and delete failures. Receive failures and invalid events
    /// are always logged.
    #[serde(default = "default_logging_enabled")]
    pub logging_enabled: bool,

    /// When set, handlers still running this long after shutdown is requested
    /// are aborted and their messages left for redelivery. `None` waits for
    /// every handler to finish.
    #[serde(default)]
    pub shutdown_grace_period_seconds: Option<u64>,

    /// Backoff between consecutive receive failures. `None` retries immediately.
    #[serde(default)]
    pub receive_backoff: Option<RetryPolicy>,
}

fn default_max_batch_size() -> u32 {
    MAX_BATCH_SIZE
}

fn default_wait_seconds() -> u32 {
    MAX_WAIT_SECONDS
}

fn default_logging_enabled() -> bool {
    true
}

impl WorkerConfig {
    /// Create a configuration with default batch size, wait and logging settings
    pub fn new(queue_url: QueueUrl) -> Self {
        Self {
            queue_url,
            max_batch_size: default_max_batch_size(),
            wait_seconds: default_wait_seconds(),
            logging_enabled: default_logging_enabled(),
            shutdown_grace_period_seconds: None,
            receive_backoff: None,
        }
    }

    pub fn with_max_batch_size(mut self, max_batch_size: u32) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    pub fn with_wait_seconds(mut self, wait_seconds: u32) -> Self {
        self.wait_seconds = wait_seconds;
        self
    }

    pub fn with_logging_enabled(mut self, logging_enabled: bool) -> Self {
        self.logging_enabled = logging_enabled;
        self
    }

    pub fn with_shutdown_grace_period(mut self, grace_period: Duration) -> Self {
        self.shutdown_grace_period_seconds = Some(grace_period.as_secs());
        self
    }

    pub fn with_receive_backoff(mut self, policy: RetryPolicy) -> Self {
        self.receive_backoff = Some(policy);
        self
    }

    pub fn shutdown_grace_period(&self) -> Option<Duration> {
        self.shutdown_grace_period_seconds.map(Duration::from_secs)
    }

    /// Check the values against the limits of the receive API
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_batch_size == 0 || self.max_batch_size > MAX_BATCH_SIZE {
            return Err(ValidationError::OutOfRange {
                field: "max_batch_size".to_string(),
                message: format!("must be 1-{}, got {}", MAX_BATCH_SIZE, self.max_batch_size),
            });
        }

        if self.wait_seconds > MAX_WAIT_SECONDS {
            return Err(ValidationError::OutOfRange {
                field: "wait_seconds".to_string(),
                message: format!("must be 0-{}, got {}", MAX_WAIT_SECONDS, self.wait_seconds),
            });
        }

        if let Some(policy) = &self.receive_backoff {
            policy.validate().map_err(|e| match e {
                ValidationError::OutOfRange { field, message } => ValidationError::OutOfRange {
                    field: format!("receive_backoff.{}", field),
                    message,
                },
                other => other,
            })?;
        }

        Ok(())
    }
}

// ============================================================================
// AWS SQS Configuration
// ============================================================================

/// Connection settings for the SQS transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwsSqsConfig {
    /// AWS region, e.g. `us-east-1`
    #[serde(default = "default_region")]
    pub region: String,

    /// Endpoint override, e.g. `http://localhost:4566` for LocalStack.
    /// Defaults to `https://sqs.{region}.amazonaws.com`.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Static credentials used to sign requests. When absent the transport
    /// reads them from the `AWS_*` environment variables.
    #[serde(default)]
    pub credentials: Option<AwsCredentials>,

    /// Timeout per HTTP request. Receive calls get the long-poll wait on top.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_request_timeout_seconds() -> u64 {
    30
}

impl AwsSqsConfig {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            endpoint: None,
            credentials: None,
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_credentials(mut self, credentials: AwsCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Endpoint requests are sent to
    pub fn endpoint_url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://sqs.{}.amazonaws.com", self.region),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.region.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "region".to_string(),
            });
        }

        if let Some(endpoint) = &self.endpoint {
            let parsed = url::Url::parse(endpoint).map_err(|e| ValidationError::InvalidFormat {
                field: "endpoint".to_string(),
                message: e.to_string(),
            })?;
            // Requests are signed and sent to the root path
            if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
                return Err(ValidationError::InvalidFormat {
                    field: "endpoint".to_string(),
                    message: format!("must not have a path or query: {}", endpoint),
                });
            }
        }

        if self.request_timeout_seconds == 0 {
            return Err(ValidationError::OutOfRange {
                field: "request_timeout_seconds".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if let Some(credentials) = &self.credentials {
            credentials.validate()?;
        }

        Ok(())
    }
}

/// Static AWS credentials
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default)]
    pub session_token: Option<String>,
}

impl AwsCredentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    pub fn with_session_token(mut self, session_token: impl Into<String>) -> Self {
        self.session_token = Some(session_token.into());
        self
    }

    /// Read `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and the optional
    /// `AWS_SESSION_TOKEN` from the process environment
    pub fn from_env() -> Result<Self, ValidationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ValidationError::Required {
                    field: key.to_string(),
                })
        };

        Ok(Self {
            access_key_id: required("AWS_ACCESS_KEY_ID")?,
            secret_access_key: required("AWS_SECRET_ACCESS_KEY")?,
            session_token: lookup("AWS_SESSION_TOKEN").filter(|v| !v.is_empty()),
        })
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.access_key_id.is_empty() {
            return Err(ValidationError::Required {
                field: "access_key_id".to_string(),
            });
        }
        if self.secret_access_key.is_empty() {
            return Err(ValidationError::Required {
                field: "secret_access_key".to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
