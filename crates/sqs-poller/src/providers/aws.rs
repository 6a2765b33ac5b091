//! AWS SQS transport over the SQS query API.
//!
//! Requests are plain HTTP calls signed with AWS Signature Version 4, so the
//! transport can be pointed at any SQS-compatible endpoint (LocalStack, a
//! mock server in tests) through [`AwsSqsConfig::endpoint`].
//!
//! ## Operations
//!
//! - `GetQueueUrl`: resolve a queue name to its URL, cached per transport
//! - `ReceiveMessage`: long-poll for up to 10 messages, all system and
//!   message attributes included
//! - `DeleteMessage`: acknowledge a message by receipt handle
//!
//! Message bodies are passed through as the raw text SQS returns.
//!
//! ## Example
//!
//! ```no_run
//! use sqs_poller::providers::AwsSqsTransport;
//! use sqs_poller::{AwsCredentials, AwsSqsConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AwsSqsConfig::new("us-east-1")
//!     .with_credentials(AwsCredentials::from_env()?);
//!
//! let transport = AwsSqsTransport::new(config)?;
//! let queue_url = transport.resolve_queue_url("orders").await?;
//! # let _ = queue_url;
//! # Ok(())
//! # }
//! ```

use crate::config::{AwsCredentials, AwsSqsConfig, MAX_BATCH_SIZE, MAX_WAIT_SECONDS};
use crate::error::{ConfigurationError, QueueError};
use crate::message::{MessageId, QueueUrl, ReceiptHandle, ReceivedMessage};
use crate::transport::QueueTransport;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client as HttpClient;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::RwLock;

#[cfg(test)]
#[path = "aws_tests.rs"]
mod tests;

const API_VERSION: &str = "2012-11-05";

// ============================================================================
// Error Types
// ============================================================================

/// AWS SQS specific errors
#[derive(Debug, thiserror::Error)]
pub enum AwsError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("SQS service error: {code}: {message}")]
    ServiceError { code: String, message: String },

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Invalid receipt handle: {0}")]
    InvalidReceipt(String),

    #[error("Invalid configuration: {0}")]
    ConfigurationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl AwsError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Authentication(_) => false,
            Self::NetworkError(_) => true,
            Self::Timeout(_) => true,
            Self::ServiceError { .. } => true, // Throttling and 5xx
            Self::QueueNotFound(_) => false,
            Self::InvalidReceipt(_) => false,
            Self::ConfigurationError(_) => false,
            Self::SerializationError(_) => false,
        }
    }
}

impl From<AwsError> for QueueError {
    fn from(error: AwsError) -> Self {
        match error {
            AwsError::Authentication(message) => QueueError::AuthenticationFailed { message },
            AwsError::NetworkError(message) => QueueError::ConnectionFailed { message },
            AwsError::Timeout(duration) => QueueError::Timeout { duration },
            AwsError::ServiceError { code, message } => QueueError::ProviderError {
                provider: "AwsSqs".to_string(),
                code,
                message,
            },
            AwsError::QueueNotFound(queue) => QueueError::QueueNotFound { queue },
            AwsError::InvalidReceipt(receipt) => QueueError::ReceiptInvalid { receipt },
            AwsError::ConfigurationError(message) => {
                QueueError::Configuration(ConfigurationError::Invalid { message })
            }
            AwsError::SerializationError(message) => QueueError::Serialization { message },
        }
    }
}

// ============================================================================
// AWS Signature V4 Signing
// ============================================================================

type HmacSha256 = Hmac<Sha256>;

/// AWS Signature Version 4 signer for request authentication
///
/// 1. Create canonical request (method, URI, query, headers, payload)
/// 2. Create string to sign (algorithm, timestamp, scope, request hash)
/// 3. Derive signing key (4-level HMAC chain)
/// 4. Calculate signature and build Authorization header
///
/// ## References
///
/// - [AWS Signature V4](https://docs.aws.amazon.com/general/latest/gr/signature-version-4.html)
#[derive(Clone)]
struct AwsV4Signer {
    credentials: AwsCredentials,
    region: String,
    service: String,
}

impl AwsV4Signer {
    fn new(credentials: AwsCredentials, region: String) -> Self {
        Self {
            credentials,
            region,
            service: "sqs".to_string(),
        }
    }

    /// Sign an HTTP request with AWS Signature V4
    ///
    /// Returns the headers to add to the request: `Authorization`,
    /// `x-amz-date`, `host` and, for temporary credentials,
    /// `x-amz-security-token`.
    fn sign_request(
        &self,
        method: &str,
        host: &str,
        path: &str,
        query_params: &[(String, String)],
        body: &str,
        timestamp: &DateTime<Utc>,
    ) -> Vec<(String, String)> {
        let date_stamp = timestamp.format("%Y%m%d").to_string();
        let amz_date = timestamp.format("%Y%m%dT%H%M%SZ").to_string();

        let canonical_query_string = canonical_query(query_params);

        // Canonical headers must be sorted by name
        let mut canonical_headers = format!("host:{}\nx-amz-date:{}\n", host, amz_date);
        let mut signed_headers = "host;x-amz-date".to_string();
        if let Some(token) = &self.credentials.session_token {
            canonical_headers.push_str(&format!("x-amz-security-token:{}\n", token));
            signed_headers.push_str(";x-amz-security-token");
        }

        let payload_hash = format!("{:x}", Sha256::digest(body.as_bytes()));

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method, path, canonical_query_string, canonical_headers, signed_headers, payload_hash
        );

        let algorithm = "AWS4-HMAC-SHA256";
        let credential_scope = format!(
            "{}/{}/{}/aws4_request",
            date_stamp, self.region, self.service
        );
        let canonical_request_hash = format!("{:x}", Sha256::digest(canonical_request.as_bytes()));

        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            algorithm, amz_date, credential_scope, canonical_request_hash
        );

        let signature = self.calculate_signature(&string_to_sign, &date_stamp);

        let authorization_header = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            algorithm, self.credentials.access_key_id, credential_scope, signed_headers, signature
        );

        let mut headers = vec![
            ("Authorization".to_string(), authorization_header),
            ("x-amz-date".to_string(), amz_date),
            ("host".to_string(), host.to_string()),
        ];
        if let Some(token) = &self.credentials.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }

        headers
    }

    /// kSigning = HMAC(HMAC(HMAC(HMAC("AWS4" + secret, date), region), service), "aws4_request")
    fn calculate_signature(&self, string_to_sign: &str, date_stamp: &str) -> String {
        let k_secret = format!("AWS4{}", self.credentials.secret_access_key);
        let k_date = hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes());
        let k_region = hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = hmac_sha256(&k_region, self.service.as_bytes());
        let k_signing = hmac_sha256(&k_service, b"aws4_request");
        let signature = hmac_sha256(&k_signing, string_to_sign.as_bytes());

        hex::encode(signature)
    }
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, so this never fails
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Sorted, RFC 3986 encoded query string
fn canonical_query(query_params: &[(String, String)]) -> String {
    let mut pairs = query_params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>();
    pairs.sort();
    pairs.join("&")
}

// ============================================================================
// AWS SQS Transport
// ============================================================================

/// SQS queue transport
///
/// Thread-safe; share it across tasks with `Arc`. The queue URL cache is
/// protected by an `RwLock`.
pub struct AwsSqsTransport {
    http_client: HttpClient,
    signer: AwsV4Signer,
    config: AwsSqsConfig,
    endpoint: String,
    host: String,
    queue_url_cache: RwLock<HashMap<String, QueueUrl>>,
}

impl AwsSqsTransport {
    /// Create a new SQS transport.
    ///
    /// Uses the credentials from `config`, or the `AWS_*` environment
    /// variables when the configuration carries none.
    ///
    /// # Errors
    ///
    /// Returns [`AwsError::ConfigurationError`] when the configuration is
    /// invalid or no credentials are available.
    pub fn new(config: AwsSqsConfig) -> Result<Self, AwsError> {
        config
            .validate()
            .map_err(|e| AwsError::ConfigurationError(e.to_string()))?;

        let credentials = match &config.credentials {
            Some(credentials) => credentials.clone(),
            None => AwsCredentials::from_env()
                .map_err(|e| AwsError::ConfigurationError(format!("No credentials: {}", e)))?,
        };

        let endpoint = config.endpoint_url();
        let parsed = url::Url::parse(&endpoint)
            .map_err(|e| AwsError::ConfigurationError(format!("Invalid endpoint: {}", e)))?;
        let host = match (parsed.host_str(), parsed.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(AwsError::ConfigurationError(format!(
                    "Endpoint has no host: {}",
                    endpoint
                )))
            }
        };

        let http_client = HttpClient::builder()
            .build()
            .map_err(|e| AwsError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            signer: AwsV4Signer::new(credentials, config.region.clone()),
            config,
            endpoint,
            host,
            queue_url_cache: RwLock::new(HashMap::new()),
        })
    }

    /// Resolve a queue name to its URL with `GetQueueUrl`, cached per transport
    pub async fn resolve_queue_url(&self, queue_name: &str) -> Result<QueueUrl, QueueError> {
        {
            let cache = self.queue_url_cache.read().await;
            if let Some(url) = cache.get(queue_name) {
                return Ok(url.clone());
            }
        }

        let params = vec![
            param("Action", "GetQueueUrl"),
            param("QueueName", queue_name),
            param("Version", API_VERSION),
        ];

        let response = self
            .make_request(&params, self.config.request_timeout())
            .await?;
        let raw_url = parse_queue_url_response(&response)?;
        let queue_url = QueueUrl::new(raw_url)?;

        let mut cache = self.queue_url_cache.write().await;
        cache.insert(queue_name.to_string(), queue_url.clone());

        Ok(queue_url)
    }

    /// Send a signed query-API request and return the response body
    async fn make_request(
        &self,
        query_params: &[(String, String)],
        timeout: Duration,
    ) -> Result<String, AwsError> {
        let timestamp = Utc::now();
        let path = "/";
        let auth_headers =
            self.signer
                .sign_request("POST", &self.host, path, query_params, "", &timestamp);

        let url = format!(
            "{}{}?{}",
            self.endpoint,
            path,
            canonical_query(query_params)
        );

        let mut request = self.http_client.post(&url).timeout(timeout);
        for (key, value) in auth_headers {
            request = request.header(key, value);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AwsError::Timeout(timeout)
            } else if e.is_connect() {
                AwsError::NetworkError(format!("Connection failed: {}", e))
            } else {
                AwsError::NetworkError(format!("HTTP request failed: {}", e))
            }
        })?;

        let status = response.status();
        let response_body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                AwsError::Timeout(timeout)
            } else {
                AwsError::NetworkError(format!("Failed to read response body: {}", e))
            }
        })?;

        tracing::trace!(status = status.as_u16(), "SQS response received");

        if !status.is_success() {
            return Err(parse_error_response(&response_body, status.as_u16()));
        }

        Ok(response_body)
    }
}

fn param(key: &str, value: impl Into<String>) -> (String, String) {
    (key.to_string(), value.into())
}

impl fmt::Debug for AwsSqsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsSqsTransport")
            .field("config", &self.config)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[async_trait]
impl QueueTransport for AwsSqsTransport {
    async fn receive_batch(
        &self,
        queue: &QueueUrl,
        max_messages: u32,
        wait_seconds: u32,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let max_messages = max_messages.clamp(1, MAX_BATCH_SIZE);
        let wait_seconds = wait_seconds.min(MAX_WAIT_SECONDS);

        let params = vec![
            param("Action", "ReceiveMessage"),
            param("Version", API_VERSION),
            param("QueueUrl", queue.as_str()),
            param("MaxNumberOfMessages", max_messages.to_string()),
            param("WaitTimeSeconds", wait_seconds.to_string()),
            param("AttributeName.1", "All"),
            param("MessageAttributeName.1", "All"),
        ];

        // The server holds the request open for up to the long-poll wait
        let timeout = self.config.request_timeout() + Duration::from_secs(u64::from(wait_seconds));
        let response = self.make_request(&params, timeout).await?;

        Ok(parse_receive_message_response(&response)?)
    }

    async fn delete_message(
        &self,
        queue: &QueueUrl,
        receipt: &ReceiptHandle,
    ) -> Result<(), QueueError> {
        let params = vec![
            param("Action", "DeleteMessage"),
            param("Version", API_VERSION),
            param("QueueUrl", queue.as_str()),
            param("ReceiptHandle", receipt.as_str()),
        ];

        self.make_request(&params, self.config.request_timeout())
            .await?;
        Ok(())
    }
}

// ============================================================================
// XML Responses
// ============================================================================

/// Parse GetQueueUrl XML response
fn parse_queue_url_response(xml: &str) -> Result<String, AwsError> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut in_queue_url = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"QueueUrl" => {
                in_queue_url = true;
            }
            Ok(Event::Text(e)) if in_queue_url => {
                return e.unescape().map(|s| s.into_owned()).map_err(|e| {
                    AwsError::SerializationError(format!("Failed to parse XML: {}", e))
                });
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(AwsError::SerializationError(format!(
                    "XML parsing error: {}",
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    Err(AwsError::SerializationError(
        "QueueUrl not found in response".to_string(),
    ))
}

/// Parse an `<ErrorResponse>` body and map the SQS error code
fn parse_error_response(xml: &str, status_code: u16) -> AwsError {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut error_code = None;
    let mut error_message = None;
    let mut in_error = false;
    let mut in_code = false;
    let mut in_message = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Error" => in_error = true,
                b"Code" if in_error => in_code = true,
                b"Message" if in_error => in_message = true,
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_code {
                    error_code = e.unescape().ok().map(|s| s.into_owned());
                    in_code = false;
                } else if in_message {
                    error_message = e.unescape().ok().map(|s| s.into_owned());
                    in_message = false;
                }
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Error" => {
                in_error = false;
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    let code = error_code.unwrap_or_else(|| format!("Http{}", status_code));
    let message = error_message.unwrap_or_else(|| "Unknown error".to_string());

    match code.as_str() {
        "AWS.SimpleQueueService.NonExistentQueue" | "QueueDoesNotExist" => {
            AwsError::QueueNotFound(message)
        }
        "InvalidClientTokenId"
        | "UnrecognizedClientException"
        | "SignatureDoesNotMatch"
        | "ExpiredToken"
        | "AccessDenied" => AwsError::Authentication(format!("{}: {}", code, message)),
        "ReceiptHandleIsInvalid" | "InvalidReceiptHandle" => AwsError::InvalidReceipt(message),
        _ if status_code == 401 || status_code == 403 => {
            AwsError::Authentication(format!("{}: {}", code, message))
        }
        _ => AwsError::ServiceError { code, message },
    }
}

/// Fields of one `<Message>` element while it is being parsed
#[derive(Default)]
struct MessageFields {
    message_id: Option<String>,
    receipt_handle: Option<String>,
    body: String,
    attributes: HashMap<String, String>,
    message_attributes: HashMap<String, String>,
    pending_name: Option<String>,
    pending_value: String,
}

impl MessageFields {
    fn into_message(self) -> Option<ReceivedMessage> {
        let receipt = self
            .receipt_handle
            .and_then(|handle| ReceiptHandle::new(handle).ok());
        let receipt = match receipt {
            Some(receipt) => receipt,
            None => {
                tracing::warn!("Skipping SQS message without a receipt handle");
                return None;
            }
        };

        let message_id = self
            .message_id
            .and_then(|id| MessageId::from_str(&id).ok());
        let message_id = match message_id {
            Some(message_id) => message_id,
            None => {
                tracing::warn!(
                    receipt_handle = %receipt,
                    "Skipping SQS message without a message id"
                );
                return None;
            }
        };

        Some(
            ReceivedMessage::new(message_id, receipt, Bytes::from(self.body))
                .with_attributes(self.attributes)
                .with_message_attributes(self.message_attributes),
        )
    }
}

/// Parse ReceiveMessage XML response
///
/// Text is not trimmed so message bodies keep their exact content. Only
/// `StringValue` message attributes are kept.
fn parse_receive_message_response(xml: &str) -> Result<Vec<ReceivedMessage>, AwsError> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);

    let mut messages = Vec::new();
    let mut current: Option<MessageFields> = None;
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut buf = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| AwsError::SerializationError(format!("XML parsing error: {}", e)))?;

        match event {
            Event::Start(ref e) => {
                let name = e.name().as_ref().to_vec();
                if name == b"Message" {
                    current = Some(MessageFields::default());
                }
                path.push(name);
            }
            Event::Text(ref e) => {
                if let Some(fields) = current.as_mut() {
                    let text = e.unescape().map_err(|e| {
                        AwsError::SerializationError(format!("Failed to parse XML: {}", e))
                    })?;
                    append_text(fields, &path, &text);
                }
            }
            Event::CData(e) => {
                if let Some(fields) = current.as_mut() {
                    let text = String::from_utf8_lossy(&e.into_inner()).into_owned();
                    append_text(fields, &path, &text);
                }
            }
            Event::End(ref e) => {
                path.pop();
                match e.name().as_ref() {
                    b"Attribute" | b"MessageAttribute" => {
                        let attribute = e.name().as_ref() == b"Attribute";
                        if let Some(fields) = current.as_mut() {
                            let value = std::mem::take(&mut fields.pending_value);
                            if let Some(name) = fields.pending_name.take() {
                                if attribute {
                                    fields.attributes.insert(name, value);
                                } else {
                                    fields.message_attributes.insert(name, value);
                                }
                            }
                        }
                    }
                    b"Message" => {
                        if let Some(message) = current.take().and_then(MessageFields::into_message)
                        {
                            messages.push(message);
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(messages)
}

/// Route element text to the field named by the innermost elements of `path`
fn append_text(fields: &mut MessageFields, path: &[Vec<u8>], text: &str) {
    let tail: Vec<&[u8]> = path.iter().rev().take(3).map(Vec::as_slice).collect();
    match tail.as_slice() {
        [b"MessageId", b"Message", ..] => {
            fields.message_id.get_or_insert_with(String::new).push_str(text)
        }
        [b"ReceiptHandle", b"Message", ..] => fields
            .receipt_handle
            .get_or_insert_with(String::new)
            .push_str(text),
        [b"Body", b"Message", ..] => fields.body.push_str(text),
        [b"Name", b"Attribute", ..] | [b"Name", b"MessageAttribute", ..] => fields
            .pending_name
            .get_or_insert_with(String::new)
            .push_str(text),
        [b"Value", b"Attribute", ..] | [b"StringValue", b"Value", b"MessageAttribute"] => {
            fields.pending_value.push_str(text)
        }
        _ => {}
    }
}
