//! Integration tests for the worker talking to an SQS-compatible HTTP endpoint
//!
//! A `wiremock` server plays the SQS Query API. These tests verify:
//! - Received messages are deleted with the receipt handle SQS issued
//! - Failed messages are never deleted
//! - Receive errors are logged and polling continues

mod common;

use common::{CapturingLogger, ScriptedHandler};
use sqs_poller::providers::AwsSqsTransport;
use sqs_poller::{
    AwsCredentials, AwsSqsConfig, HandlerError, Logger, QueueTransport, QueueUrl, Worker,
    WorkerConfig,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const EMPTY_RECEIVE: &str =
    "<ReceiveMessageResponse><ReceiveMessageResult/></ReceiveMessageResponse>";

const DELETE_RESPONSE: &str = r#"<DeleteMessageResponse>
  <ResponseMetadata><RequestId>d6f86b7a-74d1-4439-b43f-196a1e29cd85</RequestId></ResponseMetadata>
</DeleteMessageResponse>"#;

fn receive_response(messages: &[(&str, &str)]) -> String {
    let body: String = messages
        .iter()
        .enumerate()
        .map(|(i, (receipt, body))| {
            format!(
                "<Message><MessageId>00000000-0000-0000-0000-00000000000{}</MessageId>\
                 <ReceiptHandle>{}</ReceiptHandle><Body>{}</Body>\
                 <Attribute><Name>ApproximateReceiveCount</Name><Value>1</Value></Attribute>\
                 </Message>",
                i, receipt, body
            )
        })
        .collect();
    format!(
        "<ReceiveMessageResponse><ReceiveMessageResult>{}</ReceiveMessageResult></ReceiveMessageResponse>",
        body
    )
}

fn worker_for(
    server: &MockServer,
    handler: &ScriptedHandler,
    logger: Arc<CapturingLogger>,
) -> Worker {
    let config = AwsSqsConfig::new("us-east-1")
        .with_endpoint(server.uri())
        .with_credentials(AwsCredentials::new("AKIDEXAMPLE", "secret"));
    let transport = AwsSqsTransport::new(config).unwrap();
    let queue = QueueUrl::new(format!("{}/000000000000/orders", server.uri())).unwrap();

    Worker::new(
        WorkerConfig::new(queue).with_wait_seconds(0),
        Arc::new(transport) as Arc<dyn QueueTransport>,
        Arc::clone(&handler.handler),
    )
    .unwrap()
    .with_logger(logger as Arc<dyn Logger>)
}

async fn deleted_receipts(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| {
            request
                .url
                .query_pairs()
                .any(|(k, v)| k == "Action" && v == "DeleteMessage")
        })
        .filter_map(|request| {
            request
                .url
                .query_pairs()
                .find(|(k, _)| k == "ReceiptHandle")
                .map(|(_, v)| v.into_owned())
        })
        .collect()
}

/// Verify that only acknowledged messages are deleted, by receipt handle
#[tokio::test]
async fn test_batch_from_sqs_is_acknowledged_per_message() {
    // Arrange
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(query_param("Action", "ReceiveMessage"))
        .respond_with(ResponseTemplate::new(200).set_body_string(receive_response(&[
            ("receipt-ok", "ok"),
            ("receipt-invalid", "invalid"),
            ("receipt-fail", "fail"),
        ])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(query_param("Action", "ReceiveMessage"))
        .respond_with(ResponseTemplate::new(200).set_body_string(EMPTY_RECEIVE))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(query_param("Action", "DeleteMessage"))
        .respond_with(ResponseTemplate::new(200).set_body_string(DELETE_RESPONSE))
        .expect(2)
        .mount(&server)
        .await;

    let shutdown = CancellationToken::new();
    let handler = ScriptedHandler::new(shutdown.clone(), 3, |message| {
        match message.body_as_str().unwrap_or_default() {
            "invalid" => Err(HandlerError::invalid_event("order", "unknown schema")),
            "fail" => Err(HandlerError::from(anyhow::anyhow!("try again later"))),
            _ => Ok(()),
        }
    });
    let worker = worker_for(&server, &handler, Arc::new(CapturingLogger::default()));

    // Act
    let stats = worker.run(shutdown).await;

    // Assert
    assert_eq!(stats.messages_received, 3);
    assert_eq!(stats.messages_deleted, 2);
    assert_eq!(stats.handler_failures, 1);
    let mut receipts = deleted_receipts(&server).await;
    receipts.sort();
    assert_eq!(receipts, vec!["receipt-invalid", "receipt-ok"]);
}

/// Verify that a failed receive is logged and the next poll still happens
#[tokio::test]
async fn test_receive_error_is_logged_and_polling_continues() {
    // Arrange: first receive fails with a service error, second returns a message
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(query_param("Action", "ReceiveMessage"))
        .respond_with(ResponseTemplate::new(500).set_body_string(
            "<ErrorResponse><Error><Type>Receiver</Type><Code>InternalError</Code>\
             <Message>We encountered an internal error.</Message></Error></ErrorResponse>",
        ))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(query_param("Action", "ReceiveMessage"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(receive_response(&[("receipt-1", r#"{"id":1}"#)])),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(query_param("Action", "DeleteMessage"))
        .respond_with(ResponseTemplate::new(200).set_body_string(DELETE_RESPONSE))
        .mount(&server)
        .await;

    let shutdown = CancellationToken::new();
    let handler = ScriptedHandler::new(shutdown.clone(), 1, |message| {
        serde_json::from_slice::<serde_json::Value>(message.body())
            .map(|_| ())
            .map_err(|e| HandlerError::invalid_event("order", e.to_string()))
    });
    let logger = Arc::new(CapturingLogger::default());
    let worker = worker_for(&server, &handler, Arc::clone(&logger));

    // Act
    let stats = worker.run(shutdown).await;

    // Assert
    assert_eq!(stats.receive_errors, 1);
    assert_eq!(stats.batches, 1);
    assert_eq!(stats.messages_deleted, 1);
    assert_eq!(logger.lines("error").len(), 1);
    assert!(logger.lines("error")[0].contains("InternalError"));
    assert_eq!(deleted_receipts(&server).await, vec!["receipt-1"]);
}
