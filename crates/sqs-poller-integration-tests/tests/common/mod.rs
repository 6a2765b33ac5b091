//! Common test utilities for sqs-poller integration tests
//!
//! This module provides:
//! - A logger that records everything the worker reports
//! - Handler builders that stop the worker after a number of messages
//! - Shared queue fixtures

use sqs_poller::{
    handler_fn, HandlerError, Logger, MessageHandler, QueueUrl, ReceivedMessage,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

pub fn queue_url() -> QueueUrl {
    QueueUrl::new("http://localhost:4566/000000000000/integration").unwrap()
}

// ============================================================================
// Recording Logger
// ============================================================================

/// Logger keeping every line, tagged with its level
#[derive(Default)]
#[allow(dead_code)]
pub struct CapturingLogger {
    lines: Mutex<Vec<(&'static str, String)>>,
}

#[allow(dead_code)]
impl CapturingLogger {
    pub fn lines(&self, level: &str) -> Vec<String> {
        self.lines
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, line)| line.clone())
            .collect()
    }

    fn push(&self, level: &'static str, message: &str) {
        self.lines.lock().unwrap().push((level, message.to_string()));
    }
}

impl Logger for CapturingLogger {
    fn debug(&self, message: &str) {
        self.push("debug", message);
    }

    fn info(&self, message: &str) {
        self.push("info", message);
    }

    fn error(&self, message: &str) {
        self.push("error", message);
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Records every body it sees and cancels `shutdown` once `stop_after`
/// invocations have happened. `decide` picks the result per message.
#[allow(dead_code)]
pub struct ScriptedHandler {
    pub bodies: Arc<Mutex<Vec<String>>>,
    pub calls: Arc<AtomicUsize>,
    pub handler: Arc<dyn MessageHandler>,
}

#[allow(dead_code)]
impl ScriptedHandler {
    pub fn new<D>(shutdown: CancellationToken, stop_after: usize, decide: D) -> Self
    where
        D: Fn(&ReceivedMessage) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let decide = Arc::new(decide);

        let handler = {
            let bodies = Arc::clone(&bodies);
            let calls = Arc::clone(&calls);
            handler_fn(move |message, _token| {
                let bodies = Arc::clone(&bodies);
                let calls = Arc::clone(&calls);
                let decide = Arc::clone(&decide);
                let shutdown = shutdown.clone();
                async move {
                    bodies
                        .lock()
                        .unwrap()
                        .push(message.body_as_str().unwrap_or_default().to_string());
                    let result = (*decide)(&message);
                    if calls.fetch_add(1, Ordering::SeqCst) + 1 >= stop_after {
                        shutdown.cancel();
                    }
                    result
                }
            })
        };

        Self {
            bodies,
            calls,
            handler: Arc::new(handler),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn bodies(&self) -> Vec<String> {
        self.bodies.lock().unwrap().clone()
    }
}
