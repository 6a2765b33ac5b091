//! Queue transport implementations.
//!
//! Concrete implementations of the [`QueueTransport`](crate::transport::QueueTransport)
//! trait for different queue backends.

pub mod aws;
pub mod memory;

pub use aws::{AwsError, AwsSqsTransport};
pub use memory::{InMemoryConfig, InMemoryTransport};
