//! Error types for EventGate client operations.
//!
//! This module defines the errors that can occur while talking to the message
//! broker through the [`Broker`](crate::Broker) capability or through the gated
//! [`Producer`](crate::Producer).
//!
//! ## Error Handling Strategy
//!
//! - **Retriable errors**: `BrokerUnavailable`
//! - **Client errors**: `TopicNotFound`, `InvalidOffsetReset`
//! - **Gate errors**: `ProducerUnavailable` (the producer never became ready)
//! - **Fatal errors**: `Internal`
//!
//! ## Examples
//!
//! ```ignore
//! use eventgate_client::{ClientError, Producer};
//!
//! match producer.publish("orders", vec!["hello".into()]).await {
//!     Ok(ack) => println!("Stored at offset {}", ack.base_offset),
//!     Err(ClientError::ProducerUnavailable(reason)) => {
//!         eprintln!("Producer never connected: {}", reason);
//!     }
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

use thiserror::Error;

/// Convenience type alias for `Result<T, ClientError>`.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Error type for EventGate client operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// The broker could not be reached or rejected a request.
    ///
    /// Wraps the broker's own diagnostic message so it can be surfaced to
    /// HTTP callers.
    ///
    /// ## Causes
    /// - Broker host is down or unreachable
    /// - Produce or create-topics request failed on the broker side
    /// - Consumer group join failed
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// The producer readiness gate settled to an error.
    ///
    /// Every operation that waits for the producer observes the same reason.
    #[error("Producer unavailable: {0}")]
    ProducerUnavailable(String),

    /// Topic does not exist and the broker does not auto-create topics.
    #[error("Topic '{0}' does not exist")]
    TopicNotFound(String),

    /// Start offset name is not one of `earliest`, `latest` or `none`.
    #[error("Invalid start offset '{0}' (expected earliest, latest or none)")]
    InvalidOffsetReset(String),

    /// Internal error that shouldn't normally occur.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::BrokerUnavailable(_))
    }
}
