//! EventGate Client - broker capability and gated producer
//!
//! This crate defines the narrow interface EventGate uses to talk to a message
//! broker, an in-process broker backend, and a producer that holds requests
//! until the broker connection is ready.
//!
//! # Examples
//!
//! ## Producer
//!
//! ```ignore
//! use eventgate_client::{MemoryBroker, Producer, RetryPolicy};
//!
//! let broker = Arc::new(MemoryBroker::new("localhost:9092"));
//! let producer = Producer::connect(broker.clone(), RetryPolicy::default());
//!
//! producer.publish("orders", vec!["order data".to_string()]).await?;
//! ```
//!
//! ## Subscription
//!
//! ```ignore
//! use eventgate_client::{Broker, OffsetReset, SubscribeRequest};
//!
//! let mut sub = broker
//!     .subscribe(SubscribeRequest {
//!         client_id: "c1".into(),
//!         group_id: "analytics".into(),
//!         topics: vec!["orders".into()],
//!         start_offset: OffsetReset::Earliest,
//!     })
//!     .await?;
//!
//! while let Some(message) = sub.messages.recv().await {
//!     println!("Received: {:?}", message);
//! }
//! ```

pub mod broker;
pub mod error;
pub mod memory;
pub mod producer;
pub mod readiness;
pub mod retry;

pub use broker::{
    Broker, BrokerMessage, ConsumerHandle, OffsetReset, ProduceAck, SubscribeRequest,
    Subscription, TopicCreation,
};
pub use error::{ClientError, Result};
pub use memory::MemoryBroker;
pub use producer::Producer;
pub use readiness::{GateState, ReadinessGate};
pub use retry::{retry_with_backoff, RetryPolicy};
