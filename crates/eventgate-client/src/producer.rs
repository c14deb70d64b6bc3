//! Gated producer for creating topics and publishing messages.
//!
//! The producer owns a [`ReadinessGate`] that is settled once, when the broker
//! connection either comes up or fails for good. Every `create_topics` and
//! `publish` call waits on the gate before it touches the broker, so requests
//! that arrive while the connection is still being established are held
//! rather than rejected.
//!
//! ## Example
//!
//! ```ignore
//! use eventgate_client::{MemoryBroker, Producer, RetryPolicy};
//!
//! let broker = Arc::new(MemoryBroker::new("localhost:9092"));
//! let producer = Producer::connect(broker, RetryPolicy::default());
//!
//! producer.create_topics(&["orders".to_string()]).await?;
//! let ack = producer.publish("orders", vec!["hello".to_string()]).await?;
//! ```

use crate::broker::{Broker, ProduceAck, TopicCreation};
use crate::error::Result;
use crate::readiness::ReadinessGate;
use crate::retry::{retry_with_backoff, RetryPolicy};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Producer gated on broker readiness.
#[derive(Clone)]
pub struct Producer {
    broker: Arc<dyn Broker>,
    ready: ReadinessGate,
}

impl Producer {
    /// Create a producer and start connecting in the background.
    ///
    /// Returns immediately. A spawned task calls [`Broker::connect`] under
    /// `policy` and settles the readiness gate with the outcome. Must be
    /// called from within a tokio runtime.
    pub fn connect(broker: Arc<dyn Broker>, policy: RetryPolicy) -> Self {
        let ready = ReadinessGate::new();

        let task_broker = Arc::clone(&broker);
        let task_gate = ready.clone();
        tokio::spawn(async move {
            let host = task_broker.host().to_string();
            match retry_with_backoff(&policy, &host, || task_broker.connect()).await {
                Ok(()) => {
                    task_gate.settle_ready();
                    info!(host = %host, "Producer connected to broker");
                }
                Err(e) => {
                    error!(host = %host, error = %e, "Producer failed to connect to broker");
                    task_gate.settle_failed(e.to_string());
                }
            }
        });

        Self { broker, ready }
    }

    /// Create a producer whose gate is settled by the caller.
    pub fn with_gate(broker: Arc<dyn Broker>, ready: ReadinessGate) -> Self {
        Self { broker, ready }
    }

    pub fn readiness(&self) -> &ReadinessGate {
        &self.ready
    }

    pub fn is_ready(&self) -> bool {
        self.ready.is_ready()
    }

    /// Create topics after the producer is ready.
    ///
    /// # Errors
    ///
    /// - `ProducerUnavailable` if the gate settled to an error
    /// - `BrokerUnavailable` if the broker rejected the request
    pub async fn create_topics(&self, names: &[String]) -> Result<Vec<TopicCreation>> {
        self.ready.wait_ready().await?;

        let result = self.broker.create_topics(names).await?;
        debug!(count = names.len(), "Created topics");
        Ok(result)
    }

    /// Publish `messages` to `topic` as a single produce request.
    ///
    /// # Errors
    ///
    /// - `ProducerUnavailable` if the gate settled to an error
    /// - `BrokerUnavailable` or `TopicNotFound` if the broker rejected the request
    pub async fn publish(&self, topic: &str, messages: Vec<String>) -> Result<ProduceAck> {
        self.ready.wait_ready().await?;

        let ack = self.broker.produce(topic, messages).await?;
        debug!(
            topic = topic,
            base_offset = ack.base_offset,
            count = ack.count,
            "Published messages"
        );
        Ok(ack)
    }
}
