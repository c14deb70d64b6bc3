//! Broker capability used by EventGate.
//!
//! The broker is accessed only through the narrow [`Broker`] trait: connect,
//! create topics, produce, and subscribe a consumer-group member. A
//! subscription pushes messages into a channel; nothing in EventGate polls the
//! broker.
//!
//! ## Architecture
//!
//! ```text
//! Producer ──► Broker::produce / create_topics
//! Registry ──► Broker::subscribe ──► Subscription { handle, messages }
//!                                          │             │
//!                         ConsumerHandle::close    mpsc receiver ──► coordinator
//! ```

use crate::error::{ClientError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Where a consumer group starts reading when it has no committed position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    /// Replay the topic from the beginning.
    Earliest,
    /// Only receive messages produced after subscribing.
    #[default]
    Latest,
    /// No explicit reset; resume the committed position or start at the end.
    None,
}

impl OffsetReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
            OffsetReset::None => "none",
        }
    }
}

impl fmt::Display for OffsetReset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OffsetReset {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "earliest" => Ok(OffsetReset::Earliest),
            "latest" => Ok(OffsetReset::Latest),
            "none" => Ok(OffsetReset::None),
            _ => Err(ClientError::InvalidOffsetReset(s.to_string())),
        }
    }
}

/// A message delivered by the broker to a consumer-group member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerMessage {
    pub topic: String,
    pub value: String,
    pub offset: u64,
    pub partition: u32,
    /// Log end offset of the partition when the message was pushed.
    pub high_water_offset: u64,
    pub key: Option<String>,
}

/// Outcome of creating a single topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicCreation {
    pub topic: String,
    /// False when the topic already existed.
    pub created: bool,
}

/// Acknowledgement of one produce request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceAck {
    pub topic: String,
    pub partition: u32,
    /// Offset assigned to the first message of the request.
    pub base_offset: u64,
    pub count: usize,
}

/// Parameters for joining a consumer group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    /// Member identifier; EventGate passes the session id here.
    pub client_id: String,
    pub group_id: String,
    pub topics: Vec<String>,
    pub start_offset: OffsetReset,
}

/// Control side of a live consumer-group membership.
#[async_trait]
pub trait ConsumerHandle: Send + Sync {
    fn client_id(&self) -> &str;

    fn group_id(&self) -> &str;

    /// Leave the group. No message is pushed after this returns, whether or
    /// not it returns an error.
    async fn close(&self) -> Result<()>;
}

/// A live subscription: its control handle plus the pushed message stream.
pub struct Subscription {
    pub handle: Arc<dyn ConsumerHandle>,
    pub messages: mpsc::UnboundedReceiver<BrokerMessage>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("client_id", &self.handle.client_id())
            .field("group_id", &self.handle.group_id())
            .finish()
    }
}

/// Connection to a message broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Address this broker connects to, for diagnostics.
    fn host(&self) -> &str;

    /// Establish connectivity with the broker host.
    async fn connect(&self) -> Result<()>;

    /// Create topics in one batch. Existing topics are reported, not rejected.
    async fn create_topics(&self, names: &[String]) -> Result<Vec<TopicCreation>>;

    /// Append all `messages` to `topic` as one request.
    async fn produce(&self, topic: &str, messages: Vec<String>) -> Result<ProduceAck>;

    /// Join a consumer group over `request.topics`.
    async fn subscribe(&self, request: SubscribeRequest) -> Result<Subscription>;
}
