//! API models for REST endpoints

use eventgate_client::{ProduceAck, TopicCreation};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::sessions::SessionState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateConsumerRequest {
    pub topics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// One of `earliest`, `latest`, `none` (default: latest)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_offset: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateConsumerResponse {
    pub client_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub client_id: String,
    pub group_id: String,
    pub topics: Vec<String>,
    pub from_offset: String,
    pub state: SessionState,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TopicCreationResult {
    pub topic: String,
    pub created: bool,
}

impl From<TopicCreation> for TopicCreationResult {
    fn from(c: TopicCreation) -> Self {
        Self {
            topic: c.topic,
            created: c.created,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    pub topic: String,
    pub partition: u32,
    pub base_offset: u64,
    pub count: usize,
}

impl From<ProduceAck> for PublishResponse {
    fn from(ack: ProduceAck) -> Self {
        Self {
            topic: ack.topic,
            partition: ack.partition,
            base_offset: ack.base_offset,
            count: ack.count,
        }
    }
}

/// Query parameters for the event-stream endpoints.
///
/// `limit` is kept as a raw string so that non-numeric values fall back to
/// the default instead of rejecting the request.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct StreamQuery {
    pub limit: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
