//! Topic endpoints: create, publish, and subscribe-and-stream

use axum::{
    extract::{Path, Query, State},
    Json,
};
use tracing::info;

use crate::error::Result;
use crate::handlers::{event_stream, EventStream};
use crate::models::{ErrorResponse, PublishResponse, StreamQuery, TopicCreationResult};
use crate::streaming::SseSink;
use crate::AppState;

#[utoipa::path(
    post,
    path = "/topics",
    request_body = Vec<String>,
    responses(
        (status = 200, description = "Per-topic creation result", body = Vec<TopicCreationResult>),
        (status = 500, description = "Broker or producer unavailable", body = ErrorResponse)
    ),
    tag = "topics"
)]
pub async fn create_topics(
    State(state): State<AppState>,
    Json(names): Json<Vec<String>>,
) -> Result<Json<Vec<TopicCreationResult>>> {
    let created = state.producer.create_topics(&names).await?;
    Ok(Json(created.into_iter().map(Into::into).collect()))
}

/// Publish a batch of messages as one produce request.
#[utoipa::path(
    post,
    path = "/topics/{topic}/messages",
    params(
        ("topic" = String, Path, description = "Topic name")
    ),
    request_body = Vec<String>,
    responses(
        (status = 200, description = "Messages appended", body = PublishResponse),
        (status = 500, description = "Broker or producer unavailable", body = ErrorResponse)
    ),
    tag = "topics"
)]
pub async fn publish(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    Json(messages): Json<Vec<String>>,
) -> Result<Json<PublishResponse>> {
    let ack = state.producer.publish(&topic, messages).await?;
    Ok(Json(ack.into()))
}

/// Subscribe to one topic under a throwaway group and stream up to `limit`
/// newly published messages. The session is never registered.
#[utoipa::path(
    get,
    path = "/topics/{topic}/messages",
    params(
        ("topic" = String, Path, description = "Topic name"),
        ("limit" = Option<String>, Query, description = "Events before the stream closes (default 5)")
    ),
    responses(
        (status = 200, description = "Server-sent event stream", content_type = "text/event-stream"),
        (status = 500, description = "Broker unavailable", body = ErrorResponse)
    ),
    tag = "topics"
)]
pub async fn stream_topic_messages(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Result<EventStream> {
    let limit = state.stream_limit(&query);
    let session = state.sessions.create_ephemeral(topic.clone()).await?;

    let (sink, body) = SseSink::channel(state.config.sse_buffer);
    let handle = state.coordinator.attach(session, sink, limit)?;
    info!(
        topic = %topic,
        session_id = %handle.session_id(),
        "Streaming topic"
    );

    Ok(event_stream(body))
}
