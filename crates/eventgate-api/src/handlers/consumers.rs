//! Consumer session endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use eventgate_client::OffsetReset;

use crate::error::Result;
use crate::handlers::{event_stream, EventStream};
use crate::models::{
    CreateConsumerRequest, CreateConsumerResponse, ErrorResponse, SessionInfo, StreamQuery,
};
use crate::streaming::SseSink;
use crate::AppState;

/// Join a consumer group and register a session for later streaming.
#[utoipa::path(
    post,
    path = "/consumers",
    request_body = CreateConsumerRequest,
    responses(
        (status = 200, description = "Session created", body = CreateConsumerResponse),
        (status = 400, description = "Empty topic list or unknown fromOffset", body = ErrorResponse),
        (status = 500, description = "Broker unavailable", body = ErrorResponse)
    ),
    tag = "consumers"
)]
pub async fn create_consumer(
    State(state): State<AppState>,
    Json(req): Json<CreateConsumerRequest>,
) -> Result<Json<CreateConsumerResponse>> {
    let start_offset = match req.from_offset.as_deref() {
        Some(raw) => raw.parse::<OffsetReset>()?,
        None => OffsetReset::default(),
    };

    let client_id = state
        .sessions
        .create(req.topics, req.group_id, start_offset)
        .await?;

    Ok(Json(CreateConsumerResponse { client_id }))
}

#[utoipa::path(
    get,
    path = "/consumers",
    responses(
        (status = 200, description = "Registered sessions", body = Vec<SessionInfo>)
    ),
    tag = "consumers"
)]
pub async fn list_consumers(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    let mut sessions = state.sessions.list().await;
    sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Json(sessions)
}

/// Stream up to `limit` messages from a registered session, then close it.
#[utoipa::path(
    get,
    path = "/consumers/{client_id}/messages",
    params(
        ("client_id" = String, Path, description = "Session id returned by POST /consumers"),
        ("limit" = Option<String>, Query, description = "Events before the stream closes (default 5)")
    ),
    responses(
        (status = 200, description = "Server-sent event stream", content_type = "text/event-stream"),
        (status = 404, description = "Unknown session", body = ErrorResponse),
        (status = 409, description = "Session already streaming or closed", body = ErrorResponse)
    ),
    tag = "consumers"
)]
pub async fn stream_consumer_messages(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Result<EventStream> {
    let limit = state.stream_limit(&query);
    let session = state.sessions.get(&client_id).await?;

    let (sink, body) = SseSink::channel(state.config.sse_buffer);
    state.coordinator.attach(session, sink, limit)?;

    Ok(event_stream(body))
}

#[utoipa::path(
    delete,
    path = "/consumers/{client_id}",
    params(
        ("client_id" = String, Path, description = "Session id")
    ),
    responses(
        (status = 200, description = "Session closed and removed"),
        (status = 404, description = "Unknown session", body = ErrorResponse)
    ),
    tag = "consumers"
)]
pub async fn delete_consumer(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Result<StatusCode> {
    state.sessions.remove(&client_id).await?;
    Ok(StatusCode::OK)
}
