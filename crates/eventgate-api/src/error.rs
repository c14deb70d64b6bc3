//! API error type and its HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use eventgate_client::ClientError;
use thiserror::Error;

use crate::models::ErrorResponse;

pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors surfaced by the session registry, the streaming coordinator and
/// the HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Unknown or already deleted session id.
    #[error("Consumer {0} does not exist")]
    NotFound(String),

    /// Connect, produce or create-topics failure reported by the broker.
    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// The producer readiness gate settled to an error.
    #[error("Producer unavailable: {0}")]
    ProducerUnavailable(String),

    /// A sink is already attached, or the session is closing or closed.
    #[error("Consumer {0} is already streaming or closed")]
    SessionBusyOrClosed(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ClientError> for ApiError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::ProducerUnavailable(reason) => ApiError::ProducerUnavailable(reason),
            ClientError::InvalidOffsetReset(_) => ApiError::BadRequest(err.to_string()),
            ClientError::Internal(reason) => ApiError::Internal(reason),
            other => ApiError::BrokerUnavailable(other.to_string()),
        }
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::SessionBusyOrClosed(_) => StatusCode::CONFLICT,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::BrokerUnavailable(_)
            | ApiError::ProducerUnavailable(_)
            | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "not_found",
            ApiError::BrokerUnavailable(_) => "broker_unavailable",
            ApiError::ProducerUnavailable(_) => "producer_unavailable",
            ApiError::SessionBusyOrClosed(_) => "session_busy_or_closed",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = ErrorResponse {
            error: self.kind().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
