//! EventGate HTTP API
//!
//! Exposes a message broker over HTTP: topic creation and publishing through
//! a shared producer, plus consumer sessions whose messages are delivered as
//! server-sent events.
//!
//! ## Endpoints
//!
//! | Method | Path | |
//! |---|---|---|
//! | POST | `/topics` | create topics |
//! | POST | `/topics/{topic}/messages` | publish a batch |
//! | GET | `/topics/{topic}/messages?limit=N` | stream from a throwaway session |
//! | POST | `/consumers` | create a session |
//! | GET | `/consumers` | list sessions |
//! | GET | `/consumers/{clientId}/messages?limit=N` | stream from a session |
//! | DELETE | `/consumers/{clientId}` | close a session |
//! | GET | `/health`, `/ready` | probes |

use axum::{
    routing::{get, post},
    Router,
};
use eventgate_client::{Broker, Producer};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod sessions;
pub mod shutdown;
pub mod streaming;

pub use config::ApiConfig;
pub use error::{ApiError, Result};
pub use sessions::{Session, SessionRegistry, SessionState};
pub use streaming::{
    DeliveryEvent, DeliveryLimit, DeliveryReport, DeliverySink, SinkFailure, SseSink,
    StreamHandle, StreamOutcome, StreamingCoordinator,
};

#[derive(Clone)]
pub struct AppState {
    pub producer: Producer,
    pub sessions: Arc<SessionRegistry>,
    pub coordinator: StreamingCoordinator,
    pub config: Arc<ApiConfig>,
}

impl AppState {
    pub fn new(broker: Arc<dyn Broker>, producer: Producer, config: ApiConfig) -> Self {
        let sessions = Arc::new(
            SessionRegistry::new(broker, config.default_group_id.clone())
                .with_close_timeout(config.close_timeout),
        );
        let coordinator = StreamingCoordinator::new(Arc::clone(&sessions));
        Self {
            producer,
            sessions,
            coordinator,
            config: Arc::new(config),
        }
    }

    pub(crate) fn stream_limit(&self, query: &models::StreamQuery) -> DeliveryLimit {
        DeliveryLimit::parse_or(query.limit.as_deref(), self.config.default_stream_limit)
    }
}

pub fn create_router(state: AppState) -> Router {
    let swagger = SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi());

    Router::new()
        // Topics
        .route("/topics", post(handlers::topics::create_topics))
        .route(
            "/topics/:topic/messages",
            get(handlers::topics::stream_topic_messages).post(handlers::topics::publish),
        )
        // Consumers
        .route(
            "/consumers",
            get(handlers::consumers::list_consumers).post(handlers::consumers::create_consumer),
        )
        .route(
            "/consumers/:client_id",
            axum::routing::delete(handlers::consumers::delete_consumer),
        )
        .route(
            "/consumers/:client_id/messages",
            get(handlers::consumers::stream_consumer_messages),
        )
        // Health
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .merge(swagger)
        .with_state(state)
        .layer(CorsLayer::permissive())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::topics::create_topics,
        handlers::topics::publish,
        handlers::topics::stream_topic_messages,
        handlers::consumers::create_consumer,
        handlers::consumers::list_consumers,
        handlers::consumers::stream_consumer_messages,
        handlers::consumers::delete_consumer,
        handlers::health::health_check,
        handlers::health::readiness_check,
    ),
    components(schemas(
        models::CreateConsumerRequest,
        models::CreateConsumerResponse,
        models::SessionInfo,
        models::TopicCreationResult,
        models::PublishResponse,
        models::HealthResponse,
        models::ErrorResponse,
        sessions::SessionState,
    )),
    tags(
        (name = "topics", description = "Topic creation, publishing and streaming"),
        (name = "consumers", description = "Consumer sessions"),
        (name = "health", description = "Probes"),
    ),
    info(
        title = "EventGate API",
        version = "0.1.0",
        description = "HTTP and server-sent-event gateway for a message broker"
    )
)]
pub struct ApiDoc;
