//! EventGate API Server Binary
//!
//! # Environment Variables
//!
//! - `BROKER_HOST`: broker address (default: localhost:9092)
//! - `API_PORT`: HTTP port (default: 3000)
//! - `DEFAULT_GROUP_ID`: group for consumers created without one (default: EventGate)
//! - `DEFAULT_STREAM_LIMIT`: events per stream when `limit` is absent (default: 5)
//! - `SSE_BUFFER`: events buffered per open stream (default: 16)
//! - `SHUTDOWN_TIMEOUT_SECS`: drain timeout on shutdown (default: 30)
//! - `CLOSE_TIMEOUT_SECS`: bound on one broker-side consumer close (default: 10)
//! - `RUST_LOG`: Log level (default: info)
//!
//! # Example
//!
//! ```bash
//! export BROKER_HOST=localhost:9092
//! export API_PORT=3000
//! cargo run --bin eventgate-api
//! ```

use eventgate_api::{create_router, shutdown::serve_with_shutdown, ApiConfig, AppState};
use eventgate_client::{Broker, MemoryBroker, Producer, RetryPolicy};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Setup logging
    let log_level = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info".to_string())
        .parse()
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("EventGate API starting...");

    let config = ApiConfig::from_env();
    info!("Configuration:");
    info!("  Broker: {}", config.broker_host);
    info!("  API Port: {}", config.port);
    info!("  Default group: {}", config.default_group_id);
    info!("  Default stream limit: {}", config.default_stream_limit);

    let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new(config.broker_host.clone()));

    // Connect in the background; publish and create-topics wait on readiness.
    let producer = Producer::connect(Arc::clone(&broker), RetryPolicy::default());

    let port = config.port;
    let timeout = config.shutdown_timeout;
    let state = AppState::new(broker, producer, config);
    let sessions = Arc::clone(&state.sessions);
    let app = create_router(state);

    serve_with_shutdown(app, port, sessions, timeout).await?;

    Ok(())
}
