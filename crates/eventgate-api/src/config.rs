//! Server configuration from environment variables.
//!
//! | Variable | Default |
//! |---|---|
//! | `BROKER_HOST` | `localhost:9092` |
//! | `API_PORT` | `3000` |
//! | `DEFAULT_GROUP_ID` | `EventGate` |
//! | `DEFAULT_STREAM_LIMIT` | `5` |
//! | `SSE_BUFFER` | `16` |
//! | `SHUTDOWN_TIMEOUT_SECS` | `30` |
//! | `CLOSE_TIMEOUT_SECS` | `10` |

use std::time::Duration;

use crate::sessions::{DEFAULT_CLOSE_TIMEOUT, DEFAULT_GROUP_ID};
use crate::streaming::DEFAULT_DELIVERY_LIMIT;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub broker_host: String,
    pub port: u16,
    /// Group used when a consumer is created without a group id.
    pub default_group_id: String,
    /// Events per stream when `limit` is absent or invalid.
    pub default_stream_limit: u32,
    /// Events buffered between the delivery task and the HTTP response.
    pub sse_buffer: usize,
    pub shutdown_timeout: Duration,
    /// Bound on one broker-side consumer close.
    pub close_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            broker_host: "localhost:9092".to_string(),
            port: 3000,
            default_group_id: DEFAULT_GROUP_ID.to_string(),
            default_stream_limit: DEFAULT_DELIVERY_LIMIT,
            sse_buffer: 16,
            shutdown_timeout: Duration::from_secs(30),
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Unparseable values keep
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let broker_host = lookup("BROKER_HOST")
            .filter(|h| !h.trim().is_empty())
            .unwrap_or(defaults.broker_host);

        let port = lookup("API_PORT")
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(defaults.port);

        let default_group_id = lookup("DEFAULT_GROUP_ID")
            .filter(|g| !g.trim().is_empty())
            .unwrap_or(defaults.default_group_id);

        let default_stream_limit = lookup("DEFAULT_STREAM_LIMIT")
            .and_then(|l| l.parse::<u32>().ok())
            .filter(|l| *l > 0)
            .unwrap_or(defaults.default_stream_limit);

        let sse_buffer = lookup("SSE_BUFFER")
            .and_then(|b| b.parse::<usize>().ok())
            .filter(|b| *b > 0)
            .unwrap_or(defaults.sse_buffer);

        let shutdown_timeout = lookup("SHUTDOWN_TIMEOUT_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.shutdown_timeout);

        let close_timeout = lookup("CLOSE_TIMEOUT_SECS")
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.close_timeout);

        Self {
            broker_host,
            port,
            default_group_id,
            default_stream_limit,
            sse_buffer,
            shutdown_timeout,
            close_timeout,
        }
    }
}
