//! Graceful shutdown for the API server
//!
//! On SIGINT or SIGTERM the server stops accepting connections and closes
//! every registered consumer session, which ends their event streams so that
//! in-flight responses can complete. Draining is bounded by
//! `SHUTDOWN_TIMEOUT_SECS`; after that the server returns regardless.

use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tracing::{error, info, warn};

use crate::sessions::SessionRegistry;

/// Shutdown signal type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Received SIGINT (Ctrl+C)
    SigInt,
    /// Received SIGTERM
    SigTerm,
    /// Manual shutdown requested
    Manual,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SigInt => write!(f, "SIGINT (Ctrl+C)"),
            Self::SigTerm => write!(f, "SIGTERM"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Handle for triggering and monitoring shutdown
#[derive(Clone)]
pub struct ShutdownHandle {
    sender: Arc<watch::Sender<Option<ShutdownSignal>>>,
    receiver: watch::Receiver<Option<ShutdownSignal>>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(None);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    /// Trigger a manual shutdown
    pub fn shutdown(&self) {
        self.sender.send_replace(Some(ShutdownSignal::Manual));
    }

    /// Wait for shutdown signal
    pub async fn wait(mut self) -> ShutdownSignal {
        let signal = match self.receiver.wait_for(Option::is_some).await {
            Ok(signal) => *signal,
            Err(_) => None,
        };
        signal.unwrap_or(ShutdownSignal::Manual)
    }

    pub fn is_shutdown(&self) -> bool {
        self.receiver.borrow().is_some()
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves when SIGINT or SIGTERM is received. A handler that fails to
/// install is logged and never fires.
pub async fn shutdown_signal() -> ShutdownSignal {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
        ShutdownSignal::SigInt
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
        ShutdownSignal::SigTerm
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<ShutdownSignal>();

    tokio::select! {
        signal = ctrl_c => signal,
        signal = terminate => signal,
    }
}

/// Bind `0.0.0.0:port` and serve until SIGINT/SIGTERM.
pub async fn serve_with_shutdown(
    router: axum::Router,
    port: u16,
    sessions: Arc<SessionRegistry>,
    timeout: Duration,
) -> std::io::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("EventGate API listening on {}", addr);
    info!("   Swagger UI: http://localhost:{}/swagger-ui", port);
    info!("   Health: http://localhost:{}/health", port);
    info!("   Graceful shutdown timeout: {:?}", timeout);

    serve_until(listener, router, sessions, timeout, shutdown_signal()).await
}

/// Serve on `listener` until `signal` resolves.
///
/// The listener stops accepting as soon as the signal fires. Sessions are
/// closed while in-flight requests drain, and once more after the server has
/// stopped to catch any registered by a request that was still running.
pub async fn serve_until<F>(
    listener: TcpListener,
    router: axum::Router,
    sessions: Arc<SessionRegistry>,
    timeout: Duration,
    signal: F,
) -> std::io::Result<()>
where
    F: Future<Output = ShutdownSignal> + Send + 'static,
{
    let (draining_tx, draining_rx) = oneshot::channel::<()>();

    let graceful = async move {
        let signal = signal.await;
        info!("Received {}, initiating graceful shutdown", signal);
        let _ = draining_tx.send(());
    };

    let server = axum::serve(listener, router)
        .with_graceful_shutdown(graceful)
        .into_future();

    let draining = Arc::clone(&sessions);
    let drain = async move {
        if draining_rx.await.is_err() {
            std::future::pending::<()>().await;
        }
        let closed = draining.close_all().await;
        info!(closed = closed, "Closed consumer sessions");
        tokio::time::sleep(timeout).await;
    };

    tokio::select! {
        result = server => {
            result?;
            info!("Server shut down gracefully");
        }
        _ = drain => {
            warn!(timeout = ?timeout, "Shutdown timed out with connections still open");
        }
    }

    let late = sessions.close_all().await;
    if late > 0 {
        info!(closed = late, "Closed sessions registered during shutdown");
    }

    Ok(())
}
