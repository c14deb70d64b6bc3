//! One-shot readiness gate for the producer.
//!
//! The gate starts `Pending` and is settled exactly once, either to `Ready` or
//! to `Failed(reason)`. Any number of tasks may wait on it; all of them observe
//! the same outcome, and tasks arriving after settlement return immediately.
//! The gate is never reset.

use crate::error::{ClientError, Result};
use std::sync::Arc;
use tokio::sync::watch;

/// Settlement state of a [`ReadinessGate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateState {
    Pending,
    Ready,
    Failed(String),
}

/// Single-writer, multi-reader readiness signal.
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    tx: Arc<watch::Sender<GateState>>,
}

impl ReadinessGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(GateState::Pending);
        Self { tx: Arc::new(tx) }
    }

    /// Settle the gate as ready. Returns false if it was already settled.
    pub fn settle_ready(&self) -> bool {
        self.settle(GateState::Ready)
    }

    /// Settle the gate as failed. Returns false if it was already settled.
    pub fn settle_failed(&self, reason: impl Into<String>) -> bool {
        self.settle(GateState::Failed(reason.into()))
    }

    fn settle(&self, next: GateState) -> bool {
        // First settlement wins.
        self.tx.send_if_modified(|state| {
            if *state == GateState::Pending {
                *state = next;
                true
            } else {
                false
            }
        })
    }

    pub fn state(&self) -> GateState {
        self.tx.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        *self.tx.borrow() == GateState::Ready
    }

    /// Wait until the gate settles.
    ///
    /// # Errors
    ///
    /// `ProducerUnavailable` carrying the failure reason if the gate settled
    /// to an error.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut rx = self.tx.subscribe();
        let settled = rx
            .wait_for(|state| *state != GateState::Pending)
            .await
            .map_err(|_| ClientError::Internal("readiness gate dropped".to_string()))?
            .clone();

        match settled {
            GateState::Ready => Ok(()),
            GateState::Failed(reason) => Err(ClientError::ProducerUnavailable(reason)),
            GateState::Pending => Err(ClientError::Internal(
                "readiness gate observed pending after settlement".to_string(),
            )),
        }
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}
