//! Consumer session registry.
//!
//! A session is one consumer-group membership on the broker, addressable by
//! a server-generated id across HTTP requests. The registry is the only owner
//! of registered sessions; the streaming coordinator holds a shared reference
//! while a sink is attached.
//!
//! ## Lifecycle
//!
//! ```text
//! create ──► Created ──attach──► Streaming ──limit / sink gone──► Closing ──► Closed
//!               │                                                   ▲
//!               └───────────────────── remove ──────────────────────┘
//! ```
//!
//! Removing an entry and closing its broker membership happen under the map's
//! write lock, so a concurrent lookup sees the session either fully present or
//! fully gone. A failed or timed-out broker close is logged and the entry is
//! dropped anyway.

use chrono::{DateTime, Utc};
use eventgate_client::{Broker, BrokerMessage, ConsumerHandle, OffsetReset, SubscribeRequest};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{ApiError, Result};
use crate::models::SessionInfo;

/// Group used when a consumer is created without one.
pub const DEFAULT_GROUP_ID: &str = "EventGate";

/// Upper bound on one broker-side close.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

const EPHEMERAL_GROUP_PREFIX: &str = "eventgate-ephemeral-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Created,
    Streaming,
    Closing,
    Closed,
}

struct SessionInner {
    state: SessionState,
    /// Taken by the first attach.
    messages: Option<mpsc::UnboundedReceiver<BrokerMessage>>,
}

/// One consumer-group membership.
pub struct Session {
    id: String,
    group_id: String,
    topics: Vec<String>,
    start_offset: OffsetReset,
    created_at: DateTime<Utc>,
    handle: Arc<dyn ConsumerHandle>,
    inner: Mutex<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("group_id", &self.group_id)
            .field("topics", &self.topics)
            .field("start_offset", &self.start_offset)
            .field("state", &self.state())
            .finish()
    }
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn start_offset(&self) -> OffsetReset {
        self.start_offset
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            client_id: self.id.clone(),
            group_id: self.group_id.clone(),
            topics: self.topics.clone(),
            from_offset: self.start_offset.to_string(),
            state: self.state(),
            created_at: self.created_at.to_rfc3339(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move `Created -> Streaming` and hand over the message stream.
    pub(crate) fn begin_streaming(&self) -> Result<mpsc::UnboundedReceiver<BrokerMessage>> {
        let mut inner = self.lock();
        if inner.state != SessionState::Created {
            return Err(ApiError::SessionBusyOrClosed(self.id.clone()));
        }
        let messages = inner
            .messages
            .take()
            .ok_or_else(|| ApiError::SessionBusyOrClosed(self.id.clone()))?;
        inner.state = SessionState::Streaming;
        Ok(messages)
    }

    /// Close the broker membership, waiting at most `timeout` for the
    /// broker. Only the first call does anything; it returns whether this
    /// call performed the close.
    pub(crate) async fn close(&self, timeout: Duration) -> bool {
        {
            let mut inner = self.lock();
            if matches!(inner.state, SessionState::Closing | SessionState::Closed) {
                return false;
            }
            inner.state = SessionState::Closing;
            inner.messages = None;
        }

        match tokio::time::timeout(timeout, self.handle.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(
                session_id = %self.id,
                group_id = %self.group_id,
                error = %e,
                "Something went wrong closing the consumer"
            ),
            Err(_) => warn!(
                session_id = %self.id,
                group_id = %self.group_id,
                timeout = ?timeout,
                "Timed out closing the consumer"
            ),
        }

        self.lock().state = SessionState::Closed;
        debug!(session_id = %self.id, "Session closed");
        true
    }
}

/// Process-wide map from session id to live session.
pub struct SessionRegistry {
    broker: Arc<dyn Broker>,
    default_group_id: String,
    close_timeout: Duration,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new(broker: Arc<dyn Broker>, default_group_id: impl Into<String>) -> Self {
        Self {
            broker,
            default_group_id: default_group_id.into(),
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Bound each broker-side close. A close that runs over is logged and the
    /// session is treated as closed.
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Join a consumer group and register the session.
    ///
    /// `group_id` falls back to the registry default when absent or blank.
    /// Duplicate topic names are collapsed, keeping first occurrence order.
    ///
    /// # Errors
    ///
    /// - `BadRequest` if `topics` is empty
    /// - `BrokerUnavailable` if the broker refused the subscription; nothing
    ///   is registered in that case
    pub async fn create(
        &self,
        topics: Vec<String>,
        group_id: Option<String>,
        start_offset: OffsetReset,
    ) -> Result<String> {
        let group_id = group_id
            .filter(|g| !g.trim().is_empty())
            .unwrap_or_else(|| self.default_group_id.clone());

        let session = self.open(topics, group_id, start_offset).await?;
        let id = session.id.clone();

        self.sessions.write().await.insert(id.clone(), session);
        info!(
            session_id = %id,
            "Registered consumer session"
        );
        Ok(id)
    }

    /// Join a throwaway group on `topic` without registering the session.
    ///
    /// Used for subscribe-and-stream requests; the session can only end
    /// through its stream.
    pub async fn create_ephemeral(&self, topic: String) -> Result<Arc<Session>> {
        let group_id = format!("{}{}", EPHEMERAL_GROUP_PREFIX, Uuid::new_v4());
        self.open(vec![topic], group_id, OffsetReset::None).await
    }

    async fn open(
        &self,
        topics: Vec<String>,
        group_id: String,
        start_offset: OffsetReset,
    ) -> Result<Arc<Session>> {
        let mut unique: Vec<String> = Vec::with_capacity(topics.len());
        for topic in topics {
            if !topic.trim().is_empty() && !unique.contains(&topic) {
                unique.push(topic);
            }
        }
        if unique.is_empty() {
            return Err(ApiError::BadRequest(
                "at least one topic is required".to_string(),
            ));
        }

        let id = Uuid::new_v4().to_string();
        let subscription = self
            .broker
            .subscribe(SubscribeRequest {
                client_id: id.clone(),
                group_id: group_id.clone(),
                topics: unique.clone(),
                start_offset,
            })
            .await?;

        info!(
            session_id = %id,
            group_id = %group_id,
            topics = ?unique,
            start_offset = %start_offset,
            "Opened consumer session"
        );

        Ok(Arc::new(Session {
            id,
            group_id,
            topics: unique,
            start_offset,
            created_at: Utc::now(),
            handle: subscription.handle,
            inner: Mutex::new(SessionInner {
                state: SessionState::Created,
                messages: Some(subscription.messages),
            }),
        }))
    }

    /// Look up a registered session.
    pub async fn get(&self, id: &str) -> Result<Arc<Session>> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(id.to_string()))
    }

    /// Close and unregister a session.
    ///
    /// # Errors
    ///
    /// `NotFound` if no session is registered under `id`.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .remove(id)
            .ok_or_else(|| ApiError::NotFound(id.to_string()))?;
        session.close(self.close_timeout).await;
        drop(sessions);

        info!(session_id = %id, "Removed consumer session");
        Ok(())
    }

    /// Unregister `session` if it is still the registered entry for its id,
    /// then close it. Safe to call for ephemeral or already removed sessions.
    pub async fn release(&self, session: &Arc<Session>) {
        let mut sessions = self.sessions.write().await;
        let registered = sessions
            .get(session.id())
            .is_some_and(|s| Arc::ptr_eq(s, session));
        if registered {
            sessions.remove(session.id());
        }
        session.close(self.close_timeout).await;
    }

    pub async fn list(&self) -> Vec<SessionInfo> {
        self.sessions
            .read()
            .await
            .values()
            .map(|s| s.info())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Close and unregister every session. Returns how many were removed.
    pub async fn close_all(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let drained: Vec<Arc<Session>> = sessions.drain().map(|(_, s)| s).collect();
        for session in &drained {
            session.close(self.close_timeout).await;
        }
        drained.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventgate_client::MemoryBroker;

    fn registry() -> (Arc<MemoryBroker>, SessionRegistry) {
        let broker = Arc::new(MemoryBroker::new("mem"));
        let registry = SessionRegistry::new(broker.clone(), DEFAULT_GROUP_ID);
        (broker, registry)
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let (_broker, registry) = registry();
        let id = registry
            .create(
                vec!["orders".into(), "payments".into()],
                Some("g1".into()),
                OffsetReset::Earliest,
            )
            .await
            .unwrap();

        let session = registry.get(&id).await.unwrap();
        assert_eq!(session.id(), id);
        assert_eq!(session.state(), SessionState::Created);
        assert_eq!(session.topics(), &["orders".to_string(), "payments".to_string()]);
        assert_eq!(session.group_id(), "g1");
        assert_eq!(session.start_offset(), OffsetReset::Earliest);
    }

    #[tokio::test]
    async fn test_blank_group_uses_default() {
        let (broker, registry) = registry();
        let id = registry
            .create(vec!["orders".into()], Some("  ".into()), OffsetReset::Latest)
            .await
            .unwrap();

        let session = registry.get(&id).await.unwrap();
        assert_eq!(session.group_id(), DEFAULT_GROUP_ID);
        assert_eq!(broker.member_count(DEFAULT_GROUP_ID), 1);

        let id2 = registry
            .create(vec!["orders".into()], None, OffsetReset::Latest)
            .await
            .unwrap();
        assert_ne!(id, id2);
        assert_eq!(registry.get(&id2).await.unwrap().group_id(), DEFAULT_GROUP_ID);
    }

    #[tokio::test]
    async fn test_create_rejects_empty_topics() {
        let (_broker, registry) = registry();
        let err = registry
            .create(vec![], None, OffsetReset::Latest)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_create_failure_registers_nothing() {
        let (broker, registry) = registry();
        broker.set_offline(true);

        let err = registry
            .create(vec!["orders".into()], None, OffsetReset::Latest)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::BrokerUnavailable(_)));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_remove_twice_closes_once() {
        let (broker, registry) = registry();
        let id = registry
            .create(vec!["orders".into()], None, OffsetReset::Latest)
            .await
            .unwrap();

        registry.remove(&id).await.unwrap();
        assert!(matches!(
            registry.remove(&id).await,
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(registry.get(&id).await, Err(ApiError::NotFound(_))));
        assert_eq!(broker.close_calls(&id), 1);
    }

    #[tokio::test]
    async fn test_remove_with_failing_close_still_unregisters() {
        let (broker, registry) = registry();
        broker.fail_closes(true);
        let id = registry
            .create(vec!["orders".into()], None, OffsetReset::Latest)
            .await
            .unwrap();
        let session = registry.get(&id).await.unwrap();

        registry.remove(&id).await.unwrap();
        assert!(matches!(registry.get(&id).await, Err(ApiError::NotFound(_))));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_get_unknown_is_not_found() {
        let (_broker, registry) = registry();
        assert!(matches!(
            registry.get("never-created").await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_second_attach_is_rejected() {
        let (_broker, registry) = registry();
        let id = registry
            .create(vec!["orders".into()], None, OffsetReset::Latest)
            .await
            .unwrap();
        let session = registry.get(&id).await.unwrap();

        let _messages = session.begin_streaming().unwrap();
        assert_eq!(session.state(), SessionState::Streaming);
        assert!(matches!(
            session.begin_streaming(),
            Err(ApiError::SessionBusyOrClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_ephemeral_session_is_not_registered() {
        let (broker, registry) = registry();
        let session = registry.create_ephemeral("orders".into()).await.unwrap();

        assert!(session.group_id().starts_with(EPHEMERAL_GROUP_PREFIX));
        assert_eq!(session.start_offset(), OffsetReset::None);
        assert!(registry.get(session.id()).await.is_err());

        registry.release(&session).await;
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(broker.close_calls(session.id()), 1);
    }

    #[tokio::test]
    async fn test_close_all() {
        let (broker, registry) = registry();
        for _ in 0..3 {
            registry
                .create(vec!["orders".into()], None, OffsetReset::Latest)
                .await
                .unwrap();
        }
        assert_eq!(registry.list().await.len(), 3);

        assert_eq!(registry.close_all().await, 3);
        assert!(registry.is_empty().await);
        assert_eq!(broker.member_count(DEFAULT_GROUP_ID), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_close_times_out() {
        let (broker, registry) = registry();
        let registry = registry.with_close_timeout(Duration::from_millis(100));
        broker.delay_closes(Duration::from_secs(3600));
        let id = registry
            .create(vec!["orders".into()], None, OffsetReset::Latest)
            .await
            .unwrap();
        let session = registry.get(&id).await.unwrap();

        registry.remove(&id).await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(registry.get(&id).await, Err(ApiError::NotFound(_))));
        assert!(registry.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_lookups_never_see_a_half_removed_session() {
        let broker = Arc::new(MemoryBroker::new("mem"));
        broker.delay_closes(Duration::from_millis(50));
        let registry = Arc::new(SessionRegistry::new(broker.clone(), DEFAULT_GROUP_ID));
        let id = registry
            .create(vec!["orders".into()], None, OffsetReset::Latest)
            .await
            .unwrap();

        let mut readers = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            let id = id.clone();
            readers.push(tokio::spawn(async move {
                let mut lookups = 0usize;
                loop {
                    // list() reads each state under the map lock
                    for info in registry.list().await {
                        assert_eq!(info.state, SessionState::Created, "listed {:?}", info);
                    }
                    match registry.get(&id).await {
                        Ok(session) => assert_eq!(session.id(), id),
                        Err(ApiError::NotFound(_)) => break,
                        Err(e) => panic!("unexpected lookup error: {e}"),
                    }
                    lookups += 1;
                    tokio::task::yield_now().await;
                }
                // Once gone, the session stays gone.
                assert!(registry.get(&id).await.is_err());
                assert!(registry.list().await.is_empty());
                lookups
            }));
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
        registry.remove(&id).await.unwrap();

        for reader in readers {
            reader.await.unwrap();
        }
        assert_eq!(broker.close_calls(&id), 1);
    }
}
