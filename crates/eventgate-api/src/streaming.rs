//! Streaming delivery from a consumer session to a sink.
//!
//! [`StreamingCoordinator::attach`] binds one session to one [`DeliverySink`]
//! and spawns a delivery task. The task is the only place the delivered count
//! lives, so counting a message and deciding to stop are a single step per
//! message. The task stops on the first of:
//!
//! - `delivered` reaching the limit
//! - the sink reporting that the downstream is gone
//! - the session being closed from elsewhere (e.g. `DELETE /consumers/{id}`)
//!
//! In every case the sink is ended and the session is released exactly once.
//!
//! Events use server-sent-event framing:
//!
//! ```text
//! id: 42
//! event: message
//! data: {"topic":"orders","value":"...","offset":42,...}
//! ```

use async_trait::async_trait;
use axum::response::sse::Event;
use eventgate_client::BrokerMessage;
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::error::{ApiError, Result};
use crate::sessions::{Session, SessionRegistry, SessionState};

/// Events per stream when the caller gives no usable limit.
pub const DEFAULT_DELIVERY_LIMIT: u32 = 5;

/// Maximum number of messages a stream delivers before closing its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryLimit(u32);

impl DeliveryLimit {
    /// `None` for zero.
    pub fn new(limit: u32) -> Option<Self> {
        (limit > 0).then_some(Self(limit))
    }

    /// Parse a raw `limit` query value, falling back to the default of 5.
    pub fn parse(raw: Option<&str>) -> Self {
        Self::parse_or(raw, DEFAULT_DELIVERY_LIMIT)
    }

    /// Parse a raw `limit` query value. Absent, zero, negative and
    /// non-numeric values all yield `default`.
    pub fn parse_or(raw: Option<&str>, default: u32) -> Self {
        let fallback = Self(default.max(1));
        raw.and_then(|s| s.trim().parse::<i64>().ok())
            .filter(|n| *n > 0)
            .map(|n| Self(u32::try_from(n).unwrap_or(u32::MAX)))
            .unwrap_or(fallback)
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl Default for DeliveryLimit {
    fn default() -> Self {
        Self(DEFAULT_DELIVERY_LIMIT)
    }
}

/// One event written to a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryEvent {
    pub id: String,
    pub event: String,
    pub data: String,
}

impl DeliveryEvent {
    pub fn from_message(message: &BrokerMessage) -> serde_json::Result<Self> {
        Ok(Self {
            id: message.offset.to_string(),
            event: "message".to_string(),
            data: serde_json::to_string(message)?,
        })
    }
}

impl fmt::Display for DeliveryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "id: {}\nevent: {}\ndata: {}\n\n", self.id, self.event, self.data)
    }
}

impl From<DeliveryEvent> for Event {
    fn from(e: DeliveryEvent) -> Self {
        Event::default().id(e.id).event(e.event).data(e.data)
    }
}

/// The downstream consumer went away.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("delivery sink is closed")]
pub struct SinkFailure;

/// Destination for delivered events.
#[async_trait]
pub trait DeliverySink: Send + Sync + 'static {
    async fn write(&mut self, event: DeliveryEvent) -> std::result::Result<(), SinkFailure>;

    /// Signal that no more events follow.
    async fn end(&mut self);

    /// Resolves once the downstream is gone. Must be cancel safe.
    async fn closed(&self);
}

pub type SseItem = std::result::Result<Event, Infallible>;

/// Sink feeding an HTTP event-stream response through a bounded channel.
pub struct SseSink {
    tx: Option<mpsc::Sender<SseItem>>,
}

impl SseSink {
    /// Create a sink and the stream to use as the response body.
    pub fn channel(buffer: usize) -> (Self, ReceiverStream<SseItem>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx: Some(tx) }, ReceiverStream::new(rx))
    }
}

#[async_trait]
impl DeliverySink for SseSink {
    async fn write(&mut self, event: DeliveryEvent) -> std::result::Result<(), SinkFailure> {
        let tx = self.tx.as_ref().ok_or(SinkFailure)?;
        tx.send(Ok(event.into())).await.map_err(|_| SinkFailure)
    }

    async fn end(&mut self) {
        // Dropping the sender lets the body finish after buffered events.
        self.tx = None;
    }

    async fn closed(&self) {
        match &self.tx {
            Some(tx) => tx.closed().await,
            None => {}
        }
    }
}

/// Why a stream stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    LimitReached,
    SinkClosed,
    SessionClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub session_id: String,
    pub delivered: u32,
    pub limit: u32,
    pub outcome: StreamOutcome,
}

/// Handle to a running delivery task.
#[derive(Debug)]
pub struct StreamHandle {
    session_id: String,
    task: JoinHandle<DeliveryReport>,
}

impl StreamHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Wait for the stream to stop.
    pub async fn finished(self) -> Result<DeliveryReport> {
        self.task
            .await
            .map_err(|e| ApiError::Internal(format!("delivery task failed: {}", e)))
    }
}

/// Binds sessions to sinks.
#[derive(Clone)]
pub struct StreamingCoordinator {
    registry: Arc<SessionRegistry>,
}

impl StreamingCoordinator {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Start streaming `session` into `sink`. Returns once the delivery task
    /// is running.
    ///
    /// # Errors
    ///
    /// `SessionBusyOrClosed` if the session already has a sink or is closing.
    pub fn attach<S>(
        &self,
        session: Arc<Session>,
        sink: S,
        limit: DeliveryLimit,
    ) -> Result<StreamHandle>
    where
        S: DeliverySink,
    {
        let messages = session.begin_streaming()?;
        let session_id = session.id().to_string();

        info!(
            session_id = %session_id,
            group_id = %session.group_id(),
            limit = limit.get(),
            "Attached delivery sink"
        );

        let task = tokio::spawn(deliver(
            Arc::clone(&self.registry),
            session,
            messages,
            sink,
            limit,
        ));

        Ok(StreamHandle { session_id, task })
    }
}

async fn deliver<S>(
    registry: Arc<SessionRegistry>,
    session: Arc<Session>,
    mut messages: mpsc::UnboundedReceiver<BrokerMessage>,
    mut sink: S,
    limit: DeliveryLimit,
) -> DeliveryReport
where
    S: DeliverySink,
{
    let mut delivered: u32 = 0;

    let outcome = loop {
        let next = tokio::select! {
            biased;
            _ = sink.closed() => None,
            message = messages.recv() => Some(message),
        };

        let message = match next {
            None => break StreamOutcome::SinkClosed,
            Some(None) => break StreamOutcome::SessionClosed,
            Some(Some(message)) => message,
        };

        // Removed out-of-band; drop anything still buffered.
        if session.state() != SessionState::Streaming {
            break StreamOutcome::SessionClosed;
        }

        let event = match DeliveryEvent::from_message(&message) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    session_id = %session.id(),
                    offset = message.offset,
                    error = %e,
                    "Skipping message that could not be encoded"
                );
                continue;
            }
        };
        if sink.write(event).await.is_err() {
            break StreamOutcome::SinkClosed;
        }
        delivered += 1;
        debug!(
            session_id = %session.id(),
            offset = message.offset,
            delivered = delivered,
            "Delivered message"
        );

        if delivered >= limit.get() {
            break StreamOutcome::LimitReached;
        }
    };

    sink.end().await;
    drop(messages);
    registry.release(&session).await;

    info!(
        session_id = %session.id(),
        delivered = delivered,
        limit = limit.get(),
        outcome = ?outcome,
        "Stream finished"
    );

    DeliveryReport {
        session_id: session.id().to_string(),
        delivered,
        limit: limit.get(),
        outcome,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::DEFAULT_GROUP_ID;
    use eventgate_client::{Broker, MemoryBroker, OffsetReset};
    use futures::StreamExt;
    use std::time::Duration;

    fn setup() -> (Arc<MemoryBroker>, Arc<SessionRegistry>, StreamingCoordinator) {
        let broker = Arc::new(MemoryBroker::new("mem"));
        let registry = Arc::new(SessionRegistry::new(broker.clone(), DEFAULT_GROUP_ID));
        let coordinator = StreamingCoordinator::new(registry.clone());
        (broker, registry, coordinator)
    }

    async fn publish(broker: &MemoryBroker, topic: &str, count: usize) {
        let messages = (0..count).map(|i| format!("m{}", i)).collect();
        broker.produce(topic, messages).await.unwrap();
    }

    /// Sink that records events and can be told to fail after N writes.
    struct RecordingSink {
        events: Arc<std::sync::Mutex<Vec<DeliveryEvent>>>,
        fail_after: Option<usize>,
        ended: Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait]
    impl DeliverySink for RecordingSink {
        async fn write(&mut self, event: DeliveryEvent) -> std::result::Result<(), SinkFailure> {
            let mut events = self.events.lock().unwrap();
            if self.fail_after.is_some_and(|n| events.len() >= n) {
                return Err(SinkFailure);
            }
            events.push(event);
            Ok(())
        }

        async fn end(&mut self) {
            self.ended.store(true, std::sync::atomic::Ordering::SeqCst);
        }

        async fn closed(&self) {
            std::future::pending::<()>().await
        }
    }

    fn recording(fail_after: Option<usize>) -> (
        RecordingSink,
        Arc<std::sync::Mutex<Vec<DeliveryEvent>>>,
        Arc<std::sync::atomic::AtomicBool>,
    ) {
        let events = Arc::new(std::sync::Mutex::new(Vec::new()));
        let ended = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let sink = RecordingSink {
            events: events.clone(),
            fail_after,
            ended: ended.clone(),
        };
        (sink, events, ended)
    }

    #[test]
    fn test_limit_parsing() {
        assert_eq!(DeliveryLimit::parse(Some("12")).get(), 12);
        assert_eq!(DeliveryLimit::parse(Some(" 3 ")).get(), 3);
        for raw in [Some("0"), Some("-3"), Some("abc"), Some(""), None] {
            assert_eq!(DeliveryLimit::parse(raw).get(), 5, "limit {:?}", raw);
        }
        assert_eq!(DeliveryLimit::parse_or(Some("nope"), 9).get(), 9);
        assert_eq!(DeliveryLimit::new(0), None);
    }

    #[test]
    fn test_event_framing() {
        let message = BrokerMessage {
            topic: "orders".into(),
            value: "hello".into(),
            offset: 7,
            partition: 0,
            high_water_offset: 8,
            key: None,
        };
        let event = DeliveryEvent::from_message(&message).unwrap();
        let framed = event.to_string();

        let lines: Vec<&str> = framed.lines().collect();
        assert_eq!(lines[0], "id: 7");
        assert_eq!(lines[1], "event: message");
        assert!(lines[2].starts_with("data: {"));
        assert!(framed.ends_with("\n\n"));

        let data: BrokerMessage = serde_json::from_str(&event.data).unwrap();
        assert_eq!(data, message);
    }

    #[tokio::test]
    async fn test_limit_reached_closes_and_unregisters() {
        let (broker, registry, coordinator) = setup();
        let id = registry
            .create(vec!["orders".into()], Some("g1".into()), OffsetReset::Latest)
            .await
            .unwrap();
        publish(&broker, "orders", 7).await;

        let session = registry.get(&id).await.unwrap();
        let (sink, events, ended) = recording(None);
        let handle = coordinator
            .attach(session.clone(), sink, DeliveryLimit::parse(Some("5")))
            .unwrap();

        let report = handle.finished().await.unwrap();
        assert_eq!(report.outcome, StreamOutcome::LimitReached);
        assert_eq!(report.delivered, 5);

        let ids: Vec<String> = events.lock().unwrap().iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids, vec!["0", "1", "2", "3", "4"]);
        assert!(ended.load(std::sync::atomic::Ordering::SeqCst));

        assert!(matches!(registry.get(&id).await, Err(ApiError::NotFound(_))));
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(broker.close_calls(&id), 1);

        // Stray messages after close reach nobody.
        publish(&broker, "orders", 2).await;
        assert_eq!(broker.close_calls(&id), 1);
    }

    #[tokio::test]
    async fn test_double_attach_rejected() {
        let (_broker, registry, coordinator) = setup();
        let id = registry
            .create(vec!["orders".into()], None, OffsetReset::Latest)
            .await
            .unwrap();
        let session = registry.get(&id).await.unwrap();

        let (first, _, _) = recording(None);
        let _handle = coordinator
            .attach(session.clone(), first, DeliveryLimit::default())
            .unwrap();

        let (second, _, _) = recording(None);
        let err = coordinator
            .attach(session, second, DeliveryLimit::default())
            .unwrap_err();
        assert!(matches!(err, ApiError::SessionBusyOrClosed(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_attach_has_one_winner() {
        let (_broker, registry, coordinator) = setup();

        for _ in 0..20 {
            let id = registry
                .create(vec!["orders".into()], None, OffsetReset::Latest)
                .await
                .unwrap();
            let session = registry.get(&id).await.unwrap();

            let attempts: Vec<_> = (0..16)
                .map(|_| {
                    let coordinator = coordinator.clone();
                    let session = Arc::clone(&session);
                    tokio::spawn(async move {
                        let (sink, _, _) = recording(None);
                        coordinator.attach(session, sink, DeliveryLimit::default())
                    })
                })
                .collect();

            let mut attached = 0;
            for attempt in attempts {
                match attempt.await.unwrap() {
                    Ok(_) => attached += 1,
                    Err(ApiError::SessionBusyOrClosed(_)) => {}
                    Err(e) => panic!("unexpected attach error: {e}"),
                }
            }
            assert_eq!(attached, 1);
            assert_eq!(session.state(), SessionState::Streaming);

            registry.remove(&id).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_sink_failure_closes_session() {
        let (broker, registry, coordinator) = setup();
        let id = registry
            .create(vec!["orders".into()], None, OffsetReset::Latest)
            .await
            .unwrap();
        let session = registry.get(&id).await.unwrap();

        let (sink, events, _) = recording(Some(2));
        let handle = coordinator
            .attach(session, sink, DeliveryLimit::default())
            .unwrap();
        publish(&broker, "orders", 4).await;

        let report = handle.finished().await.unwrap();
        assert_eq!(report.outcome, StreamOutcome::SinkClosed);
        assert_eq!(report.delivered, 2);
        assert_eq!(events.lock().unwrap().len(), 2);
        assert!(registry.get(&id).await.is_err());
        assert_eq!(broker.member_count(DEFAULT_GROUP_ID), 0);
    }

    #[tokio::test]
    async fn test_dropped_sse_body_closes_session() {
        let (broker, registry, coordinator) = setup();
        let id = registry
            .create(vec!["orders".into()], None, OffsetReset::Latest)
            .await
            .unwrap();
        let session = registry.get(&id).await.unwrap();

        let (sink, mut body) = SseSink::channel(16);
        let handle = coordinator
            .attach(session, sink, DeliveryLimit::default())
            .unwrap();

        publish(&broker, "orders", 2).await;
        assert!(body.next().await.is_some());
        assert!(body.next().await.is_some());
        drop(body);

        let report = tokio::time::timeout(Duration::from_secs(5), handle.finished())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.outcome, StreamOutcome::SinkClosed);
        assert_eq!(report.delivered, 2);
        assert!(matches!(registry.get(&id).await, Err(ApiError::NotFound(_))));
        assert_eq!(broker.close_calls(&id), 1);
    }

    #[tokio::test]
    async fn test_remove_while_streaming_ends_stream() {
        let (broker, registry, coordinator) = setup();
        let id = registry
            .create(vec!["orders".into()], None, OffsetReset::Latest)
            .await
            .unwrap();
        let session = registry.get(&id).await.unwrap();

        let (sink, events, ended) = recording(None);
        let handle = coordinator
            .attach(session, sink, DeliveryLimit::default())
            .unwrap();
        publish(&broker, "orders", 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        registry.remove(&id).await.unwrap();

        let report = tokio::time::timeout(Duration::from_secs(5), handle.finished())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.outcome, StreamOutcome::SessionClosed);
        assert_eq!(report.delivered, 1);
        assert_eq!(events.lock().unwrap().len(), 1);
        assert!(ended.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(broker.close_calls(&id), 1);
    }

    #[tokio::test]
    async fn test_ephemeral_stream_runs_to_limit() {
        let (broker, registry, coordinator) = setup();
        let session = registry.create_ephemeral("clicks".into()).await.unwrap();
        let session_id = session.id().to_string();

        let (sink, events, _) = recording(None);
        let handle = coordinator
            .attach(session, sink, DeliveryLimit::parse(Some("3")))
            .unwrap();
        publish(&broker, "clicks", 5).await;

        let report = handle.finished().await.unwrap();
        assert_eq!(report.outcome, StreamOutcome::LimitReached);
        assert_eq!(report.delivered, 3);
        assert_eq!(events.lock().unwrap().len(), 3);
        assert_eq!(broker.close_calls(&session_id), 1);
    }
}
