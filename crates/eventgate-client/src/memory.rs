//! In-process broker backend.
//!
//! `MemoryBroker` implements [`Broker`] without any network I/O. Topics are
//! single-partition logs, consumer groups keep a committed position per topic,
//! and produced messages are pushed straight into member channels.
//!
//! ## Delivery model
//!
//! - Every group receives every message of the topics its members subscribe to.
//! - Within a group, each message goes to exactly one live member (round robin).
//! - A group's position only advances when a message was handed to a member,
//!   so a group with no live members resumes where it stopped.
//!
//! The broker also exposes a few controls (`set_offline`, `fail_closes`,
//! `delay_closes`, `close_calls`) used to exercise failure paths in tests.

use crate::broker::{
    Broker, BrokerMessage, ConsumerHandle, OffsetReset, ProduceAck, SubscribeRequest,
    Subscription, TopicCreation,
};
use crate::error::{ClientError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct TopicLog {
    values: Vec<String>,
}

#[derive(Debug)]
struct Member {
    client_id: String,
    topics: Vec<String>,
    tx: mpsc::UnboundedSender<BrokerMessage>,
}

#[derive(Debug, Default)]
struct GroupState {
    members: Vec<Member>,
    /// Next offset to hand out, per topic.
    positions: HashMap<String, u64>,
    cursor: usize,
}

impl GroupState {
    /// Hand `message` to the next live member subscribed to its topic.
    fn push(&mut self, message: BrokerMessage) -> bool {
        loop {
            let candidates: Vec<usize> = self
                .members
                .iter()
                .enumerate()
                .filter(|(_, m)| m.topics.iter().any(|t| *t == message.topic))
                .map(|(i, _)| i)
                .collect();
            if candidates.is_empty() {
                return false;
            }

            let idx = candidates[self.cursor % candidates.len()];
            self.cursor = self.cursor.wrapping_add(1);

            if self.members[idx].tx.send(message.clone()).is_ok() {
                return true;
            }
            // Receiver is gone; drop the member and try the next one.
            let gone = self.members.remove(idx);
            debug!(client_id = %gone.client_id, "Dropped member with closed receiver");
        }
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: HashMap<String, TopicLog>,
    groups: HashMap<String, GroupState>,
    close_calls: HashMap<String, usize>,
}

impl BrokerState {
    fn deliver_pending(&mut self, group_id: &str, topic: &str) {
        let (Some(log), Some(group)) = (self.topics.get(topic), self.groups.get_mut(group_id))
        else {
            return;
        };

        let end = log.values.len() as u64;
        let mut position = group.positions.get(topic).copied().unwrap_or(end);
        while position < end {
            let message = BrokerMessage {
                topic: topic.to_string(),
                value: log.values[position as usize].clone(),
                offset: position,
                partition: 0,
                high_water_offset: end,
                key: None,
            };
            if !group.push(message) {
                break;
            }
            position += 1;
        }
        group.positions.insert(topic.to_string(), position);
    }

    fn ensure_topic(&mut self, topic: &str, auto_create: bool) -> Result<()> {
        if self.topics.contains_key(topic) {
            return Ok(());
        }
        if !auto_create {
            return Err(ClientError::TopicNotFound(topic.to_string()));
        }
        self.topics.insert(topic.to_string(), TopicLog::default());
        info!(topic = topic, "Auto-created topic");
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<BrokerState>,
    offline: AtomicBool,
    fail_closes: AtomicBool,
    close_delay_ms: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_online(&self, host: &str) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ClientError::BrokerUnavailable(format!(
                "broker {} is not reachable",
                host
            )));
        }
        Ok(())
    }
}

/// In-memory [`Broker`] implementation.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    host: String,
    auto_create_topics: bool,
    shared: Arc<Shared>,
}

impl MemoryBroker {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            auto_create_topics: true,
            shared: Arc::new(Shared::default()),
        }
    }

    /// Reject produce/subscribe on unknown topics instead of creating them.
    pub fn without_auto_create(mut self) -> Self {
        self.auto_create_topics = false;
        self
    }

    /// Make every broker call fail with `BrokerUnavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.shared.offline.store(offline, Ordering::SeqCst);
    }

    /// Make `ConsumerHandle::close` report an error (the member still leaves).
    pub fn fail_closes(&self, fail: bool) {
        self.shared.fail_closes.store(fail, Ordering::SeqCst);
    }

    /// Make `ConsumerHandle::close` take `delay` before the member leaves.
    pub fn delay_closes(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.shared.close_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Number of times `close` was called on the handle for `client_id`.
    pub fn close_calls(&self, client_id: &str) -> usize {
        self.shared
            .lock()
            .close_calls
            .get(client_id)
            .copied()
            .unwrap_or(0)
    }

    /// Live members of `group_id`.
    pub fn member_count(&self, group_id: &str) -> usize {
        self.shared
            .lock()
            .groups
            .get(group_id)
            .map(|g| g.members.len())
            .unwrap_or(0)
    }

    /// Number of messages stored in `topic`, if it exists.
    pub fn topic_len(&self, topic: &str) -> Option<u64> {
        self.shared
            .lock()
            .topics
            .get(topic)
            .map(|log| log.values.len() as u64)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    fn host(&self) -> &str {
        &self.host
    }

    async fn connect(&self) -> Result<()> {
        self.shared.check_online(&self.host)?;
        debug!(host = %self.host, "Connected to in-memory broker");
        Ok(())
    }

    async fn create_topics(&self, names: &[String]) -> Result<Vec<TopicCreation>> {
        self.shared.check_online(&self.host)?;

        let mut state = self.shared.lock();
        let result = names
            .iter()
            .map(|name| {
                let created = !state.topics.contains_key(name);
                if created {
                    state.topics.insert(name.clone(), TopicLog::default());
                }
                TopicCreation {
                    topic: name.clone(),
                    created,
                }
            })
            .collect();
        Ok(result)
    }

    async fn produce(&self, topic: &str, messages: Vec<String>) -> Result<ProduceAck> {
        self.shared.check_online(&self.host)?;

        let mut state = self.shared.lock();
        state.ensure_topic(topic, self.auto_create_topics)?;

        let count = messages.len();
        let base_offset = {
            let log = state
                .topics
                .get_mut(topic)
                .ok_or_else(|| ClientError::TopicNotFound(topic.to_string()))?;
            let base = log.values.len() as u64;
            log.values.extend(messages);
            base
        };

        let groups: Vec<String> = state
            .groups
            .iter()
            .filter(|(_, g)| g.members.iter().any(|m| m.topics.iter().any(|t| t == topic)))
            .map(|(id, _)| id.clone())
            .collect();
        for group_id in groups {
            state.deliver_pending(&group_id, topic);
        }

        Ok(ProduceAck {
            topic: topic.to_string(),
            partition: 0,
            base_offset,
            count,
        })
    }

    async fn subscribe(&self, request: SubscribeRequest) -> Result<Subscription> {
        self.shared.check_online(&self.host)?;

        let mut state = self.shared.lock();
        for topic in &request.topics {
            state.ensure_topic(topic, self.auto_create_topics)?;
        }

        let ends: Vec<(String, u64)> = request
            .topics
            .iter()
            .map(|t| {
                let end = state.topics.get(t).map(|l| l.values.len() as u64).unwrap_or(0);
                (t.clone(), end)
            })
            .collect();

        let (tx, rx) = mpsc::unbounded_channel();
        let group = state.groups.entry(request.group_id.clone()).or_default();
        for (topic, end) in ends {
            group.positions.entry(topic).or_insert(match request.start_offset {
                OffsetReset::Earliest => 0,
                OffsetReset::Latest | OffsetReset::None => end,
            });
        }
        group.members.push(Member {
            client_id: request.client_id.clone(),
            topics: request.topics.clone(),
            tx,
        });

        for topic in &request.topics {
            state.deliver_pending(&request.group_id, topic);
        }

        info!(
            client_id = %request.client_id,
            group_id = %request.group_id,
            topics = ?request.topics,
            start_offset = %request.start_offset,
            "Consumer joined group"
        );

        Ok(Subscription {
            handle: Arc::new(MemoryConsumer {
                client_id: request.client_id,
                group_id: request.group_id,
                shared: Arc::clone(&self.shared),
            }),
            messages: rx,
        })
    }
}

/// Handle for one member of a consumer group on a [`MemoryBroker`].
#[derive(Debug)]
struct MemoryConsumer {
    client_id: String,
    group_id: String,
    shared: Arc<Shared>,
}

#[async_trait]
impl ConsumerHandle for MemoryConsumer {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn group_id(&self) -> &str {
        &self.group_id
    }

    async fn close(&self) -> Result<()> {
        let delay = self.shared.close_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        {
            let mut state = self.shared.lock();
            *state.close_calls.entry(self.client_id.clone()).or_insert(0) += 1;
            if let Some(group) = state.groups.get_mut(&self.group_id) {
                group.members.retain(|m| m.client_id != self.client_id);
            }
        }

        if self.shared.fail_closes.load(Ordering::SeqCst) {
            return Err(ClientError::BrokerUnavailable(format!(
                "failed to leave group {}",
                self.group_id
            )));
        }

        debug!(client_id = %self.client_id, group_id = %self.group_id, "Consumer left group");
        Ok(())
    }
}
