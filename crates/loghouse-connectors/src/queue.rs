//! Message Queue
//!
//! A queue delivers messages carrying record bytes for one stream. Each
//! delivered message stays in flight until it is acked (removed for good) or
//! nacked (made available for redelivery). A message nacked
//! `max_deliveries` times is moved to the dead-letter list instead of being
//! redelivered.

use crate::error::{ConnectorError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use loghouse_core::SchemaHint;
use loghouse_observability::metrics::QUEUE_MESSAGES_TOTAL;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::{Mutex, Notify};

pub type MessageId = u64;

/// A message consumed from a queue.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub id: MessageId,
    /// Target stream
    pub stream: String,
    /// Record bytes (a JSON object or array of objects)
    pub payload: Bytes,
    pub hint: Option<SchemaHint>,
    /// How many times this message has been delivered, including this one
    pub deliveries: u32,
}

/// Source of queued record messages.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Wait for the next message. Returns `None` once the queue is closed and
    /// fully drained.
    async fn recv(&self) -> Option<QueueMessage>;

    /// Confirm that the message was ingested.
    async fn ack(&self, id: MessageId) -> Result<()>;

    /// Return the message to the queue for redelivery.
    async fn nack(&self, id: MessageId) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Deliveries after which a nacked message is dead-lettered
    #[serde(default = "default_max_deliveries")]
    pub max_deliveries: u32,
}

fn default_max_deliveries() -> u32 {
    5
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_deliveries: default_max_deliveries(),
        }
    }
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<QueueMessage>,
    in_flight: HashMap<MessageId, QueueMessage>,
    dead_letters: Vec<QueueMessage>,
    next_id: MessageId,
    closed: bool,
}

/// In-process queue with at-least-once delivery.
pub struct ChannelQueue {
    config: QueueConfig,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl ChannelQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    /// Enqueue record bytes for `stream`.
    pub async fn publish(
        &self,
        stream: impl Into<String>,
        payload: impl Into<Bytes>,
        hint: Option<SchemaHint>,
    ) -> Result<MessageId> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(ConnectorError::QueueClosed);
        }
        let id = state.next_id;
        state.next_id += 1;
        state.ready.push_back(QueueMessage {
            id,
            stream: stream.into(),
            payload: payload.into(),
            hint,
            deliveries: 0,
        });
        drop(state);

        self.notify.notify_waiters();
        Ok(id)
    }

    /// Stop accepting new messages. Receivers drain what is left.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
    }

    /// Messages waiting for delivery or redelivery.
    pub async fn ready_len(&self) -> usize {
        self.state.lock().await.ready.len()
    }

    pub async fn in_flight_len(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    pub async fn dead_letters(&self) -> Vec<QueueMessage> {
        self.state.lock().await.dead_letters.clone()
    }
}

impl Default for ChannelQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

#[async_trait]
impl MessageQueue for ChannelQueue {
    async fn recv(&self) -> Option<QueueMessage> {
        loop {
            // Registered before the state check so a publish in between is not missed
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().await;
                if let Some(mut message) = state.ready.pop_front() {
                    message.deliveries += 1;
                    state.in_flight.insert(message.id, message.clone());
                    return Some(message);
                }
                if state.closed && state.in_flight.is_empty() {
                    return None;
                }
            }
            notified.await;
        }
    }

    async fn ack(&self, id: MessageId) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .in_flight
            .remove(&id)
            .map(|_| ())
            .ok_or(ConnectorError::UnknownMessage(id))
    }

    async fn nack(&self, id: MessageId) -> Result<()> {
        let mut state = self.state.lock().await;
        let message = state
            .in_flight
            .remove(&id)
            .ok_or(ConnectorError::UnknownMessage(id))?;

        if message.deliveries >= self.config.max_deliveries {
            tracing::warn!(
                stream = %message.stream,
                message_id = id,
                deliveries = message.deliveries,
                "Message dead-lettered"
            );
            QUEUE_MESSAGES_TOTAL
                .with_label_values(&[&message.stream, "dead_lettered"])
                .inc();
            state.dead_letters.push(message);
        } else {
            state.ready.push_back(message);
        }
        drop(state);

        self.notify.notify_waiters();
        Ok(())
    }
}
