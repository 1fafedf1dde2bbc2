//! Queue Ingest Task
//!
//! Consumes a [`MessageQueue`] and forwards every message to a
//! [`RecordSink`] as one ingest call. A message is acked only after the
//! sink accepted all of its records; a rejected message is nacked and
//! logged so the queue can redeliver or dead-letter it.

use crate::queue::{MessageQueue, QueueMessage};
use loghouse_observability::metrics::QUEUE_MESSAGES_TOTAL;
use loghouse_storage::RecordSink;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Counters reported when the task stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueIngestSummary {
    /// Messages acked after a successful ingest
    pub acked: u64,
    /// Messages nacked after the sink rejected them
    pub nacked: u64,
    /// Records accepted across all acked messages
    pub records: u64,
}

pub struct QueueIngestTask {
    name: String,
    queue: Arc<dyn MessageQueue>,
    sink: Arc<dyn RecordSink>,
}

impl QueueIngestTask {
    pub fn new(
        name: impl Into<String>,
        queue: Arc<dyn MessageQueue>,
        sink: Arc<dyn RecordSink>,
    ) -> Self {
        Self {
            name: name.into(),
            queue,
            sink,
        }
    }

    /// Consume until `cancel` fires or the queue is closed and drained.
    pub async fn run(self, cancel: CancellationToken) -> QueueIngestSummary {
        info!(source = %self.name, "Queue ingest task started");

        let mut summary = QueueIngestSummary::default();
        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                message = self.queue.recv() => match message {
                    Some(message) => message,
                    None => {
                        debug!(source = %self.name, "Queue drained");
                        break;
                    }
                },
            };
            self.handle(message, &mut summary).await;
        }

        info!(
            source = %self.name,
            acked = summary.acked,
            nacked = summary.nacked,
            records = summary.records,
            "Queue ingest task stopped"
        );
        summary
    }

    async fn handle(&self, message: QueueMessage, summary: &mut QueueIngestSummary) {
        let stream = message.stream.as_str();
        match self
            .sink
            .ingest(stream, &message.payload, message.hint.as_ref())
            .await
        {
            Ok(receipt) => {
                summary.acked += 1;
                summary.records += receipt.accepted as u64;
                QUEUE_MESSAGES_TOTAL
                    .with_label_values(&[stream, "acked"])
                    .inc();
                if let Err(e) = self.queue.ack(message.id).await {
                    warn!(source = %self.name, message_id = message.id, error = %e, "Ack failed");
                }
            }
            Err(e) => {
                summary.nacked += 1;
                QUEUE_MESSAGES_TOTAL
                    .with_label_values(&[stream, "nacked"])
                    .inc();
                warn!(
                    source = %self.name,
                    stream = %stream,
                    message_id = message.id,
                    deliveries = message.deliveries,
                    error = %e,
                    "Message rejected"
                );
                if let Err(e) = self.queue.nack(message.id).await {
                    warn!(source = %self.name, message_id = message.id, error = %e, "Nack failed");
                }
            }
        }
    }
}
