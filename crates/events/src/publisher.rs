//! Publishing integration events with bounded retry.
//!
//! A publish that keeps failing transiently is never dropped silently: once the
//! retry budget is spent the encoded record is parked in an [`UndeliveredSink`]
//! and logged at error level, where an operator can list and replay it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use jobboard_core::EventId;

use crate::bus::{BusError, EventBus, OutboundRecord};
use crate::codec::{EncodeError, encode};
use crate::envelope::EventEnvelope;
use crate::event::IntegrationEvent;
use crate::retry::RetryPolicy;

/// Default upper bound for a single broker call.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishReceipt {
    pub event_id: EventId,
    pub topic: String,
    pub message_id: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// The broker refused the record outright; retrying will not help.
    #[error("broker rejected record: {0}")]
    Rejected(BusError),

    /// Transient failures outlasted the retry budget. The record was parked.
    #[error("publish failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: BusError },

    #[error("undelivered log error: {0}")]
    Sink(String),
}

/// An encoded record that could not be published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UndeliveredEvent {
    pub event_id: EventId,
    pub event_type: String,
    pub topic: String,
    pub partition_key: String,
    /// The encoded envelope.
    pub payload: String,
    pub attempts: u32,
    pub last_error: String,
    pub parked_at: DateTime<Utc>,
}

impl UndeliveredEvent {
    fn to_record(&self) -> OutboundRecord {
        OutboundRecord::new(&self.topic, &self.partition_key, self.payload.as_bytes().to_vec())
    }
}

/// Where exhausted publishes are parked.
#[async_trait::async_trait]
pub trait UndeliveredSink: Send + Sync {
    /// Insert, or replace the entry with the same event id.
    async fn park(&self, event: UndeliveredEvent) -> Result<(), String>;

    /// Everything parked, oldest first.
    async fn list(&self) -> Result<Vec<UndeliveredEvent>, String>;

    /// Drop one entry after it was delivered. Returns `false` if it was not parked.
    async fn remove(&self, event_id: EventId) -> Result<bool, String>;
}

#[derive(Debug, Default)]
pub struct InMemoryUndeliveredLog {
    entries: Mutex<Vec<UndeliveredEvent>>,
}

impl InMemoryUndeliveredLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl UndeliveredSink for InMemoryUndeliveredLog {
    async fn park(&self, event: UndeliveredEvent) -> Result<(), String> {
        let mut entries = self.entries.lock().map_err(|_| "undelivered log poisoned".to_string())?;
        match entries.iter_mut().find(|e| e.event_id == event.event_id) {
            Some(existing) => *existing = event,
            None => entries.push(event),
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<UndeliveredEvent>, String> {
        let entries = self.entries.lock().map_err(|_| "undelivered log poisoned".to_string())?;
        Ok(entries.clone())
    }

    async fn remove(&self, event_id: EventId) -> Result<bool, String> {
        let mut entries = self.entries.lock().map_err(|_| "undelivered log poisoned".to_string())?;
        let before = entries.len();
        entries.retain(|e| e.event_id != event_id);
        Ok(entries.len() < before)
    }
}

/// Wraps, encodes and publishes integration events for one producing service.
#[derive(Clone)]
pub struct EventPublisher {
    bus: Arc<dyn EventBus>,
    undelivered: Arc<dyn UndeliveredSink>,
    producer: String,
    policy: RetryPolicy,
    attempt_timeout: Duration,
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("producer", &self.producer)
            .field("policy", &self.policy)
            .field("attempt_timeout", &self.attempt_timeout)
            .finish_non_exhaustive()
    }
}

impl EventPublisher {
    pub fn new(
        bus: Arc<dyn EventBus>,
        undelivered: Arc<dyn UndeliveredSink>,
        producer: impl Into<String>,
    ) -> Self {
        Self {
            bus,
            undelivered,
            producer: producer.into(),
            policy: RetryPolicy::default(),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn producer(&self) -> &str {
        &self.producer
    }

    pub fn undelivered(&self) -> &Arc<dyn UndeliveredSink> {
        &self.undelivered
    }

    /// Publish one event to the topic named by its type.
    pub async fn publish<E: IntegrationEvent>(&self, event: E) -> Result<PublishReceipt, PublishError> {
        let envelope = EventEnvelope::wrap(self.producer.as_str(), event);
        let payload = encode(&envelope)?;
        let record = OutboundRecord::new(E::EVENT_TYPE, envelope.partition_key(), payload);

        match self.send(record.clone()).await {
            Ok((message_id, attempts)) => {
                debug!(
                    event_id = %envelope.event_id(),
                    event_type = E::EVENT_TYPE,
                    partition_key = envelope.partition_key(),
                    message_id = %message_id,
                    attempts,
                    "event published"
                );
                Ok(PublishReceipt {
                    event_id: envelope.event_id(),
                    topic: record.topic,
                    message_id,
                    attempts,
                })
            }
            Err(err) => {
                let (attempts, last_error) = match &err {
                    PublishError::Exhausted { attempts, last_error } => (*attempts, last_error.to_string()),
                    other => (1, other.to_string()),
                };
                error!(
                    event_id = %envelope.event_id(),
                    event_type = E::EVENT_TYPE,
                    partition_key = envelope.partition_key(),
                    attempts,
                    error = %last_error,
                    "event could not be published; parking it as undelivered"
                );
                self.park(
                    UndeliveredEvent {
                        event_id: envelope.event_id(),
                        event_type: E::EVENT_TYPE.to_string(),
                        topic: record.topic,
                        partition_key: record.partition_key,
                        payload: String::from_utf8_lossy(&record.payload).into_owned(),
                        attempts,
                        last_error,
                        parked_at: Utc::now(),
                    },
                )
                .await?;
                Err(err)
            }
        }
    }

    /// Try every parked record again. Returns how many were delivered.
    ///
    /// An entry leaves the log only after its publish succeeded. Entries that
    /// still fail stay parked with updated attempt counts. A log error does not
    /// stop the pass; the first one is returned once every entry was tried.
    pub async fn replay_undelivered(&self) -> Result<usize, PublishError> {
        let parked = self.undelivered.list().await.map_err(PublishError::Sink)?;
        let total = parked.len();
        let mut delivered = 0;
        let mut sink_error = None;

        for mut entry in parked {
            match self.send(entry.to_record()).await {
                Ok((message_id, _)) => {
                    delivered += 1;
                    info!(
                        event_id = %entry.event_id,
                        topic = %entry.topic,
                        message_id = %message_id,
                        "undelivered event replayed"
                    );
                    if let Err(e) = self.undelivered.remove(entry.event_id).await {
                        // Still parked, so a later replay publishes it again.
                        error!(event_id = %entry.event_id, error = %e, "replayed event could not be removed from the undelivered log");
                        sink_error.get_or_insert(PublishError::Sink(e));
                    }
                }
                Err(err) => {
                    warn!(event_id = %entry.event_id, error = %err, "replay failed; keeping it parked");
                    entry.attempts += match &err {
                        PublishError::Exhausted { attempts, .. } => *attempts,
                        _ => 1,
                    };
                    entry.last_error = err.to_string();
                    entry.parked_at = Utc::now();
                    if let Err(e) = self.park(entry).await {
                        sink_error.get_or_insert(e);
                    }
                }
            }
        }

        info!(total, delivered, "undelivered replay finished");
        match sink_error {
            Some(e) => Err(e),
            None => Ok(delivered),
        }
    }

    async fn park(&self, entry: UndeliveredEvent) -> Result<(), PublishError> {
        self.undelivered.park(entry).await.map_err(|e| {
            error!(error = %e, "failed to park undelivered event");
            PublishError::Sink(e)
        })
    }

    /// Publish with retry. Returns the message id and the number of attempts used.
    async fn send(&self, record: OutboundRecord) -> Result<(String, u32), PublishError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.attempt_timeout, self.bus.publish(record.clone())).await {
                Ok(result) => result,
                Err(_) => Err(BusError::Timeout(self.attempt_timeout)),
            };

            match result {
                Ok(message_id) => return Ok((message_id, attempt)),
                Err(err) if !err.is_transient() => return Err(PublishError::Rejected(err)),
                Err(err) if !self.policy.should_retry(attempt) => {
                    return Err(PublishError::Exhausted {
                        attempts: attempt,
                        last_error: err,
                    });
                }
                Err(err) => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    warn!(
                        topic = %record.topic,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "publish failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
