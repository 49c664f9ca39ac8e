//! Event publishing/subscription abstraction (mechanics only).
//!
//! This module provides the **event bus pattern** used between services: producers
//! append encoded envelopes to a topic, consumer groups read them back.
//!
//! ## Delivery Contract
//!
//! - **At-least-once**: a record stays pending for its group until the consumer
//!   calls [`EventBus::acknowledge`]. Crashes and reclaims can deliver it again, so
//!   consumers must be idempotent.
//! - **Ordered per partition key**: a group routes all records with the same key
//!   (the company id) to the same member, in publish order.
//! - **Dead-lettering is explicit**: the consumer decides when a record is hopeless and
//!   calls [`EventBus::dead_letter`] before acknowledging it.
//! - **Raw bytes**: the bus never decodes payloads. Decoding belongs to the consumer,
//!   which is what lets it recognise and discard poison messages.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

/// A record to append to a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRecord {
    pub topic: String,
    pub partition_key: String,
    pub payload: Vec<u8>,
}

impl OutboundRecord {
    pub fn new(topic: impl Into<String>, partition_key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            partition_key: partition_key.into(),
            payload,
        }
    }
}

/// A record handed to one consumer of a group. Holds what is needed to ack it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    topic: String,
    group: String,
    message_id: String,
    partition_key: String,
    payload: Vec<u8>,
    delivery_count: u32,
}

impl Delivery {
    pub fn new(
        topic: impl Into<String>,
        group: impl Into<String>,
        message_id: impl Into<String>,
        partition_key: impl Into<String>,
        payload: Vec<u8>,
        delivery_count: u32,
    ) -> Self {
        Self {
            topic: topic.into(),
            group: group.into(),
            message_id: message_id.into(),
            partition_key: partition_key.into(),
            payload,
            delivery_count,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// How many times the bus has handed this record out (1 on first delivery).
    pub fn delivery_count(&self) -> u32 {
        self.delivery_count
    }
}

/// A record moved to a dead-letter topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadLetter {
    pub topic: String,
    pub original_message_id: String,
    pub partition_key: String,
    pub delivery_count: u32,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
    /// Original payload, lossily decoded as UTF-8 for inspection.
    pub payload: String,
}

impl DeadLetter {
    pub fn from_delivery(delivery: &Delivery, reason: impl Into<String>) -> Self {
        Self {
            topic: delivery.topic().to_string(),
            original_message_id: delivery.message_id().to_string(),
            partition_key: delivery.partition_key().to_string(),
            delivery_count: delivery.delivery_count(),
            reason: reason.into(),
            failed_at: Utc::now(),
            payload: String::from_utf8_lossy(delivery.payload()).into_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("broker command error: {0}")]
    Command(String),

    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("broker call timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("subscription closed")]
    Closed,
}

impl BusError {
    /// Whether retrying the same call later can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BusError::Connection(_) | BusError::Command(_) | BusError::Unavailable(_) | BusError::Timeout(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvTimeoutError {
    Timeout,
    Disconnected,
}

/// A consumer's stream of deliveries.
///
/// Deliveries arrive in the order the bus routed them to this consumer. A
/// subscription is meant to be drained by a single task; the bus-side sender is
/// dropped when the bus shuts the subscription down.
#[derive(Debug)]
pub struct Subscription {
    receiver: mpsc::UnboundedReceiver<Delivery>,
}

impl Subscription {
    pub fn new(receiver: mpsc::UnboundedReceiver<Delivery>) -> Self {
        Self { receiver }
    }

    /// Wait for the next delivery. `None` once the bus side is gone.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }

    /// Take a delivery if one is already buffered.
    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.receiver.try_recv().ok()
    }

    /// Wait up to `timeout` for the next delivery.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Delivery, RecvTimeoutError> {
        match tokio::time::timeout(timeout, self.receiver.recv()).await {
            Ok(Some(delivery)) => Ok(delivery),
            Ok(None) => Err(RecvTimeoutError::Disconnected),
            Err(_) => Err(RecvTimeoutError::Timeout),
        }
    }
}

/// Transport-agnostic event bus.
///
/// Implementations: [`crate::InMemoryEventBus`] for tests/dev and the Redis
/// Streams bus in `jobboard-infra`.
#[async_trait::async_trait]
pub trait EventBus: Send + Sync {
    /// Append a record to its topic. Returns the broker-assigned message id.
    async fn publish(&self, record: OutboundRecord) -> Result<String, BusError>;

    /// Join `group` on `topic` as `consumer`. Creates the group if needed; a new
    /// group starts from the beginning of the topic.
    async fn subscribe(&self, topic: &str, group: &str, consumer: &str) -> Result<Subscription, BusError>;

    /// Mark a delivery as processed for its group.
    async fn acknowledge(&self, delivery: &Delivery) -> Result<(), BusError>;

    /// Copy a delivery to the topic's dead-letter topic. Does not acknowledge it.
    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), BusError>;

    /// Most recent dead letters for `topic` (newest last), up to `limit`.
    async fn dead_letters(&self, topic: &str, limit: usize) -> Result<Vec<DeadLetter>, BusError>;
}

#[async_trait::async_trait]
impl<B> EventBus for Arc<B>
where
    B: EventBus + ?Sized,
{
    async fn publish(&self, record: OutboundRecord) -> Result<String, BusError> {
        (**self).publish(record).await
    }

    async fn subscribe(&self, topic: &str, group: &str, consumer: &str) -> Result<Subscription, BusError> {
        (**self).subscribe(topic, group, consumer).await
    }

    async fn acknowledge(&self, delivery: &Delivery) -> Result<(), BusError> {
        (**self).acknowledge(delivery).await
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), BusError> {
        (**self).dead_letter(delivery, reason).await
    }

    async fn dead_letters(&self, topic: &str, limit: usize) -> Result<Vec<DeadLetter>, BusError> {
        (**self).dead_letters(topic, limit).await
    }
}
