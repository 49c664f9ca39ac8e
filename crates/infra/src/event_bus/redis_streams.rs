//! Redis Streams-backed event bus (durable, at-least-once delivery).
//!
//! This implementation uses Redis Streams to provide:
//! - **Durable delivery**: entries persist until the consuming group acknowledges them
//! - **At-least-once**: entries that stay pending past the timeout are reclaimed and redelivered
//! - **Consumer groups**: one group per consuming service (`company-service`, `auth-service`)
//! - **Dead-letter handling**: explicit DLQ writes plus automatic moves after `max_deliveries`
//!
//! ## Architecture
//!
//! - **Stream Key**: `<prefix>:<topic>` (one stream per topic, e.g. `jobboard:company.registered`)
//! - **Dead-Letter Stream**: `<prefix>:<topic>.dlq`
//! - **Entry fields**: `partition_key`, `payload` (the encoded envelope)
//!
//! Redis Streams do not route by key inside a group. Per-company ordering holds
//! for a group served by a single consumer, which is how the services deploy.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use redis::aio::{ConnectionManager, MultiplexedConnection};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use jobboard_events::contract::dead_letter_topic;
use jobboard_events::{BusError, DeadLetter, Delivery, EventBus, OutboundRecord, Subscription};

/// Default key prefix for streams
const DEFAULT_KEY_PREFIX: &str = "jobboard";

/// Default deliveries before an entry is moved to the DLQ by the bus itself
const DEFAULT_MAX_DELIVERIES: u32 = 10;

/// Default pending entry timeout (entries idle longer than this are reclaimed)
const DEFAULT_PENDING_TIMEOUT: Duration = Duration::from_secs(60);

const DEFAULT_BLOCK: Duration = Duration::from_millis(1000);

const DEFAULT_BATCH_SIZE: usize = 16;

#[derive(Debug, Clone)]
pub struct RedisStreamsConfig {
    pub key_prefix: String,
    pub max_deliveries: u32,
    pub pending_timeout: Duration,
    /// How long one XREADGROUP call blocks waiting for new entries
    pub block: Duration,
    pub batch_size: usize,
}

impl Default for RedisStreamsConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            max_deliveries: DEFAULT_MAX_DELIVERIES,
            pending_timeout: DEFAULT_PENDING_TIMEOUT,
            block: DEFAULT_BLOCK,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RedisStreamsError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis command error: {0}")]
    Command(String),

    #[error("Malformed stream entry: {0}")]
    Entry(String),
}

impl From<RedisStreamsError> for BusError {
    fn from(err: RedisStreamsError) -> Self {
        match err {
            RedisStreamsError::Connection(e) => BusError::Connection(e),
            RedisStreamsError::Command(e) => BusError::Command(e),
            RedisStreamsError::Entry(e) => BusError::InvalidRecord(e),
        }
    }
}

fn command_error(context: &str, err: redis::RedisError) -> RedisStreamsError {
    if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout() {
        RedisStreamsError::Connection(format!("{context}: {err}"))
    } else {
        RedisStreamsError::Command(format!("{context}: {err}"))
    }
}

#[derive(Clone)]
pub struct RedisStreamsEventBus {
    client: redis::Client,
    /// Shared connection for non-blocking commands (XADD, XACK, XRANGE)
    conn: ConnectionManager,
    config: Arc<RedisStreamsConfig>,
}

impl std::fmt::Debug for RedisStreamsEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStreamsEventBus")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisStreamsEventBus {
    /// Connect to Redis.
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    pub async fn connect(redis_url: impl AsRef<str>, config: RedisStreamsConfig) -> Result<Self, RedisStreamsError> {
        let client =
            redis::Client::open(redis_url.as_ref()).map_err(|e| RedisStreamsError::Connection(e.to_string()))?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| command_error("connect", e))?;

        info!(prefix = %config.key_prefix, "connected to Redis Streams");
        Ok(Self {
            client,
            conn,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &RedisStreamsConfig {
        &self.config
    }

    fn stream_key(&self, topic: &str) -> String {
        format!("{}:{}", self.config.key_prefix, topic)
    }

    fn dlq_key(&self, topic: &str) -> String {
        self.stream_key(&dead_letter_topic(topic))
    }

    /// Ensure a consumer group exists (idempotent). A new group starts at the
    /// beginning of the stream.
    pub async fn ensure_consumer_group(&self, topic: &str, group: &str) -> Result<(), RedisStreamsError> {
        let mut conn = self.conn.clone();
        let created: redis::RedisResult<String> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(self.stream_key(topic))
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match created {
            Ok(_) => {
                info!(topic, group, "consumer group created");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(command_error("XGROUP CREATE", e)),
        }
    }

    async fn xadd(&self, key: &str, fields: &[(&str, String)]) -> Result<String, RedisStreamsError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("XADD");
        cmd.arg(key).arg("*");
        for (field, value) in fields {
            cmd.arg(*field).arg(value);
        }
        cmd.query_async::<_, String>(&mut conn)
            .await
            .map_err(|e| command_error("XADD", e))
    }

    async fn write_dead_letter(&self, letter: &DeadLetter) -> Result<String, RedisStreamsError> {
        let id = self
            .xadd(
                &self.dlq_key(&letter.topic),
                &[
                    ("original_message_id", letter.original_message_id.clone()),
                    ("partition_key", letter.partition_key.clone()),
                    ("delivery_count", letter.delivery_count.to_string()),
                    ("reason", letter.reason.clone()),
                    ("failed_at", letter.failed_at.to_rfc3339()),
                    ("payload", letter.payload.clone()),
                ],
            )
            .await?;

        warn!(
            topic = %letter.topic,
            message_id = %letter.original_message_id,
            delivery_count = letter.delivery_count,
            reason = %letter.reason,
            "message sent to dead-letter queue"
        );
        Ok(id)
    }

    async fn ack(&self, topic: &str, group: &str, message_id: &str) -> Result<(), RedisStreamsError> {
        let mut conn = self.conn.clone();
        redis::cmd("XACK")
            .arg(self.stream_key(topic))
            .arg(group)
            .arg(message_id)
            .query_async::<_, u64>(&mut conn)
            .await
            .map_err(|e| command_error("XACK", e))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl EventBus for RedisStreamsEventBus {
    #[instrument(skip(self, record), fields(topic = %record.topic, partition_key = %record.partition_key), err)]
    async fn publish(&self, record: OutboundRecord) -> Result<String, BusError> {
        let payload = String::from_utf8(record.payload)
            .map_err(|e| BusError::InvalidRecord(format!("payload is not UTF-8: {e}")))?;
        let id = self
            .xadd(
                &self.stream_key(&record.topic),
                &[("partition_key", record.partition_key), ("payload", payload)],
            )
            .await?;
        Ok(id)
    }

    async fn subscribe(&self, topic: &str, group: &str, consumer: &str) -> Result<Subscription, BusError> {
        self.ensure_consumer_group(topic, group).await?;

        // XREADGROUP BLOCK holds its connection, so each poller gets its own.
        let conn = self
            .client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| BusError::from(command_error("connect", e)))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let poller = Poller {
            bus: self.clone(),
            conn,
            topic: topic.to_string(),
            group: group.to_string(),
            consumer: consumer.to_string(),
            tx,
        };
        tokio::spawn(poller.run());

        Ok(Subscription::new(rx))
    }

    async fn acknowledge(&self, delivery: &Delivery) -> Result<(), BusError> {
        self.ack(delivery.topic(), delivery.group(), delivery.message_id())
            .await
            .map_err(Into::into)
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), BusError> {
        self.write_dead_letter(&DeadLetter::from_delivery(delivery, reason))
            .await?;
        Ok(())
    }

    async fn dead_letters(&self, topic: &str, limit: usize) -> Result<Vec<DeadLetter>, BusError> {
        let mut conn = self.conn.clone();
        let raw: redis::Value = redis::cmd("XREVRANGE")
            .arg(self.dlq_key(topic))
            .arg("+")
            .arg("-")
            .arg("COUNT")
            .arg(limit)
            .query_async(&mut conn)
            .await
            .map_err(|e| BusError::from(command_error("XREVRANGE", e)))?;

        let mut letters = Vec::new();
        for entry in bulk(raw) {
            match parse_stream_entry(entry) {
                Ok(entry) => letters.push(dead_letter_from_entry(topic, entry)),
                Err(e) => warn!(topic, error = %e, "skipping malformed dead-letter entry"),
            }
        }
        letters.reverse();
        Ok(letters)
    }
}

/// Background task feeding one subscription.
struct Poller {
    bus: RedisStreamsEventBus,
    conn: MultiplexedConnection,
    topic: String,
    group: String,
    consumer: String,
    tx: mpsc::UnboundedSender<Delivery>,
}

impl Poller {
    async fn run(mut self) {
        info!(topic = %self.topic, group = %self.group, consumer = %self.consumer, "stream poller started");
        let reclaim_every = self.bus.config.pending_timeout / 2;
        let mut last_reclaim = tokio::time::Instant::now();
        let mut backoff = Duration::from_millis(100);

        while !self.tx.is_closed() {
            if last_reclaim.elapsed() >= reclaim_every {
                last_reclaim = tokio::time::Instant::now();
                if let Err(e) = self.reclaim_idle().await {
                    warn!(topic = %self.topic, group = %self.group, error = %e, "failed to reclaim pending entries");
                }
            }

            match self.read_new().await {
                Ok(entries) => {
                    backoff = Duration::from_millis(100);
                    for entry in entries {
                        self.forward(entry, 1).await;
                    }
                }
                Err(e) => {
                    error!(topic = %self.topic, group = %self.group, error = %e, "failed to read from stream");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(5));
                }
            }
        }

        info!(topic = %self.topic, group = %self.group, consumer = %self.consumer, "stream poller stopped");
    }

    /// Hand an entry to the subscriber, or move it to the DLQ once it has been
    /// delivered too many times.
    async fn forward(&self, entry: StreamEntry, delivery_count: u32) {
        let delivery = Delivery::new(
            &self.topic,
            &self.group,
            &entry.message_id,
            entry.fields.get("partition_key").cloned().unwrap_or_default(),
            entry.fields.get("payload").cloned().unwrap_or_default().into_bytes(),
            delivery_count,
        );

        if delivery_count > self.bus.config.max_deliveries {
            let letter = DeadLetter::from_delivery(&delivery, "max deliveries exceeded");
            match self.bus.write_dead_letter(&letter).await {
                Ok(_) => {
                    if let Err(e) = self.bus.ack(&self.topic, &self.group, &entry.message_id).await {
                        error!(message_id = %entry.message_id, error = %e, "failed to acknowledge dead-lettered entry");
                    }
                }
                Err(e) => error!(message_id = %entry.message_id, error = %e, "failed to dead-letter entry"),
            }
            return;
        }

        // A closed receiver ends the poll loop on the next iteration.
        let _ = self.tx.send(delivery);
    }

    async fn read_new(&mut self) -> Result<Vec<StreamEntry>, RedisStreamsError> {
        let key = self.bus.stream_key(&self.topic);
        let raw: redis::Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(self.bus.config.batch_size)
            .arg("BLOCK")
            .arg(self.bus.config.block.as_millis() as u64)
            .arg("STREAMS")
            .arg(&key)
            .arg(">")
            .query_async(&mut self.conn)
            .await
            .map_err(|e| command_error("XREADGROUP", e))?;

        // Reply: [[stream_key, [entry, ...]], ...] or nil on timeout.
        let mut entries = Vec::new();
        for stream in bulk(raw) {
            let mut parts = bulk(stream).into_iter();
            let (Some(_key), Some(stream_entries)) = (parts.next(), parts.next()) else {
                continue;
            };
            for entry in bulk(stream_entries) {
                match parse_stream_entry(entry) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => warn!(topic = %self.topic, error = %e, "skipping malformed stream entry"),
                }
            }
        }
        Ok(entries)
    }

    /// Claim entries of the group that stayed pending past the timeout and
    /// deliver them again, one XPENDING page at a time until the list ends.
    async fn reclaim_idle(&mut self) -> Result<(), RedisStreamsError> {
        let key = self.bus.stream_key(&self.topic);
        let min_idle_ms = self.bus.config.pending_timeout.as_millis() as u64;
        let page_size = self.bus.config.batch_size;
        let mut cursor = "-".to_string();

        loop {
            // XPENDING extended form: [id, consumer, idle_ms, delivery_count]
            let pending: Vec<(String, String, u64, u64)> = redis::cmd("XPENDING")
                .arg(&key)
                .arg(&self.group)
                .arg("IDLE")
                .arg(min_idle_ms)
                .arg(&cursor)
                .arg("+")
                .arg(page_size)
                .query_async(&mut self.conn)
                .await
                .map_err(|e| command_error("XPENDING", e))?;

            let next = next_pending_cursor(&pending, page_size);
            self.claim_page(&key, min_idle_ms, pending).await?;
            match next {
                Some(after) => cursor = after,
                None => return Ok(()),
            }
        }
    }

    async fn claim_page(
        &mut self,
        key: &str,
        min_idle_ms: u64,
        pending: Vec<(String, String, u64, u64)>,
    ) -> Result<(), RedisStreamsError> {
        let counts: HashMap<String, u64> = pending
            .into_iter()
            .filter(|(_, _, idle, _)| *idle >= min_idle_ms)
            .map(|(id, _, _, count)| (id, count))
            .collect();
        if counts.is_empty() {
            return Ok(());
        }

        let ids: Vec<&String> = counts.keys().collect();
        let claimed: redis::Value = redis::cmd("XCLAIM")
            .arg(key)
            .arg(&self.group)
            .arg(&self.consumer)
            .arg(min_idle_ms)
            .arg(&ids[..])
            .query_async(&mut self.conn)
            .await
            .map_err(|e| command_error("XCLAIM", e))?;

        let mut entries: Vec<StreamEntry> = bulk(claimed)
            .into_iter()
            .filter_map(|entry| parse_stream_entry(entry).ok())
            .collect();
        entries.sort_by(|a, b| stream_id_order(&a.message_id).cmp(&stream_id_order(&b.message_id)));

        debug!(topic = %self.topic, group = %self.group, claimed = entries.len(), "reclaimed idle entries");
        for entry in entries {
            let previous = counts.get(&entry.message_id).copied().unwrap_or(0);
            self.forward(entry, previous.saturating_add(1) as u32).await;
        }
        Ok(())
    }
}

/// Exclusive start for the next XPENDING page, or `None` after a short page.
fn next_pending_cursor(page: &[(String, String, u64, u64)], page_size: usize) -> Option<String> {
    if page.len() < page_size {
        return None;
    }
    page.last().map(|(id, ..)| format!("({id}"))
}

/// A parsed stream entry: `[message_id, [field, value, ...]]`.
#[derive(Debug, Clone)]
struct StreamEntry {
    message_id: String,
    fields: HashMap<String, String>,
}

fn bulk(value: redis::Value) -> Vec<redis::Value> {
    match value {
        redis::Value::Bulk(items) => items,
        _ => Vec::new(),
    }
}

fn text(value: &redis::Value) -> Option<String> {
    match value {
        redis::Value::Data(data) => Some(String::from_utf8_lossy(data).into_owned()),
        redis::Value::Status(s) => Some(s.clone()),
        _ => None,
    }
}

fn parse_stream_entry(entry: redis::Value) -> Result<StreamEntry, RedisStreamsError> {
    let parts = match entry {
        redis::Value::Bulk(parts) => parts,
        // XCLAIM reports entries deleted from the stream as nil.
        redis::Value::Nil => return Err(RedisStreamsError::Entry("entry was deleted".to_string())),
        _ => return Err(RedisStreamsError::Entry("invalid entry format".to_string())),
    };
    if parts.len() < 2 {
        return Err(RedisStreamsError::Entry("entry too short".to_string()));
    }

    let message_id =
        text(&parts[0]).ok_or_else(|| RedisStreamsError::Entry("invalid message id format".to_string()))?;

    let raw_fields = match &parts[1] {
        redis::Value::Bulk(v) => v,
        _ => return Err(RedisStreamsError::Entry("invalid fields format".to_string())),
    };

    let mut fields = HashMap::new();
    for chunk in raw_fields.chunks(2) {
        if let [key, value] = chunk {
            if let (Some(key), Some(value)) = (text(key), text(value)) {
                fields.insert(key, value);
            }
        }
    }

    Ok(StreamEntry { message_id, fields })
}

fn dead_letter_from_entry(topic: &str, entry: StreamEntry) -> DeadLetter {
    let field = |name: &str| entry.fields.get(name).cloned().unwrap_or_default();
    DeadLetter {
        topic: topic.to_string(),
        original_message_id: field("original_message_id"),
        partition_key: field("partition_key"),
        delivery_count: field("delivery_count").parse().unwrap_or(0),
        reason: field("reason"),
        failed_at: DateTime::parse_from_rfc3339(&field("failed_at"))
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        payload: field("payload"),
    }
}

/// Stream ids are `<ms>-<seq>`; order numerically.
fn stream_id_order(id: &str) -> (u64, u64) {
    let mut parts = id.splitn(2, '-');
    let ms = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let seq = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    (ms, seq)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(ids: &[&str]) -> Vec<(String, String, u64, u64)> {
        ids.iter()
            .map(|id| (id.to_string(), "auth-1".to_string(), 60_000, 2))
            .collect()
    }

    #[test]
    fn pending_pages_continue_after_the_last_id() {
        assert_eq!(
            next_pending_cursor(&pending(&["1-0", "1-1", "2-0"]), 3),
            Some("(2-0".to_string())
        );
        assert_eq!(next_pending_cursor(&pending(&["1-0", "1-1"]), 3), None);
        assert_eq!(next_pending_cursor(&[], 3), None);
    }

    fn data(s: &str) -> redis::Value {
        redis::Value::Data(s.as_bytes().to_vec())
    }

    #[test]
    fn parses_a_stream_entry() {
        let entry = redis::Value::Bulk(vec![
            data("1700000000000-3"),
            redis::Value::Bulk(vec![data("partition_key"), data("abc"), data("payload"), data("{}")]),
        ]);

        let parsed = parse_stream_entry(entry).unwrap();

        assert_eq!(parsed.message_id, "1700000000000-3");
        assert_eq!(parsed.fields.get("partition_key").map(String::as_str), Some("abc"));
        assert_eq!(parsed.fields.get("payload").map(String::as_str), Some("{}"));
    }

    #[test]
    fn deleted_and_short_entries_are_rejected() {
        assert!(parse_stream_entry(redis::Value::Nil).is_err());
        assert!(parse_stream_entry(redis::Value::Bulk(vec![data("1-0")])).is_err());
    }

    #[test]
    fn dead_letter_fields_round_trip_from_an_entry() {
        let entry = StreamEntry {
            message_id: "5-0".to_string(),
            fields: HashMap::from([
                ("original_message_id".to_string(), "1-0".to_string()),
                ("partition_key".to_string(), "company".to_string()),
                ("delivery_count".to_string(), "3".to_string()),
                ("reason".to_string(), "permanent failure: boom".to_string()),
                ("failed_at".to_string(), "2024-01-01T00:00:00+00:00".to_string()),
                ("payload".to_string(), "{\"x\":1}".to_string()),
            ]),
        };

        let letter = dead_letter_from_entry("company.registered", entry);

        assert_eq!(letter.original_message_id, "1-0");
        assert_eq!(letter.delivery_count, 3);
        assert_eq!(letter.failed_at.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn stream_ids_order_numerically() {
        assert!(stream_id_order("9-0") < stream_id_order("10-0"));
        assert!(stream_id_order("10-2") < stream_id_order("10-11"));
    }
}
