//! In-memory event bus for tests/dev.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;

use crate::bus::{BusError, DeadLetter, Delivery, EventBus, OutboundRecord, Subscription};

#[derive(Debug)]
struct Member {
    consumer: String,
    tx: mpsc::UnboundedSender<Delivery>,
}

#[derive(Debug, Default)]
struct GroupState {
    members: Vec<Member>,
    /// Routed while the group had no live member.
    backlog: VecDeque<Delivery>,
    /// Handed out (or queued) and not yet acknowledged, by message id.
    pending: HashMap<String, Delivery>,
}

#[derive(Debug, Clone)]
struct StoredRecord {
    message_id: String,
    partition_key: String,
    payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct TopicState {
    next_seq: u64,
    log: Vec<StoredRecord>,
    groups: HashMap<String, GroupState>,
}

#[derive(Debug, Default)]
struct State {
    topics: HashMap<String, TopicState>,
    dead_letters: HashMap<String, Vec<DeadLetter>>,
    acknowledged: u64,
}

/// In-memory bus with consumer-group semantics.
///
/// - Every group sees every record of its topic (a new group starts from the beginning)
/// - Within a group, a record goes to the member picked by hashing its partition key
/// - Records stay pending until acknowledged; [`InMemoryEventBus::redeliver_pending`]
///   simulates a broker redelivery
#[derive(Debug, Default)]
pub struct InMemoryEventBus {
    state: Mutex<State>,
    fail_next_publishes: AtomicUsize,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` publishes fail with a transient error.
    pub fn fail_next_publishes(&self, n: usize) {
        self.fail_next_publishes.store(n, Ordering::SeqCst);
    }

    /// Raw payloads published to `topic`, in order.
    pub fn published(&self, topic: &str) -> Vec<Vec<u8>> {
        let Ok(state) = self.state.lock() else {
            return vec![];
        };
        state
            .topics
            .get(topic)
            .map(|t| t.log.iter().map(|r| r.payload.clone()).collect())
            .unwrap_or_default()
    }

    /// Unacknowledged records for a group.
    pub fn pending_count(&self, topic: &str, group: &str) -> usize {
        let Ok(state) = self.state.lock() else {
            return 0;
        };
        state
            .topics
            .get(topic)
            .and_then(|t| t.groups.get(group))
            .map(|g| g.pending.len())
            .unwrap_or(0)
    }

    /// Total acknowledgements across all topics and groups.
    pub fn acknowledged_count(&self) -> u64 {
        self.state.lock().map(|s| s.acknowledged).unwrap_or(0)
    }

    /// Hand every pending record of a group out again (delivery count + 1), in
    /// message order. Returns how many records were redelivered.
    pub fn redeliver_pending(&self, topic: &str, group: &str) -> usize {
        let Ok(mut state) = self.state.lock() else {
            return 0;
        };
        let Some(group_state) = state.topics.get_mut(topic).and_then(|t| t.groups.get_mut(group)) else {
            return 0;
        };

        let mut again: Vec<Delivery> = group_state
            .pending
            .values()
            .map(|d| {
                Delivery::new(
                    d.topic(),
                    d.group(),
                    d.message_id(),
                    d.partition_key(),
                    d.payload().to_vec(),
                    d.delivery_count() + 1,
                )
            })
            .collect();
        again.sort_by_key(|d| message_seq(d.message_id()));

        let count = again.len();
        for delivery in again {
            group_state
                .pending
                .insert(delivery.message_id().to_string(), delivery.clone());
            route(group_state, delivery);
        }
        count
    }
}

fn message_seq(message_id: &str) -> u64 {
    message_id
        .split('-')
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(u64::MAX)
}

fn member_index(partition_key: &str, members: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    partition_key.hash(&mut hasher);
    (hasher.finish() % members as u64) as usize
}

/// Send to the member owning the partition key; drop dead members as they are found.
fn route(group: &mut GroupState, mut delivery: Delivery) {
    loop {
        if group.members.is_empty() {
            group.backlog.push_back(delivery);
            return;
        }
        let idx = member_index(delivery.partition_key(), group.members.len());
        match group.members[idx].tx.send(delivery) {
            Ok(()) => return,
            Err(mpsc::error::SendError(returned)) => {
                group.members.remove(idx);
                delivery = returned;
            }
        }
    }
}

#[async_trait::async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, record: OutboundRecord) -> Result<String, BusError> {
        let injected = self
            .fail_next_publishes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(BusError::Unavailable("injected publish failure".to_string()));
        }

        let mut state = self
            .state
            .lock()
            .map_err(|_| BusError::Unavailable("bus state poisoned".to_string()))?;
        let topic = state.topics.entry(record.topic.clone()).or_default();

        topic.next_seq += 1;
        let message_id = format!("{}-0", topic.next_seq);
        topic.log.push(StoredRecord {
            message_id: message_id.clone(),
            partition_key: record.partition_key.clone(),
            payload: record.payload.clone(),
        });

        for (group_name, group) in topic.groups.iter_mut() {
            let delivery = Delivery::new(
                record.topic.as_str(),
                group_name.as_str(),
                message_id.as_str(),
                record.partition_key.as_str(),
                record.payload.clone(),
                1,
            );
            group.pending.insert(message_id.clone(), delivery.clone());
            route(group, delivery);
        }

        Ok(message_id)
    }

    async fn subscribe(&self, topic: &str, group: &str, consumer: &str) -> Result<Subscription, BusError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| BusError::Unavailable("bus state poisoned".to_string()))?;
        let topic_state = state.topics.entry(topic.to_string()).or_default();

        let (tx, rx) = mpsc::unbounded_channel();

        if !topic_state.groups.contains_key(group) {
            // New group: start from the beginning of the topic.
            let mut fresh = GroupState::default();
            for rec in &topic_state.log {
                let delivery = Delivery::new(
                    topic,
                    group,
                    rec.message_id.as_str(),
                    rec.partition_key.as_str(),
                    rec.payload.clone(),
                    1,
                );
                fresh.pending.insert(rec.message_id.clone(), delivery.clone());
                fresh.backlog.push_back(delivery);
            }
            topic_state.groups.insert(group.to_string(), fresh);
        }

        let Some(group_state) = topic_state.groups.get_mut(group) else {
            return Err(BusError::Unavailable(format!("group {group} vanished")));
        };
        group_state.members.retain(|m| m.consumer != consumer && !m.tx.is_closed());
        group_state.members.push(Member {
            consumer: consumer.to_string(),
            tx,
        });

        let backlog: Vec<Delivery> = group_state.backlog.drain(..).collect();
        for delivery in backlog {
            route(group_state, delivery);
        }

        Ok(Subscription::new(rx))
    }

    async fn acknowledge(&self, delivery: &Delivery) -> Result<(), BusError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| BusError::Unavailable("bus state poisoned".to_string()))?;
        let removed = state
            .topics
            .get_mut(delivery.topic())
            .and_then(|t| t.groups.get_mut(delivery.group()))
            .and_then(|g| g.pending.remove(delivery.message_id()))
            .is_some();
        if removed {
            state.acknowledged += 1;
        }
        Ok(())
    }

    async fn dead_letter(&self, delivery: &Delivery, reason: &str) -> Result<(), BusError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| BusError::Unavailable("bus state poisoned".to_string()))?;
        state
            .dead_letters
            .entry(delivery.topic().to_string())
            .or_default()
            .push(DeadLetter::from_delivery(delivery, reason));
        Ok(())
    }

    async fn dead_letters(&self, topic: &str, limit: usize) -> Result<Vec<DeadLetter>, BusError> {
        let state = self
            .state
            .lock()
            .map_err(|_| BusError::Unavailable("bus state poisoned".to_string()))?;
        let all = state.dead_letters.get(topic).cloned().unwrap_or_default();
        let skip = all.len().saturating_sub(limit);
        Ok(all.into_iter().skip(skip).collect())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn record(topic: &str, key: &str, body: &str) -> OutboundRecord {
        OutboundRecord::new(topic, key, body.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn new_group_reads_from_the_beginning() {
        let bus = InMemoryEventBus::new();
        bus.publish(record("t", "k", "one")).await.unwrap();
        bus.publish(record("t", "k", "two")).await.unwrap();

        let mut sub = bus.subscribe("t", "g", "c1").await.unwrap();
        let first = sub.recv_timeout(Duration::from_millis(100)).await.unwrap();
        let second = sub.recv_timeout(Duration::from_millis(100)).await.unwrap();
        assert_eq!(first.payload(), b"one");
        assert_eq!(second.payload(), b"two");
        assert_eq!(first.delivery_count(), 1);
    }

    #[tokio::test]
    async fn every_group_gets_its_own_copy() {
        let bus = InMemoryEventBus::new();
        let mut a = bus.subscribe("t", "group-a", "c").await.unwrap();
        let mut b = bus.subscribe("t", "group-b", "c").await.unwrap();
        bus.publish(record("t", "k", "x")).await.unwrap();

        assert!(a.recv_timeout(Duration::from_millis(100)).await.is_ok());
        assert!(b.recv_timeout(Duration::from_millis(100)).await.is_ok());
    }

    #[tokio::test]
    async fn same_key_goes_to_the_same_member_in_order() {
        let bus = InMemoryEventBus::new();
        let mut c1 = bus.subscribe("t", "g", "c1").await.unwrap();
        let mut c2 = bus.subscribe("t", "g", "c2").await.unwrap();

        for i in 0..10 {
            bus.publish(record("t", "company-1", &i.to_string())).await.unwrap();
        }

        let mut got = Vec::new();
        while let Some(d) = c1.try_recv() {
            got.push(d);
        }
        let mut other = Vec::new();
        while let Some(d) = c2.try_recv() {
            other.push(d);
        }
        // All ten records land on exactly one member.
        let owner = if got.is_empty() { other } else { got };
        assert_eq!(owner.len(), 10);
        let bodies: Vec<String> = owner
            .iter()
            .map(|d| String::from_utf8(d.payload().to_vec()).unwrap())
            .collect();
        let expected: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        assert_eq!(bodies, expected);
    }

    #[tokio::test]
    async fn acknowledge_clears_pending_and_redelivery_bumps_count() {
        let bus = InMemoryEventBus::new();
        let mut sub = bus.subscribe("t", "g", "c").await.unwrap();
        bus.publish(record("t", "k", "a")).await.unwrap();
        bus.publish(record("t", "k", "b")).await.unwrap();

        let a = sub.recv().await.unwrap();
        let _b = sub.recv().await.unwrap();
        bus.acknowledge(&a).await.unwrap();
        assert_eq!(bus.pending_count("t", "g"), 1);
        assert_eq!(bus.acknowledged_count(), 1);

        assert_eq!(bus.redeliver_pending("t", "g"), 1);
        let again = sub.recv().await.unwrap();
        assert_eq!(again.payload(), b"b");
        assert_eq!(again.delivery_count(), 2);
    }

    #[tokio::test]
    async fn injected_failures_are_transient() {
        let bus = InMemoryEventBus::new();
        bus.fail_next_publishes(1);
        let err = bus.publish(record("t", "k", "a")).await.unwrap_err();
        assert!(err.is_transient());
        assert!(bus.publish(record("t", "k", "a")).await.is_ok());
    }

    #[tokio::test]
    async fn dead_letters_are_listed_per_topic() {
        let bus = InMemoryEventBus::new();
        let mut sub = bus.subscribe("t", "g", "c").await.unwrap();
        bus.publish(record("t", "k", "poison")).await.unwrap();
        let d = sub.recv().await.unwrap();

        bus.dead_letter(&d, "bad payload").await.unwrap();
        let dlq = bus.dead_letters("t", 10).await.unwrap();
        assert_eq!(dlq.len(), 1);
        assert_eq!(dlq[0].reason, "bad payload");
        assert_eq!(dlq[0].payload, "poison");
        assert!(bus.dead_letters("other", 10).await.unwrap().is_empty());
    }
}
