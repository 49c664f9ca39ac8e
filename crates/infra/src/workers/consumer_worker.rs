use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use jobboard_events::{
    ApplyOutcome, BusError, Delivery, EventBus, EventHandler, RetryPolicy, Subscription, decode,
};

/// Worker configuration: which subscription to drain and how hard to retry.
#[derive(Debug, Clone)]
pub struct ConsumerWorkerConfig {
    pub topic: String,
    pub group: String,
    pub consumer: String,
    /// In-place retry budget for transient apply failures
    pub retry: RetryPolicy,
}

impl ConsumerWorkerConfig {
    pub fn new(topic: impl Into<String>, group: impl Into<String>, consumer: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            group: group.into(),
            consumer: consumer.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerStats {
    pub received: u64,
    pub applied: u64,
    pub duplicates: u64,
    pub poison: u64,
    pub dead_lettered: u64,
    pub transient_retries: u64,
    pub bus_errors: u64,
}

/// Read-only view of a running worker, cheap to clone into HTTP state.
#[derive(Debug, Clone)]
pub struct ConsumerMonitor {
    handler: &'static str,
    topic: String,
    group: String,
    consumer: String,
    stats: Arc<Mutex<ConsumerStats>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerSnapshot {
    pub handler: &'static str,
    pub topic: String,
    pub group: String,
    pub consumer: String,
    pub stats: ConsumerStats,
}

impl ConsumerMonitor {
    pub fn stats(&self) -> ConsumerStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn snapshot(&self) -> ConsumerSnapshot {
        ConsumerSnapshot {
            handler: self.handler,
            topic: self.topic.clone(),
            group: self.group.clone(),
            consumer: self.consumer.clone(),
            stats: self.stats(),
        }
    }
}

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct ConsumerWorkerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
    monitor: ConsumerMonitor,
}

impl ConsumerWorkerHandle {
    pub fn monitor(&self) -> ConsumerMonitor {
        self.monitor.clone()
    }

    pub fn stats(&self) -> ConsumerStats {
        self.monitor.stats()
    }

    /// Request graceful shutdown and wait for the worker to stop. A delivery
    /// interrupted mid-retry stays unacknowledged and is delivered again later.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

/// Drains one subscription through an [`EventHandler`].
///
/// | apply result                     | action                                |
/// |----------------------------------|---------------------------------------|
/// | undecodable (poison)             | log, count, acknowledge               |
/// | `Applied` / `AlreadyApplied`     | acknowledge                           |
/// | transient, budget left           | back off and retry in place           |
/// | transient, budget spent          | dead-letter "retries exhausted", ack  |
/// | permanent / out of order         | dead-letter with the reason, ack      |
///
/// Deliveries are processed one at a time, so a company's events are applied in
/// the order the bus hands them out.
#[derive(Debug)]
pub struct ConsumerWorker;

impl ConsumerWorker {
    pub async fn spawn<H>(
        bus: Arc<dyn EventBus>,
        handler: H,
        config: ConsumerWorkerConfig,
    ) -> Result<ConsumerWorkerHandle, BusError>
    where
        H: EventHandler + 'static,
    {
        let subscription = bus.subscribe(&config.topic, &config.group, &config.consumer).await?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let monitor = ConsumerMonitor {
            handler: handler.name(),
            topic: config.topic.clone(),
            group: config.group.clone(),
            consumer: config.consumer.clone(),
            stats: Arc::new(Mutex::new(ConsumerStats::default())),
        };

        let run = Run {
            bus,
            handler,
            retry: config.retry,
            stats: monitor.stats.clone(),
        };
        let join = tokio::spawn(run.worker_loop(subscription, shutdown_rx));

        Ok(ConsumerWorkerHandle {
            shutdown: Some(shutdown_tx),
            join: Some(join),
            monitor,
        })
    }
}

enum Flow {
    Continue,
    Stop,
}

struct Run<H> {
    bus: Arc<dyn EventBus>,
    handler: H,
    retry: RetryPolicy,
    stats: Arc<Mutex<ConsumerStats>>,
}

impl<H: EventHandler> Run<H> {
    fn bump(&self, f: impl FnOnce(&mut ConsumerStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            f(&mut stats);
        }
    }

    async fn worker_loop(self, mut subscription: Subscription, mut shutdown: oneshot::Receiver<()>) {
        let name = self.handler.name();
        info!(worker = name, "consumer worker started");

        loop {
            let delivery = tokio::select! {
                _ = &mut shutdown => break,
                next = subscription.recv() => match next {
                    Some(delivery) => delivery,
                    None => break,
                },
            };

            if let Flow::Stop = self.process(&delivery, &mut shutdown).await {
                break;
            }
        }

        info!(worker = name, "consumer worker stopped");
    }

    async fn process(&self, delivery: &Delivery, shutdown: &mut oneshot::Receiver<()>) -> Flow {
        let name = self.handler.name();
        self.bump(|s| s.received += 1);

        let envelope = match decode::<H::Event>(delivery.payload()) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(
                    worker = name,
                    topic = delivery.topic(),
                    message_id = delivery.message_id(),
                    error = %e,
                    "discarding poison message"
                );
                self.bump(|s| s.poison += 1);
                self.acknowledge(delivery).await;
                return Flow::Continue;
            }
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.handler.apply(&envelope).await {
                Ok(ApplyOutcome::Applied) => {
                    self.bump(|s| s.applied += 1);
                    self.acknowledge(delivery).await;
                    return Flow::Continue;
                }
                Ok(ApplyOutcome::AlreadyApplied) => {
                    debug!(worker = name, message_id = delivery.message_id(), "duplicate delivery");
                    self.bump(|s| s.duplicates += 1);
                    self.acknowledge(delivery).await;
                    return Flow::Continue;
                }
                Err(e) if e.is_transient() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        worker = name,
                        message_id = delivery.message_id(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient apply failure; retrying"
                    );
                    self.bump(|s| s.transient_retries += 1);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = &mut *shutdown => return Flow::Stop,
                    }
                }
                Err(e) => {
                    let reason = if e.is_transient() {
                        format!("retries exhausted after {attempt} attempts: {e}")
                    } else {
                        e.to_string()
                    };
                    self.dead_letter(delivery, e.kind(), &reason).await;
                    return Flow::Continue;
                }
            }
        }
    }

    async fn acknowledge(&self, delivery: &Delivery) {
        if let Err(e) = self.bus.acknowledge(delivery).await {
            error!(
                worker = self.handler.name(),
                message_id = delivery.message_id(),
                error = %e,
                "failed to acknowledge; delivery will be redelivered"
            );
            self.bump(|s| s.bus_errors += 1);
        }
    }

    /// Dead-letter then acknowledge. If the DLQ write fails the delivery stays
    /// pending for redelivery.
    async fn dead_letter(&self, delivery: &Delivery, kind: &str, reason: &str) {
        error!(
            worker = self.handler.name(),
            topic = delivery.topic(),
            message_id = delivery.message_id(),
            partition_key = delivery.partition_key(),
            kind,
            reason,
            "dead-lettering delivery"
        );
        match self.bus.dead_letter(delivery, reason).await {
            Ok(()) => {
                self.bump(|s| s.dead_lettered += 1);
                self.acknowledge(delivery).await;
            }
            Err(e) => {
                error!(message_id = delivery.message_id(), error = %e, "failed to dead-letter delivery");
                self.bump(|s| s.bus_errors += 1);
            }
        }
    }
}

/// Poll `monitor` until `done` holds or `timeout` passes. Returns the last stats seen.
pub async fn wait_for_stats(
    monitor: &ConsumerMonitor,
    timeout: Duration,
    done: impl Fn(&ConsumerStats) -> bool,
) -> ConsumerStats {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let stats = monitor.stats();
        if done(&stats) || tokio::time::Instant::now() >= deadline {
            return stats;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
