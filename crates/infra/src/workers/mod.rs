//! Background workers.

pub mod consumer_worker;

pub use consumer_worker::{
    ConsumerMonitor, ConsumerSnapshot, ConsumerStats, ConsumerWorker, ConsumerWorkerConfig, ConsumerWorkerHandle,
    wait_for_stats,
};
