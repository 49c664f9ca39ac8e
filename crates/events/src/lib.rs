//! `jobboard-events`: the company lifecycle event contract and its delivery mechanics.
//!
//! Producers and consumers in every service compile against this crate, so the
//! wire format is defined exactly once:
//!
//! - [`contract`]: topics and the versioned event payloads
//! - [`envelope`] / [`codec`]: the JSON envelope and its strict decoder
//! - [`bus`] / [`in_memory_bus`]: transport abstraction (at-least-once, ack after processing)
//! - [`handler`]: the tagged apply result consumers return
//! - [`publisher`] / [`retry`]: bounded-retry publishing with an operator-visible park

pub mod bus;
pub mod codec;
pub mod contract;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;
pub mod publisher;
pub mod retry;

pub use bus::{BusError, DeadLetter, Delivery, EventBus, OutboundRecord, RecvTimeoutError, Subscription};
pub use codec::{DecodeError, EncodeError, decode, encode};
pub use contract::{CompanyCountryChangedEvent, CompanyRegisteredEvent, SCHEMA_VERSION, Topic};
pub use envelope::EventEnvelope;
pub use event::IntegrationEvent;
pub use handler::{ApplyError, ApplyOutcome, ApplyResult, EventHandler};
pub use in_memory_bus::InMemoryEventBus;
pub use publisher::{
    EventPublisher, InMemoryUndeliveredLog, PublishError, PublishReceipt, UndeliveredEvent,
    UndeliveredSink,
};
pub use retry::{Backoff, RetryPolicy};
