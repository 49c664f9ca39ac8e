//! `jobboard-core`: shared domain building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, validated value objects, the domain error model and the clock
//! abstraction used wherever "now" matters.

pub mod clock;
pub mod entity;
pub mod error;
pub mod id;
pub mod store;
pub mod value_object;

pub use clock::{Clock, FixedClock, SystemClock};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{CompanyId, EventId, SubscriptionId};
pub use store::{StoreError, StoreResult};
pub use value_object::{CountryCode, Email, ValueObject};
