//! `jobboard-subscription`: company subscriptions and premium access.
//!
//! Premium status is never stored: [`is_premium`] derives it from the persisted
//! status and end date every time it is asked.

pub mod payment;
pub mod service;
pub mod store;
pub mod subscription;

pub use payment::{ChargeRequest, FakePaymentGateway, PaymentError, PaymentGateway, PaymentReceipt, StripeGateway};
pub use service::{SubscriptionError, SubscriptionService};
pub use store::{InMemorySubscriptionStore, SubscriptionStore};
pub use subscription::{Plan, Subscription, SubscriptionStatus, is_premium};
