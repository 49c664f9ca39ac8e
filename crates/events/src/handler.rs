use thiserror::Error;

use jobboard_core::{CompanyId, CountryCode};

use crate::envelope::EventEnvelope;
use crate::event::IntegrationEvent;

/// Successful result of applying an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// State changed.
    Applied,
    /// Duplicate or already-reflected event; nothing changed.
    AlreadyApplied,
}

/// Failed result of applying an event, tagged by what the consumer should do next.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    /// Might succeed later (datastore unavailable, timeout). Retry, do not acknowledge.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Will fail on every attempt (constraint violation, missing target). Dead-letter.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// The event does not follow from the stored state; an earlier change was missed
    /// or arrived late. Dead-letter for manual reconciliation.
    #[error(
        "out-of-order event for company {company_id}: event expects previous country {expected}, stored country is {stored}"
    )]
    OutOfOrder {
        company_id: CompanyId,
        expected: CountryCode,
        stored: CountryCode,
    },
}

impl ApplyError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ApplyError::Transient(_))
    }

    /// Short tag used in logs, metrics and dead-letter reasons.
    pub fn kind(&self) -> &'static str {
        match self {
            ApplyError::Transient(_) => "transient",
            ApplyError::Permanent(_) => "permanent",
            ApplyError::OutOfOrder { .. } => "out_of_order",
        }
    }
}

pub type ApplyResult = Result<ApplyOutcome, ApplyError>;

/// Applies one decoded event to a service's local state.
///
/// Implementations must be idempotent: at-least-once delivery means the same
/// envelope can arrive any number of times, and every arrival after the first
/// must return [`ApplyOutcome::AlreadyApplied`] without side effects.
///
/// Errors are never swallowed here. The consumer worker turns the tag into an
/// acknowledge / retry / dead-letter decision.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    type Event: IntegrationEvent;

    /// Stable handler name for logs.
    fn name(&self) -> &'static str;

    async fn apply(&self, envelope: &EventEnvelope<Self::Event>) -> ApplyResult;
}

#[async_trait::async_trait]
impl<H> EventHandler for std::sync::Arc<H>
where
    H: EventHandler + ?Sized,
{
    type Event = H::Event;

    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn apply(&self, envelope: &EventEnvelope<Self::Event>) -> ApplyResult {
        (**self).apply(envelope).await
    }
}
