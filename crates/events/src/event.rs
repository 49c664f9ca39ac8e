use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use jobboard_core::CompanyId;

/// An event that crosses a service boundary.
///
/// Integration events are:
/// - **immutable** (treat them as facts)
/// - **keyed by company** (the company id is the partition key, so one company's
///   events stay ordered on one partition)
/// - **time-stamped** with business time that never decreases per company
pub trait IntegrationEvent:
    Serialize + DeserializeOwned + Clone + core::fmt::Debug + Send + Sync + 'static
{
    /// Stable event type; doubles as the topic name (e.g. "company.registered").
    const EVENT_TYPE: &'static str;

    /// The company this event is about.
    fn company_id(&self) -> CompanyId;

    /// When the change happened (business time).
    fn occurred_at(&self) -> DateTime<Utc>;

    /// Partition key used by the bus.
    fn partition_key(&self) -> String {
        self.company_id().to_string()
    }
}
