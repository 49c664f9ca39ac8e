//! Versioned schema for the company lifecycle events.
//!
//! Field names are camelCase on the wire. Any change to these shapes must bump
//! [`SCHEMA_VERSION`]; decoders reject versions they do not know.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use jobboard_core::{CompanyId, CountryCode, Email};

use crate::event::IntegrationEvent;

/// Envelope schema version written by this build.
pub const SCHEMA_VERSION: u32 = 1;

/// Broker topics. The topic name is the event type.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Produced by the auth service, consumed by the company service.
    CompanyRegistered,
    /// Produced by the company service, consumed by the auth service.
    CompanyCountryChanged,
}

impl Topic {
    pub const ALL: [Topic; 2] = [Topic::CompanyRegistered, Topic::CompanyCountryChanged];

    pub fn as_str(self) -> &'static str {
        match self {
            Topic::CompanyRegistered => CompanyRegisteredEvent::EVENT_TYPE,
            Topic::CompanyCountryChanged => CompanyCountryChangedEvent::EVENT_TYPE,
        }
    }

    /// Name of the dead-letter topic paired with this one.
    pub fn dead_letter_topic(self) -> String {
        dead_letter_topic(self.as_str())
    }

    pub fn parse(raw: &str) -> Option<Topic> {
        Topic::ALL.into_iter().find(|t| t.as_str() == raw)
    }
}

impl core::fmt::Display for Topic {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `<topic>.dlq`
pub fn dead_letter_topic(topic: &str) -> String {
    format!("{topic}.dlq")
}

/// A company account was created in the auth service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyRegisteredEvent {
    pub company_id: CompanyId,
    pub email: Email,
    pub country_code: CountryCode,
    pub activation_token: String,
    pub registered_at: DateTime<Utc>,
}

impl IntegrationEvent for CompanyRegisteredEvent {
    const EVENT_TYPE: &'static str = "company.registered";

    fn company_id(&self) -> CompanyId {
        self.company_id
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.registered_at
    }
}

/// A company's country was changed in the company service.
///
/// Consumers rely on `previous_country_code` to detect missed or reordered
/// changes, so these must be applied in the order they were produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyCountryChangedEvent {
    pub company_id: CompanyId,
    pub previous_country_code: CountryCode,
    pub new_country_code: CountryCode,
    pub changed_at: DateTime<Utc>,
}

impl IntegrationEvent for CompanyCountryChangedEvent {
    const EVENT_TYPE: &'static str = "company.country.changed";

    fn company_id(&self) -> CompanyId {
        self.company_id
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.changed_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_match_event_types() {
        assert_eq!(Topic::CompanyRegistered.as_str(), "company.registered");
        assert_eq!(Topic::CompanyCountryChanged.as_str(), "company.country.changed");
        assert_eq!(
            Topic::CompanyCountryChanged.dead_letter_topic(),
            "company.country.changed.dlq"
        );
        assert_eq!(Topic::parse("company.registered"), Some(Topic::CompanyRegistered));
        assert_eq!(Topic::parse("company.deleted"), None);
    }

    #[test]
    fn payload_fields_are_camel_case() {
        let event = CompanyCountryChangedEvent {
            company_id: CompanyId::new(),
            previous_country_code: CountryCode::parse("VN").unwrap(),
            new_country_code: CountryCode::parse("AUS").unwrap(),
            changed_at: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["previousCountryCode"], "VN");
        assert_eq!(json["newCountryCode"], "AUS");
        assert!(json.get("companyId").is_some());
        assert!(json.get("changedAt").is_some());
    }
}
