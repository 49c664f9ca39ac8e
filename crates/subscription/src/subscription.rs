use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use jobboard_core::{CompanyId, DomainError, Entity, SubscriptionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Active,
    Inactive,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "ACTIVE",
            SubscriptionStatus::Inactive => "INACTIVE",
            SubscriptionStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        match raw {
            "ACTIVE" => Ok(SubscriptionStatus::Active),
            "INACTIVE" => Ok(SubscriptionStatus::Inactive),
            "CANCELLED" => Ok(SubscriptionStatus::Cancelled),
            other => Err(DomainError::validation(format!("unknown subscription status {other:?}"))),
        }
    }
}

/// Plan name. Non-empty, trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Plan(String);

impl Plan {
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, DomainError> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() || trimmed.len() > 64 {
            return Err(DomainError::validation("plan must be 1-64 characters"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Plan {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Plan> for String {
    fn from(value: Plan) -> Self {
        value.0
    }
}

impl core::fmt::Display for Plan {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub subscription_id: SubscriptionId,
    pub company_id: CompanyId,
    pub plan: Plan,
    pub status: SubscriptionStatus,
    pub start_at: DateTime<Utc>,
    /// `None` = open-ended.
    pub end_at: Option<DateTime<Utc>>,
    pub payment_reference: Option<String>,
}

impl Entity for Subscription {
    type Id = SubscriptionId;

    fn id(&self) -> &Self::Id {
        &self.subscription_id
    }
}

impl Subscription {
    pub fn is_premium_at(&self, now: DateTime<Utc>) -> bool {
        is_premium(self.status, self.end_at, now)
    }
}

/// Premium access: active, and either open-ended or ending strictly after `now`.
pub fn is_premium(status: SubscriptionStatus, end_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    status == SubscriptionStatus::Active && end_at.is_none_or(|end| end > now)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn active_without_end_is_premium() {
        assert!(is_premium(SubscriptionStatus::Active, None, Utc::now()));
    }

    #[test]
    fn active_with_past_end_is_not_premium() {
        let now = Utc::now();
        assert!(!is_premium(SubscriptionStatus::Active, Some(now - Duration::days(1)), now));
    }

    #[test]
    fn inactive_with_future_end_is_not_premium() {
        let now = Utc::now();
        assert!(!is_premium(SubscriptionStatus::Inactive, Some(now + Duration::days(30)), now));
        assert!(!is_premium(SubscriptionStatus::Cancelled, None, now));
    }

    #[test]
    fn active_with_future_end_is_premium() {
        let now = Utc::now();
        assert!(is_premium(SubscriptionStatus::Active, Some(now + Duration::days(30)), now));
    }

    #[test]
    fn end_instant_itself_is_no_longer_premium() {
        let now = Utc::now();
        assert!(!is_premium(SubscriptionStatus::Active, Some(now), now));
    }

    #[test]
    fn status_uses_upper_case_on_the_wire() {
        assert_eq!(serde_json::to_string(&SubscriptionStatus::Cancelled).unwrap(), "\"CANCELLED\"");
        assert_eq!(SubscriptionStatus::parse("ACTIVE").unwrap(), SubscriptionStatus::Active);
        assert!(SubscriptionStatus::parse("active").is_err());
    }
}
