use serde::{Deserialize, Serialize};

use jobboard_auth::{CredentialRecord, Shard};
use jobboard_core::{CompanyId, CountryCode, Email};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub country_code: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivateAccountRequest {
    pub company_id: String,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeCountryRequest {
    pub country_code: String,
}

#[derive(Debug, Deserialize)]
pub struct ActivateSubscriptionRequest {
    pub plan: String,
    /// Omitted or `0` → open-ended
    #[serde(default)]
    pub months: u32,
    #[serde(default, rename = "paymentMethod")]
    pub payment_method: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeadLettersQuery {
    pub topic: Option<String>,
    pub limit: Option<usize>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredCompany {
    pub company_id: CompanyId,
    pub email: Email,
    pub country_code: CountryCode,
    pub shard: Shard,
}

impl From<&CredentialRecord> for RegisteredCompany {
    fn from(record: &CredentialRecord) -> Self {
        Self {
            company_id: record.company_id,
            email: record.email.clone(),
            country_code: record.country_code.clone(),
            shard: record.shard.clone(),
        }
    }
}

/// Credential record without the secrets.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialView {
    pub company_id: CompanyId,
    pub email: Email,
    pub country_code: CountryCode,
    pub shard: Shard,
    pub activated: bool,
}

impl From<CredentialRecord> for CredentialView {
    fn from(record: CredentialRecord) -> Self {
        Self {
            company_id: record.company_id,
            email: record.email,
            country_code: record.country_code,
            shard: record.shard,
            activated: record.activated,
        }
    }
}
