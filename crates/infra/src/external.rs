//! HTTP clients for calling other services.

use std::time::Duration;

use thiserror::Error;
use tracing::instrument;

use jobboard_core::{CompanyId, CountryCode};

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("company directory request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("company directory returned {0}")]
    Status(reqwest::StatusCode),

    #[error("company directory returned an invalid country: {0}")]
    InvalidCountry(String),
}

/// Reads a company's current country from the Company service.
#[derive(Debug, Clone)]
pub struct CompanyDirectoryClient {
    client: reqwest::Client,
    base_url: String,
}

impl CompanyDirectoryClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, DirectoryError> {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(5)).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// `None` when the Company service does not know the company.
    #[instrument(skip(self))]
    pub async fn country_of(&self, company_id: CompanyId) -> Result<Option<CountryCode>, DirectoryError> {
        let url = format!("{}/api/companies/{company_id}/country", self.base_url);
        let resp = self.client.get(&url).send().await?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(DirectoryError::Status(status));
        }

        // The body is the bare code, e.g. `VN`.
        let body = resp.text().await?;
        CountryCode::parse(body.trim())
            .map(Some)
            .map_err(|_| DirectoryError::InvalidCountry(body))
    }
}
