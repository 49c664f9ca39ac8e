//! Auth service operations.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use jobboard_core::{Clock, CompanyId, CountryCode, DomainError, Email, StoreError};
use jobboard_events::{CompanyRegisteredEvent, EventPublisher};

use crate::credential::{CredentialRecord, CredentialStore};
use crate::password::{hash_password_off_runtime, verify_password_off_runtime};
use crate::shard::ShardMap;

const MIN_PASSWORD_LEN: usize = 8;
const STUB_TOKEN_TTL_SECS: u64 = 3600;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Validation(#[from] DomainError),

    #[error("email already registered")]
    DuplicateEmail,

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("invalid activation token")]
    InvalidActivationToken,

    #[error("no credentials for company {0}")]
    NotFound(CompanyId),

    #[error("credential store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Hashing(String),
}

#[derive(Debug, Clone)]
pub struct RegisterCompany {
    pub email: String,
    pub password: String,
    pub country_code: String,
}

/// Placeholder token response. Nothing in the system validates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub company_id: CompanyId,
}

#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    shards: ShardMap,
    publisher: EventPublisher,
    clock: Arc<dyn Clock>,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        shards: ShardMap,
        publisher: EventPublisher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            shards,
            publisher,
            clock,
        }
    }

    pub fn shards(&self) -> &ShardMap {
        &self.shards
    }

    /// Create a company account and announce it with `company.registered`.
    ///
    /// The event is published after the record is stored. A publish that
    /// exhausts its retries is parked by the publisher; registration still succeeds.
    #[instrument(skip(self, command), fields(country_code = %command.country_code))]
    pub async fn register(&self, command: RegisterCompany) -> Result<CredentialRecord, AuthError> {
        let email = Email::parse(&command.email)?;
        let country_code = CountryCode::parse(&command.country_code)?;
        if command.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(DomainError::validation(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            ))
            .into());
        }

        if self.store.find_by_email(&email).await?.is_some() {
            return Err(AuthError::DuplicateEmail);
        }

        let password_hash = hash_password_off_runtime(command.password)
            .await
            .map_err(AuthError::Hashing)?;
        let record = CredentialRecord {
            company_id: CompanyId::new(),
            email,
            password_hash,
            shard: self.shards.shard_for(&country_code),
            country_code,
            activation_token: Uuid::new_v4().simple().to_string(),
            activated: false,
            registered_at: self.clock.now(),
            country_changed_at: None,
        };

        match self.store.insert(record.clone()).await {
            Ok(()) => {}
            Err(StoreError::Constraint(_)) => return Err(AuthError::DuplicateEmail),
            Err(e) => return Err(e.into()),
        }
        info!(company_id = %record.company_id, shard = %record.shard, "company registered");

        let event = CompanyRegisteredEvent {
            company_id: record.company_id,
            email: record.email.clone(),
            country_code: record.country_code.clone(),
            activation_token: record.activation_token.clone(),
            registered_at: record.registered_at,
        };
        if let Err(e) = self.publisher.publish(event).await {
            warn!(company_id = %record.company_id, error = %e, "company.registered not published");
        }

        Ok(record)
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenResponse, AuthError> {
        let email = Email::parse(email).map_err(|_| AuthError::InvalidCredentials)?;
        let record = self
            .store
            .find_by_email(&email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if !verify_password_off_runtime(password.to_string(), record.password_hash.clone()).await {
            return Err(AuthError::InvalidCredentials);
        }

        Ok(TokenResponse {
            access_token: format!("stub-{}", Uuid::new_v4().simple()),
            token_type: "Bearer".to_string(),
            expires_in: STUB_TOKEN_TTL_SECS,
            company_id: record.company_id,
        })
    }

    /// Mark the account active. Activating twice with the right token is fine.
    #[instrument(skip(self, token))]
    pub async fn activate(&self, company_id: CompanyId, token: &str) -> Result<(), AuthError> {
        let record = self.credential(company_id).await?;
        if record.activation_token != token {
            return Err(AuthError::InvalidActivationToken);
        }
        if record.activated {
            return Ok(());
        }
        if !self.store.set_activated(company_id).await? {
            return Err(AuthError::NotFound(company_id));
        }
        info!(%company_id, "company activated");
        Ok(())
    }

    pub async fn credential(&self, company_id: CompanyId) -> Result<CredentialRecord, AuthError> {
        self.store
            .get(company_id)
            .await?
            .ok_or(AuthError::NotFound(company_id))
    }
}
