use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use jobboard_core::{CompanyId, CountryCode, Email, Entity, StoreError, StoreResult};

/// Company directory entry, keyed by the company id issued at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyProfile {
    pub company_id: CompanyId,
    pub email: Email,
    pub country_code: CountryCode,
    /// When the account was registered (from the event).
    pub registered_at: DateTime<Utc>,
    /// When this profile was materialized.
    pub created_at: DateTime<Utc>,
    pub country_changed_at: Option<DateTime<Utc>>,
}

impl Entity for CompanyProfile {
    type Id = CompanyId;

    fn id(&self) -> &Self::Id {
        &self.company_id
    }
}

/// Country compare-and-set.
///
/// Both the country and its last change time must still match, so a change
/// that went A to B and back to A in between is detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountryUpdate {
    pub company_id: CompanyId,
    pub expected_country: CountryCode,
    pub expected_changed_at: Option<DateTime<Utc>>,
    pub new_country: CountryCode,
    pub changed_at: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait CompanyProfileStore: Send + Sync {
    async fn get(&self, company_id: CompanyId) -> StoreResult<Option<CompanyProfile>>;

    /// All profiles, oldest first.
    async fn list(&self) -> StoreResult<Vec<CompanyProfile>>;

    /// Returns `false` (and changes nothing) if a profile with this id exists.
    async fn insert_if_absent(&self, profile: CompanyProfile) -> StoreResult<bool>;

    /// Apply the update only if the stored country is still `expected_country`
    /// and its change time is still `expected_changed_at`.
    async fn update_country(&self, update: &CountryUpdate) -> StoreResult<bool>;
}

#[async_trait::async_trait]
impl<S> CompanyProfileStore for std::sync::Arc<S>
where
    S: CompanyProfileStore + ?Sized,
{
    async fn get(&self, company_id: CompanyId) -> StoreResult<Option<CompanyProfile>> {
        (**self).get(company_id).await
    }

    async fn list(&self) -> StoreResult<Vec<CompanyProfile>> {
        (**self).list().await
    }

    async fn insert_if_absent(&self, profile: CompanyProfile) -> StoreResult<bool> {
        (**self).insert_if_absent(profile).await
    }

    async fn update_country(&self, update: &CountryUpdate) -> StoreResult<bool> {
        (**self).update_country(update).await
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCompanyProfileStore {
    inner: RwLock<HashMap<CompanyId, CompanyProfile>>,
    fail_next: AtomicUsize,
}

impl InMemoryCompanyProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` store calls fail with [`StoreError::Unavailable`].
    pub fn fail_next_calls(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> StoreResult<()> {
        match self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        {
            Ok(_) => Err(StoreError::unavailable("injected failure")),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl CompanyProfileStore for InMemoryCompanyProfileStore {
    async fn get(&self, company_id: CompanyId) -> StoreResult<Option<CompanyProfile>> {
        self.check_available()?;
        let map = self
            .inner
            .read()
            .map_err(|_| StoreError::unavailable("profile store lock poisoned"))?;
        Ok(map.get(&company_id).cloned())
    }

    async fn list(&self) -> StoreResult<Vec<CompanyProfile>> {
        self.check_available()?;
        let map = self
            .inner
            .read()
            .map_err(|_| StoreError::unavailable("profile store lock poisoned"))?;
        let mut out: Vec<CompanyProfile> = map.values().cloned().collect();
        out.sort_by_key(|p| (p.created_at, p.company_id));
        Ok(out)
    }

    async fn insert_if_absent(&self, profile: CompanyProfile) -> StoreResult<bool> {
        self.check_available()?;
        let mut map = self
            .inner
            .write()
            .map_err(|_| StoreError::unavailable("profile store lock poisoned"))?;
        if map.contains_key(profile.id()) {
            return Ok(false);
        }
        map.insert(*profile.id(), profile);
        Ok(true)
    }

    async fn update_country(&self, update: &CountryUpdate) -> StoreResult<bool> {
        self.check_available()?;
        let mut map = self
            .inner
            .write()
            .map_err(|_| StoreError::unavailable("profile store lock poisoned"))?;
        match map.get_mut(&update.company_id) {
            Some(profile)
                if profile.country_code == update.expected_country
                    && profile.country_changed_at == update.expected_changed_at =>
            {
                profile.country_code = update.new_country.clone();
                profile.country_changed_at = Some(update.changed_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
