//! Company credential records and their store.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};

use jobboard_core::{CompanyId, CountryCode, Email, Entity, StoreError, StoreResult};

use crate::shard::Shard;

/// Login credentials of a company account, placed on the shard of its country.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub company_id: CompanyId,
    pub email: Email,
    pub password_hash: String,
    pub country_code: CountryCode,
    pub shard: Shard,
    pub activation_token: String,
    pub activated: bool,
    pub registered_at: DateTime<Utc>,
    /// Business time of the last country change applied to this record.
    pub country_changed_at: Option<DateTime<Utc>>,
}

impl core::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("company_id", &self.company_id)
            .field("email", &self.email)
            .field("country_code", &self.country_code)
            .field("shard", &self.shard)
            .field("activated", &self.activated)
            .field("registered_at", &self.registered_at)
            .field("country_changed_at", &self.country_changed_at)
            .finish_non_exhaustive()
    }
}

impl Entity for CredentialRecord {
    type Id = CompanyId;

    fn id(&self) -> &Self::Id {
        &self.company_id
    }
}

/// A compare-and-set shard migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardMigration {
    pub company_id: CompanyId,
    /// The country the record must still hold for the migration to win.
    pub expected_country: CountryCode,
    pub new_country: CountryCode,
    pub new_shard: Shard,
    pub changed_at: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, company_id: CompanyId) -> StoreResult<Option<CredentialRecord>>;

    async fn find_by_email(&self, email: &Email) -> StoreResult<Option<CredentialRecord>>;

    /// Insert a new record. A taken company id or email is a [`StoreError::Constraint`].
    async fn insert(&self, record: CredentialRecord) -> StoreResult<()>;

    /// Move the record to `new_shard` and update its country, only if it still
    /// holds `expected_country`. Returns whether the compare won.
    async fn migrate_shard(&self, migration: &ShardMigration) -> StoreResult<bool>;

    /// Returns `false` when no record exists.
    async fn set_activated(&self, company_id: CompanyId) -> StoreResult<bool>;
}

#[async_trait::async_trait]
impl<S> CredentialStore for std::sync::Arc<S>
where
    S: CredentialStore + ?Sized,
{
    async fn get(&self, company_id: CompanyId) -> StoreResult<Option<CredentialRecord>> {
        (**self).get(company_id).await
    }

    async fn find_by_email(&self, email: &Email) -> StoreResult<Option<CredentialRecord>> {
        (**self).find_by_email(email).await
    }

    async fn insert(&self, record: CredentialRecord) -> StoreResult<()> {
        (**self).insert(record).await
    }

    async fn migrate_shard(&self, migration: &ShardMigration) -> StoreResult<bool> {
        (**self).migrate_shard(migration).await
    }

    async fn set_activated(&self, company_id: CompanyId) -> StoreResult<bool> {
        (**self).set_activated(company_id).await
    }
}

#[derive(Debug, Default)]
struct Shards {
    records: BTreeMap<Shard, HashMap<CompanyId, CredentialRecord>>,
    /// company → shard currently holding it
    placement: HashMap<CompanyId, Shard>,
}

impl Shards {
    fn get(&self, company_id: CompanyId) -> Option<&CredentialRecord> {
        let shard = self.placement.get(&company_id)?;
        self.records.get(shard)?.get(&company_id)
    }
}

/// In-memory store that keeps one map per shard, so a migration physically
/// moves the record between partitions.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    inner: RwLock<Shards>,
    fail_next: AtomicUsize,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` store calls fail with [`StoreError::Unavailable`].
    pub fn fail_next_calls(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Company ids held by `shard`.
    pub fn companies_in(&self, shard: &Shard) -> Vec<CompanyId> {
        let Ok(inner) = self.inner.read() else {
            return vec![];
        };
        inner
            .records
            .get(shard)
            .map(|records| records.keys().copied().collect())
            .unwrap_or_default()
    }

    fn check_available(&self) -> StoreResult<()> {
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match injected {
            Ok(_) => Err(StoreError::unavailable("injected failure")),
            Err(_) => Ok(()),
        }
    }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, Shards>> {
        self.check_available()?;
        self.inner
            .read()
            .map_err(|_| StoreError::unavailable("credential store lock poisoned"))
    }

    fn write(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, Shards>> {
        self.check_available()?;
        self.inner
            .write()
            .map_err(|_| StoreError::unavailable("credential store lock poisoned"))
    }
}

#[async_trait::async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn get(&self, company_id: CompanyId) -> StoreResult<Option<CredentialRecord>> {
        Ok(self.read()?.get(company_id).cloned())
    }

    async fn find_by_email(&self, email: &Email) -> StoreResult<Option<CredentialRecord>> {
        let inner = self.read()?;
        Ok(inner
            .records
            .values()
            .flat_map(|records| records.values())
            .find(|r| &r.email == email)
            .cloned())
    }

    async fn insert(&self, record: CredentialRecord) -> StoreResult<()> {
        let mut inner = self.write()?;
        if inner.placement.contains_key(record.id()) {
            return Err(StoreError::Constraint(format!(
                "company {} already has credentials",
                record.company_id
            )));
        }
        let email_taken = inner
            .records
            .values()
            .flat_map(|records| records.values())
            .any(|r| r.email == record.email);
        if email_taken {
            return Err(StoreError::Constraint(format!("email {} already registered", record.email)));
        }

        let company_id = *record.id();
        inner.placement.insert(company_id, record.shard.clone());
        inner
            .records
            .entry(record.shard.clone())
            .or_default()
            .insert(company_id, record);
        Ok(())
    }

    async fn migrate_shard(&self, migration: &ShardMigration) -> StoreResult<bool> {
        let mut inner = self.write()?;
        let Some(current_shard) = inner.placement.get(&migration.company_id).cloned() else {
            return Ok(false);
        };
        let Some(mut record) = inner
            .records
            .get_mut(&current_shard)
            .and_then(|records| records.remove(&migration.company_id))
        else {
            return Ok(false);
        };

        if record.country_code != migration.expected_country {
            inner
                .records
                .entry(current_shard)
                .or_default()
                .insert(migration.company_id, record);
            return Ok(false);
        }

        record.country_code = migration.new_country.clone();
        record.shard = migration.new_shard.clone();
        record.country_changed_at = Some(migration.changed_at);
        inner.placement.insert(migration.company_id, migration.new_shard.clone());
        inner
            .records
            .entry(migration.new_shard.clone())
            .or_default()
            .insert(migration.company_id, record);
        Ok(true)
    }

    async fn set_activated(&self, company_id: CompanyId) -> StoreResult<bool> {
        let mut inner = self.write()?;
        let Some(shard) = inner.placement.get(&company_id).cloned() else {
            return Ok(false);
        };
        match inner.records.get_mut(&shard).and_then(|records| records.get_mut(&company_id)) {
            Some(record) => {
                record.activated = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
