//! Consumer of `company.country.changed`: migrates the credential record to the
//! shard of the company's new country.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use jobboard_core::StoreError;
use jobboard_events::{
    ApplyError, ApplyOutcome, ApplyResult, CompanyCountryChangedEvent, EventEnvelope, EventHandler,
};

use crate::credential::{CredentialStore, ShardMigration};
use crate::shard::ShardMap;

/// Rounds of read + compare-and-set before giving up as transient.
const MAX_COMPARE_ROUNDS: usize = 3;

pub struct CountryChangeHandler {
    store: Arc<dyn CredentialStore>,
    shards: ShardMap,
}

impl CountryChangeHandler {
    pub fn new(store: Arc<dyn CredentialStore>, shards: ShardMap) -> Self {
        Self { store, shards }
    }
}

fn store_failure(err: StoreError) -> ApplyError {
    if err.is_transient() {
        ApplyError::Transient(err.to_string())
    } else {
        ApplyError::Permanent(err.to_string())
    }
}

#[async_trait::async_trait]
impl EventHandler for CountryChangeHandler {
    type Event = CompanyCountryChangedEvent;

    fn name(&self) -> &'static str {
        "auth.country-change"
    }

    #[instrument(
        skip(self, envelope),
        fields(company_id = %envelope.payload().company_id, event_id = %envelope.event_id())
    )]
    async fn apply(&self, envelope: &EventEnvelope<Self::Event>) -> ApplyResult {
        let event = envelope.payload();

        for _ in 0..MAX_COMPARE_ROUNDS {
            let record = self
                .store
                .get(event.company_id)
                .await
                .map_err(store_failure)?
                .ok_or_else(|| {
                    ApplyError::Permanent(format!("no credential record for company {}", event.company_id))
                })?;

            if let Some(applied) = record.country_changed_at.filter(|applied| event.changed_at <= *applied) {
                if event.changed_at == applied || record.country_code == event.new_country_code {
                    debug!("duplicate country change");
                } else {
                    warn!(
                        stored = %record.country_code,
                        stored_changed_at = %applied,
                        previous = %event.previous_country_code,
                        new = %event.new_country_code,
                        changed_at = %event.changed_at,
                        "stale country change skipped"
                    );
                }
                return Ok(ApplyOutcome::AlreadyApplied);
            }

            if record.country_code == event.new_country_code {
                debug!(country_code = %record.country_code, "credential already on the new country");
                return Ok(ApplyOutcome::AlreadyApplied);
            }

            if record.country_code != event.previous_country_code {
                warn!(
                    stored = %record.country_code,
                    expected = %event.previous_country_code,
                    "country change does not follow from the stored country"
                );
                return Err(ApplyError::OutOfOrder {
                    company_id: event.company_id,
                    expected: event.previous_country_code.clone(),
                    stored: record.country_code,
                });
            }

            let migration = ShardMigration {
                company_id: event.company_id,
                expected_country: event.previous_country_code.clone(),
                new_country: event.new_country_code.clone(),
                new_shard: self.shards.shard_for(&event.new_country_code),
                changed_at: event.changed_at,
            };

            if self.store.migrate_shard(&migration).await.map_err(store_failure)? {
                info!(
                    from_shard = %record.shard,
                    to_shard = %migration.new_shard,
                    country_code = %migration.new_country,
                    "credential migrated"
                );
                return Ok(ApplyOutcome::Applied);
            }

            debug!("lost the compare on the stored country; re-reading");
        }

        Err(ApplyError::Transient(
            "credential record kept changing during migration".to_string(),
        ))
    }
}
