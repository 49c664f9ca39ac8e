use std::sync::Arc;

use chrono::{Duration, SubsecRound};
use thiserror::Error;
use tracing::{info, instrument, warn};

use jobboard_core::{Clock, CompanyId, CountryCode, DomainError, StoreError};
use jobboard_events::{CompanyCountryChangedEvent, EventPublisher};

use crate::profile::{CompanyProfile, CompanyProfileStore, CountryUpdate};

#[derive(Debug, Error)]
pub enum CompanyError {
    #[error(transparent)]
    Validation(#[from] DomainError),

    #[error("company {0} not found")]
    NotFound(CompanyId),

    /// Another change to the same company committed first.
    #[error("country of company {0} changed concurrently")]
    Conflict(CompanyId),

    #[error("profile store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct CompanyService {
    store: Arc<dyn CompanyProfileStore>,
    publisher: EventPublisher,
    clock: Arc<dyn Clock>,
}

impl CompanyService {
    pub fn new(store: Arc<dyn CompanyProfileStore>, publisher: EventPublisher, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            publisher,
            clock,
        }
    }

    pub async fn get(&self, company_id: CompanyId) -> Result<CompanyProfile, CompanyError> {
        self.store
            .get(company_id)
            .await?
            .ok_or(CompanyError::NotFound(company_id))
    }

    pub async fn country(&self, company_id: CompanyId) -> Result<CountryCode, CompanyError> {
        Ok(self.get(company_id).await?.country_code)
    }

    pub async fn list(&self) -> Result<Vec<CompanyProfile>, CompanyError> {
        Ok(self.store.list().await?)
    }

    /// Change the company's country and publish `company.country.changed`.
    ///
    /// Setting the current country again changes nothing and publishes nothing.
    #[instrument(skip(self))]
    pub async fn change_country(&self, company_id: CompanyId, new_country: &str) -> Result<CompanyProfile, CompanyError> {
        let new_country = CountryCode::parse(new_country)?;
        let current = self.get(company_id).await?;
        if current.country_code == new_country {
            return Ok(current);
        }

        // changedAt never goes backwards for a company, even if the clock does.
        // Microseconds match what Postgres stores.
        let mut changed_at = self.clock.now().trunc_subsecs(6);
        if let Some(previous) = current.country_changed_at.filter(|p| changed_at <= *p) {
            changed_at = previous + Duration::microseconds(1);
        }

        let update = CountryUpdate {
            company_id,
            expected_country: current.country_code.clone(),
            expected_changed_at: current.country_changed_at,
            new_country: new_country.clone(),
            changed_at,
        };
        if !self.store.update_country(&update).await? {
            return Err(CompanyError::Conflict(company_id));
        }
        info!(from = %current.country_code, to = %new_country, "company country changed");

        let event = CompanyCountryChangedEvent {
            company_id,
            previous_country_code: current.country_code.clone(),
            new_country_code: new_country.clone(),
            changed_at,
        };
        if let Err(e) = self.publisher.publish(event).await {
            warn!(%company_id, error = %e, "company.country.changed not published");
        }

        Ok(CompanyProfile {
            country_code: new_country,
            country_changed_at: Some(changed_at),
            ..current
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use chrono::Utc;

    use jobboard_core::{Email, FixedClock};
    use jobboard_events::{
        EventEnvelope, InMemoryEventBus, InMemoryUndeliveredLog, RetryPolicy, decode,
    };

    use super::*;
    use crate::profile::InMemoryCompanyProfileStore;

    struct Fixture {
        bus: Arc<InMemoryEventBus>,
        store: Arc<InMemoryCompanyProfileStore>,
        clock: Arc<FixedClock>,
        service: CompanyService,
    }

    fn fixture() -> Fixture {
        let bus = Arc::new(InMemoryEventBus::new());
        let store = Arc::new(InMemoryCompanyProfileStore::new());
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let publisher = EventPublisher::new(bus.clone(), Arc::new(InMemoryUndeliveredLog::new()), "company-service")
            .with_policy(RetryPolicy::fixed(2, StdDuration::from_millis(1)));
        let service = CompanyService::new(store.clone(), publisher, clock.clone());
        Fixture {
            bus,
            store,
            clock,
            service,
        }
    }

    async fn seed(store: &InMemoryCompanyProfileStore, country: &str) -> CompanyId {
        let now = Utc::now();
        let company_id = CompanyId::new();
        store
            .insert_if_absent(CompanyProfile {
                company_id,
                email: Email::parse("hr@acme.io").unwrap(),
                country_code: CountryCode::parse(country).unwrap(),
                registered_at: now,
                created_at: now,
                country_changed_at: None,
            })
            .await
            .unwrap();
        company_id
    }

    fn changes(bus: &InMemoryEventBus) -> Vec<CompanyCountryChangedEvent> {
        bus.published("company.country.changed")
            .iter()
            .map(|bytes| decode::<CompanyCountryChangedEvent>(bytes).unwrap())
            .map(EventEnvelope::into_payload)
            .collect()
    }

    #[tokio::test]
    async fn change_country_commits_then_publishes() {
        let f = fixture();
        let id = seed(&f.store, "VN").await;

        let profile = f.service.change_country(id, "aus").await.unwrap();

        assert_eq!(profile.country_code.as_str(), "AUS");
        assert_eq!(f.service.country(id).await.unwrap().as_str(), "AUS");
        let events = changes(&f.bus);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].previous_country_code.as_str(), "VN");
        assert_eq!(events[0].new_country_code.as_str(), "AUS");
        assert_eq!(Some(events[0].changed_at), profile.country_changed_at);
    }

    #[tokio::test]
    async fn same_country_publishes_nothing() {
        let f = fixture();
        let id = seed(&f.store, "VN").await;

        let profile = f.service.change_country(id, "VN").await.unwrap();

        assert_eq!(profile.country_code.as_str(), "VN");
        assert!(changes(&f.bus).is_empty());
    }

    #[tokio::test]
    async fn changed_at_is_monotonic_when_the_clock_stands_still() {
        let f = fixture();
        let id = seed(&f.store, "VN").await;

        f.service.change_country(id, "AUS").await.unwrap();
        f.service.change_country(id, "SG").await.unwrap();
        f.clock.advance(chrono::Duration::seconds(-10));
        f.service.change_country(id, "JP").await.unwrap();

        let events = changes(&f.bus);
        assert_eq!(events.len(), 3);
        assert!(events[0].changed_at < events[1].changed_at);
        assert!(events[1].changed_at < events[2].changed_at);
    }

    /// Serves one pre-captured profile from `get`, as a request that read
    /// before other writers committed would see it.
    struct StaleSnapshotStore {
        inner: Arc<InMemoryCompanyProfileStore>,
        snapshot: std::sync::Mutex<Option<CompanyProfile>>,
    }

    #[async_trait::async_trait]
    impl CompanyProfileStore for StaleSnapshotStore {
        async fn get(&self, company_id: CompanyId) -> jobboard_core::StoreResult<Option<CompanyProfile>> {
            let stale = self.snapshot.lock().unwrap().take();
            match stale {
                Some(profile) => Ok(Some(profile)),
                None => self.inner.get(company_id).await,
            }
        }

        async fn list(&self) -> jobboard_core::StoreResult<Vec<CompanyProfile>> {
            self.inner.list().await
        }

        async fn insert_if_absent(&self, profile: CompanyProfile) -> jobboard_core::StoreResult<bool> {
            self.inner.insert_if_absent(profile).await
        }

        async fn update_country(&self, update: &CountryUpdate) -> jobboard_core::StoreResult<bool> {
            self.inner.update_country(update).await
        }
    }

    #[tokio::test]
    async fn change_from_a_stale_snapshot_conflicts_after_a_round_trip() {
        let f = fixture();
        let id = seed(&f.store, "VN").await;
        let snapshot = f.store.get(id).await.unwrap();

        // Two other requests commit VN -> AUS -> VN while the first one waits.
        f.service.change_country(id, "AUS").await.unwrap();
        let round_trip = f.service.change_country(id, "VN").await.unwrap();

        let stale_store = Arc::new(StaleSnapshotStore {
            inner: f.store.clone(),
            snapshot: std::sync::Mutex::new(snapshot),
        });
        let publisher = EventPublisher::new(f.bus.clone(), Arc::new(InMemoryUndeliveredLog::new()), "company-service")
            .with_policy(RetryPolicy::fixed(2, StdDuration::from_millis(1)));
        let late = CompanyService::new(stale_store, publisher, f.clock.clone());

        assert!(matches!(
            late.change_country(id, "SG").await.unwrap_err(),
            CompanyError::Conflict(_)
        ));

        let stored = f.service.get(id).await.unwrap();
        assert_eq!(stored.country_code.as_str(), "VN");
        assert_eq!(stored.country_changed_at, round_trip.country_changed_at);
        let events = changes(&f.bus);
        assert_eq!(events.len(), 2);
        assert!(events[0].changed_at < events[1].changed_at);
    }

    #[tokio::test]
    async fn errors_map_to_their_kinds() {
        let f = fixture();
        assert!(matches!(
            f.service.change_country(CompanyId::new(), "VN").await.unwrap_err(),
            CompanyError::NotFound(_)
        ));

        let id = seed(&f.store, "VN").await;
        assert!(matches!(
            f.service.change_country(id, "V1").await.unwrap_err(),
            CompanyError::Validation(_)
        ));
        assert!(changes(&f.bus).is_empty());
    }
}
