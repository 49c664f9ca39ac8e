//! Auth and Company services wired through one in-memory bus with the real
//! consumer workers in between.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use proptest::prelude::*;

use jobboard_auth::{
    AuthService, CountryChangeHandler, CredentialStore, InMemoryCredentialStore, RegisterCompany, Shard, ShardMap,
};
use jobboard_company::{CompanyProfileStore, CompanyService, InMemoryCompanyProfileStore, RegistrationHandler};
use jobboard_core::{CompanyId, CountryCode, SystemClock};
use jobboard_events::{
    CompanyCountryChangedEvent, EventBus, EventEnvelope, EventPublisher, InMemoryEventBus, InMemoryUndeliveredLog,
    OutboundRecord, RetryPolicy, Topic, encode,
};
use jobboard_infra::workers::{ConsumerWorker, ConsumerWorkerConfig, ConsumerWorkerHandle, wait_for_stats};

const WAIT: Duration = Duration::from_secs(3);

struct System {
    bus: Arc<InMemoryEventBus>,
    credentials: Arc<InMemoryCredentialStore>,
    profiles: Arc<InMemoryCompanyProfileStore>,
    auth: AuthService,
    company: CompanyService,
    registration_worker: ConsumerWorkerHandle,
    country_worker: ConsumerWorkerHandle,
}

impl System {
    async fn start() -> Self {
        let bus = Arc::new(InMemoryEventBus::new());
        let credentials = Arc::new(InMemoryCredentialStore::new());
        let profiles = Arc::new(InMemoryCompanyProfileStore::new());
        let clock = Arc::new(SystemClock);

        let publisher = |producer: &str| {
            EventPublisher::new(bus.clone(), Arc::new(InMemoryUndeliveredLog::new()), producer)
                .with_policy(RetryPolicy::fixed(3, Duration::from_millis(1)))
        };
        let auth = AuthService::new(credentials.clone(), ShardMap::default(), publisher("auth-service"), clock.clone());
        let company = CompanyService::new(profiles.clone(), publisher("company-service"), clock.clone());

        let retry = RetryPolicy::fixed(3, Duration::from_millis(1));
        let registration_worker = ConsumerWorker::spawn(
            bus.clone(),
            RegistrationHandler::new(profiles.clone(), clock.clone()),
            ConsumerWorkerConfig::new(Topic::CompanyRegistered.as_str(), "company-service", "company-1")
                .with_retry(retry.clone()),
        )
        .await
        .unwrap();
        let country_worker = ConsumerWorker::spawn(
            bus.clone(),
            CountryChangeHandler::new(credentials.clone(), ShardMap::default()),
            ConsumerWorkerConfig::new(Topic::CompanyCountryChanged.as_str(), "auth-service", "auth-1")
                .with_retry(retry),
        )
        .await
        .unwrap();

        Self {
            bus,
            credentials,
            profiles,
            auth,
            company,
            registration_worker,
            country_worker,
        }
    }

    async fn register(&self, email: &str, country: &str) -> CompanyId {
        let record = self
            .auth
            .register(RegisterCompany {
                email: email.to_string(),
                password: "correct horse battery".to_string(),
                country_code: country.to_string(),
            })
            .await
            .unwrap();
        let company_id = record.company_id;
        let stats = wait_for_stats(&self.registration_worker.monitor(), WAIT, |s| s.applied >= 1).await;
        assert!(stats.applied >= 1, "registration never reached the company service: {stats:?}");
        company_id
    }

    async fn shutdown(self) {
        self.registration_worker.shutdown().await;
        self.country_worker.shutdown().await;
    }
}

fn cc(raw: &str) -> CountryCode {
    CountryCode::parse(raw).unwrap()
}

#[tokio::test]
async fn registration_creates_a_profile_with_the_same_country() {
    let system = System::start().await;

    let company_id = system.register("hr@acme.io", "VN").await;

    let profile = system.profiles.get(company_id).await.unwrap().unwrap();
    assert_eq!(profile.country_code, cc("VN"));
    assert_eq!(profile.email.as_str(), "hr@acme.io");
    let credential = system.credentials.get(company_id).await.unwrap().unwrap();
    assert_eq!(credential.shard, Shard::new("apac"));
    system.shutdown().await;
}

#[tokio::test]
async fn country_change_moves_the_credentials_to_the_new_shard() {
    let system = System::start().await;
    let company_id = system.register("hr@acme.io", "VN").await;

    system.company.change_country(company_id, "DE").await.unwrap();

    let stats = wait_for_stats(&system.country_worker.monitor(), WAIT, |s| s.applied == 1).await;
    assert_eq!(stats.applied, 1);
    let credential = system.credentials.get(company_id).await.unwrap().unwrap();
    assert_eq!(credential.country_code, cc("DE"));
    assert_eq!(credential.shard, Shard::new("emea"));
    assert!(system.credentials.companies_in(&Shard::new("apac")).is_empty());
    assert_eq!(system.credentials.companies_in(&Shard::new("emea")), vec![company_id]);
    system.shutdown().await;
}

#[tokio::test]
async fn vn_to_aus_keeps_the_shard_but_updates_the_country() {
    let system = System::start().await;
    let company_id = system.register("hr@acme.io", "VN").await;

    system.company.change_country(company_id, "AUS").await.unwrap();

    wait_for_stats(&system.country_worker.monitor(), WAIT, |s| s.applied == 1).await;
    let credential = system.credentials.get(company_id).await.unwrap().unwrap();
    assert_eq!(credential.country_code, cc("AUS"));
    assert_eq!(credential.shard, Shard::new("apac"));
    assert_eq!(
        system.company.country(company_id).await.unwrap(),
        credential.country_code
    );
    system.shutdown().await;
}

#[tokio::test]
async fn redelivered_events_are_applied_once() {
    let system = System::start().await;
    let company_id = system.register("hr@acme.io", "VN").await;
    system.company.change_country(company_id, "US").await.unwrap();
    wait_for_stats(&system.country_worker.monitor(), WAIT, |s| s.applied == 1).await;

    // Replay everything both topics ever carried.
    for topic in Topic::ALL {
        for payload in system.bus.published(topic.as_str()) {
            system
                .bus
                .publish(OutboundRecord::new(topic.as_str(), company_id.to_string(), payload))
                .await
                .unwrap();
        }
    }

    let registrations = wait_for_stats(&system.registration_worker.monitor(), WAIT, |s| s.duplicates == 1).await;
    let changes = wait_for_stats(&system.country_worker.monitor(), WAIT, |s| s.duplicates == 1).await;
    assert_eq!((registrations.applied, registrations.duplicates), (1, 1));
    assert_eq!((changes.applied, changes.duplicates), (1, 1));
    assert_eq!(system.profiles.len(), 1);
    let credential = system.credentials.get(company_id).await.unwrap().unwrap();
    assert_eq!(credential.country_code, cc("US"));
    system.shutdown().await;
}

#[tokio::test]
async fn malformed_payload_is_discarded_and_the_stream_keeps_flowing() {
    let system = System::start().await;
    system
        .bus
        .publish(OutboundRecord::new(
            Topic::CompanyRegistered.as_str(),
            "garbage",
            b"{not json".to_vec(),
        ))
        .await
        .unwrap();

    let company_id = system.register("hr@acme.io", "VN").await;

    let stats = system.registration_worker.stats();
    assert_eq!(stats.poison, 1);
    assert_eq!(stats.applied, 1);
    assert!(system.profiles.get(company_id).await.unwrap().is_some());
    assert_eq!(system.bus.pending_count(Topic::CompanyRegistered.as_str(), "company-service"), 0);
    system.shutdown().await;
}

#[tokio::test]
async fn change_from_an_unexpected_country_is_dead_lettered() {
    let system = System::start().await;
    let company_id = system.register("hr@acme.io", "VN").await;

    // Auth still holds VN; this change claims the company was in FR.
    let stray = EventEnvelope::wrap(
        "company-service",
        CompanyCountryChangedEvent {
            company_id,
            previous_country_code: cc("FR"),
            new_country_code: cc("DE"),
            changed_at: Utc::now(),
        },
    );
    let topic = Topic::CompanyCountryChanged.as_str();
    system
        .bus
        .publish(OutboundRecord::new(topic, stray.partition_key(), encode(&stray).unwrap()))
        .await
        .unwrap();

    let stats = wait_for_stats(&system.country_worker.monitor(), WAIT, |s| s.dead_lettered == 1).await;
    assert_eq!(stats.dead_lettered, 1);
    let dead = system.bus.dead_letters(topic, 10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].partition_key, company_id.to_string());
    assert_eq!(
        system.credentials.get(company_id).await.unwrap().unwrap().country_code,
        cc("VN")
    );
    system.shutdown().await;
}

#[tokio::test]
async fn change_for_an_unknown_company_is_dead_lettered() {
    let system = System::start().await;
    let stray = EventEnvelope::wrap(
        "company-service",
        CompanyCountryChangedEvent {
            company_id: CompanyId::new(),
            previous_country_code: cc("VN"),
            new_country_code: cc("DE"),
            changed_at: Utc::now(),
        },
    );
    system
        .bus
        .publish(OutboundRecord::new(
            Topic::CompanyCountryChanged.as_str(),
            stray.partition_key(),
            encode(&stray).unwrap(),
        ))
        .await
        .unwrap();

    let stats = wait_for_stats(&system.country_worker.monitor(), WAIT, |s| s.dead_lettered == 1).await;
    assert_eq!(stats.dead_lettered, 1);
    assert_eq!(stats.applied, 0);
    system.shutdown().await;
}

#[tokio::test]
async fn store_outage_is_retried_in_place() {
    let system = System::start().await;
    let company_id = system.register("hr@acme.io", "VN").await;
    system.credentials.fail_next_calls(2);

    system.company.change_country(company_id, "DE").await.unwrap();

    let stats = wait_for_stats(&system.country_worker.monitor(), WAIT, |s| s.applied == 1).await;
    assert_eq!(stats.applied, 1);
    assert!(stats.transient_retries >= 1);
    assert_eq!(stats.dead_lettered, 0);
    system.shutdown().await;
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Any chain of changes, each delivered one or more times, leaves both
    /// services on the last country.
    #[test]
    fn both_services_converge_on_the_last_country(
        chain in prop::collection::vec(prop::sample::select(vec!["VN", "AUS", "DE", "US", "SG", "BR"]), 1..6),
        repeats in prop::collection::vec(1usize..3, 6),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let system = System::start().await;
            let company_id = system.register("hr@acme.io", "VN").await;

            let mut expected = cc("VN");
            let mut changes = 0u64;
            for country in &chain {
                let before = system.bus.published(Topic::CompanyCountryChanged.as_str()).len();
                system.company.change_country(company_id, country).await.unwrap();
                expected = cc(country);
                let published = system.bus.published(Topic::CompanyCountryChanged.as_str());
                if published.len() > before {
                    changes += 1;
                }
            }
            let published = system.bus.published(Topic::CompanyCountryChanged.as_str());
            for (payload, extra) in published.iter().zip(repeats.iter()) {
                for _ in 1..*extra {
                    system
                        .bus
                        .publish(OutboundRecord::new(
                            Topic::CompanyCountryChanged.as_str(),
                            company_id.to_string(),
                            payload.clone(),
                        ))
                        .await
                        .unwrap();
                }
            }
            let total = changes
                + published
                    .iter()
                    .zip(repeats.iter())
                    .map(|(_, extra)| (*extra as u64).saturating_sub(1))
                    .sum::<u64>();

            let stats = wait_for_stats(&system.country_worker.monitor(), WAIT, |s| s.received == total).await;
            assert_eq!(stats.received, total);
            assert_eq!(stats.dead_lettered, 0);
            assert_eq!(system.company.country(company_id).await.unwrap(), expected);
            assert_eq!(system.credentials.get(company_id).await.unwrap().unwrap().country_code, expected);
            prop_assert_eq!(system.credentials.companies_in(&ShardMap::default().shard_for(&expected)), vec![company_id]);
            system.shutdown().await;
            Ok(())
        })?;
    }
}
