//! Service wiring: pick backends from the configuration, build the hosted
//! services and start their consumer workers.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use jobboard_auth::{AuthService, CountryChangeHandler, CredentialStore, InMemoryCredentialStore, ShardMap};
use jobboard_company::{CompanyProfileStore, CompanyService, InMemoryCompanyProfileStore, RegistrationHandler};
use jobboard_core::{Clock, SystemClock};
use jobboard_events::{
    BusError, EventBus, EventPublisher, InMemoryEventBus, InMemoryUndeliveredLog, RetryPolicy, Topic,
    UndeliveredSink,
};
use jobboard_infra::workers::{ConsumerMonitor, ConsumerWorker, ConsumerWorkerConfig, ConsumerWorkerHandle};
use jobboard_infra::{AppConfig, ServiceKind, db};
use jobboard_subscription::{
    FakePaymentGateway, InMemorySubscriptionStore, PaymentGateway, StripeGateway, SubscriptionService,
    SubscriptionStore,
};

/// Everything the services sit on: bus, stores, payment gateway and clock.
#[derive(Clone)]
pub struct Backends {
    pub bus: Arc<dyn EventBus>,
    pub undelivered: Arc<dyn UndeliveredSink>,
    pub credentials: Arc<dyn CredentialStore>,
    pub profiles: Arc<dyn CompanyProfileStore>,
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub clock: Arc<dyn Clock>,
}

impl Backends {
    /// In-memory bus and stores with the fake payment gateway (dev/test).
    pub fn in_memory() -> Self {
        Self {
            bus: Arc::new(InMemoryEventBus::new()),
            undelivered: Arc::new(InMemoryUndeliveredLog::new()),
            credentials: Arc::new(InMemoryCredentialStore::new()),
            profiles: Arc::new(InMemoryCompanyProfileStore::new()),
            subscriptions: Arc::new(InMemorySubscriptionStore::new()),
            gateway: Arc::new(FakePaymentGateway::new()),
            clock: Arc::new(SystemClock),
        }
    }
}

/// Postgres when `DATABASE_URL` is set, Redis Streams when `REDIS_URL` is set,
/// Stripe when `STRIPE_API_KEY` is set; in-memory stand-ins otherwise.
pub async fn connect_backends(config: &AppConfig) -> anyhow::Result<Backends> {
    let mut backends = Backends::in_memory();

    if let Some(url) = &config.database_url {
        let pool = db::connect(url).await.context("failed to connect to Postgres")?;
        if config.apply_schema {
            db::ensure_schema(&pool).await.context("failed to apply the database schema")?;
        }
        backends.undelivered = Arc::new(db::PostgresUndeliveredLog::new(pool.clone()));
        backends.credentials = Arc::new(db::PostgresCredentialStore::new(pool.clone()));
        backends.profiles = Arc::new(db::PostgresCompanyProfileStore::new(pool.clone()));
        backends.subscriptions = Arc::new(db::PostgresSubscriptionStore::new(pool));
        info!("using Postgres stores");
    } else {
        warn!("DATABASE_URL not set; using in-memory stores");
    }

    if let Some(url) = &config.redis_url {
        backends.bus = connect_bus(url, config).await?;
    } else {
        warn!("REDIS_URL not set; using the in-memory bus");
    }

    if let Some(key) = &config.stripe_api_key {
        backends.gateway = Arc::new(StripeGateway::new(key.clone()).context("failed to build the Stripe client")?);
    } else {
        warn!("STRIPE_API_KEY not set; payments are simulated");
    }

    Ok(backends)
}

#[cfg(feature = "redis")]
async fn connect_bus(url: &str, config: &AppConfig) -> anyhow::Result<Arc<dyn EventBus>> {
    use jobboard_infra::event_bus::{RedisStreamsConfig, RedisStreamsEventBus};

    let bus = RedisStreamsEventBus::connect(
        url,
        RedisStreamsConfig {
            max_deliveries: config.max_deliveries,
            pending_timeout: config.pending_timeout,
            ..RedisStreamsConfig::default()
        },
    )
    .await
    .context("failed to connect to Redis")?;
    info!("using the Redis Streams bus");
    Ok(Arc::new(bus))
}

#[cfg(not(feature = "redis"))]
async fn connect_bus(_url: &str, _config: &AppConfig) -> anyhow::Result<Arc<dyn EventBus>> {
    warn!("REDIS_URL set but the redis feature is not enabled; using the in-memory bus");
    Ok(Arc::new(InMemoryEventBus::new()))
}

/// Services hosted by this process, shared with the HTTP handlers.
#[derive(Clone)]
pub struct AppServices {
    pub auth: Option<AuthService>,
    pub company: Option<CompanyService>,
    pub subscription: Option<SubscriptionService>,
    pub bus: Arc<dyn EventBus>,
    /// Re-sends parked events; the producer name is already inside each payload.
    pub replayer: EventPublisher,
    pub consumers: Vec<ConsumerMonitor>,
}

/// Running services plus their background workers.
pub struct AppRuntime {
    services: Arc<AppServices>,
    workers: Vec<ConsumerWorkerHandle>,
}

impl AppRuntime {
    pub fn services(&self) -> Arc<AppServices> {
        self.services.clone()
    }

    pub async fn shutdown(self) {
        for worker in self.workers {
            worker.shutdown().await;
        }
    }
}

fn publisher(backends: &Backends, config: &AppConfig, service: ServiceKind) -> EventPublisher {
    EventPublisher::new(backends.bus.clone(), backends.undelivered.clone(), service.service_name())
        .with_policy(RetryPolicy::default().with_max_attempts(config.publish_max_attempts))
}

/// Build the services `config` hosts and spawn the consumers they own.
pub async fn start(config: &AppConfig, backends: Backends) -> Result<AppRuntime, BusError> {
    let consumer_retry = RetryPolicy::default().with_max_attempts(config.consumer_max_attempts);
    let mut workers = Vec::new();

    let auth = if config.hosts(ServiceKind::Auth) {
        let service = AuthService::new(
            backends.credentials.clone(),
            ShardMap::default(),
            publisher(&backends, config, ServiceKind::Auth),
            backends.clock.clone(),
        );
        workers.push(
            ConsumerWorker::spawn(
                backends.bus.clone(),
                CountryChangeHandler::new(backends.credentials.clone(), ShardMap::default()),
                ConsumerWorkerConfig::new(
                    Topic::CompanyCountryChanged.as_str(),
                    ServiceKind::Auth.service_name(),
                    config.consumer_name_for(ServiceKind::Auth),
                )
                .with_retry(consumer_retry.clone()),
            )
            .await?,
        );
        Some(service)
    } else {
        None
    };

    let company = if config.hosts(ServiceKind::Company) {
        let service = CompanyService::new(
            backends.profiles.clone(),
            publisher(&backends, config, ServiceKind::Company),
            backends.clock.clone(),
        );
        workers.push(
            ConsumerWorker::spawn(
                backends.bus.clone(),
                RegistrationHandler::new(backends.profiles.clone(), backends.clock.clone()),
                ConsumerWorkerConfig::new(
                    Topic::CompanyRegistered.as_str(),
                    ServiceKind::Company.service_name(),
                    config.consumer_name_for(ServiceKind::Company),
                )
                .with_retry(consumer_retry),
            )
            .await?,
        );
        Some(service)
    } else {
        None
    };

    let subscription = config.hosts(ServiceKind::Subscription).then(|| {
        SubscriptionService::new(
            backends.subscriptions.clone(),
            backends.gateway.clone(),
            backends.clock.clone(),
        )
    });

    let services = AppServices {
        auth,
        company,
        subscription,
        bus: backends.bus.clone(),
        replayer: EventPublisher::new(backends.bus.clone(), backends.undelivered.clone(), "replay")
            .with_policy(RetryPolicy::default().with_max_attempts(config.publish_max_attempts)),
        consumers: workers.iter().map(ConsumerWorkerHandle::monitor).collect(),
    };
    info!(consumers = workers.len(), "services started");

    Ok(AppRuntime {
        services: Arc::new(services),
        workers,
    })
}
