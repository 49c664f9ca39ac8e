//! Process configuration, read from environment variables.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

pub use jobboard_observability::LogFormat;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

fn invalid(var: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        reason: reason.into(),
    }
}

/// Services a process can host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ServiceKind {
    Auth,
    Company,
    Subscription,
}

impl ServiceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceKind::Auth => "auth",
            ServiceKind::Company => "company",
            ServiceKind::Subscription => "subscription",
        }
    }

    /// Producer name and consumer group of the service.
    pub fn service_name(self) -> &'static str {
        match self {
            ServiceKind::Auth => "auth-service",
            ServiceKind::Company => "company-service",
            ServiceKind::Subscription => "subscription-service",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "auth" => Some(ServiceKind::Auth),
            "company" => Some(ServiceKind::Company),
            "subscription" => Some(ServiceKind::Subscription),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub services: BTreeSet<ServiceKind>,
    /// `None` → in-memory stores
    pub database_url: Option<String>,
    /// `None` → in-memory bus
    pub redis_url: Option<String>,
    pub apply_schema: bool,
    /// Consumer name inside a group; `None` → `<service>-<uuid>`
    pub consumer_name: Option<String>,
    pub publish_max_attempts: u32,
    pub consumer_max_attempts: u32,
    pub max_deliveries: u32,
    pub pending_timeout: Duration,
    /// `None` → fake payment gateway
    pub stripe_api_key: Option<String>,
    pub log_format: LogFormat,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            services: [ServiceKind::Auth, ServiceKind::Company, ServiceKind::Subscription]
                .into_iter()
                .collect(),
            database_url: None,
            redis_url: None,
            apply_schema: false,
            consumer_name: None,
            publish_max_attempts: 5,
            consumer_max_attempts: 5,
            max_deliveries: 10,
            pending_timeout: Duration::from_millis(60_000),
            stripe_api_key: None,
            log_format: LogFormat::Json,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(raw) = get("BIND_ADDR") {
            config.bind_addr = raw
                .parse()
                .map_err(|e| invalid("BIND_ADDR", format!("{raw:?}: {e}")))?;
        }

        if let Some(raw) = get("SERVICES") {
            let mut services = BTreeSet::new();
            for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let kind = ServiceKind::parse(&name.to_ascii_lowercase())
                    .ok_or_else(|| invalid("SERVICES", format!("unknown service {name:?}")))?;
                services.insert(kind);
            }
            if services.is_empty() {
                return Err(invalid("SERVICES", "no service selected"));
            }
            config.services = services;
        }

        config.database_url = get("DATABASE_URL");
        config.redis_url = get("REDIS_URL");
        config.consumer_name = get("CONSUMER_NAME");
        config.stripe_api_key = get("STRIPE_API_KEY");

        if let Some(raw) = get("APPLY_SCHEMA") {
            config.apply_schema = parse_bool("APPLY_SCHEMA", &raw)?;
        }
        if let Some(raw) = get("PUBLISH_MAX_ATTEMPTS") {
            config.publish_max_attempts = parse_positive("PUBLISH_MAX_ATTEMPTS", &raw)?;
        }
        if let Some(raw) = get("CONSUMER_MAX_ATTEMPTS") {
            config.consumer_max_attempts = parse_positive("CONSUMER_MAX_ATTEMPTS", &raw)?;
        }
        if let Some(raw) = get("MAX_DELIVERIES") {
            config.max_deliveries = parse_positive("MAX_DELIVERIES", &raw)?;
        }
        if let Some(raw) = get("PENDING_TIMEOUT_MS") {
            config.pending_timeout = Duration::from_millis(u64::from(parse_positive("PENDING_TIMEOUT_MS", &raw)?));
        }
        if let Some(raw) = get("LOG_FORMAT") {
            config.log_format = match raw.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                other => return Err(invalid("LOG_FORMAT", format!("expected json or pretty, got {other:?}"))),
            };
        }

        Ok(config)
    }

    pub fn hosts(&self, service: ServiceKind) -> bool {
        self.services.contains(&service)
    }

    pub fn consumer_name_for(&self, service: ServiceKind) -> String {
        self.consumer_name
            .clone()
            .unwrap_or_else(|| format!("{}-{}", service.service_name(), uuid::Uuid::new_v4().simple()))
    }
}

fn parse_bool(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(invalid(var, format!("expected a boolean, got {other:?}"))),
    }
}

fn parse_positive(var: &'static str, raw: &str) -> Result<u32, ConfigError> {
    match raw.parse::<u32>() {
        Ok(0) => Err(invalid(var, "must be greater than zero")),
        Ok(n) => Ok(n),
        Err(e) => Err(invalid(var, format!("{raw:?}: {e}"))),
    }
}
