//! Infrastructure layer: Postgres stores, Redis Streams bus, consumer
//! workers, configuration and service-to-service clients.

pub mod config;
pub mod db;
pub mod event_bus;
pub mod external;
pub mod workers;

pub use config::{AppConfig, ConfigError, LogFormat, ServiceKind};
pub use external::{CompanyDirectoryClient, DirectoryError};
