//! Postgres adapters for the domain stores.

mod credentials;
mod profiles;
mod subscriptions;
mod undelivered;

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use jobboard_core::StoreError;

pub use credentials::PostgresCredentialStore;
pub use profiles::PostgresCompanyProfileStore;
pub use subscriptions::PostgresSubscriptionStore;
pub use undelivered::PostgresUndeliveredLog;

/// DDL for every table the services use. Idempotent.
pub const SCHEMA: &str = include_str!("schema.sql");

pub async fn connect(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    info!("database schema applied");
    Ok(())
}

/// Classify a driver error for the domain.
pub(crate) fn store_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            // unique, foreign key, check, not null
            Some("23505") | Some("23503") | Some("23514") | Some("23502") => StoreError::Constraint(db.to_string()),
            _ => StoreError::Unavailable(err.to_string()),
        },
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            StoreError::Corrupt(err.to_string())
        }
        _ => StoreError::Unavailable(err.to_string()),
    }
}

pub(crate) fn corrupt(column: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{column}: {err}"))
}
