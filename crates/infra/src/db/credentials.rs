use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use jobboard_auth::credential::ShardMigration;
use jobboard_auth::{CredentialRecord, CredentialStore, Shard};
use jobboard_core::{CompanyId, CountryCode, Email, StoreResult};

use super::{corrupt, store_error};

const COLUMNS: &str = "company_id, email, password_hash, country_code, shard, activation_token, \
                       activated, registered_at, country_changed_at";

/// `company_credentials` table. The shard is a column kept in step with the
/// country by [`CredentialStore::migrate_shard`].
#[derive(Debug, Clone)]
pub struct PostgresCredentialStore {
    pool: PgPool,
}

impl PostgresCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn from_row(row: &PgRow) -> StoreResult<CredentialRecord> {
    let email: String = row.try_get("email").map_err(store_error)?;
    let country: String = row.try_get("country_code").map_err(store_error)?;
    Ok(CredentialRecord {
        company_id: CompanyId::from_uuid(row.try_get::<Uuid, _>("company_id").map_err(store_error)?),
        email: Email::parse(&email).map_err(|e| corrupt("email", e))?,
        password_hash: row.try_get("password_hash").map_err(store_error)?,
        country_code: CountryCode::parse(&country).map_err(|e| corrupt("country_code", e))?,
        shard: Shard::new(row.try_get::<String, _>("shard").map_err(store_error)?),
        activation_token: row.try_get("activation_token").map_err(store_error)?,
        activated: row.try_get("activated").map_err(store_error)?,
        registered_at: row.try_get::<DateTime<Utc>, _>("registered_at").map_err(store_error)?,
        country_changed_at: row
            .try_get::<Option<DateTime<Utc>>, _>("country_changed_at")
            .map_err(store_error)?,
    })
}

#[async_trait::async_trait]
impl CredentialStore for PostgresCredentialStore {
    #[instrument(skip(self))]
    async fn get(&self, company_id: CompanyId) -> StoreResult<Option<CredentialRecord>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM company_credentials WHERE company_id = $1"))
            .bind(company_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;
        row.as_ref().map(from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn find_by_email(&self, email: &Email) -> StoreResult<Option<CredentialRecord>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM company_credentials WHERE email = $1"))
            .bind(email.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;
        row.as_ref().map(from_row).transpose()
    }

    #[instrument(skip(self, record), fields(company_id = %record.company_id))]
    async fn insert(&self, record: CredentialRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO company_credentials (
                company_id, email, password_hash, country_code, shard,
                activation_token, activated, registered_at, country_changed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.company_id.as_uuid())
        .bind(record.email.as_str())
        .bind(&record.password_hash)
        .bind(record.country_code.as_str())
        .bind(record.shard.as_str())
        .bind(&record.activation_token)
        .bind(record.activated)
        .bind(record.registered_at)
        .bind(record.country_changed_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(())
    }

    #[instrument(skip(self, migration), fields(company_id = %migration.company_id))]
    async fn migrate_shard(&self, migration: &ShardMigration) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE company_credentials
            SET country_code = $3, shard = $4, country_changed_at = $5
            WHERE company_id = $1 AND country_code = $2
            "#,
        )
        .bind(migration.company_id.as_uuid())
        .bind(migration.expected_country.as_str())
        .bind(migration.new_country.as_str())
        .bind(migration.new_shard.as_str())
        .bind(migration.changed_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_activated(&self, company_id: CompanyId) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE company_credentials SET activated = TRUE WHERE company_id = $1")
            .bind(company_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(result.rows_affected() == 1)
    }
}
