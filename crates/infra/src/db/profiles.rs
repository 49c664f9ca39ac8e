use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use jobboard_company::{CompanyProfile, CompanyProfileStore, CountryUpdate};
use jobboard_core::{CompanyId, CountryCode, Email, StoreResult};

use super::{corrupt, store_error};

const COLUMNS: &str = "company_id, email, country_code, registered_at, created_at, country_changed_at";

#[derive(Debug, Clone)]
pub struct PostgresCompanyProfileStore {
    pool: PgPool,
}

impl PostgresCompanyProfileStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn from_row(row: &PgRow) -> StoreResult<CompanyProfile> {
    let email: String = row.try_get("email").map_err(store_error)?;
    let country: String = row.try_get("country_code").map_err(store_error)?;
    Ok(CompanyProfile {
        company_id: CompanyId::from_uuid(row.try_get::<Uuid, _>("company_id").map_err(store_error)?),
        email: Email::parse(&email).map_err(|e| corrupt("email", e))?,
        country_code: CountryCode::parse(&country).map_err(|e| corrupt("country_code", e))?,
        registered_at: row.try_get::<DateTime<Utc>, _>("registered_at").map_err(store_error)?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(store_error)?,
        country_changed_at: row
            .try_get::<Option<DateTime<Utc>>, _>("country_changed_at")
            .map_err(store_error)?,
    })
}

#[async_trait::async_trait]
impl CompanyProfileStore for PostgresCompanyProfileStore {
    #[instrument(skip(self))]
    async fn get(&self, company_id: CompanyId) -> StoreResult<Option<CompanyProfile>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM company_profiles WHERE company_id = $1"))
            .bind(company_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;
        row.as_ref().map(from_row).transpose()
    }

    async fn list(&self) -> StoreResult<Vec<CompanyProfile>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM company_profiles ORDER BY created_at, company_id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;
        rows.iter().map(from_row).collect()
    }

    #[instrument(skip(self, profile), fields(company_id = %profile.company_id))]
    async fn insert_if_absent(&self, profile: CompanyProfile) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO company_profiles (
                company_id, email, country_code, registered_at, created_at, country_changed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (company_id) DO NOTHING
            "#,
        )
        .bind(profile.company_id.as_uuid())
        .bind(profile.email.as_str())
        .bind(profile.country_code.as_str())
        .bind(profile.registered_at)
        .bind(profile.created_at)
        .bind(profile.country_changed_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, update), fields(company_id = %update.company_id))]
    async fn update_country(&self, update: &CountryUpdate) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE company_profiles
            SET country_code = $3, country_changed_at = $4
            WHERE company_id = $1
              AND country_code = $2
              AND country_changed_at IS NOT DISTINCT FROM $5
            "#,
        )
        .bind(update.company_id.as_uuid())
        .bind(update.expected_country.as_str())
        .bind(update.new_country.as_str())
        .bind(update.changed_at)
        .bind(update.expected_changed_at)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(result.rows_affected() == 1)
    }
}
