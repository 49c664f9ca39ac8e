use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use jobboard_core::{CompanyId, StoreResult, SubscriptionId};
use jobboard_subscription::{Plan, Subscription, SubscriptionStatus, SubscriptionStore};

use super::{corrupt, store_error};

const COLUMNS: &str = "company_id, subscription_id, plan, status, start_at, end_at, payment_reference";

#[derive(Debug, Clone)]
pub struct PostgresSubscriptionStore {
    pool: PgPool,
}

impl PostgresSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn from_row(row: &PgRow) -> StoreResult<Subscription> {
    let plan: String = row.try_get("plan").map_err(store_error)?;
    let status: String = row.try_get("status").map_err(store_error)?;
    Ok(Subscription {
        subscription_id: SubscriptionId::from_uuid(row.try_get::<Uuid, _>("subscription_id").map_err(store_error)?),
        company_id: CompanyId::from_uuid(row.try_get::<Uuid, _>("company_id").map_err(store_error)?),
        plan: Plan::parse(&plan).map_err(|e| corrupt("plan", e))?,
        status: SubscriptionStatus::parse(&status).map_err(|e| corrupt("status", e))?,
        start_at: row.try_get::<DateTime<Utc>, _>("start_at").map_err(store_error)?,
        end_at: row.try_get::<Option<DateTime<Utc>>, _>("end_at").map_err(store_error)?,
        payment_reference: row.try_get("payment_reference").map_err(store_error)?,
    })
}

#[async_trait::async_trait]
impl SubscriptionStore for PostgresSubscriptionStore {
    async fn find_by_company(&self, company_id: CompanyId) -> StoreResult<Option<Subscription>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM subscriptions WHERE company_id = $1"))
            .bind(company_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;
        row.as_ref().map(from_row).transpose()
    }

    async fn upsert(&self, subscription: Subscription) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                company_id, subscription_id, plan, status, start_at, end_at, payment_reference
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (company_id)
            DO UPDATE SET
                subscription_id = EXCLUDED.subscription_id,
                plan = EXCLUDED.plan,
                status = EXCLUDED.status,
                start_at = EXCLUDED.start_at,
                end_at = EXCLUDED.end_at,
                payment_reference = EXCLUDED.payment_reference
            "#,
        )
        .bind(subscription.company_id.as_uuid())
        .bind(subscription.subscription_id.as_uuid())
        .bind(subscription.plan.as_str())
        .bind(subscription.status.as_str())
        .bind(subscription.start_at)
        .bind(subscription.end_at)
        .bind(&subscription.payment_reference)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(())
    }

    async fn set_status(&self, company_id: CompanyId, status: SubscriptionStatus) -> StoreResult<Option<Subscription>> {
        let row = sqlx::query(&format!(
            "UPDATE subscriptions SET status = $2 WHERE company_id = $1 RETURNING {COLUMNS}"
        ))
        .bind(company_id.as_uuid())
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;
        row.as_ref().map(from_row).transpose()
    }
}
