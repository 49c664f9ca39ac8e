use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use jobboard_core::EventId;
use jobboard_events::{UndeliveredEvent, UndeliveredSink};

/// `undelivered_events` table, so parked events survive a restart.
#[derive(Debug, Clone)]
pub struct PostgresUndeliveredLog {
    pool: PgPool,
}

impl PostgresUndeliveredLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const COLUMNS: &str = "event_id, event_type, topic, partition_key, payload, attempts, last_error, parked_at";

fn from_row(row: &PgRow) -> Result<UndeliveredEvent, sqlx::Error> {
    Ok(UndeliveredEvent {
        event_id: EventId::from_uuid(row.try_get::<Uuid, _>("event_id")?),
        event_type: row.try_get("event_type")?,
        topic: row.try_get("topic")?,
        partition_key: row.try_get("partition_key")?,
        payload: row.try_get("payload")?,
        attempts: row.try_get::<i32, _>("attempts")?.max(0) as u32,
        last_error: row.try_get("last_error")?,
        parked_at: row.try_get::<DateTime<Utc>, _>("parked_at")?,
    })
}

#[async_trait::async_trait]
impl UndeliveredSink for PostgresUndeliveredLog {
    async fn park(&self, event: UndeliveredEvent) -> Result<(), String> {
        sqlx::query(
            r#"
            INSERT INTO undelivered_events (
                event_id, event_type, topic, partition_key, payload, attempts, last_error, parked_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (event_id)
            DO UPDATE SET
                attempts = EXCLUDED.attempts,
                last_error = EXCLUDED.last_error,
                parked_at = EXCLUDED.parked_at
            "#,
        )
        .bind(event.event_id.as_uuid())
        .bind(&event.event_type)
        .bind(&event.topic)
        .bind(&event.partition_key)
        .bind(&event.payload)
        .bind(i32::try_from(event.attempts).unwrap_or(i32::MAX))
        .bind(&event.last_error)
        .bind(event.parked_at)
        .execute(&self.pool)
        .await
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<UndeliveredEvent>, String> {
        let rows = sqlx::query(&format!("SELECT {COLUMNS} FROM undelivered_events ORDER BY parked_at"))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| e.to_string())?;
        rows.iter().map(from_row).collect::<Result<_, _>>().map_err(|e| e.to_string())
    }

    async fn remove(&self, event_id: EventId) -> Result<bool, String> {
        let result = sqlx::query("DELETE FROM undelivered_events WHERE event_id = $1")
            .bind(event_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| e.to_string())?;
        Ok(result.rows_affected() == 1)
    }
}
