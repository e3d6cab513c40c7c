//! Durable, at-least-once work queue backed by Postgres (§4.1, §6.5).
//!
//! A plain table rather than a broker: `dequeue` leases a row with
//! `SELECT ... FOR UPDATE SKIP LOCKED`, which gives the same "one consumer
//! per row" guarantee a broker would, without introducing a second moving
//! part into the stack.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};

use weather_common::WeatherError;

pub type QueueResult<T> = Result<T, WeatherError>;

/// An opaque token proving the holder leased a particular queue row; passed
/// back to `ack`/`nack`/`reschedule`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckToken(i64);

#[derive(Debug, Clone, FromRow)]
struct QueueRow {
    id: i64,
    payload: serde_json::Value,
}

/// A leased task and the token needed to resolve it.
pub struct Lease<T> {
    pub task: T,
    pub ack_token: AckToken,
}

#[derive(Clone)]
pub struct Queue {
    pool: PgPool,
    lease_timeout: chrono::Duration,
}

impl Queue {
    pub async fn connect(database_url: &str) -> QueueResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| WeatherError::Queue(format!("connection failed: {e}")))?;
        Ok(Self {
            pool,
            lease_timeout: chrono::Duration::minutes(10),
        })
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self {
            pool,
            lease_timeout: chrono::Duration::minutes(10),
        }
    }

    pub fn with_lease_timeout(mut self, timeout: chrono::Duration) -> Self {
        self.lease_timeout = timeout;
        self
    }

    pub async fn migrate(&self) -> QueueResult<()> {
        sqlx::query(SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .map_err(|e| WeatherError::Queue(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Deliver no earlier than `schedule_at`; at-least-once.
    pub async fn enqueue<T: Serialize>(&self, task: &T, schedule_at: DateTime<Utc>) -> QueueResult<()> {
        let payload = serde_json::to_value(task)
            .map_err(|e| WeatherError::Queue(format!("serialize failed: {e}")))?;
        sqlx::query(
            "INSERT INTO work_queue (enqueued_at, schedule_at, payload, state) \
             VALUES ($1, $2, $3, 'queued')",
        )
        .bind(Utc::now())
        .bind(schedule_at)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(|e| WeatherError::Queue(format!("enqueue failed: {e}")))?;
        Ok(())
    }

    /// Lease the next deliverable task (`schedule_at <= now`, `state in
    /// ('queued', 'leased' with an expired lease)`), or `None` if the queue
    /// is empty. `SKIP LOCKED` means concurrent workers never contend for
    /// the same row.
    pub async fn dequeue<T: DeserializeOwned>(&self) -> QueueResult<Option<Lease<T>>> {
        let now = Utc::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| WeatherError::Queue(format!("begin tx failed: {e}")))?;

        let row = sqlx::query_as::<_, QueueRow>(
            "SELECT id, payload FROM work_queue \
             WHERE schedule_at <= $1 \
               AND (state = 'queued' OR (state = 'leased' AND lease_expires_at < $1)) \
             ORDER BY schedule_at ASC \
             LIMIT 1 \
             FOR UPDATE SKIP LOCKED",
        )
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| WeatherError::Queue(format!("query failed: {e}")))?;

        let Some(row) = row else {
            tx.commit().await.ok();
            return Ok(None);
        };

        sqlx::query("UPDATE work_queue SET state = 'leased', lease_expires_at = $1 WHERE id = $2")
            .bind(now + self.lease_timeout)
            .bind(row.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| WeatherError::Queue(format!("lease update failed: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| WeatherError::Queue(format!("commit failed: {e}")))?;

        let task: T = serde_json::from_value(row.payload)
            .map_err(|e| WeatherError::Queue(format!("deserialize failed: {e}")))?;

        Ok(Some(Lease {
            task,
            ack_token: AckToken(row.id),
        }))
    }

    /// Acknowledge successful (or terminally-dropped) processing; removes
    /// the row.
    pub async fn ack(&self, token: AckToken) -> QueueResult<()> {
        sqlx::query("DELETE FROM work_queue WHERE id = $1")
            .bind(token.0)
            .execute(&self.pool)
            .await
            .map_err(|e| WeatherError::Queue(format!("ack failed: {e}")))?;
        Ok(())
    }

    /// Re-enqueue with a backoff delay after a transient failure (§4.1,
    /// §7 TransientNetwork/NotYetPublished).
    pub async fn reschedule(&self, token: AckToken, delay: chrono::Duration) -> QueueResult<()> {
        sqlx::query(
            "UPDATE work_queue SET state = 'queued', schedule_at = $1, lease_expires_at = NULL WHERE id = $2",
        )
        .bind(Utc::now() + delay)
        .bind(token.0)
        .execute(&self.pool)
        .await
        .map_err(|e| WeatherError::Queue(format!("reschedule failed: {e}")))?;
        Ok(())
    }

    pub async fn queue_depth(&self) -> QueueResult<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM work_queue")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| WeatherError::Queue(format!("query failed: {e}")))
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS work_queue (
    id BIGSERIAL PRIMARY KEY,
    enqueued_at TIMESTAMPTZ NOT NULL,
    schedule_at TIMESTAMPTZ NOT NULL,
    payload JSONB NOT NULL,
    state VARCHAR(20) NOT NULL DEFAULT 'queued',
    lease_expires_at TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS idx_work_queue_dispatch ON work_queue(schedule_at, state);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_token_equality() {
        assert_eq!(AckToken(1), AckToken(1));
        assert_ne!(AckToken(1), AckToken(2));
    }
}
