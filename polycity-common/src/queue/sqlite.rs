//! SQLite-backed stage queues
//!
//! All queues share the `stage_queue` table. A pull is a single
//! `UPDATE .. RETURNING` that selects the oldest visible row of one queue
//! and stamps its lease, so two processes can never lease the same row.

use super::{encode, Delivery, StageQueue};
use crate::db::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use crate::models::{Stage, WorkItem};
use crate::time::now_millis;
use crate::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::time::Duration;
use tracing::debug;

#[derive(Clone)]
pub struct SqliteQueue {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl SqliteQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }
}

#[async_trait]
impl StageQueue for SqliteQueue {
    async fn push(&self, stage: Stage, item: &WorkItem) -> Result<i64> {
        let payload = encode(item)?;
        let payload = payload.as_str();
        let queue = stage.queue_name();

        let id = retry_on_lock("queue_push", self.max_lock_wait_ms, move || async move {
            let id: i64 = sqlx::query_scalar(
                "INSERT INTO stage_queue (queue, payload, enqueued_at) VALUES (?, ?, ?) RETURNING id",
            )
            .bind(queue)
            .bind(payload)
            .bind(now_millis())
            .fetch_one(&self.pool)
            .await?;
            Ok(id)
        })
        .await?;

        debug!(queue, delivery_id = id, item_id = %item.id, "Pushed payload");
        Ok(id)
    }

    async fn pull(&self, stage: Stage, lease: Duration) -> Result<Option<Delivery>> {
        let queue = stage.queue_name();
        let lease_ms = lease.as_millis() as i64;

        retry_on_lock("queue_pull", self.max_lock_wait_ms, move || async move {
            let now = now_millis();
            let row = sqlx::query(
                r#"
                UPDATE stage_queue
                SET leased_until = ?, attempts = attempts + 1
                WHERE id = (
                    SELECT id FROM stage_queue
                    WHERE queue = ? AND (leased_until IS NULL OR leased_until <= ?)
                    ORDER BY id
                    LIMIT 1
                )
                RETURNING id, payload, attempts
                "#,
            )
            .bind(now + lease_ms)
            .bind(queue)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

            Ok(row.map(|row| Delivery {
                id: row.get::<i64, _>("id"),
                attempts: row.get::<i64, _>("attempts").max(0) as u32,
                payload: row.get::<String, _>("payload"),
            }))
        })
        .await
    }

    async fn ack(&self, delivery_id: i64) -> Result<()> {
        retry_on_lock("queue_ack", self.max_lock_wait_ms, move || async move {
            sqlx::query("DELETE FROM stage_queue WHERE id = ?")
                .bind(delivery_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }

    async fn release(&self, delivery_id: i64) -> Result<()> {
        retry_on_lock("queue_release", self.max_lock_wait_ms, move || async move {
            sqlx::query("UPDATE stage_queue SET leased_until = NULL WHERE id = ?")
                .bind(delivery_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }

    async fn len(&self, stage: Stage) -> Result<u64> {
        let queue = stage.queue_name();
        retry_on_lock("queue_len", self.max_lock_wait_ms, move || async move {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stage_queue WHERE queue = ?")
                .bind(queue)
                .fetch_one(&self.pool)
                .await?;
            Ok(count as u64)
        })
        .await
    }

    async fn recover_abandoned(&self) -> Result<u64> {
        retry_on_lock("queue_recover", self.max_lock_wait_ms, move || async move {
            let result = sqlx::query(
                "UPDATE stage_queue SET leased_until = NULL WHERE leased_until IS NOT NULL",
            )
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await
    }
}
