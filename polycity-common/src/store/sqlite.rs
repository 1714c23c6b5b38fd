//! SQLite-backed coordination store
//!
//! Hashes, lists and sets live in three tables of the shared coordination
//! database. Each primitive is a single SQL statement (or one short
//! transaction for `del`), so concurrent worker processes observe the same
//! atomicity a networked key-value store would give them.

use super::CoordinationStore;
use crate::db::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use crate::{Error, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;

/// Coordination store on a shared SQLite file
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }

    /// Open (or create) the store file and ensure the schema exists
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = crate::db::init_database(path).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl CoordinationStore for SqliteStore {
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        retry_on_lock("hset", self.max_lock_wait_ms, move || async move {
            sqlx::query(
                r#"
                INSERT INTO kv_hashes (key, field, value) VALUES (?, ?, ?)
                ON CONFLICT(key, field) DO UPDATE SET value = excluded.value
                "#,
            )
            .bind(key)
            .bind(field)
            .bind(value)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn hset_nx(&self, key: &str, field: &str, value: &str) -> Result<bool> {
        retry_on_lock("hset_nx", self.max_lock_wait_ms, move || async move {
            let result =
                sqlx::query("INSERT OR IGNORE INTO kv_hashes (key, field, value) VALUES (?, ?, ?)")
                    .bind(key)
                    .bind(field)
                    .bind(value)
                    .execute(&self.pool)
                    .await?;
            Ok(result.rows_affected() == 1)
        })
        .await
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        retry_on_lock("hget", self.max_lock_wait_ms, move || async move {
            let value: Option<String> =
                sqlx::query_scalar("SELECT value FROM kv_hashes WHERE key = ? AND field = ?")
                    .bind(key)
                    .bind(field)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(value)
        })
        .await
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        retry_on_lock("hgetall", self.max_lock_wait_ms, move || async move {
            let rows = sqlx::query("SELECT field, value FROM kv_hashes WHERE key = ?")
                .bind(key)
                .fetch_all(&self.pool)
                .await?;
            Ok(rows
                .into_iter()
                .map(|row| (row.get::<String, _>("field"), row.get::<String, _>("value")))
                .collect())
        })
        .await
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        retry_on_lock("hincrby", self.max_lock_wait_ms, move || async move {
            // The WHERE guard leaves a non-integer value untouched and
            // suppresses the RETURNING row
            let value: Option<String> = sqlx::query_scalar(
                r#"
                INSERT INTO kv_hashes (key, field, value) VALUES (?, ?, CAST(? AS TEXT))
                ON CONFLICT(key, field) DO UPDATE
                    SET value = CAST(CAST(kv_hashes.value AS INTEGER) + CAST(excluded.value AS INTEGER) AS TEXT)
                    WHERE CAST(CAST(kv_hashes.value AS INTEGER) AS TEXT) = kv_hashes.value
                RETURNING value
                "#,
            )
            .bind(key)
            .bind(field)
            .bind(delta)
            .fetch_optional(&self.pool)
            .await?;

            let value = value.ok_or_else(|| {
                Error::Internal(format!("hash field {}/{} is not an integer", key, field))
            })?;
            value.trim().parse::<i64>().map_err(|e| {
                Error::Internal(format!("hash field {}/{} is not an integer: {}", key, field, e))
            })
        })
        .await
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<u64> {
        retry_on_lock("rpush", self.max_lock_wait_ms, move || async move {
            let mut tx = self.pool.begin().await?;
            sqlx::query("INSERT INTO kv_lists (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
            let len: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM kv_lists WHERE key = ?")
                .bind(key)
                .fetch_one(&mut *tx)
                .await?;
            tx.commit().await?;
            Ok(len as u64)
        })
        .await
    }

    async fn lrange_all(&self, key: &str) -> Result<Vec<String>> {
        retry_on_lock("lrange_all", self.max_lock_wait_ms, move || async move {
            let values: Vec<String> =
                sqlx::query_scalar("SELECT value FROM kv_lists WHERE key = ? ORDER BY seq")
                    .bind(key)
                    .fetch_all(&self.pool)
                    .await?;
            Ok(values)
        })
        .await
    }

    async fn lrem(&self, key: &str, value: &str) -> Result<u64> {
        retry_on_lock("lrem", self.max_lock_wait_ms, move || async move {
            let result = sqlx::query("DELETE FROM kv_lists WHERE key = ? AND value = ?")
                .bind(key)
                .bind(value)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        })
        .await
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool> {
        retry_on_lock("sadd", self.max_lock_wait_ms, move || async move {
            let result = sqlx::query("INSERT OR IGNORE INTO kv_sets (key, member) VALUES (?, ?)")
                .bind(key)
                .bind(member)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected() == 1)
        })
        .await
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        retry_on_lock("sismember", self.max_lock_wait_ms, move || async move {
            let count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM kv_sets WHERE key = ? AND member = ?")
                    .bind(key)
                    .bind(member)
                    .fetch_one(&self.pool)
                    .await?;
            Ok(count > 0)
        })
        .await
    }

    async fn scard(&self, key: &str) -> Result<u64> {
        retry_on_lock("scard", self.max_lock_wait_ms, move || async move {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM kv_sets WHERE key = ?")
                .bind(key)
                .fetch_one(&self.pool)
                .await?;
            Ok(count as u64)
        })
        .await
    }

    async fn del(&self, key: &str) -> Result<bool> {
        retry_on_lock("del", self.max_lock_wait_ms, move || async move {
            let mut tx = self.pool.begin().await?;
            let mut removed = 0u64;
            for sql in [
                "DELETE FROM kv_hashes WHERE key = ?",
                "DELETE FROM kv_lists WHERE key = ?",
                "DELETE FROM kv_sets WHERE key = ?",
            ] {
                removed += sqlx::query(sql)
                    .bind(key)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
            }
            tx.commit().await?;
            Ok(removed > 0)
        })
        .await
    }
}
