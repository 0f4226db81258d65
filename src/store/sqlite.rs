//! SQLite-backed store client
//!
//! Each downstream entity lives in its own table:
//!
//! ```sql
//! CREATE TABLE <table> (
//!     id TEXT PRIMARY KEY,
//!     record_date TEXT,          -- YYYY-MM-DD, NULL for undated reference data
//!     payload TEXT NOT NULL,     -- JSON object of normalized fields
//!     updated_at TEXT NOT NULL
//! )
//! ```
//!
//! Tables are created on first write. Upserts run in one transaction per batch.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use super::{validate_table_name, CountFilter, StoreClient, StoreError, UpsertCounts};
use crate::NormalizedRecord;

/// Store client writing to a SQLite database through `sqlx`.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Database(e.to_string()))?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        info!(path = %path.display(), "Opened SQLite store");
        Ok(Self { pool })
    }

    /// Private in-memory database (single connection, so every query sees it).
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Raw JSON payload of one row.
    pub async fn payload(&self, table: &str, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        validate_table_name(table)?;
        if !self.table_exists(table).await? {
            return Ok(None);
        }
        let sql = format!("SELECT payload FROM {table} WHERE id = ?");
        let payload: Option<String> = sqlx::query_scalar(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(|e| StoreError::Serialization(e.to_string())))
            .transpose()
    }

    async fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        let found: i64 = sqlx::query_scalar(
            r#"
SELECT COUNT(*)
FROM sqlite_master
WHERE type = 'table' AND name = ?
            "#,
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;
        Ok(found > 0)
    }
}

async fn ensure_table(conn: &mut SqliteConnection, table: &str) -> Result<(), StoreError> {
    let create = format!(
        r#"
CREATE TABLE IF NOT EXISTS {table} (
    id TEXT PRIMARY KEY,
    record_date TEXT,
    payload TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
        "#
    );
    sqlx::query(&create).execute(&mut *conn).await?;
    let index = format!("CREATE INDEX IF NOT EXISTS {table}_record_date_idx ON {table} (record_date)");
    sqlx::query(&index).execute(&mut *conn).await?;
    Ok(())
}

#[async_trait]
impl StoreClient for SqliteStore {
    async fn upsert_batch(
        &self,
        table: &str,
        records: &[NormalizedRecord],
    ) -> Result<UpsertCounts, StoreError> {
        validate_table_name(table)?;
        let mut counts = UpsertCounts::default();
        if records.is_empty() {
            return Ok(counts);
        }

        let exists_sql = format!("SELECT 1 FROM {table} WHERE id = ?");
        let upsert_sql = format!(
            r#"
INSERT INTO {table} (id, record_date, payload, updated_at)
VALUES (?, ?, ?, ?)
ON CONFLICT(id) DO UPDATE SET
    record_date = excluded.record_date,
    payload = excluded.payload,
    updated_at = excluded.updated_at
            "#
        );
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;
        ensure_table(&mut tx, table).await?;

        for record in records {
            let payload = serde_json::to_string(&record.fields)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            let existing: Option<i64> = sqlx::query_scalar(&exists_sql)
                .bind(&record.key)
                .fetch_optional(&mut *tx)
                .await?;

            sqlx::query(&upsert_sql)
                .bind(&record.key)
                .bind(record.record_date)
                .bind(payload)
                .bind(now)
                .execute(&mut *tx)
                .await?;

            if existing.is_some() {
                counts.updated += 1;
            } else {
                counts.inserted += 1;
            }
        }

        tx.commit().await?;
        debug!(
            table,
            inserted = counts.inserted,
            updated = counts.updated,
            "Upserted batch"
        );
        Ok(counts)
    }

    async fn count(&self, table: &str, filter: &CountFilter) -> Result<u64, StoreError> {
        validate_table_name(table)?;
        if !self.table_exists(table).await? {
            return Ok(0);
        }

        let count: i64 = match filter {
            CountFilter::All => {
                let sql = format!("SELECT COUNT(*) FROM {table}");
                sqlx::query_scalar(&sql).fetch_one(&self.pool).await?
            }
            CountFilter::DateRange { from, to_exclusive } => {
                let sql = format!(
                    "SELECT COUNT(*) FROM {table} WHERE record_date >= ? AND record_date < ?"
                );
                sqlx::query_scalar(&sql)
                    .bind(*from)
                    .bind(*to_exclusive)
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count.max(0) as u64)
    }
}
