//! EvidenceStore - per-run persistence of queries and page summaries
//!
//! Backed by SQLite through a `sqlx` pool. The pool is the only shared
//! handle: pipeline workers clone the store and call [`EvidenceStore::put_evidence`]
//! concurrently; SQLite serializes the writes and every call commits before
//! returning, so a crash mid-run loses at most the in-flight row.
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE queries (
//!     id           INTEGER PRIMARY KEY AUTOINCREMENT,
//!     query        TEXT NOT NULL,
//!     checklist    TEXT NOT NULL,
//!     submitted_at TEXT NOT NULL
//! );
//! CREATE TABLE evidence (
//!     id           INTEGER PRIMARY KEY AUTOINCREMENT,
//!     query_id     INTEGER NOT NULL REFERENCES queries(id),
//!     url          TEXT NOT NULL,
//!     summary      TEXT NOT NULL,
//!     collected_at TEXT NOT NULL,
//!     source       TEXT NOT NULL,
//!     UNIQUE(query_id, url)
//! );
//! ```
//!
//! Evidence is always scoped by the owning [`QueryId`], so history left over
//! from an earlier run can never leak into the latest report.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use shared_types::{EvidenceRow, NewEvidence, QueryId, QueryRecord};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

const FILE_POOL_CONNECTIONS: u32 = 4;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that can occur in the evidence store
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Database(String),

    #[error("failed to prepare data directory {path}: {message}")]
    Io { path: String, message: String },

    #[error("no query found in store")]
    NoQuery,

    #[error("no evidence recorded for query {0}")]
    NoEvidence(QueryId),
}

impl StoreError {
    /// True for the "nothing to read yet" outcomes, as opposed to a failed read or write.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NoQuery | Self::NoEvidence(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Cloneable handle to the evidence database
#[derive(Debug, Clone)]
pub struct EvidenceStore {
    pool: SqlitePool,
}

impl EvidenceStore {
    /// Open (creating if needed) a file-backed store.
    pub async fn open(database_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = database_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StoreError::Io {
                        path: parent.display().to_string(),
                        message: e.to_string(),
                    })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(FILE_POOL_CONNECTIONS)
            .connect_with(options)
            .await?;

        tracing::info!(database_path = %database_path.display(), "Opened evidence store");
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Open a private in-memory store (for testing).
    ///
    /// The pool is pinned to one never-recycled connection; a second
    /// connection would see a different, empty database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queries (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                query        TEXT NOT NULL,
                checklist    TEXT NOT NULL,
                submitted_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS evidence (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                query_id     INTEGER NOT NULL REFERENCES queries(id),
                url          TEXT NOT NULL,
                summary      TEXT NOT NULL,
                collected_at TEXT NOT NULL,
                source       TEXT NOT NULL,
                UNIQUE(query_id, url)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_evidence_query_id ON evidence(query_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Destroy every query and evidence row, then recreate the empty schema.
    ///
    /// Irreversible. Called at the start of a fresh run.
    pub async fn reset(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DROP TABLE IF EXISTS evidence")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DROP TABLE IF EXISTS queries")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        self.migrate().await?;
        tracing::info!("Evidence store reset");
        Ok(())
    }

    /// Insert a new query record and return its id.
    pub async fn put_query(&self, query: &str, checklist: &str) -> Result<QueryId, StoreError> {
        let submitted_at = Utc::now();
        let result =
            sqlx::query("INSERT INTO queries (query, checklist, submitted_at) VALUES (?, ?, ?)")
                .bind(query)
                .bind(checklist)
                .bind(submitted_at)
                .execute(&self.pool)
                .await?;

        let id = QueryId(result.last_insert_rowid());
        tracing::info!(query_id = %id, "Stored query record");
        Ok(id)
    }

    /// Insert or replace the evidence row for `(query_id, url)`.
    ///
    /// Safe to call from many tasks at once; commits before returning.
    pub async fn put_evidence(
        &self,
        query_id: QueryId,
        evidence: &NewEvidence,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO evidence (query_id, url, summary, collected_at, source)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(query_id, url) DO UPDATE SET
                summary = excluded.summary,
                collected_at = excluded.collected_at,
                source = excluded.source
            "#,
        )
        .bind(query_id.get())
        .bind(&evidence.url)
        .bind(&evidence.summary)
        .bind(evidence.collected_at)
        .bind(&evidence.source)
        .execute(&self.pool)
        .await?;

        tracing::debug!(query_id = %query_id, url = %evidence.url, "Stored evidence");
        Ok(())
    }

    /// The most recently submitted query record.
    pub async fn latest_query(&self) -> Result<QueryRecord, StoreError> {
        let row: Option<(i64, String, String, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT id, query, checklist, submitted_at
            FROM queries
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        let (id, query, checklist, submitted_at) = row.ok_or(StoreError::NoQuery)?;
        Ok(QueryRecord {
            id: QueryId(id),
            query,
            checklist,
            submitted_at,
        })
    }

    /// Evidence rows of the latest query, in insertion order.
    ///
    /// Fails with [`StoreError::NoQuery`] when no query exists and with
    /// [`StoreError::NoEvidence`] when the query has no rows yet.
    pub async fn all_evidence(&self) -> Result<Vec<EvidenceRow>, StoreError> {
        let latest = self.latest_query().await?;
        self.evidence_for(latest.id).await
    }

    /// Evidence rows of a specific query, in insertion order.
    pub async fn evidence_for(&self, query_id: QueryId) -> Result<Vec<EvidenceRow>, StoreError> {
        let rows: Vec<(String, String, DateTime<Utc>, String)> = sqlx::query_as(
            r#"
            SELECT url, summary, collected_at, source
            FROM evidence
            WHERE query_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(query_id.get())
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Err(StoreError::NoEvidence(query_id));
        }

        Ok(rows
            .into_iter()
            .map(|(url, summary, collected_at, source)| EvidenceRow {
                query_id,
                url,
                summary,
                collected_at,
                source,
            })
            .collect())
    }

    pub async fn evidence_count(&self, query_id: QueryId) -> Result<usize, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM evidence WHERE query_id = ?")
            .bind(query_id.get())
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as usize)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
