use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use duckdb::Connection;
use tokio::sync::Mutex;
use tracing::info;

use menulytics_core::event::Event;

use crate::schema::{init_sql, MIGRATIONS_TABLE_SQL};

/// Schema version recorded in `_migrations` on open.
const SCHEMA_VERSION: &str = "001_analytics_events";

/// Timestamp layout used for every TIMESTAMP parameter (UTC, microseconds).
pub(crate) const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

pub(crate) fn ts_param(ts: &DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

/// A DuckDB backend for menu analytics.
///
/// DuckDB is single-writer, so the connection sits behind
/// `Arc<tokio::sync::Mutex<_>>`: every query and write is serialized while
/// the struct stays cheap to share across handlers.
pub struct DuckDbBackend {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl DuckDbBackend {
    /// Open (or create) a DuckDB database file at `path`.
    ///
    /// `memory_limit` is a DuckDB size string such as `"1GB"` or `"512MB"`.
    pub fn open(path: &str, memory_limit: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(&conn, memory_limit)?;
        info!(
            "DuckDB opened at {} with memory_limit={}, threads=2",
            path, memory_limit
        );
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an **in-memory** DuckDB database. Data is discarded on drop.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn, "1GB")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init(conn: &Connection, memory_limit: &str) -> Result<()> {
        conn.execute_batch(MIGRATIONS_TABLE_SQL)?;
        conn.execute_batch(&init_sql(memory_limit))?;
        conn.execute(
            "INSERT OR IGNORE INTO _migrations (id) VALUES (?1)",
            duckdb::params![SCHEMA_VERSION],
        )?;
        Ok(())
    }

    /// Insert a batch of events in a single transaction.
    ///
    /// Rows whose `id` already exists are skipped, so re-sending a batch
    /// (e.g. an offline queue flushed twice) stores each event once.
    /// Any other failure rolls back the whole batch.
    ///
    /// Returns the number of rows actually written.
    pub async fn insert_events(&self, events: &[Event]) -> Result<usize> {
        if events.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let mut written = 0usize;
        for event in events {
            written += tx.execute(
                r#"INSERT OR IGNORE INTO analytics_events (
                    id, location_id, event_type, session_id,
                    device_type, browser, os, screen_size, language, referrer, page_url,
                    metadata, created_at
                ) VALUES (
                    ?1,  ?2,  ?3,  ?4,
                    ?5,  ?6,  ?7,  ?8,  ?9,  ?10, ?11,
                    ?12, ?13
                )"#,
                duckdb::params![
                    event.id,
                    event.location_id,
                    event.event_type.as_str(),
                    event.session_id,
                    event.device_type.as_str(),
                    event.browser,
                    event.os,
                    event.screen_size,
                    event.language,
                    event.referrer,
                    event.page_url,
                    event.metadata.to_string(),
                    ts_param(&event.created_at),
                ],
            )?;
        }

        tx.commit()?;
        info!(
            received = events.len(),
            written, "Inserted analytics events into DuckDB"
        );
        Ok(written)
    }

    /// Execute `SELECT 1` as a lightweight liveness check.
    pub async fn ping(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch("SELECT 1")?;
        Ok(())
    }

    /// Acquire the DuckDB connection lock for direct queries.
    ///
    /// Intended for integration tests that need to verify stored data.
    /// Production code should use the typed methods above.
    pub async fn conn_for_test(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}
