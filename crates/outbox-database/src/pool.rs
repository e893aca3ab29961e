//! Connection pool for concurrent database access.
//!
//! Thread-safe pool built on r2d2 with SQLite in WAL mode. Readers run
//! concurrently; claims serialize on the write lock only while they select
//! and lease.

use crate::{
    migrations, queries, ClaimTransaction, DatabaseError, DatabaseResult, NewOutboxEvent,
    OutboxEvent, OutboxStats, OutboxTable,
};
use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// How long a connection waits on a locked database before failing.
pub const BUSY_TIMEOUT_MS: u64 = 5_000;

/// Configuration for the database pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum connections in the pool.
    pub max_size: u32,
    /// Minimum idle connections to maintain.
    pub min_idle: Option<u32>,
    /// Connection acquisition timeout.
    pub connection_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 4,
            min_idle: Some(1),
            connection_timeout: Duration::from_secs(30),
        }
    }
}

/// Thread-safe outbox database pool.
pub struct DatabasePool {
    pool: Pool<SqliteConnectionManager>,
    path: String,
}

impl DatabasePool {
    /// Open (or create) the outbox database at `path`.
    ///
    /// Creates the parent directory and the file if needed, enables WAL and
    /// a busy timeout on every connection, and runs pending migrations.
    pub fn open(path: &Path, config: PoolConfig) -> DatabaseResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let path_str = path.to_string_lossy().to_string();

        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(&format!(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA temp_store = MEMORY;
                PRAGMA busy_timeout = {BUSY_TIMEOUT_MS};
                "
            ))?;
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(config.max_size)
            .min_idle(config.min_idle)
            .connection_timeout(config.connection_timeout)
            .build(manager)
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;

        info!(
            path = %path_str,
            max_size = config.max_size,
            "Outbox database pool created"
        );

        {
            let conn = pool
                .get()
                .map_err(|e| DatabaseError::Connection(e.to_string()))?;
            migrations::run_migrations(&conn)?;
        }

        Ok(Self {
            pool,
            path: path_str,
        })
    }

    /// Get a connection from the pool.
    ///
    /// Blocks until a connection is available or the timeout is reached.
    pub fn get(&self) -> DatabaseResult<PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| DatabaseError::Connection(e.to_string()))
    }

    /// Start a claim transaction on a dedicated connection.
    ///
    /// Blocks for up to the busy timeout while another writer holds the
    /// write lock.
    fn begin_claim(&self) -> DatabaseResult<ClaimTransaction> {
        ClaimTransaction::begin(self.get()?)
    }

    /// Claim and lease up to `batch_size` due events in one short write
    /// transaction. See [`queries::claim_batch`].
    pub fn claim_batch(
        &self,
        table: OutboxTable,
        now: DateTime<Utc>,
        batch_size: i64,
        max_attempts: i64,
        leased_until: DateTime<Utc>,
    ) -> DatabaseResult<Vec<OutboxEvent>> {
        let tx = self.begin_claim()?;
        let events = queries::claim_batch(
            tx.connection(),
            table,
            now,
            batch_size,
            max_attempts,
            leased_until,
        )?;
        tx.commit()?;
        Ok(events)
    }

    /// Store the outcome of a claimed event if its lease still holds.
    /// See [`queries::save_outbox_event`].
    pub fn save_claimed(
        &self,
        table: OutboxTable,
        event: &OutboxEvent,
        leased_until: DateTime<Utc>,
    ) -> DatabaseResult<bool> {
        let conn = self.get()?;
        queries::save_outbox_event(&conn, table, event, leased_until)
    }

    /// Insert a producer event outside of any claim.
    pub fn insert_event(
        &self,
        table: OutboxTable,
        event: &NewOutboxEvent,
        now: DateTime<Utc>,
    ) -> DatabaseResult<OutboxEvent> {
        let conn = self.get()?;
        queries::insert_outbox_event(&conn, table, event, now)
    }

    pub fn get_event(&self, table: OutboxTable, id: &str) -> DatabaseResult<Option<OutboxEvent>> {
        let conn = self.get()?;
        queries::get_outbox_event(&conn, table, id)
    }

    pub fn stats(&self, table: OutboxTable, max_attempts: i64) -> DatabaseResult<OutboxStats> {
        let conn = self.get()?;
        queries::outbox_stats(&conn, table, max_attempts)
    }

    /// Get the database path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Acquire and release a connection.
    pub fn health_check(&self) -> DatabaseResult<()> {
        let conn = self.get()?;
        conn.execute_batch("SELECT 1")?;
        debug!("Outbox database health check passed");
        Ok(())
    }
}
