//! Claim transactions.

use crate::DatabaseResult;
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use tracing::warn;

/// A write transaction that owns its pooled connection.
///
/// Opened with `BEGIN IMMEDIATE`, so the database write lock is held from
/// the claim until `commit`. Dropping an uncommitted transaction rolls it
/// back. Keep it short: producers inserting into the outbox wait on the
/// same lock.
pub(crate) struct ClaimTransaction {
    conn: PooledConnection<SqliteConnectionManager>,
    finished: bool,
}

impl ClaimTransaction {
    pub(crate) fn begin(conn: PooledConnection<SqliteConnectionManager>) -> DatabaseResult<Self> {
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Self {
            conn,
            finished: false,
        })
    }

    /// Connection to run queries on inside the transaction.
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Commit. On failure the transaction is rolled back when dropped.
    pub(crate) fn commit(mut self) -> DatabaseResult<()> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for ClaimTransaction {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.conn.execute_batch("ROLLBACK") {
            warn!(error = %e, "Failed to roll back claim transaction");
        }
    }
}
