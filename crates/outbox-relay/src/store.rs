//! Outbox store contract and its SQLite implementation.

use crate::error::RelayResult;
use chrono::{DateTime, Utc};
use outbox_database::{DatabasePool, OutboxEvent, OutboxTable};
use std::sync::Arc;

/// Claims and saves events of one outbox table.
///
/// A claim leases the selected rows: until `leased_until` no other claimer
/// can select them. Nothing is held open between the claim and the saves,
/// so publishing never blocks writers of the outbox. If the relay stops
/// before saving, the rows become claimable again once the lease runs out.
pub trait OutboxStore: Send + Sync {
    /// Up to `batch_size` events that are `PENDING` or `ERROR`, due at `now`
    /// and below `max_attempts`, oldest-due first. The returned events carry
    /// `available_at == leased_until`.
    fn claim_batch(
        &self,
        now: DateTime<Utc>,
        batch_size: i64,
        max_attempts: i64,
        leased_until: DateTime<Utc>,
    ) -> RelayResult<Vec<OutboxEvent>>;

    /// Persist a claimed event's outcome. `Ok(false)` when the lease was
    /// lost to another claimer and nothing was written.
    fn save(&self, event: &OutboxEvent, leased_until: DateTime<Utc>) -> RelayResult<bool>;
}

/// Store backed by the SQLite outbox database.
#[derive(Clone)]
pub struct SqliteOutboxStore {
    pool: Arc<DatabasePool>,
    table: OutboxTable,
}

impl SqliteOutboxStore {
    pub fn new(pool: Arc<DatabasePool>, table: OutboxTable) -> Self {
        Self { pool, table }
    }
}

impl OutboxStore for SqliteOutboxStore {
    fn claim_batch(
        &self,
        now: DateTime<Utc>,
        batch_size: i64,
        max_attempts: i64,
        leased_until: DateTime<Utc>,
    ) -> RelayResult<Vec<OutboxEvent>> {
        Ok(self
            .pool
            .claim_batch(self.table, now, batch_size, max_attempts, leased_until)?)
    }

    fn save(&self, event: &OutboxEvent, leased_until: DateTime<Utc>) -> RelayResult<bool> {
        Ok(self.pool.save_claimed(self.table, event, leased_until)?)
    }
}
