//! SQLite storage for the transactional outbox.
//!
//! This crate provides:
//! - Connection pool with WAL mode
//! - Outbox table migrations (one table per event family)
//! - Row models and status values
//! - Leased claims and lease-guarded saves
//! - Query helpers for inserting and counting events
//!
//! # Claiming
//!
//! ```ignore
//! let pool = DatabasePool::open(path, PoolConfig::default())?;
//! let leased_until = now + chrono::Duration::minutes(5);
//! let batch = pool.claim_batch(OutboxTable::Profile, now, 100, 10, leased_until)?;
//! for mut event in batch {
//!     // ... publish, mutate ...
//!     pool.save_claimed(OutboxTable::Profile, &event, leased_until)?;
//! }
//! ```
//!
//! SQLite has no row locks. A claim runs in a short `BEGIN IMMEDIATE`
//! transaction that selects the due rows and moves their `available_at` to
//! the end of the lease, so no other claimer (thread or process) selects
//! them until the lease runs out. The write lock is released before any
//! event is published; producers only ever wait for the claim itself.

mod error;
mod migrations;
mod models;
mod pool;
pub mod queries;
mod transaction;

pub use error::{DatabaseError, DatabaseResult};
pub use migrations::run_migrations;
pub use models::*;
pub use pool::{DatabasePool, PoolConfig};
pub(crate) use transaction::ClaimTransaction;
