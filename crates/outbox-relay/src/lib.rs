//! Outbox relay: at-least-once delivery of outbox rows to a broker.
//!
//! Producers write events into an outbox table inside their own database
//! transactions. The relay periodically claims due rows, publishes them and
//! records the outcome, so a crash or broker outage never loses an event.
//!
//! # Core Invariants
//!
//! 1. **No double-claim**: a claimed row is leased to its relay until it is saved or the lease runs out
//! 2. **At-least-once**: an event is marked `SENT` only after a successful publish
//! 3. **Bounded retries**: failures back off linearly (capped at 10x) until `max_attempts`
//! 4. **Isolated failures**: one bad event never stops the rest of its batch
//!
//! # Architecture
//!
//! ```text
//! outbox table -> claim + lease -> route -> publish -> save (per event)
//!       ^                                                   |
//!       |_________ next tick after poll_interval __________|
//! ```

pub mod backoff;
pub mod error;
pub mod publisher;
pub mod relay;
pub mod routing;
pub mod store;

#[cfg(test)]
mod tests;

pub use backoff::BackoffPolicy;
pub use error::{RelayError, RelayResult};
pub use publisher::{BrokerPublisher, PublishError, RedisStreamPublisher};
pub use relay::{DispatchError, OutboxRelay, RelaySettings, TickReport};
pub use routing::{EventFamily, FamilyDescriptor, Route};
pub use store::{OutboxStore, SqliteOutboxStore};
