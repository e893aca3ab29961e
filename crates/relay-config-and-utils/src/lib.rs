//! Configuration, error types, and logging setup shared by the outbox relay.

mod config;
mod error;
mod logging;

pub use config::{
    RelayConfig, RelayMode, DEFAULT_BATCH_SIZE, DEFAULT_CLAIM_LEASE_MS, DEFAULT_DATABASE_PATH,
    DEFAULT_LOG_LEVEL, DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL_MS, DEFAULT_PUBLISH_TIMEOUT_MS,
    DEFAULT_REDIS_URL, DEFAULT_RETRY_DELAY_MS,
};
pub use error::{CoreError, CoreResult};
pub use logging::init_logging;
pub use observability::LogFormat;
