//! Error types for the outbox relay.

use crate::publisher::PublishError;
use outbox_database::DatabaseError;
use relay_config_and_utils::CoreError;
use thiserror::Error;

/// Tick-level and startup error.
///
/// Per-event delivery failures never surface here; they are recorded on the
/// event itself.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Claim or save failed
    #[error("Store error: {0}")]
    Store(#[from] DatabaseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] CoreError),

    /// Broker client could not be created
    #[error("Publisher error: {0}")]
    Publisher(#[from] PublishError),

    /// JSON output error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;
