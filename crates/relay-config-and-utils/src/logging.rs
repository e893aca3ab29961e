//! Logging initialization for the relay.
//!
//! Thin wrapper over the observability crate so every relay binary names
//! itself the same way in structured output.

use observability::{LogConfig, LogFormat};

/// Initialize the logging system for a relay service.
///
/// `RUST_LOG` takes precedence over `level`.
///
/// ```ignore
/// init_logging("outbox-relay", "info", LogFormat::Json);
/// tracing::info!("Relay started");
/// ```
pub fn init_logging(service_name: &str, level: &str, format: LogFormat) {
    observability::init_with_config(LogConfig {
        service_name: service_name.into(),
        default_level: level.into(),
        format,
    });
}
