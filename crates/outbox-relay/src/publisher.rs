//! Broker publisher contract and the Redis Streams implementation.
//!
//! An exchange maps to a stream key; the routing key travels as a field of
//! the entry:
//!
//! ```text
//! XADD <exchange> [MAXLEN ~ n] * routing_key <key> payload <payload>
//! ```

use redis::{Client, Cmd, Connection, RedisResult};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace};

/// Why a publish call failed.
#[derive(Error, Debug)]
pub enum PublishError {
    /// Connection, I/O, timeout or server-side rejection
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Broker answered without accepting the message
    #[error("{0}")]
    Rejected(String),
}

/// Publishes one message to the broker. May block on I/O.
pub trait BrokerPublisher: Send + Sync {
    fn publish(&self, exchange: &str, routing_key: &str, payload: &str)
        -> Result<(), PublishError>;
}

/// Redis Streams publisher with a lazily (re)connected connection.
pub struct RedisStreamPublisher {
    client: Client,
    conn: Mutex<Option<Connection>>,
    timeout: Option<Duration>,
    max_len: Option<u64>,
}

impl RedisStreamPublisher {
    /// Create a publisher. No connection is made until the first publish.
    ///
    /// A zero `timeout` disables connect/read/write timeouts.
    pub fn new(
        redis_url: &str,
        timeout: Duration,
        max_len: Option<u64>,
    ) -> Result<Self, PublishError> {
        let client = Client::open(redis_url)?;
        Ok(Self {
            client,
            conn: Mutex::new(None),
            timeout: (!timeout.is_zero()).then_some(timeout),
            max_len,
        })
    }

    fn connect(&self) -> RedisResult<Connection> {
        let conn = match self.timeout {
            Some(timeout) => self.client.get_connection_with_timeout(timeout)?,
            None => self.client.get_connection()?,
        };
        conn.set_read_timeout(self.timeout)?;
        conn.set_write_timeout(self.timeout)?;
        info!("Connected to Redis");
        Ok(conn)
    }
}

impl BrokerPublisher for RedisStreamPublisher {
    fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &str,
    ) -> Result<(), PublishError> {
        let mut guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);

        // A failed call leaves the slot empty so the next publish reconnects.
        let mut conn = match guard.take() {
            Some(conn) => conn,
            None => self.connect()?,
        };

        let reply: Option<String> = xadd_command(exchange, routing_key, payload, self.max_len)
            .query(&mut conn)
            .inspect_err(|e| debug!(error = %e, "Dropping Redis connection after failure"))?;
        *guard = Some(conn);

        let entry_id = accepted_entry_id(exchange, reply)?;
        trace!(stream = exchange, routing_key, entry_id = %entry_id, "Published to stream");
        Ok(())
    }
}

/// The stream entry ID from an `XADD` reply. A nil or empty reply means
/// nothing was appended.
fn accepted_entry_id(stream: &str, reply: Option<String>) -> Result<String, PublishError> {
    reply.filter(|id| !id.is_empty()).ok_or_else(|| {
        PublishError::Rejected(format!("XADD to stream {} returned no entry ID", stream))
    })
}

/// Build the `XADD` command for one message.
pub fn xadd_command(
    exchange: &str,
    routing_key: &str,
    payload: &str,
    max_len: Option<u64>,
) -> Cmd {
    let mut cmd = redis::cmd("XADD");
    cmd.arg(exchange);
    if let Some(max_len) = max_len {
        cmd.arg("MAXLEN").arg("~").arg(max_len);
    }
    cmd.arg("*")
        .arg("routing_key")
        .arg(routing_key)
        .arg("payload")
        .arg(payload);
    cmd
}
