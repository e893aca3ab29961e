//! The relay loop.
//!
//! One tick claims and leases a batch of due events, publishes each one and
//! saves its outcome as soon as it is known:
//!
//! ```text
//! PENDING ──publish ok──► SENT
//! PENDING ──publish err─► ERROR (attempts+1, available_at = now + backoff)
//! ERROR   ──publish ok──► SENT
//! ERROR   ──publish err─► ERROR (attempts+1, ...)
//! ```
//!
//! Events with `attempts >= max_attempts` are no longer claimed. A failure
//! of one event never stops the rest of the batch. A store failure aborts
//! the tick; events saved before it keep their outcome and the rest of the
//! batch becomes claimable again when its lease runs out. A tick that
//! outlives its lease stops publishing, so another relay that re-claims the
//! leftovers is not racing it.

use crate::backoff::{offset_from, BackoffPolicy};
use crate::error::RelayResult;
use crate::publisher::{BrokerPublisher, PublishError};
use crate::routing::FamilyDescriptor;
use crate::store::OutboxStore;
use chrono::{DateTime, SubsecRound, Utc};
use outbox_database::{OutboxEvent, OutboxStatus};
use relay_config_and_utils::{RelayConfig, DEFAULT_CLAIM_LEASE_MS};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

/// Max characters kept from a failure reason.
pub const MAX_ERROR_LENGTH: usize = 1000;

/// Floor for the claim lease.
pub const MIN_CLAIM_LEASE_MS: u64 = 1_000;

/// Why a single event was not delivered.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Unknown outbox event type: {0}")]
    UnknownEventType(String),

    #[error("Outbox payload is empty")]
    EmptyPayload,

    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Clamped runtime settings for one relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySettings {
    pub batch_size: i64,
    pub max_attempts: i64,
    pub backoff: BackoffPolicy,
    pub poll_interval: Duration,
    /// How long a claimed batch stays leased to this relay.
    pub claim_lease: Duration,
}

impl RelaySettings {
    /// `batch_size` and `max_attempts` are raised to at least 1. The claim
    /// lease starts at its default.
    pub fn new(
        batch_size: i64,
        max_attempts: i64,
        retry_delay_ms: u64,
        poll_interval: Duration,
    ) -> Self {
        Self {
            batch_size: batch_size.max(1),
            max_attempts: max_attempts.max(1),
            backoff: BackoffPolicy::new(retry_delay_ms),
            poll_interval,
            claim_lease: Duration::from_millis(DEFAULT_CLAIM_LEASE_MS),
        }
    }

    /// Set the claim lease, floored at `MIN_CLAIM_LEASE_MS`.
    pub fn with_claim_lease(mut self, claim_lease: Duration) -> Self {
        self.claim_lease = claim_lease.max(Duration::from_millis(MIN_CLAIM_LEASE_MS));
        self
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(
            config.batch_size,
            config.max_attempts,
            config.retry_delay_ms,
            config.poll_interval(),
        )
        .with_claim_lease(config.claim_lease())
    }
}

/// Outcome counts of one tick.
///
/// `claimed == sent + failed + expired` for a tick that completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub claimed: usize,
    pub sent: usize,
    pub failed: usize,
    /// Left unsaved because the lease ran out or was taken over.
    pub expired: usize,
}

/// Relay engine for one event family.
pub struct OutboxRelay<S, P> {
    store: S,
    publisher: P,
    descriptor: FamilyDescriptor,
    settings: RelaySettings,
}

impl<S, P> OutboxRelay<S, P>
where
    S: OutboxStore,
    P: BrokerPublisher,
{
    pub fn new(store: S, publisher: P, descriptor: FamilyDescriptor, settings: RelaySettings) -> Self {
        Self {
            store,
            publisher,
            descriptor,
            settings,
        }
    }

    pub fn descriptor(&self) -> &FamilyDescriptor {
        &self.descriptor
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    /// Run one tick at the current time, truncated to milliseconds.
    pub fn tick(&self) -> RelayResult<TickReport> {
        self.tick_at(Utc::now().trunc_subsecs(3))
    }

    /// Run one tick as of `now`.
    ///
    /// Returns an error only when the store fails. Outcomes saved before
    /// the failure stand; the unsaved rest of the batch, including an event
    /// already published, is re-claimed after the lease.
    pub fn tick_at(&self, now: DateTime<Utc>) -> RelayResult<TickReport> {
        let table = self.descriptor.table.name();
        let started = Instant::now();
        let leased_until = offset_from(now, lease_delta(self.settings.claim_lease));

        let batch = self.store.claim_batch(
            now,
            self.settings.batch_size,
            self.settings.max_attempts,
            leased_until,
        )?;

        if batch.is_empty() {
            trace!(table, "No outbox events due");
            return Ok(TickReport::default());
        }

        let mut report = TickReport {
            claimed: batch.len(),
            ..TickReport::default()
        };

        for (index, mut event) in batch.into_iter().enumerate() {
            if started.elapsed() >= self.settings.claim_lease {
                report.expired += report.claimed - index;
                warn!(
                    table,
                    remaining = report.claimed - index,
                    lease_ms = self.settings.claim_lease.as_millis() as u64,
                    "Claim lease ran out, leaving the rest of the batch for a later tick"
                );
                break;
            }

            let outcome = self.dispatch(&event);
            let delivered = outcome.is_ok();
            match outcome {
                Ok(()) => mark_sent(&mut event, now),
                Err(e) => {
                    let reason = e.to_string();
                    mark_failed(&mut event, &reason, now, &self.settings.backoff);
                    warn!(
                        table,
                        event_id = %event.id,
                        event_type = %event.event_type,
                        attempts = event.attempts,
                        available_at = %event.available_at,
                        error = %reason,
                        "Outbox event delivery failed"
                    );
                }
            }

            if !self.store.save(&event, leased_until)? {
                report.expired += 1;
                warn!(
                    table,
                    event_id = %event.id,
                    delivered,
                    "Claim lease taken over before save, outcome discarded"
                );
                continue;
            }

            if delivered {
                report.sent += 1;
                debug!(
                    table,
                    event_id = %event.id,
                    event_type = %event.event_type,
                    attempts = event.attempts,
                    "Outbox event sent"
                );
            } else {
                report.failed += 1;
            }
        }

        info!(
            table,
            claimed = report.claimed,
            sent = report.sent,
            failed = report.failed,
            expired = report.expired,
            "Outbox tick complete"
        );
        Ok(report)
    }

    fn dispatch(&self, event: &OutboxEvent) -> Result<(), DispatchError> {
        let route = self
            .descriptor
            .resolve(&event.event_type)
            .ok_or_else(|| DispatchError::UnknownEventType(event.event_type.clone()))?;

        let payload = event
            .payload
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or(DispatchError::EmptyPayload)?;

        self.publisher
            .publish(route.exchange, route.routing_key, payload)?;
        Ok(())
    }
}

impl<S, P> OutboxRelay<S, P>
where
    S: OutboxStore + 'static,
    P: BrokerPublisher + 'static,
{
    /// Tick until `shutdown` turns true or its sender is dropped.
    ///
    /// Each tick runs on the blocking pool. The next one starts
    /// `poll_interval` after the previous one finished, so ticks never
    /// overlap. A tick in flight is finished before returning.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            table = self.descriptor.table.name(),
            exchange = self.descriptor.exchange,
            poll_interval_ms = self.settings.poll_interval.as_millis() as u64,
            batch_size = self.settings.batch_size,
            max_attempts = self.settings.max_attempts,
            claim_lease_ms = self.settings.claim_lease.as_millis() as u64,
            "Starting outbox relay loop"
        );

        while !*shutdown.borrow() {
            let relay = Arc::clone(&self);
            match tokio::task::spawn_blocking(move || relay.tick()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    error!(
                        table = self.descriptor.table.name(),
                        error = %e,
                        "Outbox tick failed, retrying on next tick"
                    );
                }
                Err(e) => {
                    error!(
                        table = self.descriptor.table.name(),
                        error = %e,
                        "Outbox tick task panicked"
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(table = self.descriptor.table.name(), "Outbox relay stopped");
    }
}

fn lease_delta(lease: Duration) -> chrono::Duration {
    chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::MAX)
}

/// Record a successful delivery.
pub fn mark_sent(event: &mut OutboxEvent, now: DateTime<Utc>) {
    event.status = OutboxStatus::Sent;
    event.sent_at = Some(now);
    event.available_at = now;
    event.last_error = None;
}

/// Record a failed delivery and schedule the retry.
pub fn mark_failed(
    event: &mut OutboxEvent,
    reason: &str,
    now: DateTime<Utc>,
    backoff: &BackoffPolicy,
) {
    event.attempts = event.attempts.saturating_add(1);
    event.status = OutboxStatus::Error;
    event.last_error = truncate_reason(reason);
    event.available_at = backoff.next_available_at(now, event.attempts);
}

/// First `MAX_ERROR_LENGTH` characters of `reason`, or `None` when blank.
pub fn truncate_reason(reason: &str) -> Option<String> {
    if reason.trim().is_empty() {
        return None;
    }
    Some(reason.chars().take(MAX_ERROR_LENGTH).collect())
}
