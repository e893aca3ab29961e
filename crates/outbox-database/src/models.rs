//! Database models for the outbox tables.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use uuid::Uuid;

/// Outbox table, one per event family.
///
/// Table names are only ever taken from this enum, so they are safe to
/// splice into SQL text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutboxTable {
    Auth,
    Profile,
}

impl OutboxTable {
    pub const ALL: [OutboxTable; 2] = [OutboxTable::Auth, OutboxTable::Profile];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Auth => "auth_outbox_events",
            Self::Profile => "profile_outbox_events",
        }
    }
}

/// Outbox event status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    /// Written by a producer, never attempted.
    Pending,
    /// Published; terminal.
    Sent,
    /// Last attempt failed; eligible again once `available_at` passes.
    Error,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Sent => "SENT",
            Self::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "SENT" => Some(Self::Sent),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }
}

/// One outbox row.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEvent {
    pub id: String,
    /// Family-specific tag, e.g. `PROFILE_INDEX`.
    pub event_type: String,
    /// Opaque serialized body.
    pub payload: Option<String>,
    pub status: OutboxStatus,
    /// Publish attempts made so far; never decreases.
    pub attempts: u32,
    /// Not claimable before this instant.
    pub available_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// New outbox event for insertion by a producer.
#[derive(Debug, Clone)]
pub struct NewOutboxEvent {
    pub id: String,
    pub event_type: String,
    pub payload: Option<String>,
    /// Defaults to the insertion time.
    pub available_at: Option<DateTime<Utc>>,
}

impl NewOutboxEvent {
    /// Event with a fresh random ID, due immediately.
    pub fn new(event_type: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            payload: Some(payload.into()),
            available_at: None,
        }
    }

    /// Delay the first delivery attempt until `at`.
    pub fn available_at(mut self, at: DateTime<Utc>) -> Self {
        self.available_at = Some(at);
        self
    }
}

/// Row counts for one outbox table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboxStats {
    pub pending: u64,
    pub sent: u64,
    pub error: u64,
    /// `ERROR` rows that reached the attempt ceiling and are no longer claimed.
    pub exhausted: u64,
}

/// 0000-01-01T00:00:00.000Z in Unix milliseconds.
const EARLIEST_STORED_MILLIS: i64 = -62_167_219_200_000;

/// 9999-12-31T23:59:59.999Z in Unix milliseconds.
const LATEST_STORED_MILLIS: i64 = 253_402_300_799_999;

/// Earliest instant that stores in the fixed-width format.
pub fn earliest_timestamp() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH + Duration::milliseconds(EARLIEST_STORED_MILLIS)
}

/// Latest instant that stores in the fixed-width format.
pub fn latest_timestamp() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH + Duration::milliseconds(LATEST_STORED_MILLIS)
}

/// Clamp into the four-digit-year range that [`format_timestamp`] can write.
pub fn clamp_timestamp(value: DateTime<Utc>) -> DateTime<Utc> {
    value.clamp(earliest_timestamp(), latest_timestamp())
}

/// Format a timestamp for storage.
///
/// Fixed-width UTC with millisecond precision, so that string order in SQL
/// matches time order. Instants outside years 0000-9999 are clamped first;
/// chrono would otherwise write a signed, wider year that sorts wrong and
/// does not parse back.
pub fn format_timestamp(value: DateTime<Utc>) -> String {
    clamp_timestamp(value).to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value).map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_outbox_status_roundtrip() {
        for status in [OutboxStatus::Pending, OutboxStatus::Sent, OutboxStatus::Error] {
            assert_eq!(OutboxStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OutboxStatus::parse("pending"), None);
        assert_eq!(OutboxStatus::parse("FAILED"), None);
    }

    #[test]
    fn test_table_names() {
        assert_eq!(OutboxTable::Auth.name(), "auth_outbox_events");
        assert_eq!(OutboxTable::Profile.name(), "profile_outbox_events");
    }

    #[test]
    fn test_timestamp_format_is_fixed_width_and_ordered() {
        let early = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let late = early + chrono::Duration::milliseconds(1);

        let early_str = format_timestamp(early);
        let late_str = format_timestamp(late);

        assert_eq!(early_str, "2026-01-02T03:04:05.000Z");
        assert_eq!(early_str.len(), late_str.len());
        assert!(early_str < late_str);
        assert_eq!(parse_timestamp(&late_str).unwrap(), late);
    }

    #[test]
    fn test_new_outbox_event_has_unique_id() {
        let first = NewOutboxEvent::new("PROFILE_INDEX", "{}");
        let second = NewOutboxEvent::new("PROFILE_INDEX", "{}");
        assert_ne!(first.id, second.id);
        assert!(Uuid::parse_str(&first.id).is_ok());
        assert_eq!(first.payload.as_deref(), Some("{}"));
        assert_eq!(first.available_at, None);

        let at = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();
        assert_eq!(first.available_at(at).available_at, Some(at));
    }

    #[test]
    fn test_out_of_range_timestamps_are_clamped() {
        assert_eq!(
            format_timestamp(DateTime::<Utc>::MAX_UTC),
            "9999-12-31T23:59:59.999Z"
        );
        assert_eq!(
            format_timestamp(DateTime::<Utc>::MIN_UTC),
            "0000-01-01T00:00:00.000Z"
        );
        assert_eq!(
            parse_timestamp(&format_timestamp(DateTime::<Utc>::MAX_UTC)).unwrap(),
            latest_timestamp()
        );

        let now = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(clamp_timestamp(now), now);
        assert!(format_timestamp(now) < format_timestamp(DateTime::<Utc>::MAX_UTC));
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert!(parse_timestamp("yesterday").is_err());
    }
}
