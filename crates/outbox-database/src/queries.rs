//! Standalone query functions that work with any Connection.
//!
//! Each function takes a `&Connection` as its first parameter, so they run
//! the same on a pooled connection or inside a claim transaction.

use crate::{
    clamp_timestamp, format_timestamp, parse_timestamp, DatabaseError, DatabaseResult,
    NewOutboxEvent, OutboxEvent, OutboxStats, OutboxStatus, OutboxTable,
};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use tracing::debug;

const EVENT_COLUMNS: &str =
    "id, event_type, payload, status, attempts, available_at, sent_at, last_error, created_at";

/// Insert a new `PENDING` event with zero attempts.
pub fn insert_outbox_event(
    conn: &Connection,
    table: OutboxTable,
    event: &NewOutboxEvent,
    now: DateTime<Utc>,
) -> DatabaseResult<OutboxEvent> {
    if event.id.trim().is_empty() {
        return Err(DatabaseError::InvalidData("event id is blank".to_string()));
    }
    if event.event_type.trim().is_empty() {
        return Err(DatabaseError::InvalidData("event type is blank".to_string()));
    }

    let now_str = format_timestamp(now);
    let available_at = event.available_at.map(format_timestamp).unwrap_or_else(|| now_str.clone());

    conn.execute(
        &format!(
            "INSERT INTO {} (id, event_type, payload, status, attempts, available_at, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6)",
            table.name()
        ),
        params![
            event.id,
            event.event_type,
            event.payload,
            OutboxStatus::Pending.as_str(),
            available_at,
            now_str,
        ],
    )?;

    get_outbox_event(conn, table, &event.id)?
        .ok_or_else(|| DatabaseError::NotFound("Outbox event not found after insert".to_string()))
}

/// Get an event by ID.
pub fn get_outbox_event(
    conn: &Connection,
    table: OutboxTable,
    id: &str,
) -> DatabaseResult<Option<OutboxEvent>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM {} WHERE id = ?1",
        EVENT_COLUMNS,
        table.name()
    ))?;

    match stmt.query_row(params![id], row_to_event) {
        Ok(event) => Ok(Some(event)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Select up to `batch_size` due, retryable events, oldest-due first, and
/// lease them by moving their `available_at` to `leased_until`.
///
/// An event is due when it is `PENDING` or `ERROR`, its `available_at` is not
/// after `now`, and it has fewer than `max_attempts` attempts. Both limits
/// are clamped to at least 1. Call inside a claim transaction so no other
/// claimer can select the same rows between the select and the lease.
///
/// The returned events carry the leased `available_at`; pass the same
/// `leased_until` to [`save_outbox_event`].
pub fn claim_batch(
    conn: &Connection,
    table: OutboxTable,
    now: DateTime<Utc>,
    batch_size: i64,
    max_attempts: i64,
    leased_until: DateTime<Utc>,
) -> DatabaseResult<Vec<OutboxEvent>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {}
         FROM {}
         WHERE status IN ('PENDING', 'ERROR')
           AND available_at <= ?1
           AND attempts < ?2
         ORDER BY available_at ASC, created_at ASC, id ASC
         LIMIT ?3",
        EVENT_COLUMNS,
        table.name()
    ))?;

    let mut events = stmt
        .query_map(
            params![format_timestamp(now), max_attempts.max(1), batch_size.max(1)],
            row_to_event,
        )?
        .collect::<Result<Vec<_>, _>>()?;

    let leased_until = clamp_timestamp(leased_until);
    let mut lease = conn.prepare_cached(&format!(
        "UPDATE {} SET available_at = ?2 WHERE id = ?1",
        table.name()
    ))?;
    for event in &mut events {
        lease.execute(params![event.id, format_timestamp(leased_until)])?;
        event.available_at = leased_until;
    }

    debug!(table = table.name(), claimed = events.len(), "Claimed outbox batch");
    Ok(events)
}

/// Persist the mutable fields of a claimed event.
///
/// The row is only written while it still holds the lease taken by
/// [`claim_batch`], i.e. its stored `available_at` equals `leased_until`.
/// Returns `Ok(false)` when another claimer has re-leased the row since.
pub fn save_outbox_event(
    conn: &Connection,
    table: OutboxTable,
    event: &OutboxEvent,
    leased_until: DateTime<Utc>,
) -> DatabaseResult<bool> {
    let updated = conn.execute(
        &format!(
            "UPDATE {}
             SET status = ?2, attempts = ?3, available_at = ?4, sent_at = ?5, last_error = ?6
             WHERE id = ?1 AND available_at = ?7",
            table.name()
        ),
        params![
            event.id,
            event.status.as_str(),
            event.attempts,
            format_timestamp(event.available_at),
            event.sent_at.map(format_timestamp),
            event.last_error,
            format_timestamp(leased_until),
        ],
    )?;

    if updated > 0 {
        return Ok(true);
    }
    match get_outbox_event(conn, table, &event.id)? {
        Some(_) => Ok(false),
        None => Err(DatabaseError::NotFound(format!(
            "Outbox event {} not found in {}",
            event.id,
            table.name()
        ))),
    }
}

/// Count events per status, plus `ERROR` rows at the attempt ceiling.
pub fn outbox_stats(
    conn: &Connection,
    table: OutboxTable,
    max_attempts: i64,
) -> DatabaseResult<OutboxStats> {
    let sql = format!(
        "SELECT
            COALESCE(SUM(CASE WHEN status = 'PENDING' THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN status = 'SENT' THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN status = 'ERROR' THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN status = 'ERROR' AND attempts >= ?1 THEN 1 ELSE 0 END), 0)
         FROM {}",
        table.name()
    );

    let stats = conn.query_row(&sql, params![max_attempts.max(1)], |row| {
        Ok(OutboxStats {
            pending: row.get::<_, i64>(0)? as u64,
            sent: row.get::<_, i64>(1)? as u64,
            error: row.get::<_, i64>(2)? as u64,
            exhausted: row.get::<_, i64>(3)? as u64,
        })
    })?;
    Ok(stats)
}

// ==========================================
// Helpers
// ==========================================

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<OutboxEvent> {
    let status: String = row.get(3)?;
    let status = OutboxStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            Type::Text,
            format!("unknown outbox status '{}'", status).into(),
        )
    })?;

    Ok(OutboxEvent {
        id: row.get(0)?,
        event_type: row.get(1)?,
        payload: row.get(2)?,
        status,
        attempts: row.get(4)?,
        available_at: timestamp_column(row, 5)?,
        sent_at: row
            .get::<_, Option<String>>(6)?
            .map(|value| parse_column(6, &value))
            .transpose()?,
        last_error: row.get(7)?,
        created_at: timestamp_column(row, 8)?,
    })
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let value: String = row.get(idx)?;
    parse_column(idx, &value)
}

fn parse_column(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    parse_timestamp(value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_migrations;
    use chrono::{Duration, TimeZone};

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn new_event(id: &str, available_at: Option<DateTime<Utc>>) -> NewOutboxEvent {
        NewOutboxEvent {
            id: id.to_string(),
            event_type: "PROFILE_INDEX".to_string(),
            payload: Some(format!(r#"{{"profileId":"{}"}}"#, id)),
            available_at,
        }
    }

    fn insert(conn: &Connection, id: &str, available_at: DateTime<Utc>) -> OutboxEvent {
        insert_outbox_event(
            conn,
            OutboxTable::Profile,
            &new_event(id, Some(available_at)),
            available_at,
        )
        .unwrap()
    }

    /// IDs a claim would select; the lease is rolled back.
    fn claim_ids(conn: &Connection, now: DateTime<Utc>, batch: i64, max: i64) -> Vec<String> {
        conn.execute_batch("BEGIN").unwrap();
        let ids = claim_batch(conn, OutboxTable::Profile, now, batch, max, now)
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        conn.execute_batch("ROLLBACK").unwrap();
        ids
    }

    /// Save over whatever is stored, as if the row had just been claimed.
    fn overwrite(conn: &Connection, event: &OutboxEvent) {
        let stored = get_outbox_event(conn, OutboxTable::Profile, &event.id)
            .unwrap()
            .unwrap();
        assert!(save_outbox_event(conn, OutboxTable::Profile, event, stored.available_at).unwrap());
    }

    #[test]
    fn test_insert_defaults() {
        let conn = setup();
        let now = base_time();

        let event =
            insert_outbox_event(&conn, OutboxTable::Profile, &new_event("evt-1", None), now)
                .unwrap();

        assert_eq!(event.status, OutboxStatus::Pending);
        assert_eq!(event.attempts, 0);
        assert_eq!(event.available_at, now);
        assert_eq!(event.created_at, now);
        assert_eq!(event.sent_at, None);
        assert_eq!(event.last_error, None);
        assert_eq!(event.payload.as_deref(), Some(r#"{"profileId":"evt-1"}"#));
    }

    #[test]
    fn test_insert_duplicate_id_fails() {
        let conn = setup();
        insert(&conn, "evt-1", base_time());
        let result = insert_outbox_event(
            &conn,
            OutboxTable::Profile,
            &new_event("evt-1", None),
            base_time(),
        );
        assert!(matches!(result, Err(DatabaseError::Sqlite(_))));
    }

    #[test]
    fn test_insert_rejects_blank_id_and_type() {
        let conn = setup();

        let result = insert_outbox_event(
            &conn,
            OutboxTable::Profile,
            &new_event("  ", None),
            base_time(),
        );
        assert!(matches!(result, Err(DatabaseError::InvalidData(_))));

        let mut event = new_event("evt-1", None);
        event.event_type = String::new();
        let result = insert_outbox_event(&conn, OutboxTable::Profile, &event, base_time());
        assert!(matches!(result, Err(DatabaseError::InvalidData(_))));

        assert!(get_outbox_event(&conn, OutboxTable::Profile, "evt-1")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_tables_are_isolated() {
        let conn = setup();
        insert(&conn, "evt-1", base_time());

        assert!(get_outbox_event(&conn, OutboxTable::Auth, "evt-1")
            .unwrap()
            .is_none());
        assert!(
            claim_batch(&conn, OutboxTable::Auth, base_time(), 10, 10, base_time())
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_claim_skips_future_sent_and_exhausted() {
        let conn = setup();
        let now = base_time();

        insert(&conn, "due", now - Duration::seconds(5));
        insert(&conn, "exactly-now", now);
        insert(&conn, "future", now + Duration::milliseconds(1));

        let mut sent = insert(&conn, "sent", now - Duration::seconds(10));
        sent.status = OutboxStatus::Sent;
        sent.sent_at = Some(now);
        overwrite(&conn, &sent);

        let mut retry = insert(&conn, "retry", now - Duration::seconds(3));
        retry.status = OutboxStatus::Error;
        retry.attempts = 9;
        overwrite(&conn, &retry);

        let mut exhausted = insert(&conn, "exhausted", now - Duration::seconds(20));
        exhausted.status = OutboxStatus::Error;
        exhausted.attempts = 10;
        overwrite(&conn, &exhausted);

        assert_eq!(
            claim_ids(&conn, now, 100, 10),
            vec!["due", "retry", "exactly-now"]
        );
    }

    #[test]
    fn test_claim_orders_by_available_at_then_created_at() {
        let conn = setup();
        let now = base_time();

        // Same due time: insertion order (created_at) decides.
        insert_outbox_event(
            &conn,
            OutboxTable::Profile,
            &new_event("b", Some(now - Duration::seconds(1))),
            now - Duration::seconds(30),
        )
        .unwrap();
        insert_outbox_event(
            &conn,
            OutboxTable::Profile,
            &new_event("a", Some(now - Duration::seconds(1))),
            now - Duration::seconds(20),
        )
        .unwrap();
        insert(&conn, "oldest", now - Duration::minutes(5));

        assert_eq!(claim_ids(&conn, now, 100, 10), vec!["oldest", "b", "a"]);
    }

    #[test]
    fn test_claim_respects_batch_size_and_clamps() {
        let conn = setup();
        let now = base_time();
        for i in 0..5 {
            insert(&conn, &format!("evt-{}", i), now - Duration::seconds(10 - i));
        }

        assert_eq!(claim_ids(&conn, now, 2, 10), vec!["evt-0", "evt-1"]);
        assert_eq!(claim_ids(&conn, now, 0, 10), vec!["evt-0"]);
        assert_eq!(claim_ids(&conn, now, -1, 10), vec!["evt-0"]);

        // max_attempts below 1 behaves as 1: fresh events are still claimable.
        assert_eq!(claim_ids(&conn, now, 100, 0).len(), 5);
    }

    #[test]
    fn test_save_roundtrips_mutable_fields() {
        let conn = setup();
        let now = base_time();
        let mut event = insert(&conn, "evt-1", now);

        event.status = OutboxStatus::Error;
        event.attempts = 2;
        event.available_at = now + Duration::seconds(60);
        event.last_error = Some("connection refused".to_string());
        overwrite(&conn, &event);

        let loaded = get_outbox_event(&conn, OutboxTable::Profile, "evt-1")
            .unwrap()
            .unwrap();
        assert_eq!(loaded, event);

        event.status = OutboxStatus::Sent;
        event.sent_at = Some(now + Duration::seconds(60));
        event.last_error = None;
        overwrite(&conn, &event);

        let loaded = get_outbox_event(&conn, OutboxTable::Profile, "evt-1")
            .unwrap()
            .unwrap();
        assert_eq!(loaded.status, OutboxStatus::Sent);
        assert_eq!(loaded.last_error, None);
        assert_eq!(loaded.sent_at, event.sent_at);
    }

    #[test]
    fn test_claim_leases_selected_rows() {
        let conn = setup();
        let now = base_time();
        let lease = now + Duration::minutes(5);
        for i in 0..3 {
            insert(&conn, &format!("evt-{}", i), now - Duration::seconds(10 - i));
        }

        let claimed = claim_batch(&conn, OutboxTable::Profile, now, 2, 10, lease).unwrap();
        assert_eq!(claimed.len(), 2);
        assert!(claimed.iter().all(|e| e.available_at == lease));
        assert!(claimed.iter().all(|e| e.status == OutboxStatus::Pending));

        let stored = get_outbox_event(&conn, OutboxTable::Profile, "evt-0")
            .unwrap()
            .unwrap();
        assert_eq!(stored.available_at, lease);
        assert_eq!(stored.attempts, 0);

        // Leased rows are hidden until the lease runs out.
        assert_eq!(claim_ids(&conn, now, 100, 10), vec!["evt-2"]);
        assert_eq!(
            claim_ids(&conn, lease, 100, 10),
            vec!["evt-2", "evt-0", "evt-1"]
        );
    }

    #[test]
    fn test_save_after_lost_lease_is_skipped() {
        let conn = setup();
        let now = base_time();
        let first_lease = now + Duration::seconds(30);
        let second_lease = first_lease + Duration::seconds(30);
        insert(&conn, "evt-1", now);

        let mut mine = claim_batch(&conn, OutboxTable::Profile, now, 1, 10, first_lease)
            .unwrap()
            .remove(0);
        // The lease ran out and another claimer took the row.
        let theirs = claim_batch(&conn, OutboxTable::Profile, first_lease, 1, 10, second_lease)
            .unwrap()
            .remove(0);

        mine.status = OutboxStatus::Sent;
        mine.sent_at = Some(now);
        mine.available_at = now;
        assert!(!save_outbox_event(&conn, OutboxTable::Profile, &mine, first_lease).unwrap());

        let stored = get_outbox_event(&conn, OutboxTable::Profile, "evt-1")
            .unwrap()
            .unwrap();
        assert_eq!(stored, theirs);

        assert!(save_outbox_event(&conn, OutboxTable::Profile, &mine, second_lease).unwrap());
        let stored = get_outbox_event(&conn, OutboxTable::Profile, "evt-1")
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, OutboxStatus::Sent);
    }

    #[test]
    fn test_saturated_available_at_is_stored_and_not_reclaimed() {
        let conn = setup();
        let now = base_time();
        let mut event = insert(&conn, "evt-1", now);

        event.status = OutboxStatus::Error;
        event.attempts = 1;
        event.available_at = DateTime::<Utc>::MAX_UTC;
        overwrite(&conn, &event);

        let stored = get_outbox_event(&conn, OutboxTable::Profile, "evt-1")
            .unwrap()
            .unwrap();
        assert_eq!(stored.available_at, crate::latest_timestamp());
        assert!(claim_ids(&conn, now, 100, 10).is_empty());
        assert!(claim_ids(&conn, now + Duration::days(365 * 100), 100, 10).is_empty());
    }

    #[test]
    fn test_save_missing_event_is_not_found() {
        let conn = setup();
        let mut event = insert(&conn, "evt-1", base_time());
        event.id = "missing".to_string();

        assert!(matches!(
            save_outbox_event(&conn, OutboxTable::Profile, &event, base_time()),
            Err(DatabaseError::NotFound(_))
        ));
    }

    #[test]
    fn test_outbox_stats() {
        let conn = setup();
        let now = base_time();

        insert(&conn, "pending", now);

        let mut sent = insert(&conn, "sent", now);
        sent.status = OutboxStatus::Sent;
        sent.sent_at = Some(now);
        overwrite(&conn, &sent);

        for (id, attempts) in [("retrying", 3), ("dead", 10)] {
            let mut event = insert(&conn, id, now);
            event.status = OutboxStatus::Error;
            event.attempts = attempts;
            overwrite(&conn, &event);
        }

        let stats = outbox_stats(&conn, OutboxTable::Profile, 10).unwrap();
        assert_eq!(
            stats,
            OutboxStats {
                pending: 1,
                sent: 1,
                error: 2,
                exhausted: 1,
            }
        );

        let stricter = outbox_stats(&conn, OutboxTable::Profile, 3).unwrap();
        assert_eq!(stricter.exhausted, 2);

        assert_eq!(
            outbox_stats(&conn, OutboxTable::Auth, 10).unwrap(),
            OutboxStats::default()
        );
    }

    #[test]
    fn test_corrupt_status_is_reported() {
        let conn = setup();
        insert(&conn, "evt-1", base_time());
        conn.execute_batch("PRAGMA ignore_check_constraints = ON").unwrap();
        conn.execute(
            "UPDATE profile_outbox_events SET status = 'LOST' WHERE id = 'evt-1'",
            [],
        )
        .unwrap();

        assert!(matches!(
            get_outbox_event(&conn, OutboxTable::Profile, "evt-1"),
            Err(DatabaseError::Sqlite(_))
        ));
    }
}
