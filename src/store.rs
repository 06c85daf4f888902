// 🗄️ Snapshot/History Store
// SQLite persistence for the five entities. Current-state rows are whole-
// record upserts (last-write-wins by recorded timestamp); snapshots and
// change events are append-only; address/system intervals are keyed by
// (ccn, start date) so a later run can close a previously-current interval.

use crate::records::{
    AddressHistoryEntry, AnnualSnapshot, ChangeType, HospitalRecord, HospitalStatus,
    IdentifierChangeEvent, SystemMembershipEntry,
};
use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS hospitals (
            ccn TEXT PRIMARY KEY,
            npi TEXT,
            name TEXT,
            street TEXT,
            city TEXT,
            state TEXT,
            zip TEXT,
            phone TEXT,
            hospital_type TEXT,
            ownership TEXT,
            system_id TEXT,
            system_name TEXT,
            status TEXT NOT NULL,
            certification_date TEXT,
            termination_date TEXT,
            bed_count INTEGER,
            quality_score INTEGER NOT NULL DEFAULT 0,
            source TEXT NOT NULL,
            last_updated TEXT NOT NULL,
            metadata TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS annual_snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ccn TEXT NOT NULL,
            fiscal_year INTEGER NOT NULL,
            name TEXT,
            npi TEXT,
            ownership TEXT,
            street TEXT,
            city TEXT,
            state TEXT,
            zip TEXT,
            system_id TEXT,
            system_name TEXT,
            bed_count INTEGER,
            total_revenue REAL,
            net_income REAL,
            recorded_at TEXT NOT NULL,
            UNIQUE (ccn, fiscal_year)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS identifier_changes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            dedup_hash TEXT UNIQUE NOT NULL,
            ccn TEXT NOT NULL,
            change_type TEXT NOT NULL,
            old_value TEXT,
            new_value TEXT,
            effective_date TEXT NOT NULL,
            related_ccn TEXT,
            recorded_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS address_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ccn TEXT NOT NULL,
            street TEXT,
            city TEXT,
            state TEXT,
            zip TEXT,
            effective_date TEXT NOT NULL,
            end_date TEXT,
            current INTEGER NOT NULL DEFAULT 0,
            UNIQUE (ccn, effective_date)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS system_membership (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ccn TEXT NOT NULL,
            system_id TEXT NOT NULL,
            system_name TEXT,
            start_date TEXT NOT NULL,
            end_date TEXT,
            current INTEGER NOT NULL DEFAULT 0,
            UNIQUE (ccn, system_id, start_date)
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_hospitals_state ON hospitals(state)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_hospitals_system ON hospitals(system_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_snapshots_ccn ON annual_snapshots(ccn)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_changes_ccn ON identifier_changes(ccn, effective_date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_addresses_ccn ON address_history(ccn)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_systems_ccn ON system_membership(ccn)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// CURRENT-STATE WRITES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// An existing row carries a newer timestamp; the write was dropped.
    Stale,
}

/// Whole-record upsert, last-write-wins by `last_updated`. No partial-field
/// update path exists.
pub fn upsert_hospital(conn: &Connection, record: &HospitalRecord) -> Result<UpsertOutcome> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT last_updated FROM hospitals WHERE ccn = ?1",
            params![record.ccn],
            |row| row.get(0),
        )
        .optional()?;

    let metadata_json = serde_json::to_string(&record.metadata)?;
    let certification = record.certification_date.map(|d| d.to_string());
    let termination = record.termination_date.map(|d| d.to_string());
    let last_updated = record.last_updated.to_rfc3339();

    if let Some(previous) = &existing {
        let newer_exists = DateTime::parse_from_rfc3339(previous)
            .map(|dt| dt.with_timezone(&Utc) > record.last_updated)
            .unwrap_or(false);
        if newer_exists {
            return Ok(UpsertOutcome::Stale);
        }

        conn.execute(
            "UPDATE hospitals SET
                npi = ?2, name = ?3, street = ?4, city = ?5, state = ?6,
                zip = ?7, phone = ?8, hospital_type = ?9, ownership = ?10,
                system_id = ?11, system_name = ?12, status = ?13,
                certification_date = ?14, termination_date = ?15,
                bed_count = ?16, quality_score = ?17, source = ?18,
                last_updated = ?19, metadata = ?20
             WHERE ccn = ?1",
            params![
                record.ccn,
                record.npi,
                record.name,
                record.street,
                record.city,
                record.state,
                record.zip,
                record.phone,
                record.hospital_type,
                record.ownership,
                record.system_id,
                record.system_name,
                record.status.as_str(),
                certification,
                termination,
                record.bed_count,
                record.quality_score,
                record.source,
                last_updated,
                metadata_json,
            ],
        )?;
        return Ok(UpsertOutcome::Updated);
    }

    conn.execute(
        "INSERT INTO hospitals (
            ccn, npi, name, street, city, state, zip, phone, hospital_type,
            ownership, system_id, system_name, status, certification_date,
            termination_date, bed_count, quality_score, source, last_updated,
            metadata
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
        params![
            record.ccn,
            record.npi,
            record.name,
            record.street,
            record.city,
            record.state,
            record.zip,
            record.phone,
            record.hospital_type,
            record.ownership,
            record.system_id,
            record.system_name,
            record.status.as_str(),
            certification,
            termination,
            record.bed_count,
            record.quality_score,
            record.source,
            last_updated,
            metadata_json,
        ],
    )?;

    Ok(UpsertOutcome::Inserted)
}

// ============================================================================
// APPEND-ONLY WRITES
// ============================================================================

/// Record an annual snapshot. Returns false when (ccn, fiscal_year) already
/// exists: snapshots are immutable once recorded, so the stored row wins.
pub fn insert_snapshot(conn: &Connection, snapshot: &AnnualSnapshot) -> Result<bool> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO annual_snapshots (
            ccn, fiscal_year, name, npi, ownership, street, city, state, zip,
            system_id, system_name, bed_count, total_revenue, net_income,
            recorded_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            snapshot.ccn,
            snapshot.fiscal_year,
            snapshot.name,
            snapshot.npi,
            snapshot.ownership,
            snapshot.street,
            snapshot.city,
            snapshot.state,
            snapshot.zip,
            snapshot.system_id,
            snapshot.system_name,
            snapshot.bed_count,
            snapshot.total_revenue,
            snapshot.net_income,
            Utc::now().to_rfc3339(),
        ],
    )?;

    Ok(changed > 0)
}

/// Append a change event. Returns false for a duplicate: the unique content
/// hash makes re-running the pipeline a no-op for history.
pub fn insert_change_event(conn: &Connection, event: &IdentifierChangeEvent) -> Result<bool> {
    let result = conn.execute(
        "INSERT INTO identifier_changes (
            event_id, dedup_hash, ccn, change_type, old_value, new_value,
            effective_date, related_ccn, recorded_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            event.event_id,
            event.dedup_hash(),
            event.ccn,
            event.change_type.as_str(),
            event.old_value,
            event.new_value,
            event.effective_date.to_string(),
            event.related_ccn,
            Utc::now().to_rfc3339(),
        ],
    );

    match result {
        Ok(_) => Ok(true),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// Record an operator-curated merge/split annotation. Never inferred from
/// data; this is the only path that sets `related_ccn`.
pub fn annotate_merge(
    conn: &Connection,
    ccn: &str,
    related_ccn: &str,
    effective_date: NaiveDate,
) -> Result<bool> {
    let mut event =
        IdentifierChangeEvent::new(ccn, ChangeType::CcnMerge, None, None, effective_date);
    event.related_ccn = Some(related_ccn.to_string());
    insert_change_event(conn, &event)
}

/// Write a CCN's full address history. Intervals are keyed by
/// (ccn, effective_date); clearing current flags first keeps the
/// one-current-entry invariant even when a new run closes an interval an
/// older run left open.
pub fn replace_address_history(
    conn: &Connection,
    ccn: &str,
    entries: &[AddressHistoryEntry],
) -> Result<()> {
    conn.execute(
        "UPDATE address_history SET current = 0 WHERE ccn = ?1",
        params![ccn],
    )?;

    for entry in entries {
        conn.execute(
            "INSERT INTO address_history (
                ccn, street, city, state, zip, effective_date, end_date, current
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT (ccn, effective_date) DO UPDATE SET
                street = excluded.street,
                city = excluded.city,
                state = excluded.state,
                zip = excluded.zip,
                end_date = excluded.end_date,
                current = excluded.current",
            params![
                entry.ccn,
                entry.street,
                entry.city,
                entry.state,
                entry.zip,
                entry.effective_date.to_string(),
                entry.end_date.map(|d| d.to_string()),
                entry.current as i64,
            ],
        )?;
    }

    Ok(())
}

/// Write a CCN's full system-membership history. Same keyed-interval
/// approach as addresses.
pub fn replace_system_membership(
    conn: &Connection,
    ccn: &str,
    entries: &[SystemMembershipEntry],
) -> Result<()> {
    conn.execute(
        "UPDATE system_membership SET current = 0 WHERE ccn = ?1",
        params![ccn],
    )?;

    for entry in entries {
        conn.execute(
            "INSERT INTO system_membership (
                ccn, system_id, system_name, start_date, end_date, current
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (ccn, system_id, start_date) DO UPDATE SET
                system_name = excluded.system_name,
                end_date = excluded.end_date,
                current = excluded.current",
            params![
                entry.ccn,
                entry.system_id,
                entry.system_name,
                entry.start_date.to_string(),
                entry.end_date.map(|d| d.to_string()),
                entry.current as i64,
            ],
        )?;
    }

    Ok(())
}

// ============================================================================
// ROW MAPPING
// ============================================================================

const HOSPITAL_COLUMNS: &str = "ccn, npi, name, street, city, state, zip, phone, hospital_type, \
     ownership, system_id, system_name, status, certification_date, \
     termination_date, bed_count, quality_score, source, last_updated, metadata";

fn parse_day(value: Option<String>) -> Option<NaiveDate> {
    value.and_then(|v| NaiveDate::parse_from_str(&v, "%Y-%m-%d").ok())
}

fn hospital_from_row(row: &Row) -> rusqlite::Result<HospitalRecord> {
    let status_str: String = row.get(12)?;
    let status = HospitalStatus::parse(&status_str).ok_or(rusqlite::Error::InvalidQuery)?;

    let last_updated_str: String = row.get(18)?;
    let last_updated = DateTime::parse_from_rfc3339(&last_updated_str)
        .map_err(|_| rusqlite::Error::InvalidQuery)?
        .with_timezone(&Utc);

    let metadata_json: Option<String> = row.get(19)?;
    let metadata = metadata_json
        .and_then(|json| serde_json::from_str(&json).ok())
        .unwrap_or_else(HashMap::new);

    Ok(HospitalRecord {
        ccn: row.get(0)?,
        npi: row.get(1)?,
        name: row.get(2)?,
        street: row.get(3)?,
        city: row.get(4)?,
        state: row.get(5)?,
        zip: row.get(6)?,
        phone: row.get(7)?,
        hospital_type: row.get(8)?,
        ownership: row.get(9)?,
        system_id: row.get(10)?,
        system_name: row.get(11)?,
        status,
        certification_date: parse_day(row.get(13)?),
        termination_date: parse_day(row.get(14)?),
        bed_count: row.get(15)?,
        quality_score: row.get(16)?,
        source: row.get(17)?,
        last_updated,
        metadata,
    })
}

fn snapshot_from_row(row: &Row) -> rusqlite::Result<AnnualSnapshot> {
    Ok(AnnualSnapshot {
        ccn: row.get(0)?,
        fiscal_year: row.get(1)?,
        name: row.get(2)?,
        npi: row.get(3)?,
        ownership: row.get(4)?,
        street: row.get(5)?,
        city: row.get(6)?,
        state: row.get(7)?,
        zip: row.get(8)?,
        system_id: row.get(9)?,
        system_name: row.get(10)?,
        bed_count: row.get(11)?,
        total_revenue: row.get(12)?,
        net_income: row.get(13)?,
    })
}

fn event_from_row(row: &Row) -> rusqlite::Result<IdentifierChangeEvent> {
    let change_type_str: String = row.get(2)?;
    let change_type =
        ChangeType::parse(&change_type_str).ok_or(rusqlite::Error::InvalidQuery)?;
    let effective_str: String = row.get(5)?;
    let effective_date = NaiveDate::parse_from_str(&effective_str, "%Y-%m-%d")
        .map_err(|_| rusqlite::Error::InvalidQuery)?;

    Ok(IdentifierChangeEvent {
        event_id: row.get(0)?,
        ccn: row.get(1)?,
        change_type,
        old_value: row.get(3)?,
        new_value: row.get(4)?,
        effective_date,
        related_ccn: row.get(6)?,
    })
}

fn address_from_row(row: &Row) -> rusqlite::Result<AddressHistoryEntry> {
    let effective_str: String = row.get(5)?;
    let effective_date = NaiveDate::parse_from_str(&effective_str, "%Y-%m-%d")
        .map_err(|_| rusqlite::Error::InvalidQuery)?;
    let current: i64 = row.get(7)?;

    Ok(AddressHistoryEntry {
        ccn: row.get(0)?,
        street: row.get(1)?,
        city: row.get(2)?,
        state: row.get(3)?,
        zip: row.get(4)?,
        effective_date,
        end_date: parse_day(row.get(6)?),
        current: current != 0,
    })
}

fn membership_from_row(row: &Row) -> rusqlite::Result<SystemMembershipEntry> {
    let start_str: String = row.get(3)?;
    let start_date = NaiveDate::parse_from_str(&start_str, "%Y-%m-%d")
        .map_err(|_| rusqlite::Error::InvalidQuery)?;
    let current: i64 = row.get(5)?;

    Ok(SystemMembershipEntry {
        ccn: row.get(0)?,
        system_id: row.get(1)?,
        system_name: row.get(2)?,
        start_date,
        end_date: parse_day(row.get(4)?),
        current: current != 0,
    })
}

// ============================================================================
// READ QUERIES
// ============================================================================

pub fn get_current(conn: &Connection, ccn: &str) -> Result<Option<HospitalRecord>> {
    let record = conn
        .query_row(
            &format!("SELECT {HOSPITAL_COLUMNS} FROM hospitals WHERE ccn = ?1"),
            params![ccn],
            hospital_from_row,
        )
        .optional()?;

    Ok(record)
}

pub fn list_by_state(conn: &Connection, state: &str) -> Result<Vec<HospitalRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {HOSPITAL_COLUMNS} FROM hospitals WHERE state = ?1 ORDER BY ccn"
    ))?;
    let records = stmt
        .query_map(params![state], hospital_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(records)
}

pub fn list_by_system(conn: &Connection, system_id: &str) -> Result<Vec<HospitalRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {HOSPITAL_COLUMNS} FROM hospitals WHERE system_id = ?1 ORDER BY ccn"
    ))?;
    let records = stmt
        .query_map(params![system_id], hospital_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(records)
}

/// Change events for a CCN, oldest first, optionally filtered by type.
pub fn list_history(
    conn: &Connection,
    ccn: &str,
    change_type: Option<ChangeType>,
) -> Result<Vec<IdentifierChangeEvent>> {
    const COLUMNS: &str =
        "event_id, ccn, change_type, old_value, new_value, effective_date, related_ccn";

    let events = match change_type {
        Some(ct) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM identifier_changes
                 WHERE ccn = ?1 AND change_type = ?2
                 ORDER BY effective_date, id"
            ))?;
            stmt.query_map(params![ccn, ct.as_str()], event_from_row)?
                .collect::<Result<Vec<_>, _>>()?
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM identifier_changes
                 WHERE ccn = ?1
                 ORDER BY effective_date, id"
            ))?;
            stmt.query_map(params![ccn], event_from_row)?
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    Ok(events)
}

pub fn list_snapshots(conn: &Connection, ccn: &str) -> Result<Vec<AnnualSnapshot>> {
    let mut stmt = conn.prepare(
        "SELECT ccn, fiscal_year, name, npi, ownership, street, city, state, zip,
                system_id, system_name, bed_count, total_revenue, net_income
         FROM annual_snapshots
         WHERE ccn = ?1
         ORDER BY fiscal_year",
    )?;
    let snapshots = stmt
        .query_map(params![ccn], snapshot_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(snapshots)
}

pub fn list_addresses(conn: &Connection, ccn: &str) -> Result<Vec<AddressHistoryEntry>> {
    let mut stmt = conn.prepare(
        "SELECT ccn, street, city, state, zip, effective_date, end_date, current
         FROM address_history
         WHERE ccn = ?1
         ORDER BY effective_date",
    )?;
    let entries = stmt
        .query_map(params![ccn], address_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(entries)
}

pub fn list_memberships(conn: &Connection, ccn: &str) -> Result<Vec<SystemMembershipEntry>> {
    let mut stmt = conn.prepare(
        "SELECT ccn, system_id, system_name, start_date, end_date, current
         FROM system_membership
         WHERE ccn = ?1
         ORDER BY start_date",
    )?;
    let entries = stmt
        .query_map(params![ccn], membership_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(entries)
}

pub fn count_hospitals(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM hospitals", [], |row| row.get(0))?;
    Ok(count)
}

// ============================================================================
// FULL-TABLE READS (CSV export)
// ============================================================================

pub fn get_all_hospitals(conn: &Connection) -> Result<Vec<HospitalRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {HOSPITAL_COLUMNS} FROM hospitals ORDER BY ccn"
    ))?;
    let records = stmt
        .query_map([], hospital_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(records)
}

pub fn get_all_snapshots(conn: &Connection) -> Result<Vec<AnnualSnapshot>> {
    let mut stmt = conn.prepare(
        "SELECT ccn, fiscal_year, name, npi, ownership, street, city, state, zip,
                system_id, system_name, bed_count, total_revenue, net_income
         FROM annual_snapshots
         ORDER BY ccn, fiscal_year",
    )?;
    let snapshots = stmt
        .query_map([], snapshot_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(snapshots)
}

pub fn get_all_events(conn: &Connection) -> Result<Vec<IdentifierChangeEvent>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, ccn, change_type, old_value, new_value, effective_date, related_ccn
         FROM identifier_changes
         ORDER BY ccn, effective_date, id",
    )?;
    let events = stmt
        .query_map([], event_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

pub fn get_all_addresses(conn: &Connection) -> Result<Vec<AddressHistoryEntry>> {
    let mut stmt = conn.prepare(
        "SELECT ccn, street, city, state, zip, effective_date, end_date, current
         FROM address_history
         ORDER BY ccn, effective_date",
    )?;
    let entries = stmt
        .query_map([], address_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(entries)
}

pub fn get_all_memberships(conn: &Connection) -> Result<Vec<SystemMembershipEntry>> {
    let mut stmt = conn.prepare(
        "SELECT ccn, system_id, system_name, start_date, end_date, current
         FROM system_membership
         ORDER BY ccn, start_date",
    )?;
    let entries = stmt
        .query_map([], membership_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(entries)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::fiscal_year_start;
    use chrono::Duration;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn test_record(ccn: &str) -> HospitalRecord {
        let mut record = HospitalRecord::new(ccn);
        record.name = Some("City General".to_string());
        record.state = Some("IL".to_string());
        record.system_id = Some("S100".to_string());
        record.quality_score = 75;
        record.source = "hcris+hgi".to_string();
        record
    }

    fn test_snapshot(ccn: &str, fiscal_year: i32, name: &str) -> AnnualSnapshot {
        AnnualSnapshot {
            ccn: ccn.to_string(),
            fiscal_year,
            name: Some(name.to_string()),
            npi: None,
            ownership: None,
            street: None,
            city: None,
            state: None,
            zip: None,
            system_id: None,
            system_name: None,
            bed_count: Some(100),
            total_revenue: None,
            net_income: None,
        }
    }

    #[test]
    fn test_upsert_insert_update_stale() {
        let conn = test_conn();

        let mut record = test_record("010001");
        assert_eq!(
            upsert_hospital(&conn, &record).unwrap(),
            UpsertOutcome::Inserted
        );

        record.name = Some("City General Medical Center".to_string());
        record.last_updated = record.last_updated + Duration::seconds(10);
        assert_eq!(
            upsert_hospital(&conn, &record).unwrap(),
            UpsertOutcome::Updated
        );

        let stored = get_current(&conn, "010001").unwrap().unwrap();
        assert_eq!(
            stored.name.as_deref(),
            Some("City General Medical Center")
        );

        // An older write loses; the stored record is untouched.
        let mut old_run = test_record("010001");
        old_run.name = Some("Obsolete Name".to_string());
        old_run.last_updated = record.last_updated - Duration::hours(1);
        assert_eq!(
            upsert_hospital(&conn, &old_run).unwrap(),
            UpsertOutcome::Stale
        );
        let stored = get_current(&conn, "010001").unwrap().unwrap();
        assert_eq!(
            stored.name.as_deref(),
            Some("City General Medical Center")
        );
    }

    #[test]
    fn test_get_current_round_trip() {
        let conn = test_conn();

        let mut record = test_record("010001");
        record.status = HospitalStatus::Closed;
        record.termination_date = NaiveDate::from_ymd_opt(2021, 9, 30);
        record
            .metadata
            .insert("Emergency Services".to_string(), serde_json::json!("Yes"));
        upsert_hospital(&conn, &record).unwrap();

        let stored = get_current(&conn, "010001").unwrap().unwrap();
        assert_eq!(stored.ccn, "010001");
        assert_eq!(stored.status, HospitalStatus::Closed);
        assert_eq!(
            stored.termination_date,
            NaiveDate::from_ymd_opt(2021, 9, 30)
        );
        assert_eq!(stored.quality_score, 75);
        assert_eq!(
            stored.metadata.get("Emergency Services"),
            Some(&serde_json::json!("Yes"))
        );

        assert!(get_current(&conn, "999999").unwrap().is_none());
    }

    #[test]
    fn test_snapshots_are_immutable_once_recorded() {
        let conn = test_conn();

        assert!(insert_snapshot(&conn, &test_snapshot("010001", 2023, "Original")).unwrap());
        assert!(
            !insert_snapshot(&conn, &test_snapshot("010001", 2023, "Revised")).unwrap(),
            "second write for the same (ccn, fiscal_year) is ignored"
        );

        let snapshots = list_snapshots(&conn, "010001").unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].name.as_deref(), Some("Original"));
    }

    #[test]
    fn test_change_event_dedup() {
        let conn = test_conn();
        let date = fiscal_year_start(2023);

        let event = IdentifierChangeEvent::new(
            "010001",
            ChangeType::Name,
            Some("City General".to_string()),
            Some("City General Medical Center".to_string()),
            date,
        );
        assert!(insert_change_event(&conn, &event).unwrap());

        // A second run builds the same event with a fresh UUID.
        let rerun = IdentifierChangeEvent::new(
            "010001",
            ChangeType::Name,
            Some("City General".to_string()),
            Some("City General Medical Center".to_string()),
            date,
        );
        assert!(
            !insert_change_event(&conn, &rerun).unwrap(),
            "identical content is deduplicated"
        );

        let history = list_history(&conn, "010001", None).unwrap();
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_list_history_filters_and_orders() {
        let conn = test_conn();

        let npi_event = IdentifierChangeEvent::new(
            "010001",
            ChangeType::Npi,
            Some("1111111111".to_string()),
            Some("2222222222".to_string()),
            fiscal_year_start(2023),
        );
        let name_event = IdentifierChangeEvent::new(
            "010001",
            ChangeType::Name,
            Some("Old".to_string()),
            Some("New".to_string()),
            fiscal_year_start(2021),
        );
        insert_change_event(&conn, &npi_event).unwrap();
        insert_change_event(&conn, &name_event).unwrap();

        let all = list_history(&conn, "010001", None).unwrap();
        assert_eq!(all.len(), 2);
        assert!(
            all[0].effective_date < all[1].effective_date,
            "history is ordered by effective date"
        );

        let names = list_history(&conn, "010001", Some(ChangeType::Name)).unwrap();
        assert_eq!(names.len(), 1);
        assert_eq!(names[0].change_type, ChangeType::Name);
    }

    #[test]
    fn test_annotate_merge() {
        let conn = test_conn();
        let date = NaiveDate::from_ymd_opt(2022, 7, 1).unwrap();

        assert!(annotate_merge(&conn, "020002", "010001", date).unwrap());
        assert!(
            !annotate_merge(&conn, "020002", "010001", date).unwrap(),
            "repeating the same annotation is a no-op"
        );

        let merges = list_history(&conn, "020002", Some(ChangeType::CcnMerge)).unwrap();
        assert_eq!(merges.len(), 1);
        assert_eq!(merges[0].related_ccn.as_deref(), Some("010001"));
    }

    #[test]
    fn test_one_current_address_after_rerun() {
        let conn = test_conn();

        // First run: one open interval.
        let first = vec![AddressHistoryEntry {
            ccn: "010001".to_string(),
            street: Some("100 Main St".to_string()),
            city: Some("Springfield".to_string()),
            state: Some("IL".to_string()),
            zip: Some("62701".to_string()),
            effective_date: fiscal_year_start(2021),
            end_date: None,
            current: true,
        }];
        replace_address_history(&conn, "010001", &first).unwrap();

        // Later run: the old interval is now closed, a new one is current.
        let second = vec![
            AddressHistoryEntry {
                end_date: Some(fiscal_year_start(2023)),
                current: false,
                ..first[0].clone()
            },
            AddressHistoryEntry {
                ccn: "010001".to_string(),
                street: Some("200 Oak Ave".to_string()),
                city: Some("Springfield".to_string()),
                state: Some("IL".to_string()),
                zip: Some("62702".to_string()),
                effective_date: fiscal_year_start(2023),
                end_date: None,
                current: true,
            },
        ];
        replace_address_history(&conn, "010001", &second).unwrap();

        let entries = list_addresses(&conn, "010001").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries.iter().filter(|e| e.current).count(), 1);
        assert_eq!(entries[0].end_date, Some(fiscal_year_start(2023)));
        assert!(entries[1].current);
        assert_eq!(entries[1].street.as_deref(), Some("200 Oak Ave"));
    }

    #[test]
    fn test_membership_history_round_trip() {
        let conn = test_conn();

        let entries = vec![SystemMembershipEntry {
            ccn: "010001".to_string(),
            system_id: "S100".to_string(),
            system_name: Some("Summit Health".to_string()),
            start_date: fiscal_year_start(2021),
            end_date: None,
            current: true,
        }];
        replace_system_membership(&conn, "010001", &entries).unwrap();

        let stored = list_memberships(&conn, "010001").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].system_id, "S100");
        assert!(stored[0].current);
    }

    #[test]
    fn test_list_by_state_and_system() {
        let conn = test_conn();

        upsert_hospital(&conn, &test_record("010001")).unwrap();
        let mut other = test_record("450002");
        other.state = Some("TX".to_string());
        other.system_id = Some("S200".to_string());
        upsert_hospital(&conn, &other).unwrap();

        let illinois = list_by_state(&conn, "IL").unwrap();
        assert_eq!(illinois.len(), 1);
        assert_eq!(illinois[0].ccn, "010001");

        let summit = list_by_system(&conn, "S100").unwrap();
        assert_eq!(summit.len(), 1);
        assert_eq!(summit[0].ccn, "010001");

        assert_eq!(count_hospitals(&conn).unwrap(), 2);
    }
}
