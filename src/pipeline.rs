// 🔁 Run Orchestration
// Loader → Reconciler → Scorer → Store, with every write for a run inside
// one transaction. A mid-run failure rolls back to the previous state; a
// completed run replaces current records wholesale.

use crate::loader::{self, SourceKind, SourceRecord};
use crate::quality;
use crate::reconcile::Reconciler;
use crate::store::{self, UpsertOutcome};
use anyhow::{Context, Result};
use rusqlite::Connection;
use std::fmt;
use std::path::PathBuf;

/// Counters for one pipeline run, reported regardless of outcome.
#[derive(Debug, Default, Clone)]
pub struct RunSummary {
    pub files_loaded: usize,
    pub rows_read: usize,
    pub rows_rejected: usize,
    pub hospitals_processed: usize,
    pub hospitals_new: usize,
    pub hospitals_updated: usize,
    pub unreconcilable: usize,
    pub snapshots_recorded: usize,
    pub events_recorded: usize,
    pub events_deduplicated: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run summary:")?;
        writeln!(f, "  files loaded:        {}", self.files_loaded)?;
        writeln!(
            f,
            "  rows read:           {} ({} rejected)",
            self.rows_read, self.rows_rejected
        )?;
        writeln!(
            f,
            "  hospitals:           {} processed ({} new, {} updated, {} unreconcilable)",
            self.hospitals_processed,
            self.hospitals_new,
            self.hospitals_updated,
            self.unreconcilable
        )?;
        writeln!(f, "  snapshots recorded:  {}", self.snapshots_recorded)?;
        write!(
            f,
            "  change events:       {} recorded, {} deduplicated",
            self.events_recorded, self.events_deduplicated
        )
    }
}

/// Load the given source files and run the full pipeline against the store.
pub fn run(conn: &mut Connection, inputs: &[(PathBuf, SourceKind)]) -> Result<RunSummary> {
    let mut files_loaded = 0;
    let mut rows_read = 0;
    let mut rows_rejected = 0;
    let mut sources: Vec<SourceRecord> = Vec::new();

    for (path, kind) in inputs {
        let report = loader::load_source(path, *kind)?;
        println!(
            "✓ {} ({}): {} rows, {} rejected",
            report.source_file,
            kind.name(),
            report.rows_read,
            report.rejects
        );
        files_loaded += 1;
        rows_read += report.rows_read;
        rows_rejected += report.rejects;
        sources.extend(report.records);
    }

    let mut summary = run_records(conn, sources)?;
    summary.files_loaded = files_loaded;
    summary.rows_read = rows_read;
    summary.rows_rejected = rows_rejected;

    Ok(summary)
}

/// Reconcile already-loaded records, score them, and commit. Split out from
/// [`run`] so the stages after file I/O run against in-memory data in tests.
pub fn run_records(conn: &mut Connection, sources: Vec<SourceRecord>) -> Result<RunSummary> {
    let mut summary = RunSummary::default();

    let batch = Reconciler::new().reconcile_all(sources);
    summary.unreconcilable = batch.unreconcilable.len();
    for ccn in &batch.unreconcilable {
        println!("⚠ Skipping CCN {ccn}: no usable snapshot or reference data");
    }

    let tx = conn
        .transaction()
        .context("Failed to open run transaction")?;

    for mut outcome in batch.outcomes {
        outcome.record.quality_score = quality::score(&outcome.record);

        match store::upsert_hospital(&tx, &outcome.record)? {
            UpsertOutcome::Inserted => summary.hospitals_new += 1,
            UpsertOutcome::Updated => summary.hospitals_updated += 1,
            UpsertOutcome::Stale => {}
        }

        for snapshot in &outcome.snapshots {
            if store::insert_snapshot(&tx, snapshot)? {
                summary.snapshots_recorded += 1;
            }
        }

        for event in &outcome.events {
            if store::insert_change_event(&tx, event)? {
                summary.events_recorded += 1;
            } else {
                summary.events_deduplicated += 1;
            }
        }

        store::replace_address_history(&tx, &outcome.record.ccn, &outcome.addresses)?;
        store::replace_system_membership(&tx, &outcome.record.ccn, &outcome.systems)?;

        summary.hospitals_processed += 1;
    }

    tx.commit().context("Failed to commit run")?;

    Ok(summary)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{ChangeType, HospitalStatus};
    use std::collections::HashMap;

    fn hcris_row(ccn: &str, fiscal_year: i32, name: &str) -> SourceRecord {
        SourceRecord {
            ccn: ccn.to_string(),
            kind: SourceKind::HcrisReport,
            fiscal_year: Some(fiscal_year),
            name: Some(name.to_string()),
            npi: None,
            street: Some("100 Main St".to_string()),
            city: Some("Springfield".to_string()),
            state: Some("IL".to_string()),
            zip: Some("62701".to_string()),
            phone: None,
            hospital_type: None,
            ownership: Some("Voluntary Nonprofit".to_string()),
            system_id: None,
            system_name: None,
            certification_date: None,
            bed_count: Some(250),
            total_revenue: None,
            net_income: None,
            source_file: "hcris_test.csv".to_string(),
            line_number: 1,
            extras: HashMap::new(),
        }
    }

    fn scenario_sources() -> Vec<SourceRecord> {
        vec![
            hcris_row("010001", 2021, "City General"),
            hcris_row("010001", 2023, "City General Medical Center"),
            hcris_row("020002", 2020, "Fading Memorial"),
            hcris_row("020002", 2021, "Fading Memorial"),
            hcris_row("030003", 2024, "Evergreen Medical"),
        ]
    }

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        store::setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_full_run_over_in_memory_store() {
        let mut conn = test_conn();

        let summary = run_records(&mut conn, scenario_sources()).unwrap();

        assert_eq!(summary.hospitals_processed, 3);
        assert_eq!(summary.hospitals_new, 3);
        assert_eq!(summary.hospitals_updated, 0);
        assert_eq!(summary.snapshots_recorded, 5);
        assert_eq!(summary.events_recorded, 1, "one name change");
        assert_eq!(summary.events_deduplicated, 0);
        assert_eq!(summary.unreconcilable, 0);

        let record = store::get_current(&conn, "010001").unwrap().unwrap();
        assert_eq!(
            record.name.as_deref(),
            Some("City General Medical Center")
        );
        assert_eq!(record.status, HospitalStatus::Active);
        assert!(
            record.quality_score > 50,
            "populated fields raise the score above the CCN base"
        );

        let closed = store::get_current(&conn, "020002").unwrap().unwrap();
        assert_eq!(closed.status, HospitalStatus::Closed);

        let history = store::list_history(&conn, "010001", Some(ChangeType::Name)).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].old_value.as_deref(), Some("City General"));

        let addresses = store::list_addresses(&conn, "010001").unwrap();
        assert_eq!(addresses.iter().filter(|a| a.current).count(), 1);
    }

    #[test]
    fn test_rerun_on_identical_input_is_idempotent() {
        let mut conn = test_conn();

        let first = run_records(&mut conn, scenario_sources()).unwrap();
        let before = store::get_current(&conn, "010001").unwrap().unwrap();

        let second = run_records(&mut conn, scenario_sources()).unwrap();
        let after = store::get_current(&conn, "010001").unwrap().unwrap();

        assert_eq!(first.events_recorded, 1);
        assert_eq!(second.events_recorded, 0, "history never duplicates");
        assert_eq!(second.events_deduplicated, 1);
        assert_eq!(second.hospitals_new, 0);
        assert_eq!(second.hospitals_updated, 3);
        assert_eq!(second.snapshots_recorded, 0, "snapshots are immutable");

        // The current record is unchanged apart from its write timestamp.
        assert_eq!(before.name, after.name);
        assert_eq!(before.status, after.status);
        assert_eq!(before.quality_score, after.quality_score);
        assert_eq!(before.street, after.street);

        let history = store::list_history(&conn, "010001", None).unwrap();
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_quality_scores_are_persisted() {
        let mut conn = test_conn();
        run_records(&mut conn, scenario_sources()).unwrap();

        let record = store::get_current(&conn, "010001").unwrap().unwrap();
        assert_eq!(record.quality_score, quality::score(&record));
        assert!((0..=100).contains(&record.quality_score));
    }

    #[test]
    fn test_summary_display_mentions_every_counter() {
        let summary = RunSummary {
            files_loaded: 3,
            rows_read: 120,
            rows_rejected: 2,
            hospitals_processed: 40,
            hospitals_new: 10,
            hospitals_updated: 30,
            unreconcilable: 1,
            snapshots_recorded: 80,
            events_recorded: 5,
            events_deduplicated: 4,
        };

        let text = summary.to_string();
        for needle in ["120", "2 rejected", "40 processed", "5 recorded", "4 deduplicated"] {
            assert!(text.contains(needle), "summary should mention {needle}");
        }
    }
}
