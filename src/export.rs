// 📤 Flat CSV Exports
// One file per entity, for downstream consumers that do not speak SQLite.

use crate::store;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use rusqlite::Connection;
use std::path::Path;

/// Files written by one export pass, with row counts.
#[derive(Debug)]
pub struct ExportReport {
    pub files: Vec<(String, usize)>,
}

fn opt(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn day(value: &Option<NaiveDate>) -> String {
    value.map(|d| d.to_string()).unwrap_or_default()
}

fn flag(value: bool) -> String {
    let text = if value { "true" } else { "false" };
    text.to_string()
}

/// Export all five entities to `out_dir`, creating it if needed.
pub fn export_all(conn: &Connection, out_dir: &Path) -> Result<ExportReport> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create export directory {}", out_dir.display()))?;

    let files = vec![
        ("hospitals.csv".to_string(), export_hospitals(conn, &out_dir.join("hospitals.csv"))?),
        ("snapshots.csv".to_string(), export_snapshots(conn, &out_dir.join("snapshots.csv"))?),
        ("changes.csv".to_string(), export_changes(conn, &out_dir.join("changes.csv"))?),
        ("addresses.csv".to_string(), export_addresses(conn, &out_dir.join("addresses.csv"))?),
        ("systems.csv".to_string(), export_systems(conn, &out_dir.join("systems.csv"))?),
    ];

    Ok(ExportReport { files })
}

fn export_hospitals(conn: &Connection, path: &Path) -> Result<usize> {
    let records = store::get_all_hospitals(conn)?;
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    wtr.write_record([
        "ccn",
        "npi",
        "name",
        "street",
        "city",
        "state",
        "zip",
        "phone",
        "hospital_type",
        "ownership",
        "system_id",
        "system_name",
        "status",
        "certification_date",
        "termination_date",
        "bed_count",
        "quality_score",
        "source",
        "last_updated",
    ])?;

    for r in &records {
        wtr.write_record([
            r.ccn.clone(),
            opt(&r.npi),
            opt(&r.name),
            opt(&r.street),
            opt(&r.city),
            opt(&r.state),
            opt(&r.zip),
            opt(&r.phone),
            opt(&r.hospital_type),
            opt(&r.ownership),
            opt(&r.system_id),
            opt(&r.system_name),
            r.status.as_str().to_string(),
            day(&r.certification_date),
            day(&r.termination_date),
            r.bed_count.map(|b| b.to_string()).unwrap_or_default(),
            r.quality_score.to_string(),
            r.source.clone(),
            r.last_updated.to_rfc3339(),
        ])?;
    }

    wtr.flush()?;
    Ok(records.len())
}

fn export_snapshots(conn: &Connection, path: &Path) -> Result<usize> {
    let snapshots = store::get_all_snapshots(conn)?;
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    wtr.write_record([
        "ccn",
        "fiscal_year",
        "name",
        "npi",
        "ownership",
        "street",
        "city",
        "state",
        "zip",
        "system_id",
        "system_name",
        "bed_count",
        "total_revenue",
        "net_income",
        "operating_margin",
    ])?;

    for s in &snapshots {
        wtr.write_record([
            s.ccn.clone(),
            s.fiscal_year.to_string(),
            opt(&s.name),
            opt(&s.npi),
            opt(&s.ownership),
            opt(&s.street),
            opt(&s.city),
            opt(&s.state),
            opt(&s.zip),
            opt(&s.system_id),
            opt(&s.system_name),
            s.bed_count.map(|b| b.to_string()).unwrap_or_default(),
            s.total_revenue.map(|v| v.to_string()).unwrap_or_default(),
            s.net_income.map(|v| v.to_string()).unwrap_or_default(),
            s.operating_margin()
                .map(|m| format!("{m:.4}"))
                .unwrap_or_default(),
        ])?;
    }

    wtr.flush()?;
    Ok(snapshots.len())
}

fn export_changes(conn: &Connection, path: &Path) -> Result<usize> {
    let events = store::get_all_events(conn)?;
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    wtr.write_record([
        "event_id",
        "ccn",
        "change_type",
        "old_value",
        "new_value",
        "effective_date",
        "related_ccn",
    ])?;

    for e in &events {
        wtr.write_record([
            e.event_id.clone(),
            e.ccn.clone(),
            e.change_type.as_str().to_string(),
            opt(&e.old_value),
            opt(&e.new_value),
            e.effective_date.to_string(),
            opt(&e.related_ccn),
        ])?;
    }

    wtr.flush()?;
    Ok(events.len())
}

fn export_addresses(conn: &Connection, path: &Path) -> Result<usize> {
    let entries = store::get_all_addresses(conn)?;
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    wtr.write_record([
        "ccn",
        "street",
        "city",
        "state",
        "zip",
        "effective_date",
        "end_date",
        "current",
    ])?;

    for a in &entries {
        wtr.write_record([
            a.ccn.clone(),
            opt(&a.street),
            opt(&a.city),
            opt(&a.state),
            opt(&a.zip),
            a.effective_date.to_string(),
            day(&a.end_date),
            flag(a.current),
        ])?;
    }

    wtr.flush()?;
    Ok(entries.len())
}

fn export_systems(conn: &Connection, path: &Path) -> Result<usize> {
    let entries = store::get_all_memberships(conn)?;
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    wtr.write_record([
        "ccn",
        "system_id",
        "system_name",
        "start_date",
        "end_date",
        "current",
    ])?;

    for m in &entries {
        wtr.write_record([
            m.ccn.clone(),
            m.system_id.clone(),
            opt(&m.system_name),
            m.start_date.to_string(),
            day(&m.end_date),
            flag(m.current),
        ])?;
    }

    wtr.flush()?;
    Ok(entries.len())
}
