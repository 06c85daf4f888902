use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use rusqlite::Connection;
use std::env;
use std::path::{Path, PathBuf};

use hospital_master::{
    components, detect_source, export_all, get_current, list_history, list_snapshots,
    normalize_ccn, pipeline, setup_database, store,
};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("run") if args.len() > 2 => run_pipeline(&args[2..]),
        Some("export") if args.len() == 3 => run_export(&args[2]),
        Some("lookup") if args.len() == 3 => run_lookup(&args[2]),
        Some("history") if args.len() == 3 => run_history(&args[2]),
        Some("merge") if args.len() == 5 => run_merge(&args[2], &args[3], &args[4]),
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn print_usage() {
    eprintln!("hospital-master {}", hospital_master::VERSION);
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  hospital-master run <source.csv>...       load sources and reconcile");
    eprintln!("  hospital-master export <out-dir>          write one CSV per entity");
    eprintln!("  hospital-master lookup <ccn>              show the current record");
    eprintln!("  hospital-master history <ccn>             show change events and snapshots");
    eprintln!("  hospital-master merge <ccn> <related> <YYYY-MM-DD>");
    eprintln!("                                            record an operator merge annotation");
    eprintln!();
    eprintln!("Database path comes from HOSPITAL_MASTER_DB (default: hospital_master.db).");
}

fn db_path() -> PathBuf {
    env::var("HOSPITAL_MASTER_DB")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("hospital_master.db"))
}

fn open_db() -> Result<Connection> {
    let path = db_path();
    let conn = Connection::open(&path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    setup_database(&conn)?;
    Ok(conn)
}

fn run_pipeline(files: &[String]) -> Result<()> {
    println!("🏥 Hospital master run: {} input file(s)", files.len());

    let mut inputs = Vec::new();
    for file in files {
        let path = PathBuf::from(file);
        let kind = detect_source(&path)?;
        inputs.push((path, kind));
    }

    let mut conn = open_db()?;
    let summary = pipeline::run(&mut conn, &inputs)?;

    println!();
    println!("{summary}");
    Ok(())
}

fn run_export(out_dir: &str) -> Result<()> {
    let conn = open_db()?;
    let report = export_all(&conn, Path::new(out_dir))?;

    for (file, rows) in &report.files {
        println!("✓ {file}: {rows} rows");
    }
    Ok(())
}

fn run_lookup(raw_ccn: &str) -> Result<()> {
    let ccn = normalize_ccn(raw_ccn).ok_or_else(|| anyhow!("Invalid CCN: {raw_ccn}"))?;
    let conn = open_db()?;

    let record = match get_current(&conn, &ccn)? {
        Some(record) => record,
        None => {
            println!("No record for CCN {ccn}");
            return Ok(());
        }
    };

    println!("CCN {}  [{}]", record.ccn, record.status.as_str());
    println!("  name:       {}", record.name.as_deref().unwrap_or("-"));
    println!("  npi:        {}", record.npi.as_deref().unwrap_or("-"));
    println!(
        "  address:    {}, {}, {} {}",
        record.street.as_deref().unwrap_or("-"),
        record.city.as_deref().unwrap_or("-"),
        record.state.as_deref().unwrap_or("-"),
        record.zip.as_deref().unwrap_or("-"),
    );
    println!("  phone:      {}", record.phone.as_deref().unwrap_or("-"));
    println!("  type:       {}", record.hospital_type.as_deref().unwrap_or("-"));
    println!("  ownership:  {}", record.ownership.as_deref().unwrap_or("-"));
    if let Some(system) = &record.system_name {
        println!("  system:     {system}");
    }
    if let Some(beds) = record.bed_count {
        println!("  beds:       {beds}");
    }
    if let Some(date) = record.certification_date {
        println!("  certified:  {date}");
    }
    if let Some(date) = record.termination_date {
        println!("  terminated: {date}");
    }
    println!("  source:     {}", record.source);
    println!("  quality:    {}/100", record.quality_score);

    let missing: Vec<&str> = components(&record)
        .iter()
        .filter(|c| !c.populated)
        .map(|c| c.field)
        .collect();
    if !missing.is_empty() {
        println!("  missing:    {}", missing.join(", "));
    }

    Ok(())
}

fn run_history(raw_ccn: &str) -> Result<()> {
    let ccn = normalize_ccn(raw_ccn).ok_or_else(|| anyhow!("Invalid CCN: {raw_ccn}"))?;
    let conn = open_db()?;

    let events = list_history(&conn, &ccn, None)?;
    println!("Change events for {ccn}: {}", events.len());
    for event in &events {
        let related = event
            .related_ccn
            .as_deref()
            .map(|r| format!(" (related CCN {r})"))
            .unwrap_or_default();
        println!(
            "  {}  {:<10} {} -> {}{}",
            event.effective_date,
            event.change_type.as_str(),
            event.old_value.as_deref().unwrap_or("-"),
            event.new_value.as_deref().unwrap_or("-"),
            related,
        );
    }

    let snapshots = list_snapshots(&conn, &ccn)?;
    println!("Annual snapshots: {}", snapshots.len());
    for snapshot in &snapshots {
        let margin = snapshot
            .operating_margin()
            .map(|m| format!("{:.1}%", m * 100.0))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  FY{}  {:<40} beds: {:<5} margin: {}",
            snapshot.fiscal_year,
            snapshot.name.as_deref().unwrap_or("-"),
            snapshot
                .bed_count
                .map(|b| b.to_string())
                .unwrap_or_else(|| "-".to_string()),
            margin,
        );
    }

    Ok(())
}

fn run_merge(raw_ccn: &str, raw_related: &str, date: &str) -> Result<()> {
    let ccn = normalize_ccn(raw_ccn).ok_or_else(|| anyhow!("Invalid CCN: {raw_ccn}"))?;
    let related =
        normalize_ccn(raw_related).ok_or_else(|| anyhow!("Invalid related CCN: {raw_related}"))?;
    let effective = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .with_context(|| format!("Invalid effective date (expected YYYY-MM-DD): {date}"))?;

    let conn = open_db()?;
    if store::annotate_merge(&conn, &ccn, &related, effective)? {
        println!("✓ Recorded merge annotation: {ccn} -> {related} effective {effective}");
    } else {
        println!("Annotation already recorded for {ccn} -> {related} on {effective}");
    }

    Ok(())
}
