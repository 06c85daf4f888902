// Hospital Master - Core Library
// Exposes all pipeline stages for use in the CLI and tests

pub mod ccn;
pub mod export;
pub mod loader;
pub mod pipeline;
pub mod quality;
pub mod reconcile;
pub mod records;
pub mod store;

// Re-export commonly used types
pub use ccn::normalize_ccn;
pub use export::{export_all, ExportReport};
pub use loader::{detect_source, load_from_reader, load_source, LoadReport, SourceKind, SourceRecord};
pub use pipeline::{run, run_records, RunSummary};
pub use quality::{components, score, ScoreComponent};
pub use reconcile::{BatchOutcome, ReconcileOutcome, Reconciler};
pub use records::{
    fiscal_year_end, fiscal_year_start, AddressHistoryEntry, AnnualSnapshot, ChangeType,
    HospitalRecord, HospitalStatus, IdentifierChangeEvent, SystemMembershipEntry,
};
pub use store::{
    annotate_merge, count_hospitals, get_current, insert_change_event, insert_snapshot,
    list_addresses, list_by_state, list_by_system, list_history, list_memberships,
    list_snapshots, replace_address_history, replace_system_membership, setup_database,
    upsert_hospital, UpsertOutcome,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
