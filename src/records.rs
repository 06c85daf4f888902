// 🏥 Hospital Master Records
// Current-state records, per-fiscal-year snapshots, and append-only history

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

// ============================================================================
// FISCAL YEAR HELPERS
// ============================================================================

/// Last day of a federal fiscal year (FY2023 ends 2023-09-30).
pub fn fiscal_year_end(fy: i32) -> NaiveDate {
    NaiveDate::from_ymd_opt(fy, 9, 30).expect("valid date")
}

/// First day of a federal fiscal year (FY2023 begins 2022-10-01).
pub fn fiscal_year_start(fy: i32) -> NaiveDate {
    NaiveDate::from_ymd_opt(fy - 1, 10, 1).expect("valid date")
}

// ============================================================================
// STATUS & CHANGE TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HospitalStatus {
    Active,
    Closed,
}

impl HospitalStatus {
    pub fn as_str(&self) -> &str {
        match self {
            HospitalStatus::Active => "active",
            HospitalStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(HospitalStatus::Active),
            "closed" => Some(HospitalStatus::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    Name,
    Npi,
    Ownership,
    /// Operator-curated merge/split annotation. Never inferred from data.
    CcnMerge,
}

impl ChangeType {
    pub fn as_str(&self) -> &str {
        match self {
            ChangeType::Name => "name",
            ChangeType::Npi => "npi",
            ChangeType::Ownership => "ownership",
            ChangeType::CcnMerge => "ccn_merge",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "name" => Some(ChangeType::Name),
            "npi" => Some(ChangeType::Npi),
            "ownership" => Some(ChangeType::Ownership),
            "ccn_merge" => Some(ChangeType::CcnMerge),
            _ => None,
        }
    }
}

// ============================================================================
// CURRENT-STATE RECORD (exactly one per active CCN)
// ============================================================================

/// Reconciled current state for one hospital, keyed by CCN.
/// Replaced wholesale on every reconciliation run that touches the CCN;
/// no partial-field updates exist anywhere in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HospitalRecord {
    pub ccn: String,
    pub npi: Option<String>,
    pub name: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub phone: Option<String>,
    pub hospital_type: Option<String>,
    pub ownership: Option<String>,
    pub system_id: Option<String>,
    pub system_name: Option<String>,
    pub status: HospitalStatus,
    pub certification_date: Option<NaiveDate>,
    pub termination_date: Option<NaiveDate>,
    pub bed_count: Option<i64>,
    /// Completeness score in [0, 100], recomputable from this record alone.
    pub quality_score: i64,
    /// Short codes of the source kinds that contributed, e.g. "hcris+hgi".
    pub source: String,
    pub last_updated: DateTime<Utc>,
    /// Unmapped source columns, preserved so new fields survive without a
    /// schema change.
    #[serde(default)]
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl HospitalRecord {
    /// Empty shell for a CCN; the reconciler fills in everything else.
    pub fn new(ccn: &str) -> Self {
        HospitalRecord {
            ccn: ccn.to_string(),
            npi: None,
            name: None,
            street: None,
            city: None,
            state: None,
            zip: None,
            phone: None,
            hospital_type: None,
            ownership: None,
            system_id: None,
            system_name: None,
            status: HospitalStatus::Active,
            certification_date: None,
            termination_date: None,
            bed_count: None,
            quality_score: 0,
            source: String::new(),
            last_updated: Utc::now(),
            metadata: HashMap::new(),
        }
    }
}

// ============================================================================
// ANNUAL SNAPSHOT (one per CCN × fiscal year, immutable once recorded)
// ============================================================================

/// Identifiers and metrics for one hospital as they appeared in one
/// cost-report fiscal year.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnualSnapshot {
    pub ccn: String,
    pub fiscal_year: i32,
    pub name: Option<String>,
    pub npi: Option<String>,
    pub ownership: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub system_id: Option<String>,
    pub system_name: Option<String>,
    pub bed_count: Option<i64>,
    pub total_revenue: Option<f64>,
    pub net_income: Option<f64>,
}

impl AnnualSnapshot {
    /// Operating margin KPI: net income over total revenue.
    /// None when either input is missing or revenue is zero.
    pub fn operating_margin(&self) -> Option<f64> {
        match (self.net_income, self.total_revenue) {
            (Some(income), Some(revenue)) if revenue != 0.0 => Some(income / revenue),
            _ => None,
        }
    }

    pub fn address_fields(&self) -> (Option<&str>, Option<&str>, Option<&str>, Option<&str>) {
        (
            self.street.as_deref(),
            self.city.as_deref(),
            self.state.as_deref(),
            self.zip.as_deref(),
        )
    }
}

// ============================================================================
// IDENTIFIER CHANGE EVENT (append-only)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifierChangeEvent {
    pub event_id: String,
    pub ccn: String,
    pub change_type: ChangeType,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub effective_date: NaiveDate,
    /// Counterpart CCN for operator-annotated mergers/splits.
    pub related_ccn: Option<String>,
}

impl IdentifierChangeEvent {
    pub fn new(
        ccn: &str,
        change_type: ChangeType,
        old_value: Option<String>,
        new_value: Option<String>,
        effective_date: NaiveDate,
    ) -> Self {
        IdentifierChangeEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            ccn: ccn.to_string(),
            change_type,
            old_value,
            new_value,
            effective_date,
            related_ccn: None,
        }
    }

    /// Content hash for history deduplication. Deliberately excludes the
    /// event UUID: identity is the UUID, deduplication is this hash. Two runs
    /// over the same input produce events with different UUIDs but identical
    /// hashes, and the store keeps only the first.
    pub fn dedup_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}|{}|{}|{}|{}|{}",
            self.ccn,
            self.change_type.as_str(),
            self.old_value.as_deref().unwrap_or(""),
            self.new_value.as_deref().unwrap_or(""),
            self.effective_date,
            self.related_ccn.as_deref().unwrap_or(""),
        ));
        format!("{:x}", hasher.finalize())
    }
}

// ============================================================================
// ADDRESS & SYSTEM MEMBERSHIP HISTORY
// ============================================================================

/// One address interval for one CCN. At most one entry per CCN is current.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressHistoryEntry {
    pub ccn: String,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub effective_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub current: bool,
}

/// One health-system membership interval for one CCN. Same current-flag
/// invariant as addresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMembershipEntry {
    pub ccn: String,
    pub system_id: String,
    pub system_name: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub current: bool,
}

// ============================================================================
// TESTS
// ============================================================================
