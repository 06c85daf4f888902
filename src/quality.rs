// ✅ Quality Scorer
// Completeness score for a reconciled hospital record: 0-100, recomputable
// at any time from the record alone.

use crate::records::HospitalRecord;
use serde::Serialize;

/// Base score granted for CCN presence.
const BASE_SCORE: u32 = 50;

/// One scored component of a record.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreComponent {
    pub field: &'static str,
    pub weight: u32,
    pub populated: bool,
}

/// Compute the completeness score for a record.
///
/// Base 50 for a present CCN, plus a fixed weight per populated field. The
/// weights total 105, so the sum is clamped to 100: a fully populated record
/// scores exactly 100 and a CCN-only record exactly 50. A field counts as
/// populated only when non-null and non-empty after trimming.
pub fn score(record: &HospitalRecord) -> i64 {
    if record.ccn.trim().is_empty() {
        return 0;
    }

    let earned: u32 = components(record)
        .iter()
        .filter(|c| c.populated)
        .map(|c| c.weight)
        .sum();

    (BASE_SCORE + earned).min(100) as i64
}

/// Per-field breakdown behind [`score`], for run reports and lookups.
pub fn components(record: &HospitalRecord) -> Vec<ScoreComponent> {
    fn text(field: &'static str, weight: u32, value: &Option<String>) -> ScoreComponent {
        ScoreComponent {
            field,
            weight,
            populated: value.as_deref().map(|v| !v.trim().is_empty()).unwrap_or(false),
        }
    }

    vec![
        text("name", 15, &record.name),
        text("npi", 5, &record.npi),
        text("street", 5, &record.street),
        text("city", 5, &record.city),
        text("state", 5, &record.state),
        text("zip", 5, &record.zip),
        text("phone", 3, &record.phone),
        text("hospital_type", 5, &record.hospital_type),
        text("ownership", 3, &record.ownership),
        ScoreComponent {
            field: "certification_date",
            weight: 2,
            populated: record.certification_date.is_some(),
        },
        ScoreComponent {
            field: "bed_count",
            weight: 2,
            populated: record.bed_count.is_some(),
        },
    ]
}
