// 📂 Reference Loader
// Parses the three CMS source-file kinds into normalized records keyed by
// CCN. Header text drifts between CMS releases, so every field is matched
// against a variant list instead of one exact name.

use crate::ccn::normalize_ccn;
use crate::records::AnnualSnapshot;
use anyhow::{anyhow, Context, Result};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::Path;

// ============================================================================
// SOURCE KINDS
// ============================================================================

/// Which CMS file a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    /// HCRIS cost-report extract: one row per hospital per fiscal year.
    HcrisReport,
    /// Hospital General Information: demographic reference snapshot.
    HospitalGeneralInfo,
    /// Provider of Services: certification reference snapshot.
    ProviderOfServices,
}

impl SourceKind {
    /// Human-readable name for display
    pub fn name(&self) -> &str {
        match self {
            SourceKind::HcrisReport => "HCRIS Cost Report",
            SourceKind::HospitalGeneralInfo => "Hospital General Information",
            SourceKind::ProviderOfServices => "Provider of Services",
        }
    }

    /// Short code for provenance strings
    pub fn code(&self) -> &str {
        match self {
            SourceKind::HcrisReport => "hcris",
            SourceKind::HospitalGeneralInfo => "hgi",
            SourceKind::ProviderOfServices => "pos",
        }
    }
}

/// Detect source kind from filename patterns.
///
/// CMS download scripts name files predictably ("hcris_2023.csv",
/// "Hospital_General_Information.csv", "POS_File_2024.csv"); content
/// sniffing has not been needed.
pub fn detect_source(path: &Path) -> Result<SourceKind> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_lowercase();

    if filename.contains("hcris") || filename.contains("cost_report") || filename.contains("cost-report") {
        return Ok(SourceKind::HcrisReport);
    }

    if filename.contains("general_information")
        || filename.contains("general-information")
        || filename.contains("hospital_general")
        || filename.contains("hospital-general")
        || filename.contains("hgi")
    {
        return Ok(SourceKind::HospitalGeneralInfo);
    }

    if filename.contains("provider_of_services")
        || filename.contains("provider-of-services")
        || filename.contains("pos")
    {
        return Ok(SourceKind::ProviderOfServices);
    }

    Err(anyhow!(
        "Cannot determine source kind from filename: {}",
        path.display()
    ))
}

// ============================================================================
// SOURCE RECORD
// ============================================================================

/// One parsed row, normalized to the shared field set. HCRIS rows carry a
/// fiscal year and become annual snapshots; reference rows do not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRecord {
    pub ccn: String,
    pub kind: SourceKind,
    pub fiscal_year: Option<i32>,
    pub name: Option<String>,
    pub npi: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub phone: Option<String>,
    pub hospital_type: Option<String>,
    pub ownership: Option<String>,
    pub system_id: Option<String>,
    pub system_name: Option<String>,
    pub certification_date: Option<NaiveDate>,
    pub bed_count: Option<i64>,
    pub total_revenue: Option<f64>,
    pub net_income: Option<f64>,

    // Provenance
    pub source_file: String,
    pub line_number: usize,

    /// Columns the fixed mapping does not consume, kept verbatim.
    #[serde(default)]
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub extras: HashMap<String, serde_json::Value>,
}

impl SourceRecord {
    /// HCRIS rows convert to immutable per-fiscal-year snapshots.
    pub fn to_snapshot(&self) -> Option<AnnualSnapshot> {
        let fiscal_year = self.fiscal_year?;
        Some(AnnualSnapshot {
            ccn: self.ccn.clone(),
            fiscal_year,
            name: self.name.clone(),
            npi: self.npi.clone(),
            ownership: self.ownership.clone(),
            street: self.street.clone(),
            city: self.city.clone(),
            state: self.state.clone(),
            zip: self.zip.clone(),
            system_id: self.system_id.clone(),
            system_name: self.system_name.clone(),
            bed_count: self.bed_count,
            total_revenue: self.total_revenue,
            net_income: self.net_income,
        })
    }
}

/// Result of loading one source file.
#[derive(Debug)]
pub struct LoadReport {
    pub kind: SourceKind,
    pub source_file: String,
    pub records: Vec<SourceRecord>,
    pub rows_read: usize,
    /// Rows dropped for a missing/unnormalizable CCN, an unparseable line,
    /// or (HCRIS only) an unparseable fiscal-year end date. Reported, never
    /// fatal.
    pub rejects: usize,
}

// ============================================================================
// COLUMN MAPPING
// ============================================================================

/// Resolved header positions for one file. None = column absent from this
/// release of the file.
struct ColumnMap {
    ccn: usize,
    name: Option<usize>,
    npi: Option<usize>,
    street: Option<usize>,
    city: Option<usize>,
    state: Option<usize>,
    zip: Option<usize>,
    phone: Option<usize>,
    hospital_type: Option<usize>,
    ownership: Option<usize>,
    system_id: Option<usize>,
    system_name: Option<usize>,
    certification_date: Option<usize>,
    bed_count: Option<usize>,
    total_revenue: Option<usize>,
    net_income: Option<usize>,
    fy_end: Option<usize>,
}

/// Case, whitespace, and punctuation insensitive header comparison, so
/// "ZIP Code", "Zip_Code", and "zipcode" all match.
fn canonical(header: &str) -> String {
    header
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

fn find_column(headers: &csv::StringRecord, variants: &[&str]) -> Option<usize> {
    let canon: Vec<String> = headers.iter().map(canonical).collect();
    variants
        .iter()
        .find_map(|v| canon.iter().position(|h| h == &canonical(v)))
}

impl ColumnMap {
    fn resolve(kind: SourceKind, headers: &csv::StringRecord) -> Result<Self> {
        let map = match kind {
            SourceKind::HcrisReport => ColumnMap {
                ccn: find_column(headers, &["PRVDR_NUM", "Provider Number", "Provider CCN"])
                    .ok_or_else(|| anyhow!("HCRIS file has no provider number column"))?,
                name: find_column(headers, &["HOSP_NAME", "Hospital Name", "Provider Name"]),
                npi: find_column(headers, &["NPI", "National Provider Identifier"]),
                street: find_column(headers, &["ST_ADR", "Street Address"]),
                city: find_column(headers, &["CITY", "City"]),
                state: find_column(headers, &["STATE", "STATE_CD", "State Code"]),
                zip: find_column(headers, &["ZIP_CD", "ZIP Code"]),
                phone: None,
                hospital_type: find_column(headers, &["PRVDR_TYPE", "Provider Type"]),
                ownership: find_column(headers, &["TYPE_OF_CONTROL", "CTRL_TYPE", "Type of Control"]),
                system_id: find_column(headers, &["CHAIN_ID", "Home Office Chain ID"]),
                system_name: find_column(headers, &["CHAIN_NAME", "Home Office Name"]),
                certification_date: None,
                bed_count: find_column(headers, &["BED_CNT", "Total Beds", "Number of Beds"]),
                total_revenue: find_column(headers, &["TOT_REV", "Total Revenue", "Total Patient Revenue"]),
                net_income: find_column(headers, &["NET_INCOME", "Net Income"]),
                fy_end: find_column(headers, &["FY_END_DT", "Fiscal Year End Date", "FYE Date"]),
            },
            SourceKind::HospitalGeneralInfo => ColumnMap {
                ccn: find_column(headers, &["Facility ID", "Provider ID", "CMS Certification Number"])
                    .ok_or_else(|| anyhow!("Hospital General Information file has no facility ID column"))?,
                name: find_column(headers, &["Facility Name", "Hospital Name"]),
                npi: None,
                street: find_column(headers, &["Address", "Street Address"]),
                city: find_column(headers, &["City", "City/Town"]),
                state: find_column(headers, &["State"]),
                zip: find_column(headers, &["ZIP Code", "Zip"]),
                phone: find_column(headers, &["Phone Number", "Telephone Number"]),
                hospital_type: find_column(headers, &["Hospital Type"]),
                ownership: find_column(headers, &["Hospital Ownership"]),
                system_id: None,
                system_name: None,
                certification_date: None,
                bed_count: None,
                total_revenue: None,
                net_income: None,
                fy_end: None,
            },
            SourceKind::ProviderOfServices => ColumnMap {
                ccn: find_column(headers, &["PRVDR_NUM", "PROV_NUM", "Provider Number"])
                    .ok_or_else(|| anyhow!("POS file has no provider number column"))?,
                name: find_column(headers, &["FAC_NAME", "Facility Name"]),
                npi: find_column(headers, &["NPI"]),
                street: find_column(headers, &["ST_ADR", "Street Address"]),
                city: find_column(headers, &["CITY_NAME", "City"]),
                state: find_column(headers, &["STATE_CD", "State"]),
                zip: find_column(headers, &["ZIP_CD", "ZIP Code"]),
                phone: find_column(headers, &["PHNE_NUM", "Phone Number"]),
                hospital_type: find_column(headers, &["PRVDR_CTGRY_SBTYP_CD", "Provider Subtype"]),
                ownership: None,
                system_id: None,
                system_name: None,
                certification_date: find_column(
                    headers,
                    &["CRTFCTN_DT", "ORGNL_PRTCPTN_DT", "Certification Date"],
                ),
                bed_count: find_column(headers, &["BED_CNT", "CRTFD_BED_CNT"]),
                total_revenue: None,
                net_income: None,
                fy_end: None,
            },
        };

        Ok(map)
    }

    fn mapped_indices(&self) -> HashSet<usize> {
        let mut set = HashSet::new();
        set.insert(self.ccn);
        for idx in [
            self.name,
            self.npi,
            self.street,
            self.city,
            self.state,
            self.zip,
            self.phone,
            self.hospital_type,
            self.ownership,
            self.system_id,
            self.system_name,
            self.certification_date,
            self.bed_count,
            self.total_revenue,
            self.net_income,
            self.fy_end,
        ]
        .into_iter()
        .flatten()
        {
            set.insert(idx);
        }
        set
    }
}

// ============================================================================
// CELL PARSING HELPERS
// ============================================================================

fn cell(row: &csv::StringRecord, idx: Option<usize>) -> Option<String> {
    let value = row.get(idx?)?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// CMS files mix ISO and US date formats between releases.
fn parse_date(value: &str) -> Option<NaiveDate> {
    for format in ["%Y-%m-%d", "%m/%d/%Y", "%m/%d/%y"] {
        if let Ok(date) = NaiveDate::parse_from_str(value.trim(), format) {
            return Some(date);
        }
    }
    None
}

fn parse_count(value: &str) -> Option<i64> {
    value.trim().replace(',', "").parse().ok()
}

fn parse_money(value: &str) -> Option<f64> {
    value
        .trim()
        .trim_start_matches('$')
        .replace(',', "")
        .parse()
        .ok()
}

// ============================================================================
// LOADING
// ============================================================================

/// Load a source file from disk.
pub fn load_source(path: &Path, kind: SourceKind) -> Result<LoadReport> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {} file {}", kind.name(), path.display()))?;
    let label = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string();
    load_from_reader(file, kind, &label)
}

/// Load a source from any reader. Split out from [`load_source`] so tests
/// can feed CSV text directly.
pub fn load_from_reader<R: Read>(reader: R, kind: SourceKind, source_file: &str) -> Result<LoadReport> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(reader);

    let headers = rdr
        .headers()
        .with_context(|| format!("Failed to read headers from {source_file}"))?
        .clone();
    let map = ColumnMap::resolve(kind, &headers)
        .with_context(|| format!("Unrecognized {} header layout in {source_file}", kind.name()))?;
    let mapped = map.mapped_indices();

    let mut report = LoadReport {
        kind,
        source_file: source_file.to_string(),
        records: Vec::new(),
        rows_read: 0,
        rejects: 0,
    };

    for result in rdr.records() {
        report.rows_read += 1;

        // Malformed line: skipped, counted, never fatal.
        let row = match result {
            Ok(row) => row,
            Err(_) => {
                report.rejects += 1;
                continue;
            }
        };

        let ccn = match row.get(map.ccn).and_then(normalize_ccn) {
            Some(ccn) => ccn,
            None => {
                report.rejects += 1;
                continue;
            }
        };

        let fiscal_year = match kind {
            SourceKind::HcrisReport => {
                // A cost-report row without a readable FY end date cannot be
                // placed on the timeline.
                match cell(&row, map.fy_end).as_deref().and_then(parse_date) {
                    Some(fy_end) => Some(fy_end.year()),
                    None => {
                        report.rejects += 1;
                        continue;
                    }
                }
            }
            _ => None,
        };

        let mut extras = HashMap::new();
        for (idx, header) in headers.iter().enumerate() {
            if mapped.contains(&idx) {
                continue;
            }
            if let Some(value) = row.get(idx).map(str::trim).filter(|v| !v.is_empty()) {
                extras.insert(header.to_string(), serde_json::json!(value));
            }
        }

        let line_number = row
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(report.rows_read + 1);

        report.records.push(SourceRecord {
            ccn,
            kind,
            fiscal_year,
            name: cell(&row, map.name),
            npi: cell(&row, map.npi),
            street: cell(&row, map.street),
            city: cell(&row, map.city),
            state: cell(&row, map.state),
            zip: cell(&row, map.zip),
            phone: cell(&row, map.phone),
            hospital_type: cell(&row, map.hospital_type),
            ownership: cell(&row, map.ownership),
            system_id: cell(&row, map.system_id),
            system_name: cell(&row, map.system_name),
            certification_date: cell(&row, map.certification_date)
                .as_deref()
                .and_then(parse_date),
            bed_count: cell(&row, map.bed_count).as_deref().and_then(parse_count),
            total_revenue: cell(&row, map.total_revenue).as_deref().and_then(parse_money),
            net_income: cell(&row, map.net_income).as_deref().and_then(parse_money),
            source_file: source_file.to_string(),
            line_number,
            extras,
        });
    }

    Ok(report)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_source_from_filenames() {
        let cases = [
            ("hcris_2023.csv", SourceKind::HcrisReport),
            ("HCRIS_Cost_Report_FY23.csv", SourceKind::HcrisReport),
            ("Hospital_General_Information.csv", SourceKind::HospitalGeneralInfo),
            ("POS_File_Q4_2024.csv", SourceKind::ProviderOfServices),
        ];

        for (filename, expected) in cases {
            let detected = detect_source(Path::new(filename)).unwrap();
            assert_eq!(detected, expected, "wrong kind for {filename}");
        }

        assert!(detect_source(Path::new("mystery.csv")).is_err());
    }

    #[test]
    fn test_load_hcris_with_standard_headers() {
        let csv = "\
PRVDR_NUM,HOSP_NAME,FY_END_DT,TYPE_OF_CONTROL,BED_CNT,TOT_REV,NET_INCOME
010001,City General,09/30/2023,Voluntary Nonprofit,250,\"10,000,000\",500000
10007,Lakeside Hospital,09/30/2023,Proprietary,80,2500000,-120000
";
        let report =
            load_from_reader(csv.as_bytes(), SourceKind::HcrisReport, "hcris_2023.csv").unwrap();

        assert_eq!(report.rows_read, 2);
        assert_eq!(report.rejects, 0);
        assert_eq!(report.records.len(), 2);

        let first = &report.records[0];
        assert_eq!(first.ccn, "010001");
        assert_eq!(first.fiscal_year, Some(2023));
        assert_eq!(first.name.as_deref(), Some("City General"));
        assert_eq!(first.ownership.as_deref(), Some("Voluntary Nonprofit"));
        assert_eq!(first.bed_count, Some(250));
        assert_eq!(first.total_revenue, Some(10_000_000.0));

        // Short numeric CCN is zero-padded, not rejected.
        assert_eq!(report.records[1].ccn, "010007");
        assert_eq!(report.records[1].net_income, Some(-120_000.0));
    }

    #[test]
    fn test_load_tolerates_header_variants() {
        // Same file, a later CMS release with renamed headers.
        let csv = "\
Provider Number,Hospital Name,Fiscal Year End Date
010001,City General,2023-09-30
";
        let report =
            load_from_reader(csv.as_bytes(), SourceKind::HcrisReport, "hcris.csv").unwrap();

        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].fiscal_year, Some(2023));
    }

    #[test]
    fn test_load_rejects_bad_ccn_rows() {
        let csv = "\
PRVDR_NUM,HOSP_NAME,FY_END_DT
010001,Good Hospital,09/30/2023
,Missing CCN Hospital,09/30/2023
NOT-A-CCN,Bad CCN Hospital,09/30/2023
";
        let report =
            load_from_reader(csv.as_bytes(), SourceKind::HcrisReport, "hcris.csv").unwrap();

        assert_eq!(report.rows_read, 3);
        assert_eq!(report.rejects, 2);
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0].ccn, "010001");
    }

    #[test]
    fn test_load_rejects_hcris_rows_without_fiscal_year() {
        let csv = "\
PRVDR_NUM,HOSP_NAME,FY_END_DT
010001,City General,not-a-date
";
        let report =
            load_from_reader(csv.as_bytes(), SourceKind::HcrisReport, "hcris.csv").unwrap();

        assert_eq!(report.rejects, 1);
        assert!(report.records.is_empty());
    }

    #[test]
    fn test_load_general_info_reference() {
        let csv = "\
Facility ID,Facility Name,Address,City,State,ZIP Code,Phone Number,Hospital Type,Hospital Ownership
010001,City General Medical Center,100 Main St,Springfield,IL,62701,(217) 555-0100,Acute Care Hospitals,Voluntary non-profit
";
        let report = load_from_reader(
            csv.as_bytes(),
            SourceKind::HospitalGeneralInfo,
            "Hospital_General_Information.csv",
        )
        .unwrap();

        let rec = &report.records[0];
        assert_eq!(rec.ccn, "010001");
        assert_eq!(rec.kind, SourceKind::HospitalGeneralInfo);
        assert_eq!(rec.fiscal_year, None);
        assert_eq!(rec.name.as_deref(), Some("City General Medical Center"));
        assert_eq!(rec.city.as_deref(), Some("Springfield"));
        assert_eq!(rec.phone.as_deref(), Some("(217) 555-0100"));
    }

    #[test]
    fn test_load_pos_certification_date() {
        let csv = "\
PRVDR_NUM,FAC_NAME,ST_ADR,CITY_NAME,STATE_CD,ZIP_CD,PHNE_NUM,CRTFCTN_DT,BED_CNT
010001,City General,100 Main St,Springfield,IL,62701,2175550100,1987-07-01,250
";
        let report = load_from_reader(
            csv.as_bytes(),
            SourceKind::ProviderOfServices,
            "pos_2024.csv",
        )
        .unwrap();

        let rec = &report.records[0];
        assert_eq!(
            rec.certification_date,
            Some(NaiveDate::from_ymd_opt(1987, 7, 1).unwrap())
        );
        assert_eq!(rec.bed_count, Some(250));
    }

    #[test]
    fn test_unmapped_columns_land_in_extras() {
        let csv = "\
Facility ID,Facility Name,Emergency Services
010001,City General,Yes
";
        let report = load_from_reader(
            csv.as_bytes(),
            SourceKind::HospitalGeneralInfo,
            "hgi.csv",
        )
        .unwrap();

        let rec = &report.records[0];
        assert_eq!(
            rec.extras.get("Emergency Services"),
            Some(&serde_json::json!("Yes"))
        );
    }

    #[test]
    fn test_missing_ccn_column_is_fatal() {
        let csv = "Some Column,Another\n1,2\n";
        let result = load_from_reader(csv.as_bytes(), SourceKind::HcrisReport, "hcris.csv");
        assert!(result.is_err(), "a file without a CCN column is unusable");
    }

    #[test]
    fn test_to_snapshot_requires_fiscal_year() {
        let csv = "\
Facility ID,Facility Name
010001,City General
";
        let report = load_from_reader(
            csv.as_bytes(),
            SourceKind::HospitalGeneralInfo,
            "hgi.csv",
        )
        .unwrap();

        assert!(report.records[0].to_snapshot().is_none());
    }
}
