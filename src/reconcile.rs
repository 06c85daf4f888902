// ⚖️ Master Reconciler
// Merges per-fiscal-year cost-report snapshots and reference records into
// exactly one current record per CCN, emitting change history along the way.
//
// Precedence: the latest fiscal year's snapshot seeds the record; reference
// files override demographic fields (name, address, phone, type,
// certification date); HCRIS stays authoritative for ownership/control type
// and system affiliation.

use crate::loader::{SourceKind, SourceRecord};
use crate::records::{
    fiscal_year_end, fiscal_year_start, AddressHistoryEntry, AnnualSnapshot, ChangeType,
    HospitalRecord, HospitalStatus, IdentifierChangeEvent, SystemMembershipEntry,
};
use chrono::{NaiveDate, Utc};
use std::collections::BTreeMap;

// ============================================================================
// OUTCOMES
// ============================================================================

/// Everything the reconciler produces for one CCN.
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub record: HospitalRecord,
    pub snapshots: Vec<AnnualSnapshot>,
    pub events: Vec<IdentifierChangeEvent>,
    pub addresses: Vec<AddressHistoryEntry>,
    pub systems: Vec<SystemMembershipEntry>,
}

/// One full batch pass over all loaded source records.
#[derive(Debug)]
pub struct BatchOutcome {
    pub outcomes: Vec<ReconcileOutcome>,
    /// CCNs with no usable data, skipped and reported.
    pub unreconcilable: Vec<String>,
    /// Most recent fiscal year seen anywhere in this batch.
    pub latest_year: Option<i32>,
}

#[derive(Default)]
struct CcnGroup {
    snapshots: Vec<AnnualSnapshot>,
    references: Vec<SourceRecord>,
}

// ============================================================================
// RECONCILER
// ============================================================================

/// Stateless batch reconciler: every run is a fresh pass over the full
/// source set, so nothing here survives between runs.
pub struct Reconciler;

impl Reconciler {
    pub fn new() -> Self {
        Reconciler
    }

    /// Group source records by CCN and reconcile each group.
    pub fn reconcile_all(&self, sources: Vec<SourceRecord>) -> BatchOutcome {
        let mut groups: BTreeMap<String, CcnGroup> = BTreeMap::new();

        for source in sources {
            let group = groups.entry(source.ccn.clone()).or_default();
            match source.kind {
                SourceKind::HcrisReport => {
                    if let Some(snapshot) = source.to_snapshot() {
                        group.snapshots.push(snapshot);
                    }
                }
                _ => group.references.push(source),
            }
        }

        let latest_year = groups
            .values()
            .flat_map(|g| g.snapshots.iter().map(|s| s.fiscal_year))
            .max();

        let mut outcomes = Vec::new();
        let mut unreconcilable = Vec::new();

        for (ccn, group) in groups {
            // (CCN, fiscal year) is unique: when an extract repeats a year,
            // the last row read wins.
            let mut by_year: BTreeMap<i32, AnnualSnapshot> = BTreeMap::new();
            for snapshot in group.snapshots {
                by_year.insert(snapshot.fiscal_year, snapshot);
            }
            let snapshots: Vec<AnnualSnapshot> = by_year.into_values().collect();

            match self.reconcile_one(&ccn, snapshots, &group.references, latest_year) {
                Some(outcome) => outcomes.push(outcome),
                None => unreconcilable.push(ccn),
            }
        }

        BatchOutcome {
            outcomes,
            unreconcilable,
            latest_year,
        }
    }

    /// Reconcile one CCN from its sorted snapshots and reference records.
    /// Returns None when there is nothing to reconcile from.
    pub fn reconcile_one(
        &self,
        ccn: &str,
        snapshots: Vec<AnnualSnapshot>,
        references: &[SourceRecord],
        latest_year: Option<i32>,
    ) -> Option<ReconcileOutcome> {
        if snapshots.is_empty() && references.is_empty() {
            return None;
        }

        let mut record = HospitalRecord::new(ccn);
        let mut kinds_used: Vec<&str> = Vec::new();

        // Seed from the latest fiscal year's snapshot.
        if let Some(latest) = snapshots.last() {
            record.name = latest.name.clone();
            record.npi = latest.npi.clone();
            record.ownership = latest.ownership.clone();
            record.street = latest.street.clone();
            record.city = latest.city.clone();
            record.state = latest.state.clone();
            record.zip = latest.zip.clone();
            record.system_id = latest.system_id.clone();
            record.system_name = latest.system_name.clone();
            record.bed_count = latest.bed_count;
            kinds_used.push(SourceKind::HcrisReport.code());
        }

        // Reference overrides for demographic fields, in load order so the
        // most recently loaded reference wins. Ownership and system
        // affiliation stay with HCRIS; a reference value only fills a gap.
        for reference in references {
            override_field(&mut record.name, &reference.name);
            override_field(&mut record.npi, &reference.npi);
            override_field(&mut record.street, &reference.street);
            override_field(&mut record.city, &reference.city);
            override_field(&mut record.state, &reference.state);
            override_field(&mut record.zip, &reference.zip);
            override_field(&mut record.phone, &reference.phone);
            override_field(&mut record.hospital_type, &reference.hospital_type);
            if record.ownership.is_none() {
                record.ownership = reference.ownership.clone();
            }
            if reference.certification_date.is_some() {
                record.certification_date = reference.certification_date;
            }
            if reference.bed_count.is_some() {
                record.bed_count = reference.bed_count;
            }
            for (key, value) in &reference.extras {
                record.metadata.insert(key.clone(), value.clone());
            }
            kinds_used.push(reference.kind.code());
        }

        // Status: seen only in years strictly before the latest loaded year,
        // with no reference match anywhere, means the provider is gone.
        if references.is_empty() {
            if let (Some(last), Some(latest)) =
                (snapshots.last().map(|s| s.fiscal_year), latest_year)
            {
                if last < latest {
                    record.status = HospitalStatus::Closed;
                    record.termination_date = Some(fiscal_year_end(last));
                }
            }
        }

        let events = self.walk_identifier_changes(ccn, &snapshots);
        let addresses = self.build_address_history(ccn, &snapshots, &record);
        let systems = self.build_system_membership(ccn, &snapshots);

        kinds_used.dedup();
        record.source = kinds_used.join("+");
        record.last_updated = Utc::now();

        Some(ReconcileOutcome {
            record,
            snapshots,
            events,
            addresses,
            systems,
        })
    }

    /// Pairwise walk over consecutive fiscal years. A tracked field that
    /// differs between two years with data on both sides becomes one event;
    /// a year with the field missing is treated as no information, not as a
    /// change.
    fn walk_identifier_changes(
        &self,
        ccn: &str,
        snapshots: &[AnnualSnapshot],
    ) -> Vec<IdentifierChangeEvent> {
        let mut events = Vec::new();

        for pair in snapshots.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            let effective = fiscal_year_start(next.fiscal_year);

            for (change_type, old, new) in [
                (ChangeType::Name, &prev.name, &next.name),
                (ChangeType::Npi, &prev.npi, &next.npi),
                (ChangeType::Ownership, &prev.ownership, &next.ownership),
            ] {
                if let (Some(old), Some(new)) = (old, new) {
                    if old != new {
                        events.push(IdentifierChangeEvent::new(
                            ccn,
                            change_type,
                            Some(old.clone()),
                            Some(new.clone()),
                            effective,
                        ));
                    }
                }
            }
        }

        events
    }

    /// Address intervals: each snapshot address that differs from the open
    /// interval closes it and opens a new one. The reconciled current
    /// address (which may come from a reference file) gets the final
    /// interval if it differs from the last snapshot address.
    fn build_address_history(
        &self,
        ccn: &str,
        snapshots: &[AnnualSnapshot],
        record: &HospitalRecord,
    ) -> Vec<AddressHistoryEntry> {
        let mut entries: Vec<AddressHistoryEntry> = Vec::new();

        for snapshot in snapshots {
            let address = (
                snapshot.street.clone(),
                snapshot.city.clone(),
                snapshot.state.clone(),
                snapshot.zip.clone(),
            );
            if address_is_empty(&address) {
                continue;
            }
            push_address(
                &mut entries,
                ccn,
                address,
                fiscal_year_start(snapshot.fiscal_year),
            );
        }

        let current = (
            record.street.clone(),
            record.city.clone(),
            record.state.clone(),
            record.zip.clone(),
        );
        if !address_is_empty(&current) {
            let effective = snapshots
                .last()
                .map(|s| fiscal_year_start(s.fiscal_year + 1))
                .or(record.certification_date)
                .unwrap_or_else(|| Utc::now().date_naive());
            push_address(&mut entries, ccn, current, effective);
        }

        if let Some(last) = entries.last_mut() {
            last.current = true;
            last.end_date = None;
        }

        entries
    }

    /// System membership intervals from HCRIS chain affiliation. A year
    /// with no chain closes the open membership; a different chain closes
    /// it and opens the next.
    fn build_system_membership(
        &self,
        ccn: &str,
        snapshots: &[AnnualSnapshot],
    ) -> Vec<SystemMembershipEntry> {
        let mut entries: Vec<SystemMembershipEntry> = Vec::new();

        for snapshot in snapshots {
            let start = fiscal_year_start(snapshot.fiscal_year);
            let open_system: Option<String> = entries
                .last()
                .filter(|e| e.end_date.is_none())
                .map(|e| e.system_id.clone());

            let changed = match (&snapshot.system_id, &open_system) {
                (Some(id), Some(open)) => open != id,
                (None, None) => false,
                _ => true,
            };
            if !changed {
                continue;
            }

            if open_system.is_some() {
                if let Some(last) = entries.last_mut() {
                    last.end_date = Some(start);
                    last.current = false;
                }
            }

            if let Some(id) = &snapshot.system_id {
                entries.push(SystemMembershipEntry {
                    ccn: ccn.to_string(),
                    system_id: id.clone(),
                    system_name: snapshot.system_name.clone(),
                    start_date: start,
                    end_date: None,
                    current: false,
                });
            }
        }

        if let Some(last) = entries.last_mut() {
            if last.end_date.is_none() {
                last.current = true;
            }
        }

        entries
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// HELPERS
// ============================================================================

type Address = (
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
);

fn address_is_empty(address: &Address) -> bool {
    address.0.is_none() && address.1.is_none() && address.2.is_none() && address.3.is_none()
}

fn entry_address(entry: &AddressHistoryEntry) -> Address {
    (
        entry.street.clone(),
        entry.city.clone(),
        entry.state.clone(),
        entry.zip.clone(),
    )
}

fn push_address(
    entries: &mut Vec<AddressHistoryEntry>,
    ccn: &str,
    address: Address,
    effective: NaiveDate,
) {
    if let Some(last) = entries.last_mut() {
        if entry_address(last) == address {
            return;
        }
        last.end_date = Some(effective);
        last.current = false;
    }

    let (street, city, state, zip) = address;
    entries.push(AddressHistoryEntry {
        ccn: ccn.to_string(),
        street,
        city,
        state,
        zip,
        effective_date: effective,
        end_date: None,
        current: false,
    });
}

fn override_field(dst: &mut Option<String>, src: &Option<String>) {
    if src.is_some() {
        *dst = src.clone();
    }
}

// ============================================================================
// TESTS
// ============================================================================
