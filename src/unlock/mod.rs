//! Unlock orchestration: compose final records from the user's target,
//! replace the record file, and re-scan it as ground truth.
//!
//! Phases run `Composing → Writing → Verifying → Committed`, dropping to
//! `RolledBack` on any failure. The orchestrator never retries; callers
//! that applied optimistic state revert it on `Err`.

pub mod compose;

pub use compose::{TargetSource, UnlockItem, UnlockMode, UnlockTarget};

use crate::codec::RecordFormat;
use crate::error::UnlockError;
use crate::model::{EntitySnapshot, Record};
use crate::scanner::{self, layout};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockPhase {
    Composing,
    Writing,
    Verifying,
    Committed,
    RolledBack,
}

/// Hooks for callers that mirror unlock progress in their own state.
///
/// All methods have default no-op implementations.
pub trait UnlockObserver: Send + Sync {
    fn on_phase(&self, _entity_id: &str, _phase: UnlockPhase) {}
    /// Composed records, reported before anything touches disk.
    fn on_optimistic(&self, _target: &UnlockTarget, _records: &[Record]) {}
    fn on_committed(&self, _outcome: &UnlockOutcome) {}
    fn on_rolled_back(&self, _entity_id: &str, _error: &UnlockError) {}
}

/// No-op observer.
pub struct SilentObserver;

impl UnlockObserver for SilentObserver {}

#[derive(Debug, Clone)]
pub struct UnlockOutcome {
    pub entity_id: String,
    pub file_path: PathBuf,
    pub format: RecordFormat,
    pub written: Vec<Record>,
    /// Records as re-read from disk after the write.
    pub verified: Vec<Record>,
    pub snapshot: Option<EntitySnapshot>,
}

/// Serializes unlocks per entity. Unlocks for different entities touch
/// disjoint files and may overlap.
#[derive(Debug, Default)]
pub struct Orchestrator {
    in_flight: DashMap<String, ()>,
}

struct InFlightGuard<'a> {
    in_flight: &'a DashMap<String, ()>,
    entity_id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.entity_id);
    }
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_in_flight(&self, entity_id: &str) -> bool {
        self.in_flight.contains_key(entity_id)
    }

    fn begin(&self, entity_id: &str) -> Result<InFlightGuard<'_>, UnlockError> {
        match self.in_flight.entry(entity_id.to_string()) {
            Entry::Occupied(_) => Err(UnlockError::Busy(entity_id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(InFlightGuard {
                    in_flight: &self.in_flight,
                    entity_id: entity_id.to_string(),
                })
            }
        }
    }

    pub fn unlock(&self, target: &UnlockTarget, observer: &dyn UnlockObserver) -> Result<UnlockOutcome, UnlockError> {
        self.unlock_at(target, Utc::now(), observer)
    }

    /// Run one unlock treating `now` as the current time.
    pub fn unlock_at(
        &self,
        target: &UnlockTarget,
        now: DateTime<Utc>,
        observer: &dyn UnlockObserver,
    ) -> Result<UnlockOutcome, UnlockError> {
        self.execute(target, None, observer, || compose::compose(target, now, &mut rand::thread_rng()))
    }

    /// Write `records` exactly as given, e.g. from a backup. Goes through
    /// the same write, verify and rollback phases as an unlock.
    pub fn restore(
        &self,
        entity_id: &str,
        root: &Path,
        records: Vec<Record>,
        preferred: Option<RecordFormat>,
        observer: &dyn UnlockObserver,
    ) -> Result<UnlockOutcome, UnlockError> {
        let target = UnlockTarget::from_records(entity_id, root, &records);
        self.execute(&target, preferred, observer, move || Ok(records))
    }

    fn execute<F>(
        &self,
        target: &UnlockTarget,
        preferred: Option<RecordFormat>,
        observer: &dyn UnlockObserver,
        compose_records: F,
    ) -> Result<UnlockOutcome, UnlockError>
    where
        F: FnOnce() -> Result<Vec<Record>, UnlockError>,
    {
        let _guard = self.begin(&target.entity_id)?;

        let result = self.run(target, preferred, observer, compose_records);
        match &result {
            Ok(outcome) => {
                observer.on_phase(&target.entity_id, UnlockPhase::Committed);
                info!(
                    "Unlock committed for {}: {} records in {}",
                    target.entity_id,
                    outcome.written.len(),
                    outcome.file_path.display()
                );
                observer.on_committed(outcome);
            }
            Err(e) => {
                observer.on_phase(&target.entity_id, UnlockPhase::RolledBack);
                error!("Unlock failed for {}, state reverted: {}", target.entity_id, e);
                observer.on_rolled_back(&target.entity_id, e);
            }
        }
        result
    }

    fn run<F>(
        &self,
        target: &UnlockTarget,
        preferred: Option<RecordFormat>,
        observer: &dyn UnlockObserver,
        compose_records: F,
    ) -> Result<UnlockOutcome, UnlockError>
    where
        F: FnOnce() -> Result<Vec<Record>, UnlockError>,
    {
        observer.on_phase(&target.entity_id, UnlockPhase::Composing);
        let records = compose_records()?;
        let (file_path, format) = layout::write_target_with(&target.root_path, &target.entity_id, preferred);
        observer.on_optimistic(target, &records);

        observer.on_phase(&target.entity_id, UnlockPhase::Writing);
        replace_record_file(&file_path, format, &records).map_err(|source| UnlockError::Write {
            path: file_path.clone(),
            source,
        })?;
        debug!("Wrote {} records to {}", records.len(), file_path.display());

        observer.on_phase(&target.entity_id, UnlockPhase::Verifying);
        let verified = read_back(&file_path, format)?;
        if !same_records(&verified, &records) {
            return Err(UnlockError::Verify {
                path: file_path,
                reason: format!("wrote {} records, read back {} different ones", records.len(), verified.len()),
            });
        }
        let snapshot = scanner::scan_entity(&target.root_path, &target.entity_id);
        if !verified.is_empty() && snapshot.as_ref().map(|s| &s.records) != Some(&verified) {
            return Err(UnlockError::Verify {
                path: file_path,
                reason: "a scan of the entity does not see the written file".to_string(),
            });
        }

        Ok(UnlockOutcome {
            entity_id: target.entity_id.clone(),
            file_path,
            format,
            written: records,
            verified,
            snapshot,
        })
    }
}

/// Full replace: remove whatever is there, including a record file of the
/// other format, then write the new set.
fn replace_record_file(path: &Path, format: RecordFormat, records: &[Record]) -> io::Result<()> {
    if path.exists() {
        fs::remove_file(path)?;
        debug!("Removed old record file {}", path.display());
    }
    if let Some(other) = layout::competing_file(path, format).filter(|p| p.is_file()) {
        fs::remove_file(&other)?;
        debug!("Removed competing record file {}", other.display());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, format.serialize(records))
}

fn read_back(path: &Path, format: RecordFormat) -> Result<Vec<Record>, UnlockError> {
    let bytes = fs::read(path).map_err(|e| UnlockError::Verify {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(format.parse(&bytes))
}

/// Order-insensitive comparison by record id.
fn same_records(a: &[Record], b: &[Record]) -> bool {
    let mut a: Vec<&Record> = a.iter().collect();
    let mut b: Vec<&Record> = b.iter().collect();
    a.sort_by(|x, y| x.id.cmp(&y.id));
    b.sort_by(|x, y| x.id.cmp(&y.id));
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_rejects_same_entity_until_dropped() {
        let orchestrator = Orchestrator::new();
        let guard = orchestrator.begin("440").unwrap();
        assert!(orchestrator.is_in_flight("440"));
        assert!(matches!(orchestrator.begin("440"), Err(UnlockError::Busy(id)) if id == "440"));
        let other = orchestrator.begin("10").unwrap();
        drop(guard);
        assert!(!orchestrator.is_in_flight("440"));
        assert!(orchestrator.begin("440").is_ok());
        drop(other);
    }

    #[test]
    fn test_same_records_ignores_order() {
        let a = vec![Record::new("A", true, 1), Record::new("B", false, 0)];
        let b = vec![Record::new("B", false, 0), Record::new("A", true, 1)];
        assert!(same_records(&a, &b));
        assert!(!same_records(&a, &[Record::new("A", true, 2), Record::new("B", false, 0)]));
        assert!(!same_records(&a, &a[..1]));
    }
}
