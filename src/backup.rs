//! Backups of record files and restoring them.
//!
//! A backup is one JSON document holding the records of every selected
//! entity snapshot. Restoring compares each entry with what is on disk,
//! then rewrites the chosen entries through the unlock [`Orchestrator`],
//! so a restore is written and verified exactly like an unlock.

use crate::codec::RecordFormat;
use crate::error::Error;
use crate::model::{EntitySnapshot, Record};
use crate::scanner::{self, layout};
use crate::unlock::{Orchestrator, UnlockObserver, UnlockOutcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

pub const BACKUP_FORMAT_VERSION: u32 = 1;

fn default_format_version() -> u32 {
    BACKUP_FORMAT_VERSION
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backup {
    #[serde(default = "default_format_version")]
    pub format_version: u32,
    pub created_at: DateTime<Utc>,
    pub entries: Vec<BackupEntry>,
}

/// Records of one entity under one root at backup time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEntry {
    pub entity_id: String,
    pub root_path: PathBuf,
    pub format: RecordFormat,
    pub last_modified: DateTime<Utc>,
    pub records: Vec<Record>,
}

impl Backup {
    /// Backup of `snapshots`, limited to `selected` entity ids unless that
    /// list is empty.
    pub fn from_snapshots(snapshots: &[EntitySnapshot], selected: &[String], created_at: DateTime<Utc>) -> Self {
        let entries = snapshots
            .iter()
            .filter(|s| selected.is_empty() || selected.contains(&s.entity_id))
            .map(|s| BackupEntry {
                entity_id: s.entity_id.clone(),
                root_path: s.root_path.clone(),
                format: layout::locate_record_file(&s.root_path, &s.entity_id)
                    .map(|(_, format)| format)
                    .unwrap_or(RecordFormat::Ini),
                last_modified: s.last_modified,
                records: s.records.clone(),
            })
            .collect();
        Self {
            format_version: BACKUP_FORMAT_VERSION,
            created_at,
            entries,
        }
    }
}

/// Write a backup of `snapshots` to `path`. Fails when the selection is
/// empty, so an empty file never replaces a useful one.
pub fn create_backup(snapshots: &[EntitySnapshot], selected: &[String], path: &Path) -> Result<Backup, Error> {
    let backup = Backup::from_snapshots(snapshots, selected, Utc::now());
    if backup.entries.is_empty() {
        return Err(Error::Other("no entities available for backup".to_string()));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_vec_pretty(&backup)?)?;
    info!("Backed up {} entities to {}", backup.entries.len(), path.display());
    Ok(backup)
}

pub fn read_backup(path: &Path) -> Result<Backup, Error> {
    let backup: Backup = serde_json::from_slice(&fs::read(path)?)?;
    if backup.format_version != BACKUP_FORMAT_VERSION {
        return Err(Error::UnsupportedBackup(backup.format_version));
    }
    debug!("Read backup {} with {} entries", path.display(), backup.entries.len());
    Ok(backup)
}

/// How one backup entry compares with the records on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestorePreview {
    pub index: usize,
    pub entity_id: String,
    pub root_path: PathBuf,
    pub backup_records: usize,
    pub existing_records: usize,
    /// Backup records whose id is also on disk.
    pub overlapping: usize,
    pub changed: usize,
    pub unchanged: usize,
    /// Backup records with no counterpart on disk.
    pub new: usize,
}

impl RestorePreview {
    /// Restoring would overwrite at least one differing record.
    pub fn has_conflict(&self) -> bool {
        self.changed > 0
    }
}

fn existing_records(entry: &BackupEntry) -> Vec<Record> {
    scanner::scan_entity(&entry.root_path, &entry.entity_id)
        .map(|s| s.records)
        .unwrap_or_default()
}

fn preview_entry(index: usize, entry: &BackupEntry) -> RestorePreview {
    let existing = existing_records(entry);
    let on_disk: HashMap<&str, &Record> = existing.iter().map(|r| (r.id.as_str(), r)).collect();

    let mut preview = RestorePreview {
        index,
        entity_id: entry.entity_id.clone(),
        root_path: entry.root_path.clone(),
        backup_records: entry.records.len(),
        existing_records: existing.len(),
        overlapping: 0,
        changed: 0,
        unchanged: 0,
        new: 0,
    };
    for record in &entry.records {
        match on_disk.get(record.id.as_str()) {
            Some(current) => {
                preview.overlapping += 1;
                if current.achieved != record.achieved || current.unlock_time != record.unlock_time {
                    preview.changed += 1;
                } else {
                    preview.unchanged += 1;
                }
            }
            None => preview.new += 1,
        }
    }
    preview
}

/// Compare every backup entry with the current files.
pub fn preview(backup: &Backup) -> Vec<RestorePreview> {
    backup
        .entries
        .iter()
        .enumerate()
        .map(|(index, entry)| preview_entry(index, entry))
        .collect()
}

/// What to do with an entry whose records differ from the files on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictStrategy {
    /// Overwrite with the backup.
    #[default]
    Backup,
    /// Keep the current file and skip the entry.
    Current,
    /// Abort the whole restore before anything is written.
    Cancel,
}

impl FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "backup" => Ok(ConflictStrategy::Backup),
            "current" => Ok(ConflictStrategy::Current),
            "cancel" => Ok(ConflictStrategy::Cancel),
            other => Err(format!("unknown conflict strategy '{}', expected backup, current or cancel", other)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    /// Entry indices to restore; empty restores every entry.
    pub selected: BTreeSet<usize>,
    /// Per-entry conflict strategy, by index.
    pub strategies: HashMap<usize, ConflictStrategy>,
    /// Strategy for entries without their own.
    pub default_strategy: ConflictStrategy,
}

impl RestoreOptions {
    fn includes(&self, index: usize) -> bool {
        self.selected.is_empty() || self.selected.contains(&index)
    }

    fn strategy(&self, index: usize) -> ConflictStrategy {
        self.strategies.get(&index).copied().unwrap_or(self.default_strategy)
    }
}

#[derive(Debug, Default)]
pub struct RestoreSummary {
    pub restored: Vec<UnlockOutcome>,
    /// Indices left alone, either unselected or kept as current.
    pub skipped: Vec<usize>,
}

/// Restore the selected entries. Conflicts are checked for every entry
/// first, so a `Cancel` leaves every file untouched.
pub fn apply_restore(
    backup: &Backup,
    options: &RestoreOptions,
    orchestrator: &Orchestrator,
    observer: &dyn UnlockObserver,
) -> Result<RestoreSummary, Error> {
    let previews = preview(backup);

    for (entry, preview) in backup.entries.iter().zip(&previews) {
        if options.includes(preview.index)
            && preview.has_conflict()
            && options.strategy(preview.index) == ConflictStrategy::Cancel
        {
            return Err(Error::RestoreCanceled {
                entity_id: entry.entity_id.clone(),
                root: entry.root_path.clone(),
            });
        }
    }

    let mut summary = RestoreSummary::default();
    for (entry, preview) in backup.entries.iter().zip(&previews) {
        if !options.includes(preview.index) {
            summary.skipped.push(preview.index);
            continue;
        }
        if preview.has_conflict() && options.strategy(preview.index) == ConflictStrategy::Current {
            debug!("Keeping current records for {} in {}", entry.entity_id, entry.root_path.display());
            summary.skipped.push(preview.index);
            continue;
        }

        let outcome = orchestrator.restore(
            &entry.entity_id,
            &entry.root_path,
            entry.records.clone(),
            Some(entry.format),
            observer,
        )?;
        summary.restored.push(outcome);
    }

    if summary.restored.is_empty() {
        warn!("Restore finished without writing any entry");
    } else {
        info!(
            "Restored {} entries, skipped {}",
            summary.restored.len(),
            summary.skipped.len()
        );
    }
    Ok(summary)
}
