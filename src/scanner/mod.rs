pub mod layout;

use crate::model::EntitySnapshot;
use crate::utils::path::dedup_roots;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

/// Scan every root in parallel and return one snapshot per tracked entity
/// per root. Missing roots contribute nothing and a root listed twice is
/// scanned once. Output is ordered by root (input order) and then by
/// entity id.
pub fn scan(roots: &[PathBuf]) -> Vec<EntitySnapshot> {
    let roots = dedup_roots(roots);
    let per_root: Vec<Vec<EntitySnapshot>> = roots.par_iter().map(|root| scan_root(root)).collect();
    let snapshots: Vec<EntitySnapshot> = per_root.into_iter().flatten().collect();
    info!(
        "Scan finished for {} roots, {} entity snapshots",
        roots.len(),
        snapshots.len()
    );
    snapshots
}

/// Scan a single root. Entities are its immediate subdirectories.
pub fn scan_root(root: &Path) -> Vec<EntitySnapshot> {
    if !root.is_dir() {
        warn!("Scan root does not exist: {}", root.display());
        return Vec::new();
    }
    debug!("Scanning root: {}", root.display());

    let mut snapshots = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Error reading entry in {}: {}", root.display(), err);
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }
        let Some(entity_id) = entry.file_name().to_str() else {
            trace!("Skipping non UTF-8 directory {}", entry.path().display());
            continue;
        };
        if let Some(snapshot) = scan_entity(root, entity_id) {
            snapshots.push(snapshot);
        }
    }
    snapshots
}

/// Re-read one entity under one root. `None` when it has no record file or
/// the file holds no records.
pub fn scan_entity(root: &Path, entity_id: &str) -> Option<EntitySnapshot> {
    let (file, format) = layout::locate_record_file(root, entity_id)?;
    let bytes = match fs::read(&file) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!("Failed to read record file {}: {}", file.display(), err);
            return None;
        }
    };

    let records = format.parse(&bytes);
    if records.is_empty() {
        trace!("No records in {}", file.display());
        return None;
    }
    debug!("Found {} records for {} in {}", records.len(), entity_id, root.display());

    Some(EntitySnapshot {
        entity_id: entity_id.to_string(),
        records,
        root_path: root.to_path_buf(),
        last_modified: modified_time(&file),
    })
}

fn modified_time(file: &Path) -> DateTime<Utc> {
    fs::metadata(file)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| DateTime::<Utc>::from(UNIX_EPOCH))
}
