//! User edits not yet written to disk, keyed by entity and source.
//!
//! The whole cache is persisted as one JSON blob after every mutation and
//! reloaded at startup. A missing or unreadable blob is an empty cache.

use crate::error::Error;
use crate::model::Record;
use crate::timestamp::{ClockFormat, Timestamp, TimestampField};
use crate::utils::path::normalize_root;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Which state a bucket of edits belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceKey {
    /// No concrete source chosen yet.
    Auto,
    /// A local root, held in normalized form.
    Root(String),
    /// The remote catalog.
    Catalog,
}

impl SourceKey {
    pub fn root(path: &Path) -> Self {
        SourceKey::Root(normalize_root(path))
    }

    /// `Auto` when no root is given.
    pub fn from_root(path: Option<&Path>) -> Self {
        path.map(SourceKey::root).unwrap_or(SourceKey::Auto)
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKey::Auto => write!(f, "auto"),
            SourceKey::Catalog => write!(f, "catalog"),
            SourceKey::Root(root) => write!(f, "root:{}", root),
        }
    }
}

impl FromStr for SourceKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(SourceKey::Auto),
            "catalog" => Ok(SourceKey::Catalog),
            other => other
                .strip_prefix("root:")
                .filter(|root| !root.is_empty())
                .map(|root| SourceKey::Root(root.to_string()))
                .ok_or_else(|| format!("unknown source '{}'", other)),
        }
    }
}

/// Composite key of one bucket. Persisted as `<entity_id>::<source>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatusKey {
    pub entity_id: String,
    pub source: SourceKey,
}

impl StatusKey {
    pub fn new(entity_id: &str, source: SourceKey) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            source,
        }
    }
}

impl fmt::Display for StatusKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.entity_id, KEY_SEPARATOR, self.source)
    }
}

impl FromStr for StatusKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (entity_id, source) = s
            .split_once(KEY_SEPARATOR)
            .ok_or_else(|| format!("status key '{}' has no source", s))?;
        if entity_id.is_empty() {
            return Err(format!("status key '{}' has no entity id", s));
        }
        Ok(StatusKey::new(entity_id, source.parse()?))
    }
}

const KEY_SEPARATOR: &str = "::";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub achieved: bool,
    #[serde(default)]
    pub timestamp: Timestamp,
}

/// Record id → desired state.
pub type StatusBucket = BTreeMap<String, StatusEntry>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedCache {
    #[serde(default)]
    clock_format: ClockFormat,
    #[serde(default)]
    buckets: BTreeMap<String, StatusBucket>,
}

#[derive(Debug, Default)]
pub struct StatusCache {
    buckets: BTreeMap<StatusKey, StatusBucket>,
    clock_format: ClockFormat,
    path: Option<PathBuf>,
}

impl StatusCache {
    /// Cache that is never persisted.
    pub fn in_memory(clock_format: ClockFormat) -> Self {
        Self {
            clock_format,
            ..Self::default()
        }
    }

    /// Like [`StatusCache::load`], but a cache that has never been
    /// persisted starts on `initial_format`. A persisted cache keeps the
    /// clock format it was saved with.
    pub fn open(path: &Path, initial_format: ClockFormat) -> Self {
        let mut cache = Self::load(path);
        if !path.exists() {
            cache.clock_format = initial_format;
        }
        cache
    }

    /// Load the cache persisted at `path`. Absence or corruption yields an
    /// empty cache bound to the same path.
    pub fn load(path: &Path) -> Self {
        let mut cache = Self {
            path: Some(path.to_path_buf()),
            ..Self::default()
        };
        if !path.exists() {
            debug!("No status cache at {}, starting empty", path.display());
            return cache;
        }

        let persisted: PersistedCache = match fs::read(path)
            .map_err(Error::from)
            .and_then(|bytes| serde_json::from_slice(&bytes).map_err(Error::from))
        {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!("Ignoring unreadable status cache {}: {}", path.display(), e);
                return cache;
            }
        };

        cache.clock_format = persisted.clock_format;
        for (raw_key, records) in persisted.buckets {
            if records.is_empty() {
                continue;
            }
            match raw_key.parse::<StatusKey>() {
                Ok(key) => {
                    cache.buckets.insert(key, records);
                }
                Err(e) => warn!("Skipping status bucket: {}", e),
            }
        }
        info!(
            "Loaded status cache from {} ({} buckets)",
            path.display(),
            cache.buckets.len()
        );
        cache
    }

    /// Write the whole cache to its backing file, if it has one.
    pub fn save(&self) -> Result<(), Error> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let persisted = PersistedCache {
            clock_format: self.clock_format,
            buckets: self
                .buckets
                .iter()
                .map(|(key, records)| (key.to_string(), records.clone()))
                .collect(),
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(&persisted)?)?;
        Ok(())
    }

    fn persist(&self) {
        if let Err(e) = self.save() {
            warn!("Failed to persist status cache: {}", e);
        }
    }

    pub fn clock_format(&self) -> ClockFormat {
        self.clock_format
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn bucket(&self, entity_id: &str, source: &SourceKey) -> Option<&StatusBucket> {
        self.buckets.get(&StatusKey::new(entity_id, source.clone()))
    }

    pub fn entry(&self, entity_id: &str, record_id: &str, source: &SourceKey) -> Option<&StatusEntry> {
        self.bucket(entity_id, source)?.get(record_id)
    }

    /// Every bucket held for an entity.
    pub fn buckets_for<'a>(
        &'a self,
        entity_id: &'a str,
    ) -> impl Iterator<Item = (&'a SourceKey, &'a StatusBucket)> + 'a {
        self.buckets
            .iter()
            .filter(move |(key, _)| key.entity_id == entity_id)
            .map(|(key, bucket)| (&key.source, bucket))
    }

    /// Flip `achieved`. Switching off clears the timestamp; switching on
    /// seeds an empty one to be filled at unlock time.
    pub fn toggle(&mut self, entity_id: &str, record_id: &str, source: &SourceKey) -> bool {
        let entry = self
            .buckets
            .entry(StatusKey::new(entity_id, source.clone()))
            .or_default()
            .entry(record_id.to_string())
            .or_default();
        entry.achieved = !entry.achieved;
        entry.timestamp = Timestamp::default();
        let achieved = entry.achieved;
        self.persist();
        achieved
    }

    pub fn set_status(&mut self, entity_id: &str, record_id: &str, source: &SourceKey, status: StatusEntry) {
        self.buckets
            .entry(StatusKey::new(entity_id, source.clone()))
            .or_default()
            .insert(record_id.to_string(), status);
        self.persist();
    }

    /// Mark every id in `record_ids` achieved or not in one go, with empty
    /// timestamps. Ids already in the bucket but not listed are untouched.
    pub fn set_all(&mut self, entity_id: &str, source: &SourceKey, record_ids: &[String], achieved: bool) {
        let bucket = self.buckets.entry(StatusKey::new(entity_id, source.clone())).or_default();
        for record_id in record_ids {
            bucket.insert(
                record_id.clone(),
                StatusEntry {
                    achieved,
                    timestamp: Timestamp::default(),
                },
            );
        }
        debug!(
            "Marked {} records of {} as {}",
            record_ids.len(),
            entity_id,
            if achieved { "achieved" } else { "locked" }
        );
        self.persist();
    }

    /// Lock everything when any record is achieved, otherwise unlock
    /// everything. Returns the new achieved state.
    pub fn toggle_all(&mut self, entity_id: &str, source: &SourceKey, record_ids: &[String]) -> bool {
        let any_achieved = self
            .bucket(entity_id, source)
            .is_some_and(|b| b.values().any(|e| e.achieved));
        self.set_all(entity_id, source, record_ids, !any_achieved);
        !any_achieved
    }

    /// Edit one timestamp field. Has no effect unless the record is already
    /// marked achieved.
    pub fn set_timestamp_field(
        &mut self,
        entity_id: &str,
        record_id: &str,
        field: TimestampField,
        value: &str,
        source: &SourceKey,
    ) -> bool {
        let Some(entry) = self.entry_mut(entity_id, record_id, source) else {
            return false;
        };
        if !entry.achieved {
            return false;
        }
        entry.timestamp.set_field(field, value);
        self.persist();
        true
    }

    pub fn clear_timestamp(&mut self, entity_id: &str, record_id: &str, source: &SourceKey) -> bool {
        let Some(entry) = self.entry_mut(entity_id, record_id, source) else {
            return false;
        };
        entry.timestamp = Timestamp::default();
        self.persist();
        true
    }

    /// Drop one bucket, or every bucket of the entity when `source` is
    /// `None`. Returns how many buckets were removed.
    pub fn reset(&mut self, entity_id: &str, source: Option<&SourceKey>) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|key, _| {
            key.entity_id != entity_id || source.is_some_and(|s| *s != key.source)
        });
        let removed = before - self.buckets.len();
        if removed > 0 {
            self.persist();
        }
        removed
    }

    /// Replace a bucket with on-disk records, rendered in the active clock
    /// format. Records that are not achieved are left out.
    pub fn replace_with_records(&mut self, entity_id: &str, source: &SourceKey, records: &[Record]) {
        let bucket: StatusBucket = records
            .iter()
            .filter(|r| r.achieved)
            .map(|r| {
                let entry = StatusEntry {
                    achieved: true,
                    timestamp: Timestamp::from_unix(r.unlock_time, self.clock_format),
                };
                (r.id.clone(), entry)
            })
            .collect();
        let key = StatusKey::new(entity_id, source.clone());
        if bucket.is_empty() {
            self.buckets.remove(&key);
        } else {
            self.buckets.insert(key, bucket);
        }
        self.persist();
    }

    /// Switch the active clock and convert every complete timestamp in
    /// place. Returns the number of timestamps rewritten; running it again
    /// with the same format rewrites nothing.
    pub fn set_clock_format(&mut self, format: ClockFormat) -> usize {
        let mut converted = 0;
        for entry in self.buckets.values_mut().flat_map(|b| b.values_mut()) {
            let migrated = entry.timestamp.in_format(format);
            if migrated != entry.timestamp {
                entry.timestamp = migrated;
                converted += 1;
            }
        }
        let changed = self.clock_format != format;
        self.clock_format = format;
        if changed || converted > 0 {
            info!("Clock format set to {}, {} timestamps converted", format, converted);
            self.persist();
        }
        converted
    }

    /// Pick the bucket an unlock should draw from: the chosen source's own
    /// bucket, then (for a root) the bucket of the entity's only known local
    /// root, then the unresolved `Auto` bucket. Empty buckets are skipped.
    pub fn resolve_bucket(
        &self,
        entity_id: &str,
        chosen: &SourceKey,
        known_roots: &[PathBuf],
    ) -> Option<(SourceKey, &StatusBucket)> {
        let mut candidates = vec![chosen.clone()];
        if let (SourceKey::Root(_), [only_root]) = (chosen, known_roots) {
            candidates.push(SourceKey::root(only_root));
        }
        candidates.push(SourceKey::Auto);

        candidates.into_iter().find_map(|source| {
            self.bucket(entity_id, &source)
                .filter(|b| !b.is_empty())
                .map(|b| (source, b))
        })
    }

    fn entry_mut(&mut self, entity_id: &str, record_id: &str, source: &SourceKey) -> Option<&mut StatusEntry> {
        self.buckets
            .get_mut(&StatusKey::new(entity_id, source.clone()))?
            .get_mut(record_id)
    }
}
