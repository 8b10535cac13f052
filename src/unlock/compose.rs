use crate::error::UnlockError;
use crate::model::Record;
use crate::status_cache::{SourceKey, StatusCache};
use crate::timestamp::{ClockFormat, Timestamp};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

/// How to fill in unlock times the user left empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockMode {
    #[default]
    UseCurrentTime,
    UseRandomPastYear,
    UseExplicitTimestamp,
}

impl FromStr for UnlockMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "current" | "now" => Ok(UnlockMode::UseCurrentTime),
            "random" => Ok(UnlockMode::UseRandomPastYear),
            "custom" | "explicit" => Ok(UnlockMode::UseExplicitTimestamp),
            other => Err(format!("unknown unlock mode '{}', expected current, random or custom", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlockItem {
    pub record_id: String,
    pub achieved: bool,
    pub timestamp: Timestamp,
}

/// Kind of source being written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TargetSource {
    /// Local record files only need the achieved records.
    #[default]
    Local,
    /// Catalog-backed entities need a complete record set, one per known id.
    Catalog { known_ids: Vec<String> },
}

/// Desired state for one entity under one root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlockTarget {
    pub entity_id: String,
    pub root_path: PathBuf,
    pub items: Vec<UnlockItem>,
    pub mode: UnlockMode,
    pub custom_timestamp: Option<Timestamp>,
    pub source: TargetSource,
}

impl UnlockTarget {
    pub fn new(entity_id: impl Into<String>, root_path: impl Into<PathBuf>, mode: UnlockMode) -> Self {
        Self {
            entity_id: entity_id.into(),
            root_path: root_path.into(),
            items: Vec::new(),
            mode,
            custom_timestamp: None,
            source: TargetSource::Local,
        }
    }

    /// Build a target from the user's pending edits for `source`, folding
    /// the status buckets so a first write to a fresh root keeps edits made
    /// before a source was chosen.
    ///
    /// A `Catalog` source yields a catalog target listing every id in the
    /// folded bucket; callers that know the full catalog can widen it with
    /// [`UnlockTarget::with_catalog`].
    pub fn from_status(
        cache: &StatusCache,
        entity_id: &str,
        root_path: &Path,
        source: &SourceKey,
        known_roots: &[PathBuf],
        mode: UnlockMode,
    ) -> Self {
        let mut target = Self::new(entity_id, root_path, mode);
        if let Some((folded, bucket)) = cache.resolve_bucket(entity_id, source, known_roots) {
            debug!("Unlock for {} draws from {:?} bucket", entity_id, folded);
            target.items = bucket
                .iter()
                .map(|(record_id, entry)| UnlockItem {
                    record_id: record_id.clone(),
                    achieved: entry.achieved,
                    timestamp: entry.timestamp.clone(),
                })
                .collect();
        }
        if *source == SourceKey::Catalog {
            let known_ids = target.items.iter().map(|i| i.record_id.clone()).collect();
            target.source = TargetSource::Catalog { known_ids };
        }
        target
    }

    /// Target mirroring records that are already final, used to report a
    /// restore through the observer hooks.
    pub fn from_records(entity_id: &str, root_path: &Path, records: &[Record]) -> Self {
        let mut target = Self::new(entity_id, root_path, UnlockMode::UseCurrentTime);
        target.items = records
            .iter()
            .map(|r| UnlockItem {
                record_id: r.id.clone(),
                achieved: r.achieved,
                timestamp: if r.achieved {
                    Timestamp::from_unix(r.unlock_time, ClockFormat::TwentyFourHour)
                } else {
                    Timestamp::default()
                },
            })
            .collect();
        target
    }

    pub fn with_item(mut self, record_id: impl Into<String>, achieved: bool, timestamp: Timestamp) -> Self {
        self.items.push(UnlockItem {
            record_id: record_id.into(),
            achieved,
            timestamp,
        });
        self
    }

    pub fn with_custom_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.custom_timestamp = Some(timestamp);
        self
    }

    pub fn with_catalog(mut self, known_ids: Vec<String>) -> Self {
        self.source = TargetSource::Catalog { known_ids };
        self
    }
}

/// Resolve every item to a final record.
pub(crate) fn compose<R: Rng>(target: &UnlockTarget, now: DateTime<Utc>, rng: &mut R) -> Result<Vec<Record>, UnlockError> {
    let custom = match target.mode {
        UnlockMode::UseExplicitTimestamp => {
            let needs_custom = target
                .items
                .iter()
                .any(|item| item.achieved && item.timestamp.try_to_unix().is_none());
            match target.custom_timestamp.as_ref().and_then(Timestamp::try_to_unix) {
                Some(secs) => Some(secs),
                None if needs_custom => return Err(UnlockError::IncompleteCustomTimestamp),
                None => None,
            }
        }
        _ => None,
    };

    let mut resolve = |item: &UnlockItem| -> Record {
        if !item.achieved {
            return Record::new(item.record_id.clone(), false, 0);
        }
        let unlock_time = match item.timestamp.try_to_unix() {
            Some(secs) => secs,
            None => {
                if item.timestamp.is_complete() {
                    warn!(
                        "Timestamp for {} is not a real date, using the unlock mode instead",
                        item.record_id
                    );
                }
                fallback_time(target.mode, custom, now, rng)
            }
        };
        Record::new(item.record_id.clone(), true, unlock_time)
    };

    let records = match &target.source {
        TargetSource::Local => target
            .items
            .iter()
            .filter(|item| item.achieved)
            .map(&mut resolve)
            .collect(),
        TargetSource::Catalog { known_ids } => {
            let mut records: Vec<Record> = known_ids
                .iter()
                .map(|id| match target.items.iter().find(|item| &item.record_id == id) {
                    Some(item) => resolve(item),
                    None => Record::new(id.clone(), false, 0),
                })
                .collect();
            for item in target.items.iter().filter(|i| !known_ids.contains(&i.record_id)) {
                warn!("Record {} is not in the catalog for {}", item.record_id, target.entity_id);
                records.push(resolve(item));
            }
            records
        }
    };
    Ok(records)
}

fn fallback_time<R: Rng>(mode: UnlockMode, custom: Option<i64>, now: DateTime<Utc>, rng: &mut R) -> i64 {
    match mode {
        UnlockMode::UseCurrentTime => now.timestamp(),
        UnlockMode::UseRandomPastYear => {
            let earliest = (now - Duration::days(365)).timestamp();
            rng.gen_range(earliest..=now.timestamp())
        }
        UnlockMode::UseExplicitTimestamp => custom.unwrap_or_else(|| now.timestamp()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp::{ClockFormat, Meridiem, TimestampField};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn filled(hour: &str, meridiem: Option<Meridiem>) -> Timestamp {
        Timestamp {
            day: "14".into(),
            month: "11".into(),
            year: "2023".into(),
            hour: hour.into(),
            minute: "13".into(),
            meridiem,
        }
    }

    #[test]
    fn test_local_drops_not_achieved() {
        let target = UnlockTarget::new("440", "/r", UnlockMode::UseCurrentTime)
            .with_item("A", true, Timestamp::default())
            .with_item("B", false, Timestamp::default());
        let records = compose(&target, now(), &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(records, vec![Record::new("A", true, 1_700_000_000)]);
    }

    #[test]
    fn test_complete_timestamp_wins_over_mode() {
        let twelve = filled("10", Some(Meridiem::PM));
        let target = UnlockTarget::new("440", "/r", UnlockMode::UseRandomPastYear).with_item("A", true, twelve.clone());
        let records = compose(&target, now(), &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(records[0].unlock_time, twelve.to_unix());
        assert_eq!(records[0].unlock_time, filled("22", None).to_unix());
    }

    #[test]
    fn test_random_past_year_in_range() {
        let mut target = UnlockTarget::new("440", "/r", UnlockMode::UseRandomPastYear);
        for i in 0..50 {
            target = target.with_item(format!("A{}", i), true, Timestamp::default());
        }
        let records = compose(&target, now(), &mut StdRng::seed_from_u64(7)).unwrap();
        let earliest = 1_700_000_000 - 365 * 24 * 3600;
        assert!(records
            .iter()
            .all(|r| (earliest..=1_700_000_000).contains(&r.unlock_time)));
    }

    #[test]
    fn test_explicit_mode_uses_custom() {
        let custom = Timestamp::from_unix(1_600_000_020, ClockFormat::TwelveHour);
        let target = UnlockTarget::new("440", "/r", UnlockMode::UseExplicitTimestamp)
            .with_item("A", true, Timestamp::default())
            .with_custom_timestamp(custom);
        let records = compose(&target, now(), &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(records[0].unlock_time, 1_600_000_020 - 20);
    }

    #[test]
    fn test_explicit_mode_rejects_incomplete_custom() {
        let mut custom = filled("10", None);
        custom.set_field(TimestampField::Year, "");
        let target = UnlockTarget::new("440", "/r", UnlockMode::UseExplicitTimestamp)
            .with_item("A", true, Timestamp::default())
            .with_custom_timestamp(custom);
        assert!(matches!(
            compose(&target, now(), &mut StdRng::seed_from_u64(1)),
            Err(UnlockError::IncompleteCustomTimestamp)
        ));

        let no_custom_needed = UnlockTarget::new("440", "/r", UnlockMode::UseExplicitTimestamp)
            .with_item("A", true, filled("10", None));
        assert!(compose(&no_custom_needed, now(), &mut StdRng::seed_from_u64(1)).is_ok());
    }

    #[test]
    fn test_catalog_writes_every_known_id() {
        let target = UnlockTarget::new("440", "/r", UnlockMode::UseCurrentTime)
            .with_item("B", true, Timestamp::default())
            .with_item("C", false, Timestamp::default())
            .with_catalog(vec!["A".into(), "B".into(), "C".into()]);
        let records = compose(&target, now(), &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(
            records,
            vec![
                Record::new("A", false, 0),
                Record::new("B", true, 1_700_000_000),
                Record::new("C", false, 0),
            ]
        );
    }

    #[test]
    fn test_invalid_date_falls_back_to_mode() {
        let mut impossible = filled("10", None);
        impossible.set_field(TimestampField::Day, "31");
        impossible.set_field(TimestampField::Month, "02");
        assert!(impossible.is_complete());

        let target = UnlockTarget::new("440", "/r", UnlockMode::UseCurrentTime).with_item("A", true, impossible.clone());
        let records = compose(&target, now(), &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(records, vec![Record::new("A", true, 1_700_000_000)]);

        let explicit = UnlockTarget::new("440", "/r", UnlockMode::UseExplicitTimestamp)
            .with_item("A", true, Timestamp::default())
            .with_custom_timestamp(impossible);
        assert!(matches!(
            compose(&explicit, now(), &mut StdRng::seed_from_u64(1)),
            Err(UnlockError::IncompleteCustomTimestamp)
        ));
    }

    #[test]
    fn test_from_status_catalog_bucket() {
        let mut cache = StatusCache::in_memory(ClockFormat::TwentyFourHour);
        cache.set_all("440", &SourceKey::Catalog, &["A".to_string(), "B".to_string()], false);
        cache.toggle("440", "B", &SourceKey::Catalog);
        cache.toggle("440", "LOCAL", &SourceKey::root(Path::new("/r")));

        let target = UnlockTarget::from_status(
            &cache,
            "440",
            Path::new("/r"),
            &SourceKey::Catalog,
            &[PathBuf::from("/r")],
            UnlockMode::UseCurrentTime,
        );
        assert_eq!(
            target.source,
            TargetSource::Catalog {
                known_ids: vec!["A".to_string(), "B".to_string()]
            }
        );
        let records = compose(&target, now(), &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(
            records,
            vec![Record::new("A", false, 0), Record::new("B", true, 1_700_000_000)]
        );
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("random".parse::<UnlockMode>(), Ok(UnlockMode::UseRandomPastYear));
        assert!("sometime".parse::<UnlockMode>().is_err());
    }
}
