use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One achievement's on-disk state.
///
/// `unlock_time` is unix seconds and carries no meaning while `achieved`
/// is false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub achieved: bool,
    pub unlock_time: i64,
}

impl Record {
    pub fn new(id: impl Into<String>, achieved: bool, unlock_time: i64) -> Self {
        Self {
            id: id.into(),
            achieved,
            unlock_time,
        }
    }
}

/// Parsed state of one entity under one root at one point in time.
///
/// Snapshots are replaced wholesale by the next scan, never patched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub entity_id: String,
    pub records: Vec<Record>,
    pub root_path: PathBuf,
    pub last_modified: DateTime<Utc>,
}

/// Snapshots of the same entity found under two or more roots,
/// ordered newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub entity_id: String,
    pub display_name: String,
    pub members: Vec<EntitySnapshot>,
}

/// A configured root directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryConfig {
    pub path: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub is_default: bool,
}

fn default_enabled() -> bool {
    true
}

impl DirectoryConfig {
    /// Custom (non-default) root named after its last path segment.
    pub fn custom(path: impl Into<String>) -> Self {
        let path = path.into();
        let name = path
            .trim_end_matches(['/', '\\'])
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or("Unknown")
            .to_string();
        Self {
            path,
            name,
            enabled: true,
            is_default: false,
        }
    }
}
