//! Record file codecs.
//!
//! Both directions are total: malformed input degrades to a partial or
//! empty record list and is logged, never returned as an error.

pub mod gse;
pub mod ini;

use crate::model::Record;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const INI_FILE_NAME: &str = "achievements.ini";
pub const GSE_FILE_NAME: &str = "achievements.json";

/// On-disk record file flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordFormat {
    Ini,
    GseJson,
}

impl RecordFormat {
    pub fn file_name(self) -> &'static str {
        match self {
            RecordFormat::Ini => INI_FILE_NAME,
            RecordFormat::GseJson => GSE_FILE_NAME,
        }
    }

    /// Format implied by a record file's name, if it is one.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.file_name().and_then(|n| n.to_str()) {
            Some(INI_FILE_NAME) => Some(RecordFormat::Ini),
            Some(GSE_FILE_NAME) => Some(RecordFormat::GseJson),
            _ => None,
        }
    }

    pub fn parse(self, bytes: &[u8]) -> Vec<Record> {
        match self {
            RecordFormat::Ini => ini::parse(bytes),
            RecordFormat::GseJson => gse::parse(bytes),
        }
    }

    pub fn serialize(self, records: &[Record]) -> Vec<u8> {
        match self {
            RecordFormat::Ini => ini::serialize(records),
            RecordFormat::GseJson => gse::serialize(records),
        }
    }
}

/// True when `path` names a file any codec understands.
pub fn is_record_file(path: &Path) -> bool {
    RecordFormat::from_path(path).is_some()
}
