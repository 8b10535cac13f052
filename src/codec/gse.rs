use crate::model::Record;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Entry shape used by GSE `achievements.json` files.
#[derive(Debug, Serialize, Deserialize)]
struct GseEntry {
    #[serde(default)]
    earned: bool,
    #[serde(default)]
    earned_time: i64,
}

/// Parse a GSE object keyed by record id. Entries that are not objects are
/// skipped; invalid JSON yields no records.
pub fn parse(bytes: &[u8]) -> Vec<Record> {
    let root: Map<String, Value> = match serde_json::from_slice(bytes) {
        Ok(root) => root,
        Err(e) => {
            warn!("Invalid GSE achievements JSON: {}", e);
            return Vec::new();
        }
    };

    root.into_iter()
        .filter(|(id, _)| !id.is_empty())
        .filter_map(|(id, payload)| {
            if !payload.is_object() {
                return None;
            }
            let entry: GseEntry = serde_json::from_value(payload).unwrap_or(GseEntry {
                earned: false,
                earned_time: 0,
            });
            Some(Record::new(id, entry.earned, entry.earned_time))
        })
        .collect()
}

pub fn serialize(records: &[Record]) -> Vec<u8> {
    let mut root = Map::new();
    for record in records {
        let entry = GseEntry {
            earned: record.achieved,
            earned_time: if record.achieved { record.unlock_time } else { 0 },
        };
        if let Ok(value) = serde_json::to_value(entry) {
            root.insert(record.id.clone(), value);
        }
    }
    serde_json::to_vec_pretty(&Value::Object(root)).unwrap_or_else(|e| {
        warn!("Failed to serialize GSE achievements: {}", e);
        b"{}".to_vec()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gse_entries() {
        let input = br#"{"ACH_A": {"earned": true, "earned_time": 1700000000, "progress": 3},
                         "ACH_B": {"earned": false},
                         "junk": 5}"#;
        let mut records = parse(input);
        records.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(
            records,
            vec![
                Record::new("ACH_A", true, 1_700_000_000),
                Record::new("ACH_B", false, 0),
            ]
        );
    }

    #[test]
    fn test_parse_invalid_json_is_empty() {
        assert!(parse(b"garbage").is_empty());
        assert!(parse(b"[1, 2]").is_empty());
    }

    #[test]
    fn test_serialize_clears_time_when_not_earned() {
        let bytes = serialize(&[Record::new("X", false, 99)]);
        let records = parse(&bytes);
        assert_eq!(records, vec![Record::new("X", false, 0)]);
    }
}
