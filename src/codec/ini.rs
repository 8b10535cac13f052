use crate::model::Record;
use tracing::{trace, warn};

/// Parse the INI subset written by the launch tools.
///
/// `[id]` opens a record, `Achieved=` and `UnlockTime=` fill it in, every
/// other key is dropped. Anything before the first section is ignored.
pub fn parse(bytes: &[u8]) -> Vec<Record> {
    let content = String::from_utf8_lossy(bytes);
    let mut records = Vec::new();
    let mut current: Option<Record> = None;
    let mut ignored_lines = 0usize;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(id) = section_name(line) {
            flush(&mut records, current.take());
            current = Some(Record::new(id, false, 0));
            continue;
        }

        let (Some(record), Some((key, value))) = (current.as_mut(), line.split_once('=')) else {
            ignored_lines += 1;
            continue;
        };

        match key.trim() {
            "Achieved" => record.achieved = value.trim() == "1",
            "UnlockTime" => record.unlock_time = value.trim().parse().unwrap_or(0),
            other => trace!("Dropping unknown key '{}' in [{}]", other, record.id),
        }
    }
    flush(&mut records, current);

    if records.is_empty() && ignored_lines > 0 {
        warn!("No records found in {} non-empty lines", ignored_lines);
    }
    records
}

/// Emit `[id]`, `Achieved=`, `UnlockTime=` and a blank line per record.
pub fn serialize(records: &[Record]) -> Vec<u8> {
    let mut content = String::new();
    for record in records {
        content.push_str(&format!("[{}]\n", record.id));
        content.push_str(&format!("Achieved={}\n", if record.achieved { 1 } else { 0 }));
        content.push_str(&format!("UnlockTime={}\n", record.unlock_time));
        content.push('\n');
    }
    content.into_bytes()
}

fn section_name(line: &str) -> Option<&str> {
    line.strip_prefix('[')?.strip_suffix(']')
}

fn flush(records: &mut Vec<Record>, record: Option<Record>) {
    if let Some(record) = record.filter(|r| !r.id.is_empty()) {
        records.push(record);
    }
}
