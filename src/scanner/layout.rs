use crate::codec::{RecordFormat, GSE_FILE_NAME, INI_FILE_NAME};
use crate::utils::path::last_segment;
use std::path::{Path, PathBuf};

/// Root name whose entities keep their record file one level deeper.
pub const NESTED_STATS_MARKER: &str = "OnlineFix";
pub const STATS_DIR: &str = "Stats";
/// Root name fragment that marks a GSE save directory.
pub const GSE_ROOT_MARKER: &str = "gse saves";

pub fn is_nested_root(root: &Path) -> bool {
    last_segment(root).eq_ignore_ascii_case(NESTED_STATS_MARKER)
}

fn is_gse_root(root: &Path) -> bool {
    root.to_string_lossy().to_lowercase().contains(GSE_ROOT_MARKER)
}

/// Directory that holds the record file for `entity_id` under `root`.
pub fn record_dir(root: &Path, entity_id: &str) -> PathBuf {
    let entity_dir = root.join(entity_id);
    if is_nested_root(root) {
        entity_dir.join(STATS_DIR)
    } else {
        entity_dir
    }
}

/// Existing record file for an entity, preferring INI over GSE JSON.
pub fn locate_record_file(root: &Path, entity_id: &str) -> Option<(PathBuf, RecordFormat)> {
    let dir = record_dir(root, entity_id);
    let ini = dir.join(INI_FILE_NAME);
    if ini.is_file() {
        return Some((ini, RecordFormat::Ini));
    }
    if is_nested_root(root) {
        return None;
    }
    let json = dir.join(GSE_FILE_NAME);
    json.is_file().then_some((json, RecordFormat::GseJson))
}

/// Where a full replace for `entity_id` under `root` is written.
///
/// An existing record file keeps its format, INI first, so the written
/// file is always the one [`locate_record_file`] reads back. Otherwise GSE
/// save directories get JSON and everything else gets `preferred`, or INI.
pub fn write_target(root: &Path, entity_id: &str) -> (PathBuf, RecordFormat) {
    write_target_with(root, entity_id, None)
}

pub fn write_target_with(root: &Path, entity_id: &str, preferred: Option<RecordFormat>) -> (PathBuf, RecordFormat) {
    let dir = record_dir(root, entity_id);
    if is_nested_root(root) {
        return (dir.join(INI_FILE_NAME), RecordFormat::Ini);
    }
    if let Some(existing) = locate_record_file(root, entity_id) {
        return existing;
    }
    let format = if is_gse_root(root) {
        RecordFormat::GseJson
    } else {
        preferred.unwrap_or(RecordFormat::Ini)
    };
    (dir.join(format.file_name()), format)
}

/// The other record file that may sit next to `file`.
pub fn competing_file(file: &Path, format: RecordFormat) -> Option<PathBuf> {
    let other = match format {
        RecordFormat::Ini => RecordFormat::GseJson,
        RecordFormat::GseJson => RecordFormat::Ini,
    };
    file.parent().map(|dir| dir.join(other.file_name()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_dir_nested_layout() {
        let root = Path::new("/games/OnlineFix");
        assert_eq!(record_dir(root, "440"), PathBuf::from("/games/OnlineFix/440/Stats"));
        let root = Path::new("/games/CODEX");
        assert_eq!(record_dir(root, "440"), PathBuf::from("/games/CODEX/440"));
    }

    #[test]
    fn test_write_target_defaults() {
        let (path, format) = write_target(Path::new("/nowhere/RUNE"), "10");
        assert_eq!(path, PathBuf::from("/nowhere/RUNE/10/achievements.ini"));
        assert_eq!(format, RecordFormat::Ini);

        let (path, format) = write_target(Path::new("/nowhere/GSE Saves"), "10");
        assert_eq!(path, PathBuf::from("/nowhere/GSE Saves/10/achievements.json"));
        assert_eq!(format, RecordFormat::GseJson);

        let (path, format) = write_target(Path::new("/nowhere/OnlineFix"), "10");
        assert_eq!(path, PathBuf::from("/nowhere/OnlineFix/10/Stats/achievements.ini"));
        assert_eq!(format, RecordFormat::Ini);
    }

    #[test]
    fn test_write_target_follows_existing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("GSE Saves");
        std::fs::create_dir_all(root.join("99")).unwrap();
        std::fs::write(root.join("99").join(INI_FILE_NAME), "[A]\nAchieved=1\n").unwrap();

        let (path, format) = write_target(&root, "99");
        assert_eq!(format, RecordFormat::Ini);
        assert_eq!(Some((path, format)), locate_record_file(&root, "99"));

        let plain = tmp.path().join("CODEX");
        std::fs::create_dir_all(plain.join("7")).unwrap();
        std::fs::write(plain.join("7").join(GSE_FILE_NAME), "{}").unwrap();
        assert_eq!(write_target(&plain, "7").1, RecordFormat::GseJson);
        assert_eq!(write_target_with(&plain, "8", Some(RecordFormat::GseJson)).1, RecordFormat::GseJson);
    }

    #[test]
    fn test_competing_file() {
        let ini = Path::new("/r/1/achievements.ini");
        assert_eq!(
            competing_file(ini, RecordFormat::Ini),
            Some(PathBuf::from("/r/1/achievements.json"))
        );
    }
}
