use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

use achievement_sync::model::{EntitySnapshot, Record};
use achievement_sync::reconcile::{self, recent};
use achievement_sync::scanner;

fn ini(records: &[(&str, bool, i64)]) -> String {
    records
        .iter()
        .map(|(id, achieved, time)| format!("[{}]\nAchieved={}\nUnlockTime={}\n\n", id, *achieved as u8, time))
        .collect()
}

/// Layout:
///   CODEX/
///     440/achievements.ini    (WIN_GAME achieved, LOSE_GAME not)
///     570/achievements.ini    (empty, not tracked)
///     730/notes.txt           (no record file, not tracked)
///     readme.txt              (file at root level, ignored)
///   OnlineFix/
///     10/Stats/achievements.ini
///     20/achievements.ini     (wrong depth for this root, ignored)
fn create_test_tree(base: &Path) -> (PathBuf, PathBuf) {
    let codex = base.join("CODEX");
    let online_fix = base.join("OnlineFix");

    fs::create_dir_all(codex.join("440")).unwrap();
    fs::write(
        codex.join("440").join("achievements.ini"),
        ini(&[("WIN_GAME", true, 1_700_000_000), ("LOSE_GAME", false, 0)]),
    )
    .unwrap();
    fs::create_dir_all(codex.join("570")).unwrap();
    fs::write(codex.join("570").join("achievements.ini"), "").unwrap();
    fs::create_dir_all(codex.join("730")).unwrap();
    fs::write(codex.join("730").join("notes.txt"), "hello").unwrap();
    fs::write(codex.join("readme.txt"), "[X]\nAchieved=1\n").unwrap();

    fs::create_dir_all(online_fix.join("10").join("Stats")).unwrap();
    fs::write(
        online_fix.join("10").join("Stats").join("achievements.ini"),
        ini(&[("FIRST_BLOOD", true, 1_650_000_000)]),
    )
    .unwrap();
    fs::create_dir_all(online_fix.join("20")).unwrap();
    fs::write(online_fix.join("20").join("achievements.ini"), ini(&[("NOPE", true, 1)])).unwrap();

    (codex, online_fix)
}

#[test]
fn test_scan_finds_tracked_entities_only() {
    let tmp = tempdir().unwrap();
    let (codex, online_fix) = create_test_tree(tmp.path());

    let snapshots = scanner::scan(&[codex.clone(), online_fix.clone()]);
    let found: Vec<(&str, &Path)> = snapshots
        .iter()
        .map(|s| (s.entity_id.as_str(), s.root_path.as_path()))
        .collect();
    assert_eq!(found, vec![("440", codex.as_path()), ("10", online_fix.as_path())]);

    assert_eq!(
        snapshots[0].records,
        vec![
            Record::new("WIN_GAME", true, 1_700_000_000),
            Record::new("LOSE_GAME", false, 0),
        ]
    );
    assert_eq!(snapshots[1].records, vec![Record::new("FIRST_BLOOD", true, 1_650_000_000)]);
}

#[test]
fn test_missing_root_contributes_nothing() {
    let tmp = tempdir().unwrap();
    let (codex, _) = create_test_tree(tmp.path());

    let snapshots = scanner::scan(&[tmp.path().join("absent"), codex]);
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].entity_id, "440");
    assert!(scanner::scan(&[]).is_empty());
}

#[test]
fn test_gse_json_entity_is_scanned() {
    let tmp = tempdir().unwrap();
    let root = tmp.path().join("GSE Saves");
    fs::create_dir_all(root.join("99")).unwrap();
    fs::write(
        root.join("99").join("achievements.json"),
        r#"{"ACH_A": {"earned": true, "earned_time": 1700000000}, "ACH_B": {"earned": false, "earned_time": 0}}"#,
    )
    .unwrap();

    let snapshots = scanner::scan_root(&root);
    assert_eq!(snapshots.len(), 1);
    let mut records = snapshots[0].records.clone();
    records.sort_by(|a, b| a.id.cmp(&b.id));
    assert_eq!(
        records,
        vec![Record::new("ACH_A", true, 1_700_000_000), Record::new("ACH_B", false, 0)]
    );
}

#[test]
fn test_duplicate_entity_most_recent_wins() {
    let tmp = tempdir().unwrap();
    let older = tmp.path().join("CODEX");
    let newer = tmp.path().join("RUNE");
    fs::create_dir_all(older.join("440")).unwrap();
    fs::create_dir_all(newer.join("440")).unwrap();

    fs::write(older.join("440").join("achievements.ini"), ini(&[("A", true, 1)])).unwrap();
    // Let the modification times differ even on coarse-grained filesystems.
    thread::sleep(Duration::from_millis(1100));
    fs::write(newer.join("440").join("achievements.ini"), ini(&[("A", true, 1), ("B", true, 2)])).unwrap();

    for roots in [vec![older.clone(), newer.clone()], vec![newer.clone(), older.clone()]] {
        let reconciled = reconcile::reconcile(&scanner::scan(&roots));
        assert_eq!(reconciled.unique.len(), 1);
        assert_eq!(reconciled.unique[0].root_path, newer);
        assert_eq!(reconciled.unique[0].records.len(), 2);

        let group = reconciled.duplicate("440").unwrap();
        let members: Vec<&Path> = group.members.iter().map(|m| m.root_path.as_path()).collect();
        assert_eq!(members, vec![newer.as_path(), older.as_path()]);
    }
}

#[test]
fn test_select_then_recent() {
    let tmp = tempdir().unwrap();
    let (codex, online_fix) = create_test_tree(tmp.path());
    let rune = tmp.path().join("RUNE");
    fs::create_dir_all(rune.join("440")).unwrap();
    fs::write(rune.join("440").join("achievements.ini"), ini(&[("A", true, 1)])).unwrap();

    let snapshots = scanner::scan(&[codex.clone(), online_fix, rune.clone()]);
    let mut reconciled = reconcile::reconcile(&snapshots);
    assert_eq!(reconciled.unique.len(), 2);

    let current = reconciled
        .unique
        .iter()
        .find(|s| s.entity_id == "440")
        .map(|s| s.root_path.clone())
        .unwrap();
    let other = if current == codex { rune } else { codex };
    assert!(reconciled.select("440", &other));
    let chosen: Vec<&EntitySnapshot> = reconciled.unique.iter().filter(|s| s.entity_id == "440").collect();
    assert_eq!(chosen.len(), 1);
    assert_eq!(chosen[0].root_path, other);

    assert_eq!(recent(&reconciled.unique, 1).len(), 1);
    assert_eq!(recent(&reconciled.unique, 10).len(), 2);
}

#[test]
fn test_same_root_spelled_twice_is_scanned_once() {
    let tmp = tempdir().unwrap();
    let (codex, _) = create_test_tree(tmp.path());
    let mut trailing = codex.clone().into_os_string();
    trailing.push("/");

    let snapshots = scanner::scan(&[codex.clone(), PathBuf::from(trailing)]);
    assert_eq!(snapshots.len(), 1);

    let reconciled = reconcile::reconcile(&snapshots);
    assert_eq!(reconciled.unique.len(), 1);
    assert!(reconciled.duplicates.is_empty());
}
