use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

use achievement_sync::model::EntitySnapshot;
use achievement_sync::{ChannelSubscriber, Monitor};

const DEBOUNCE: Duration = Duration::from_millis(200);
const WAIT: Duration = Duration::from_secs(5);

fn write_record(root: &Path, entity: &str, id: &str) {
    let dir = root.join(entity);
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("achievements.ini"),
        format!("[{}]\nAchieved=1\nUnlockTime=1700000000\n\n", id),
    )
    .unwrap();
}

fn ids(snapshots: &[EntitySnapshot]) -> Vec<&str> {
    snapshots.iter().map(|s| s.entity_id.as_str()).collect()
}

/// Wait until a delivery satisfies `pred`.
fn wait_for(rx: &Receiver<Vec<EntitySnapshot>>, pred: impl Fn(&[EntitySnapshot]) -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match rx.recv_timeout(left) {
            Ok(snapshots) if pred(&snapshots) => return true,
            Ok(_) => {}
            Err(_) => return false,
        }
    }
    false
}

fn canonical_root(base: &Path, name: &str) -> PathBuf {
    let root = base.join(name);
    fs::create_dir_all(&root).unwrap();
    root.canonicalize().unwrap()
}

#[test]
fn test_start_delivers_initial_snapshot_synchronously() {
    let tmp = tempdir().unwrap();
    let root = canonical_root(tmp.path(), "CODEX");
    write_record(&root, "440", "WIN_GAME");

    let mut monitor = Monitor::new(vec![root]).with_debounce(DEBOUNCE);
    let (subscriber, rx) = ChannelSubscriber::channel();
    monitor.subscribe(subscriber);
    monitor.start();

    let initial = rx.try_recv().expect("initial snapshot delivered before start returns");
    assert_eq!(ids(&initial), vec!["440"]);
    monitor.stop();
}

#[test]
fn test_burst_of_writes_is_one_delivery() {
    let tmp = tempdir().unwrap();
    let root = canonical_root(tmp.path(), "CODEX");
    write_record(&root, "440", "WIN_GAME");

    let mut monitor = Monitor::new(vec![root.clone()]).with_debounce(DEBOUNCE);
    let (subscriber, rx) = ChannelSubscriber::channel();
    monitor.subscribe(subscriber);
    monitor.start();
    rx.recv_timeout(WAIT).unwrap();

    for i in 0..5 {
        write_record(&root, "440", &format!("ACH_{}", i));
    }

    let refreshed = rx.recv_timeout(WAIT).expect("refresh after the burst settles");
    assert_eq!(refreshed[0].records[0].id, "ACH_4");
    assert!(rx.recv_timeout(DEBOUNCE * 3).is_err(), "burst produced more than one delivery");
    monitor.stop();
}

#[test]
fn test_entity_created_after_start_is_picked_up() {
    let tmp = tempdir().unwrap();
    let root = canonical_root(tmp.path(), "CODEX");

    let mut monitor = Monitor::new(vec![root.clone()]).with_debounce(DEBOUNCE);
    let (subscriber, rx) = ChannelSubscriber::channel();
    monitor.subscribe(subscriber);
    monitor.start();
    assert!(rx.recv_timeout(WAIT).unwrap().is_empty());

    fs::create_dir_all(root.join("570")).unwrap();
    // Give the worker a moment to attach the new directory.
    thread::sleep(Duration::from_millis(300));
    write_record(&root, "570", "A");

    assert!(wait_for(&rx, |s| ids(s) == vec!["570"]), "new entity never delivered");
    monitor.stop();
}

#[test]
fn test_nothing_delivered_after_stop() {
    let tmp = tempdir().unwrap();
    let root = canonical_root(tmp.path(), "CODEX");
    write_record(&root, "440", "WIN_GAME");

    let deliveries = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&deliveries);
    let mut monitor = Monitor::new(vec![root.clone()]).with_debounce(DEBOUNCE);
    monitor.subscribe(Arc::new(move |_: &[EntitySnapshot]| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    monitor.start();
    assert!(monitor.is_running());

    write_record(&root, "440", "CHANGED");
    monitor.stop();
    assert!(!monitor.is_running());
    let after_stop = deliveries.load(Ordering::SeqCst);

    write_record(&root, "440", "AGAIN");
    thread::sleep(DEBOUNCE * 3);
    assert_eq!(deliveries.load(Ordering::SeqCst), after_stop);
}

#[test]
fn test_missing_root_does_not_block_others() {
    let tmp = tempdir().unwrap();
    let root = canonical_root(tmp.path(), "CODEX");
    let missing = tmp.path().join("absent");

    let mut monitor = Monitor::new(vec![missing, root.clone()]).with_debounce(DEBOUNCE);
    let (subscriber, rx) = ChannelSubscriber::channel();
    monitor.subscribe(subscriber);
    monitor.start();
    assert!(rx.recv_timeout(WAIT).unwrap().is_empty());

    fs::create_dir_all(root.join("440")).unwrap();
    thread::sleep(Duration::from_millis(300));
    write_record(&root, "440", "WIN_GAME");

    assert!(wait_for(&rx, |s| ids(s) == vec!["440"]));
    monitor.stop();
}

#[test]
fn test_current_scans_without_starting() {
    let tmp = tempdir().unwrap();
    let root = canonical_root(tmp.path(), "CODEX");
    write_record(&root, "440", "WIN_GAME");

    let monitor = Monitor::new(vec![root]);
    assert!(!monitor.is_running());
    assert_eq!(ids(&monitor.current()), vec!["440"]);
}

#[test]
fn test_recreated_entity_dir_is_watched_again() {
    let tmp = tempdir().unwrap();
    let root = canonical_root(tmp.path(), "CODEX");
    write_record(&root, "440", "FIRST");

    let mut monitor = Monitor::new(vec![root.clone()]).with_debounce(DEBOUNCE);
    let (subscriber, rx) = ChannelSubscriber::channel();
    monitor.subscribe(subscriber);
    monitor.start();
    assert_eq!(ids(&rx.recv_timeout(WAIT).unwrap()), vec!["440"]);

    fs::remove_dir_all(root.join("440")).unwrap();
    assert!(wait_for(&rx, |s| s.is_empty()), "removal never delivered");

    fs::create_dir_all(root.join("440")).unwrap();
    thread::sleep(Duration::from_millis(300));
    write_record(&root, "440", "SECOND");
    assert!(wait_for(&rx, |s| ids(s) == vec!["440"]));

    // Only a watch on the recreated directory sees an in-place rewrite.
    thread::sleep(DEBOUNCE * 2);
    while rx.try_recv().is_ok() {}
    write_record(&root, "440", "THIRD");
    assert!(
        wait_for(&rx, |s| s.len() == 1 && s[0].records[0].id == "THIRD"),
        "rewrite in the recreated directory was missed"
    );
    monitor.stop();
}

#[test]
fn test_nested_stats_dir_created_after_start() {
    let tmp = tempdir().unwrap();
    let root = canonical_root(tmp.path(), "OnlineFix");

    let mut monitor = Monitor::new(vec![root.clone()]).with_debounce(DEBOUNCE);
    let (subscriber, rx) = ChannelSubscriber::channel();
    monitor.subscribe(subscriber);
    monitor.start();
    assert!(rx.recv_timeout(WAIT).unwrap().is_empty());

    fs::create_dir_all(root.join("730")).unwrap();
    thread::sleep(Duration::from_millis(300));
    let stats = root.join("730").join("Stats");
    fs::create_dir_all(&stats).unwrap();
    thread::sleep(Duration::from_millis(300));
    fs::write(stats.join("achievements.ini"), "[ACE]\nAchieved=1\nUnlockTime=1700000000\n\n").unwrap();

    assert!(wait_for(&rx, |s| ids(s) == vec!["730"]), "nested entity never delivered");

    thread::sleep(DEBOUNCE * 2);
    while rx.try_recv().is_ok() {}
    fs::write(stats.join("achievements.ini"), "[CLUTCH]\nAchieved=1\nUnlockTime=1700000001\n\n").unwrap();
    assert!(wait_for(&rx, |s| s.len() == 1 && s[0].records[0].id == "CLUTCH"));
    monitor.stop();
}

#[test]
fn test_removed_entity_dir_drops_out() {
    let tmp = tempdir().unwrap();
    let root = canonical_root(tmp.path(), "CODEX");
    write_record(&root, "440", "A");
    write_record(&root, "570", "B");

    let mut monitor = Monitor::new(vec![root.clone()]).with_debounce(DEBOUNCE);
    let (subscriber, rx) = ChannelSubscriber::channel();
    monitor.subscribe(subscriber);
    monitor.start();
    assert_eq!(rx.recv_timeout(WAIT).unwrap().len(), 2);

    fs::remove_dir_all(root.join("570")).unwrap();
    assert!(wait_for(&rx, |s| ids(s) == vec!["440"]), "removed entity still delivered");
    monitor.stop();
}
