//! Watches the configured roots and re-publishes the aggregate snapshot
//! after a burst of record-file changes settles.

pub mod debounce;

use crate::codec::is_record_file;
use crate::error::Error;
use crate::model::EntitySnapshot;
use crate::scanner::{self, layout};
use crate::utils::path::dedup_roots;
use debounce::Debouncer;
use notify::event::{AccessKind, AccessMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);
const TICK: Duration = Duration::from_millis(100);

/// Receives every aggregate snapshot the monitor publishes.
pub trait SnapshotSubscriber: Send + Sync {
    fn on_snapshot(&self, snapshots: &[EntitySnapshot]);
}

impl<F> SnapshotSubscriber for F
where
    F: Fn(&[EntitySnapshot]) + Send + Sync,
{
    fn on_snapshot(&self, snapshots: &[EntitySnapshot]) {
        self(snapshots)
    }
}

/// Subscriber that forwards snapshots into a channel.
pub struct ChannelSubscriber {
    tx: Mutex<Sender<Vec<EntitySnapshot>>>,
}

impl ChannelSubscriber {
    pub fn channel() -> (Arc<Self>, Receiver<Vec<EntitySnapshot>>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(Self { tx: Mutex::new(tx) }), rx)
    }
}

impl SnapshotSubscriber for ChannelSubscriber {
    fn on_snapshot(&self, snapshots: &[EntitySnapshot]) {
        if let Ok(tx) = self.tx.lock() {
            // A dropped receiver just means nobody is listening anymore.
            let _ = tx.send(snapshots.to_vec());
        }
    }
}

type Subscribers = Arc<Mutex<Vec<Arc<dyn SnapshotSubscriber>>>>;

enum MonitorMessage {
    Fs(notify::Result<Event>),
    Shutdown,
}

/// Watch handle for one root plus the directories attached beneath it.
struct RootWatch {
    root: PathBuf,
    watcher: RecommendedWatcher,
    watched: HashSet<PathBuf>,
}

impl RootWatch {
    /// Watch `root` and every entity directory it already holds. Fails when
    /// the root is missing or cannot be watched.
    fn open(root: &Path, tx: Sender<MonitorMessage>) -> Result<Self, Error> {
        if !root.is_dir() {
            return Err(Error::Other(format!("directory does not exist: {}", root.display())));
        }
        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                let _ = tx.send(MonitorMessage::Fs(res));
            },
            notify::Config::default(),
        )?;
        let mut watch = Self {
            root: root.to_path_buf(),
            watcher,
            watched: HashSet::new(),
        };
        watch.add(root)?;

        let entity_dirs: Vec<PathBuf> = std::fs::read_dir(root)?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        for dir in entity_dirs {
            watch.attach(&dir);
        }
        Ok(watch)
    }

    fn add(&mut self, dir: &Path) -> Result<(), Error> {
        if self.watched.contains(dir) {
            return Ok(());
        }
        self.watcher.watch(dir, RecursiveMode::NonRecursive)?;
        self.watched.insert(dir.to_path_buf());
        trace!("Watching {}", dir.display());
        Ok(())
    }

    /// Drop `path` and everything watched beneath it. The OS has already
    /// released those watches when the directory went away; the bookkeeping
    /// must follow so a recreated directory gets watched again. Returns true
    /// when anything was released.
    fn forget(&mut self, path: &Path) -> bool {
        if path == self.root {
            return false;
        }
        let gone: Vec<PathBuf> = self.watched.iter().filter(|w| w.starts_with(path)).cloned().collect();
        for dir in &gone {
            // Fails when the kernel already dropped the watch; nothing to undo then.
            let _ = self.watcher.unwatch(dir);
            self.watched.remove(dir);
            debug!("Released watch on removed directory {}", dir.display());
        }
        !gone.is_empty()
    }

    /// Attach a directory that belongs to this root's layout: an entity
    /// directory, or the `Stats` directory of a nested-layout entity.
    /// Returns true when the attached directory already holds a record file.
    fn attach(&mut self, dir: &Path) -> bool {
        let nested = layout::is_nested_root(&self.root);
        let is_entity_dir = dir.parent() == Some(self.root.as_path());
        let is_stats_dir = nested
            && dir.file_name().and_then(|n| n.to_str()) == Some(layout::STATS_DIR)
            && dir.parent().and_then(Path::parent) == Some(self.root.as_path());
        if !is_entity_dir && !is_stats_dir {
            return false;
        }

        if let Err(e) = self.add(dir) {
            warn!("Failed to watch {}: {}", dir.display(), e);
            return false;
        }
        if is_entity_dir && nested {
            let stats = dir.join(layout::STATS_DIR);
            if stats.is_dir() {
                return self.attach(&stats);
            }
        }
        contains_record_file(dir)
    }
}

fn contains_record_file(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|entries| entries.flatten().any(|e| is_record_file(&e.path())))
        .unwrap_or(false)
}

/// True for events that may change a record file's content. Reads (open,
/// close without write) are not changes.
pub fn is_record_event(event: &Event) -> bool {
    let changes = match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => true,
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => true,
        _ => false,
    };
    changes && event.paths.iter().any(|p| is_record_file(p))
}

struct Running {
    tx: Sender<MonitorMessage>,
    handle: JoinHandle<()>,
}

/// Filesystem monitor for a set of roots.
///
/// `start` delivers one snapshot synchronously, then one per settled burst
/// of record-file changes. After `stop` returns nothing more is delivered.
pub struct Monitor {
    roots: Vec<PathBuf>,
    debounce: Duration,
    subscribers: Subscribers,
    running: Option<Running>,
}

impl Monitor {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots: dedup_roots(&roots),
            debounce: DEFAULT_DEBOUNCE,
            subscribers: Arc::new(Mutex::new(Vec::new())),
            running: None,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn SnapshotSubscriber>) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(subscriber);
        }
    }

    /// Current aggregate snapshot, without watching anything.
    pub fn current(&self) -> Vec<EntitySnapshot> {
        scanner::scan(&self.roots)
    }

    pub fn start(&mut self) {
        if self.running.is_some() {
            return;
        }
        info!("Starting achievement monitoring for {} roots", self.roots.len());

        let (tx, rx) = mpsc::channel();
        let mut watches = Vec::new();
        for root in &self.roots {
            match RootWatch::open(root, tx.clone()) {
                Ok(watch) => {
                    info!("Monitoring active for {}", root.display());
                    watches.push(watch);
                }
                Err(e) => warn!("Monitoring FAILED for {}: {}", root.display(), e),
            }
        }

        let initial = scanner::scan(&self.roots);
        info!("Initial scan complete, {} entity snapshots", initial.len());
        deliver(&self.subscribers, &initial);

        let worker = Worker {
            roots: self.roots.clone(),
            watches,
            debouncer: Debouncer::new(self.debounce),
            subscribers: Arc::clone(&self.subscribers),
        };
        let handle = thread::spawn(move || worker.run(rx));
        self.running = Some(Running { tx, handle });
    }

    /// Release every watch handle. Blocks until the worker thread has exited.
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        info!("Stopping achievement monitoring");
        let _ = running.tx.send(MonitorMessage::Shutdown);
        if running.handle.join().is_err() {
            error!("Monitor worker panicked");
        }
    }

    pub fn set_roots(&mut self, roots: Vec<PathBuf>) {
        let was_running = self.running.is_some();
        self.stop();
        self.roots = dedup_roots(&roots);
        if was_running {
            self.start();
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn deliver(subscribers: &Subscribers, snapshots: &[EntitySnapshot]) {
    let subscribers: Vec<Arc<dyn SnapshotSubscriber>> = match subscribers.lock() {
        Ok(subscribers) => subscribers.clone(),
        Err(_) => return,
    };
    for subscriber in subscribers {
        subscriber.on_snapshot(snapshots);
    }
}

struct Worker {
    roots: Vec<PathBuf>,
    watches: Vec<RootWatch>,
    debouncer: Debouncer,
    subscribers: Subscribers,
}

impl Worker {
    fn run(mut self, rx: Receiver<MonitorMessage>) {
        loop {
            match rx.recv_timeout(TICK) {
                Ok(MonitorMessage::Fs(Ok(event))) => self.handle_event(&event),
                Ok(MonitorMessage::Fs(Err(e))) => warn!("Watcher error: {}", e),
                Ok(MonitorMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }

            if self.debouncer.poll(Instant::now()) {
                info!("Debounce period finished, refreshing snapshots");
                let snapshots = scanner::scan(&self.roots);
                deliver(&self.subscribers, &snapshots);
            }
        }
        debug!("Monitor worker exiting, releasing {} watches", self.watches.len());
    }

    fn handle_event(&mut self, event: &Event) {
        if matches!(event.kind, EventKind::Remove(_)) {
            let mut released = false;
            for path in &event.paths {
                released |= self.forget(path);
            }
            if released {
                // A removed entity directory drops its snapshot even when no
                // record-file event made it through.
                self.debouncer.record(Instant::now());
            }
        }

        if matches!(event.kind, EventKind::Create(_)) {
            for dir in event.paths.iter().filter(|p| p.is_dir()) {
                // A stale entry left by a missed removal would block the new watch.
                self.forget(dir);
                if self.attach(dir) {
                    debug!("New directory {} already holds a record file", dir.display());
                    self.debouncer.record(Instant::now());
                }
            }
        }

        if is_record_event(event) {
            trace!("Record file event {:?} on {:?}", event.kind, event.paths);
            self.debouncer.record(Instant::now());
        }
    }

    fn attach(&mut self, dir: &Path) -> bool {
        self.watches.iter_mut().any(|watch| watch.attach(dir))
    }

    fn forget(&mut self, path: &Path) -> bool {
        self.watches
            .iter_mut()
            .fold(false, |released, watch| watch.forget(path) || released)
    }
}
