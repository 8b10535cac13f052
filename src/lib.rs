pub mod backup;
pub mod codec;
pub mod config;
pub mod error;
pub mod model;
pub mod monitor;
pub mod reconcile;
pub mod scanner;
pub mod status_cache;
pub mod timestamp;
pub mod unlock;
pub mod utils;

pub use backup::{Backup, BackupEntry, ConflictStrategy, RestoreOptions, RestorePreview, RestoreSummary};
pub use config::AppConfig;
pub use error::{Error, UnlockError};
pub use model::{DirectoryConfig, DuplicateGroup, EntitySnapshot, Record};
pub use monitor::{ChannelSubscriber, Monitor, SnapshotSubscriber};
pub use reconcile::{reconcile, Reconciled};
pub use status_cache::{SourceKey, StatusCache, StatusEntry};
pub use timestamp::{ClockFormat, Meridiem, Timestamp, TimestampField};
pub use unlock::{Orchestrator, SilentObserver, UnlockMode, UnlockObserver, UnlockOutcome, UnlockTarget};
