use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error(transparent)]
    Unlock(#[from] UnlockError),

    #[error("Unsupported backup format version {0}")]
    UnsupportedBackup(u32),

    #[error("Restore canceled: entity {entity_id} in {} differs from the backup", root.display())]
    RestoreCanceled {
        entity_id: String,
        root: std::path::PathBuf,
    },

    #[error("{0}")]
    Other(String),
}

/// Failure of one unlock. The caller is expected to revert any optimistic
/// state it applied before calling.
#[derive(Error, Debug)]
pub enum UnlockError {
    #[error("an unlock for entity {0} is already in progress")]
    Busy(String),

    #[error("custom timestamp is missing or incomplete")]
    IncompleteCustomTimestamp,

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("verification failed for {}: {reason}", path.display())]
    Verify {
        path: std::path::PathBuf,
        reason: String,
    },
}
