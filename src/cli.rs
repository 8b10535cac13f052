use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "achievement-sync")]
#[command(about = "Track and author achievement unlock files across save directories", long_about = None)]
pub struct Cli {
    /// Explicit config file instead of ./Config.toml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan every enabled root once and list the entities found
    Scan {
        /// Print snapshots as JSON
        #[arg(long)]
        json: bool,
    },
    /// List entities found under more than one root
    Duplicates,
    /// List the most recently modified entities
    Recent {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Watch the enabled roots and print every refreshed snapshot
    Watch,
    /// Write a new unlock state for one entity
    Unlock(UnlockArgs),
    /// Inspect or edit pending unlock edits
    #[command(subcommand)]
    Status(StatusCommand),
    /// Save the records of every tracked entity (or the given ones) to a file
    Backup {
        output: PathBuf,
        /// Entity ids to include; all when omitted
        #[arg(long = "entity")]
        entities: Vec<String>,
    },
    /// Compare a backup with the current files and optionally restore it
    Restore(RestoreArgs),
    /// Switch the clock format and migrate stored timestamps
    ClockFormat {
        /// 12h or 24h
        format: String,
    },
    /// Print configuration values
    PrintConfig,
}

#[derive(Debug, Args)]
pub struct UnlockArgs {
    pub entity_id: String,
    /// Root to write to; defaults to the entity's current or first enabled root
    #[arg(long)]
    pub root: Option<PathBuf>,
    /// current, random or custom
    #[arg(long, default_value = "current")]
    pub mode: String,
    /// Custom unlock time as "YYYY-MM-DD HH:MM", used with --mode custom
    #[arg(long)]
    pub at: Option<String>,
    /// Record ids to unlock; when omitted pending edits are used
    #[arg(long = "record")]
    pub records: Vec<String>,
    /// Complete record id list for catalog-backed sources
    #[arg(long, value_delimiter = ',')]
    pub catalog_ids: Vec<String>,
    /// Draw pending edits from the catalog bucket and write the full catalog
    #[arg(long)]
    pub catalog: bool,
}

#[derive(Debug, Args)]
pub struct RestoreArgs {
    pub backup: PathBuf,
    /// Write the backup; without it only the comparison is printed
    #[arg(long)]
    pub apply: bool,
    /// Entry indices to restore; all when omitted
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<usize>,
    /// backup, current or cancel for entries that differ from disk
    #[arg(long, default_value = "backup")]
    pub on_conflict: String,
    /// Per-entry override as INDEX=STRATEGY, repeatable
    #[arg(long = "resolve")]
    pub resolutions: Vec<String>,
}

/// Which pending-edit bucket a status command works on. Neither flag means
/// the unresolved `auto` bucket.
#[derive(Debug, Args)]
pub struct SourceArgs {
    #[arg(long)]
    pub root: Option<PathBuf>,
    #[arg(long, conflicts_with = "root")]
    pub catalog: bool,
}

#[derive(Debug, Subcommand)]
pub enum StatusCommand {
    /// Show pending edits for an entity
    Show { entity_id: String },
    /// Flip a record's achieved flag
    Toggle {
        entity_id: String,
        record_id: String,
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Mark every known record achieved or locked; flips them when neither flag is given
    All {
        entity_id: String,
        #[arg(long)]
        unlock: bool,
        #[arg(long, conflicts_with = "unlock")]
        lock: bool,
        /// Extra record ids, e.g. a catalog the files do not list yet
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Set one timestamp field (day, month, year, hour, minute, meridiem)
    Set {
        entity_id: String,
        record_id: String,
        field: String,
        value: String,
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Clear a record's timestamp
    Clear {
        entity_id: String,
        record_id: String,
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Drop pending edits for an entity (one source, or all)
    Reset {
        entity_id: String,
        #[command(flatten)]
        source: SourceArgs,
    },
}
