mod cli;
mod logging;

use achievement_sync::backup::{self, ConflictStrategy, RestoreOptions};
use achievement_sync::config::{self, AppConfig};
use achievement_sync::reconcile::{self, Reconciled};
use achievement_sync::scanner;
use achievement_sync::unlock::{Orchestrator, UnlockObserver, UnlockPhase, UnlockTarget};
use achievement_sync::{
    ChannelSubscriber, ClockFormat, EntitySnapshot, Monitor, SourceKey, StatusCache, Timestamp, TimestampField,
    UnlockMode,
};
use anyhow::{anyhow, bail, Context};
use chrono::NaiveDateTime;
use clap::{CommandFactory, Parser};
use cli::{Cli, Commands, RestoreArgs, SourceArgs, StatusCommand, UnlockArgs};
use colored::*;
use dotenv::dotenv;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process;
use tracing::{debug, error, info, warn};

fn main() {
    dotenv().ok();

    let args = Cli::parse();

    let console = match &args.command {
        Some(Commands::Scan { json: true }) => logging::Console::Stderr,
        _ => logging::Console::Stdout,
    };
    let _guard = logging::init_logger(console);

    let loaded = match &args.config {
        Some(path) => config::load_from(path),
        None => config::load_configuration(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };
    debug!("config.directories: {:?}", config.directories);
    if config.enabled_roots().is_empty() {
        warn!("No enabled directories configured, nothing will be found");
    }

    let result = match args.command {
        Some(Commands::Scan { json }) => run_scan(&config, json),
        Some(Commands::Duplicates) => run_duplicates(&config),
        Some(Commands::Recent { limit }) => run_recent(&config, limit),
        Some(Commands::Watch) => run_watch(&config),
        Some(Commands::Unlock(unlock_args)) => run_unlock(&config, unlock_args),
        Some(Commands::Status(command)) => run_status(&config, command),
        Some(Commands::Backup { output, entities }) => run_backup(&config, &output, &entities),
        Some(Commands::Restore(restore_args)) => run_restore(&config, restore_args),
        Some(Commands::ClockFormat { format }) => run_clock_format(&config, &format),
        Some(Commands::PrintConfig) => toml::to_string_pretty(&config)
            .map(|rendered| println!("{}", rendered))
            .map_err(Into::into),
        None => Cli::command().print_long_help().map_err(Into::into),
    };

    if let Err(err) = result {
        error!("Error: {:#}", err);
        process::exit(1);
    }
}

/// The configured clock format only seeds a new cache. Switching an
/// existing one goes through `clock-format`, which migrates its timestamps.
fn open_cache(config: &AppConfig) -> StatusCache {
    StatusCache::open(&config.status_cache_path(), config.clock_format)
}

fn source_key(source: &SourceArgs) -> SourceKey {
    if source.catalog {
        SourceKey::Catalog
    } else {
        SourceKey::from_root(source.root.as_deref())
    }
}

fn print_snapshot(snapshot: &EntitySnapshot) {
    let achieved = snapshot.records.iter().filter(|r| r.achieved).count();
    println!(
        "{:>12}  {}/{}  {}  {}",
        snapshot.entity_id.bold(),
        format!("{}", achieved).green(),
        snapshot.records.len(),
        snapshot.last_modified.format("%Y-%m-%d %H:%M:%S"),
        snapshot.root_path.display().to_string().dimmed(),
    );
}

fn print_reconciled(reconciled: &Reconciled) {
    for snapshot in &reconciled.unique {
        print_snapshot(snapshot);
    }
    info!(
        "{} entities, {} found under more than one root",
        format!("{}", reconciled.unique.len()).cyan(),
        format!("{}", reconciled.duplicates.len()).red(),
    );
}

fn run_scan(config: &AppConfig, json: bool) -> anyhow::Result<()> {
    let snapshots = scanner::scan(&config.enabled_roots());
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshots)?);
    } else {
        print_reconciled(&reconcile::reconcile(&snapshots));
    }
    Ok(())
}

fn run_duplicates(config: &AppConfig) -> anyhow::Result<()> {
    let reconciled = reconcile::reconcile(&scanner::scan(&config.enabled_roots()));
    if reconciled.duplicates.is_empty() {
        info!("No entity is tracked under more than one root");
    }
    for group in &reconciled.duplicates {
        println!("{} ({})", group.display_name.bold(), group.members.len());
        for (i, member) in group.members.iter().enumerate() {
            let marker = if i == 0 { "*".green() } else { " ".normal() };
            print!("  {} ", marker);
            print_snapshot(member);
        }
    }
    Ok(())
}

fn run_recent(config: &AppConfig, limit: usize) -> anyhow::Result<()> {
    let reconciled = reconcile::reconcile(&scanner::scan(&config.enabled_roots()));
    for snapshot in reconcile::recent(&reconciled.unique, limit) {
        print_snapshot(&snapshot);
    }
    Ok(())
}

fn run_watch(config: &AppConfig) -> anyhow::Result<()> {
    let mut monitor = Monitor::new(config.enabled_roots()).with_debounce(config.debounce());
    let (subscriber, updates) = ChannelSubscriber::channel();
    monitor.subscribe(subscriber);
    monitor.start();

    for snapshots in updates {
        println!("{}", "-- snapshot --".dimmed());
        print_reconciled(&reconcile::reconcile(&snapshots));
    }
    monitor.stop();
    Ok(())
}

struct CliObserver;

impl UnlockObserver for CliObserver {
    fn on_phase(&self, entity_id: &str, phase: UnlockPhase) {
        debug!("Unlock {} -> {:?}", entity_id, phase);
    }
}

fn parse_custom_time(value: &str) -> anyhow::Result<Timestamp> {
    let naive = NaiveDateTime::parse_from_str(value.trim(), "%Y-%m-%d %H:%M")
        .with_context(|| format!("expected \"YYYY-MM-DD HH:MM\", got \"{}\"", value))?;
    Ok(Timestamp::from_datetime(&naive, ClockFormat::TwentyFourHour))
}

/// Explicit root, else the entity's most recent root, else the first
/// enabled root.
fn choose_root(explicit: Option<&Path>, reconciled: &Reconciled, entity_id: &str, roots: &[PathBuf]) -> Option<PathBuf> {
    if let Some(root) = explicit {
        return Some(root.to_path_buf());
    }
    reconciled
        .unique
        .iter()
        .find(|s| s.entity_id == entity_id)
        .map(|s| s.root_path.clone())
        .or_else(|| roots.first().cloned())
}

fn run_unlock(config: &AppConfig, args: UnlockArgs) -> anyhow::Result<()> {
    let roots = config.enabled_roots();
    let mut cache = open_cache(config);
    let snapshots = scanner::scan(&roots);
    let reconciled = reconcile::reconcile(&snapshots);
    let known_roots: Vec<PathBuf> = snapshots
        .iter()
        .filter(|s| s.entity_id == args.entity_id)
        .map(|s| s.root_path.clone())
        .collect();

    let root = choose_root(args.root.as_deref(), &reconciled, &args.entity_id, &roots)
        .ok_or_else(|| anyhow!("no root to write to, configure a directory or pass --root"))?;
    let mode: UnlockMode = args.mode.parse().map_err(|e: String| anyhow!(e))?;

    let source = if args.catalog || !args.catalog_ids.is_empty() {
        SourceKey::Catalog
    } else {
        SourceKey::root(&root)
    };

    let mut target = if args.records.is_empty() {
        UnlockTarget::from_status(&cache, &args.entity_id, &root, &source, &known_roots, mode)
    } else {
        args.records.iter().fold(UnlockTarget::new(&args.entity_id, &root, mode), |target, id| {
            target.with_item(id, true, Timestamp::default())
        })
    };
    if let Some(at) = &args.at {
        target = target.with_custom_timestamp(parse_custom_time(at)?);
    }
    if !args.catalog_ids.is_empty() {
        target = target.with_catalog(args.catalog_ids.clone());
    }
    if target.items.is_empty() && args.catalog_ids.is_empty() {
        bail!("nothing to unlock for {}, toggle some records first", args.entity_id);
    }

    let orchestrator = Orchestrator::new();
    let outcome = orchestrator.unlock(&target, &CliObserver)?;

    cache.replace_with_records(&args.entity_id, &source, &outcome.verified);
    cache.reset(&args.entity_id, Some(&SourceKey::Auto));

    info!(
        "Unlocked {} records for {} in {}",
        format!("{}", outcome.verified.iter().filter(|r| r.achieved).count()).green(),
        args.entity_id.bold(),
        outcome.file_path.display(),
    );
    Ok(())
}

/// Record ids a bulk edit covers: what the source's bucket already holds,
/// the records on disk under the chosen root (or the most recent one) and
/// any ids passed explicitly.
fn bulk_record_ids(
    config: &AppConfig,
    cache: &StatusCache,
    entity_id: &str,
    source: &SourceKey,
    root: Option<&Path>,
    extra: &[String],
) -> Vec<String> {
    let mut ids: BTreeSet<String> = cache
        .bucket(entity_id, source)
        .map(|bucket| bucket.keys().cloned().collect())
        .unwrap_or_default();

    let reconciled = reconcile::reconcile(&scanner::scan(&config.enabled_roots()));
    let on_disk = match root {
        Some(root) => scanner::scan_entity(root, entity_id),
        None => reconciled.unique.into_iter().find(|s| s.entity_id == entity_id),
    };
    if let Some(snapshot) = on_disk {
        ids.extend(snapshot.records.into_iter().map(|r| r.id));
    }
    ids.extend(extra.iter().cloned());
    ids.into_iter().collect()
}

fn run_status(config: &AppConfig, command: StatusCommand) -> anyhow::Result<()> {
    let mut cache = open_cache(config);
    match command {
        StatusCommand::Show { entity_id } => {
            for (source, bucket) in cache.buckets_for(&entity_id) {
                println!("{}", source.to_string().cyan());
                for (record_id, entry) in bucket {
                    let mark = if entry.achieved { "x".green() } else { " ".normal() };
                    println!("  [{}] {} {:?}", mark, record_id, entry.timestamp);
                }
            }
        }
        StatusCommand::Toggle { entity_id, record_id, source } => {
            let achieved = cache.toggle(&entity_id, &record_id, &source_key(&source));
            info!("{} is now {}", record_id, if achieved { "achieved" } else { "not achieved" });
        }
        StatusCommand::All { entity_id, unlock, lock, ids, source } => {
            let key = source_key(&source);
            let record_ids = bulk_record_ids(config, &cache, &entity_id, &key, source.root.as_deref(), &ids);
            if record_ids.is_empty() {
                bail!("no known records for {}, pass them with --ids", entity_id);
            }
            let achieved = if unlock || lock {
                cache.set_all(&entity_id, &key, &record_ids, unlock);
                unlock
            } else {
                cache.toggle_all(&entity_id, &key, &record_ids)
            };
            info!(
                "{} records of {} are now {}",
                record_ids.len(),
                entity_id,
                if achieved { "achieved" } else { "locked" }
            );
        }
        StatusCommand::Set { entity_id, record_id, field, value, source } => {
            let field: TimestampField = field.parse().map_err(|e: String| anyhow!(e))?;
            if !cache.set_timestamp_field(&entity_id, &record_id, field, &value, &source_key(&source)) {
                warn!("{} is not marked achieved, toggle it first", record_id);
            }
        }
        StatusCommand::Clear { entity_id, record_id, source } => {
            cache.clear_timestamp(&entity_id, &record_id, &source_key(&source));
        }
        StatusCommand::Reset { entity_id, source } => {
            let key = (source.catalog || source.root.is_some()).then(|| source_key(&source));
            let removed = cache.reset(&entity_id, key.as_ref());
            info!("Removed {} pending edit buckets for {}", removed, entity_id);
        }
    }
    Ok(())
}

fn run_backup(config: &AppConfig, output: &Path, entities: &[String]) -> anyhow::Result<()> {
    let reconciled = reconcile::reconcile(&scanner::scan(&config.enabled_roots()));
    let saved = backup::create_backup(&reconciled.unique, entities, output)?;
    info!(
        "Saved {} entities to {}",
        format!("{}", saved.entries.len()).green(),
        output.display()
    );
    Ok(())
}

fn parse_resolution(value: &str) -> anyhow::Result<(usize, ConflictStrategy)> {
    let (index, strategy) = value
        .split_once('=')
        .ok_or_else(|| anyhow!("expected INDEX=STRATEGY, got \"{}\"", value))?;
    let index = index.trim().parse().with_context(|| format!("bad entry index in \"{}\"", value))?;
    let strategy = strategy.parse().map_err(|e: String| anyhow!(e))?;
    Ok((index, strategy))
}

fn run_restore(config: &AppConfig, args: RestoreArgs) -> anyhow::Result<()> {
    let saved = backup::read_backup(&args.backup)?;
    info!("Backup from {} holds {} entries", saved.created_at.format("%Y-%m-%d %H:%M:%S"), saved.entries.len());

    for preview in backup::preview(&saved) {
        let marker = if preview.has_conflict() { "!".red() } else { " ".normal() };
        println!(
            "{} {:>3}  {:>12}  backup {} / disk {}  changed {}  new {}  {}",
            marker,
            preview.index,
            preview.entity_id.bold(),
            preview.backup_records,
            preview.existing_records,
            preview.changed,
            preview.new,
            preview.root_path.display().to_string().dimmed(),
        );
    }
    if !args.apply {
        return Ok(());
    }

    let mut options = RestoreOptions {
        selected: args.only.iter().copied().collect(),
        default_strategy: args.on_conflict.parse().map_err(|e: String| anyhow!(e))?,
        ..RestoreOptions::default()
    };
    for value in &args.resolutions {
        let (index, strategy) = parse_resolution(value)?;
        options.strategies.insert(index, strategy);
    }

    let summary = backup::apply_restore(&saved, &options, &Orchestrator::new(), &CliObserver)?;

    let mut cache = open_cache(config);
    for outcome in &summary.restored {
        if let Some(snapshot) = &outcome.snapshot {
            cache.replace_with_records(&outcome.entity_id, &SourceKey::root(&snapshot.root_path), &outcome.verified);
        }
    }
    info!(
        "Restored {} entries, skipped {}",
        format!("{}", summary.restored.len()).green(),
        summary.skipped.len()
    );
    Ok(())
}

fn run_clock_format(config: &AppConfig, format: &str) -> anyhow::Result<()> {
    let format: ClockFormat = format.parse().map_err(|e: String| anyhow!(e))?;
    let mut cache = open_cache(config);
    let converted = cache.set_clock_format(format);
    info!("Clock format is now {}, {} timestamps converted", format, converted);
    Ok(())
}
