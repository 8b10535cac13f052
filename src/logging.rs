use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "info";
const DEFAULT_LOG_FILE: &str = "./logs/achievement-sync.log";
const FALLBACK_FILE_NAME: &str = "achievement-sync.log";

/// Stream that receives console log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Console {
    Stdout,
    /// Leaves stdout to machine-readable output such as `scan --json`.
    Stderr,
}

/// Directory and file name for a `LOG_FILE_PATH` value. A bare file name
/// lands in the working directory.
fn split_log_path(path: &Path) -> (PathBuf, String) {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string());
    (dir, file)
}

fn open_log_file(path: &Path) -> std::io::Result<RollingFileAppender> {
    let (dir, file) = split_log_path(path);
    fs::create_dir_all(&dir)?;
    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file)
        .build(&dir)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
}

/// Install console and file logging. Keep the returned guard alive for the
/// life of the process or buffered file output is lost. When the log file
/// cannot be opened only the console layer produces output.
pub fn init_logger(console: Console) -> WorkerGuard {
    // `TRACING_LEVEL` takes any EnvFilter directive, e.g. `achievement_sync=debug`.
    let filter = env::var("TRACING_LEVEL").unwrap_or_else(|_| DEFAULT_FILTER.to_string());
    let filter_layer = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let log_file = env::var("LOG_FILE_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOG_FILE));
    let (non_blocking, guard, file_error) = match open_log_file(&log_file) {
        Ok(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (writer, guard, None)
        }
        Err(e) => {
            let (writer, guard) = tracing_appender::non_blocking(std::io::sink());
            (writer, guard, Some(e))
        }
    };

    let console_writer = match console {
        Console::Stdout => BoxMakeWriter::new(std::io::stdout),
        Console::Stderr => BoxMakeWriter::new(std::io::stderr),
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(console_writer)
                .pretty()
                .with_file(false)
                .without_time()
                .with_ansi(true),
        )
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(filter_layer)
        .init();

    match file_error {
        Some(e) => warn!("File logging disabled, cannot open {}: {}", log_file.display(), e),
        None => info!("Logging to console ({:?}) and {}", console, log_file.display()),
    }

    guard
}
