use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs::{self, File, OpenOptions};
use std::io::{LineWriter, Write};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup logging with a rotating file appender and optional console output.
///
/// Logs are written to `log_dir` with daily rotation, keeping at most
/// `max_files` files. Console output goes to stderr so stdout stays free
/// for the RPC channel.
///
/// # Arguments
/// * `log_dir` - Directory for log files
/// * `log_prefix` - Prefix for log files (e.g., "launcher")
/// * `max_files` - Number of rotated files to keep
/// * `debug_mode` - If true, use debug level; otherwise use info level
/// * `console_output` - If true, also log to stderr
///
/// # Returns
/// A guard that must be held for the duration of the program to keep logging active
pub fn setup_logging(
    log_dir: &Utf8Path,
    log_prefix: &str,
    max_files: usize,
    debug_mode: bool,
    console_output: bool,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory: {}", log_dir))?;
    }

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(log_prefix)
        .filename_suffix("log")
        .max_log_files(max_files.max(1))
        .build(log_dir)
        .with_context(|| format!("Failed to create log appender in {}", log_dir))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // RUST_LOG wins when set
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug_mode {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let console_layer = console_output.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("Failed to install the tracing subscriber")?;

    tracing::info!(
        "Logging initialized: dir={}, prefix={}, max_files={}, debug={}, console={}",
        log_dir,
        log_prefix,
        max_files,
        debug_mode,
        console_output
    );

    Ok(guard)
}

/// Path of the `index`th numbered log for `prefix`, e.g. `extractor.0.log`
pub fn numbered_log_path(log_dir: &Utf8Path, prefix: &str, index: usize) -> Utf8PathBuf {
    log_dir.join(format!("{}.{}.log", prefix, index))
}

/// Shift `<prefix>.<n>.log` to `<prefix>.<n+1>.log`, deleting anything that
/// would land at or past `max_files`.
pub fn rotate_numbered_logs(log_dir: &Utf8Path, prefix: &str, max_files: usize) -> Result<()> {
    if !log_dir.exists() {
        return Ok(());
    }

    // Stale files from a larger max_files setting
    for entry in fs::read_dir(log_dir).with_context(|| format!("Failed to read {}", log_dir))? {
        let entry = entry?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if let Some(index) = numbered_log_index(&name, prefix) {
            if index + 1 >= max_files {
                fs::remove_file(entry.path())
                    .with_context(|| format!("Failed to delete old log {}", name))?;
            }
        }
    }

    for index in (0..max_files.saturating_sub(1)).rev() {
        let from = numbered_log_path(log_dir, prefix, index);
        if from.exists() {
            let to = numbered_log_path(log_dir, prefix, index + 1);
            fs::rename(&from, &to)
                .with_context(|| format!("Failed to rotate {} to {}", from, to))?;
        }
    }
    Ok(())
}

fn numbered_log_index(file_name: &str, prefix: &str) -> Option<usize> {
    file_name
        .strip_prefix(prefix)?
        .strip_prefix('.')?
        .strip_suffix(".log")?
        .parse()
        .ok()
}

/// Line-oriented log of one external tool's output.
///
/// The current run always writes to `<prefix>.0.log`.
#[derive(Debug)]
pub struct ToolLog {
    path: Utf8PathBuf,
    writer: LineWriter<File>,
}

impl ToolLog {
    /// Open the tool log, rotating older runs away first when `truncate` is set
    pub fn open(log_dir: &Utf8Path, prefix: &str, truncate: bool, max_files: usize) -> Result<Self> {
        fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory: {}", log_dir))?;
        if truncate {
            rotate_numbered_logs(log_dir, prefix, max_files)?;
        }

        let path = numbered_log_path(log_dir, prefix, 0);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open tool log: {}", path))?;

        Ok(Self {
            path,
            writer: LineWriter::new(file),
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn write_line(&mut self, line: &str) -> Result<()> {
        writeln!(self.writer, "{}", line)
            .with_context(|| format!("Failed to write tool log: {}", self.path))
    }
}
