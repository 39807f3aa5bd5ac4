//! Extractor operations used as workflow steps.
//!
//! Every operation resolves to `Result<(), StepFailure>` so it can be dropped
//! straight into a [`JobStep`](crate::models::JobStep). Tool output is copied
//! into a numbered log file, the current job log and the caller's sink.

use camino::{Utf8Path, Utf8PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::logging::ToolLog;
use crate::models::{GameId, Settings, StepFailure};
use crate::services::paths::LauncherPaths;
use crate::services::process::{
    Invocation, OutputEvent, OutputSink, ProcessError, ProcessOutcome, ToolRunner, executable_name,
};
use crate::state::{JobTracker, RunLog};

/// Log prefix for extractor runs
pub const EXTRACTOR_LOG: &str = "extractor";

/// Where an extractor lives and which project it works on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractorTarget {
    pub extractor: Utf8PathBuf,
    pub working_dir: Utf8PathBuf,
    pub proj_path: Utf8PathBuf,
    /// Input folder for decompile and compile
    pub iso_data_dir: Utf8PathBuf,
    /// Explicit extraction target, used by mods sharing one extraction
    pub extract_path: Option<Utf8PathBuf>,
}

impl ExtractorTarget {
    /// The active tool version working on the game's own data directory
    pub fn for_game(paths: &LauncherPaths, game: GameId) -> Self {
        Self {
            extractor: paths.extractor(),
            working_dir: paths.version_dir(),
            proj_path: paths.data_dir(game),
            iso_data_dir: paths.iso_data_dir(game),
            extract_path: None,
        }
    }

    /// A mod's bundled extractor working on the mod's own data directory
    pub fn for_mod(paths: &LauncherPaths, game: GameId, source: &str, mod_name: &str) -> Self {
        let mod_dir = paths.mod_dir(game, source, mod_name);
        Self {
            extractor: mod_dir.join(executable_name("extractor")),
            proj_path: mod_dir.join("data"),
            working_dir: mod_dir,
            iso_data_dir: paths.mod_iso_data_dir(game),
            extract_path: Some(paths.mod_iso_data_root(game)),
        }
    }
}

/// Optional decompiler outputs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecompileOptions {
    pub rip_levels: bool,
    pub rip_collision: bool,
    pub rip_textures: bool,
    pub rip_streamed_audio: bool,
}

impl DecompileOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            rip_levels: settings.rip_levels,
            rip_collision: settings.rip_collision,
            rip_textures: settings.rip_textures,
            rip_streamed_audio: settings.rip_streamed_audio,
        }
    }

    /// JSON for `--decomp-config-override`, only when something is enabled
    pub fn config_override(&self) -> Option<String> {
        if !(self.rip_levels || self.rip_collision || self.rip_textures || self.rip_streamed_audio)
        {
            return None;
        }
        Some(
            serde_json::json!({
                "rip_levels": self.rip_levels,
                "extract_collision": self.rip_collision,
                "save_texture_pngs": self.rip_textures,
                "rip_streamed_audio": self.rip_streamed_audio,
            })
            .to_string(),
        )
    }
}

pub fn extract_args(iso_path: &Utf8Path, game: GameId, target: &ExtractorTarget) -> Vec<String> {
    let mut args = vec![
        iso_path.to_string(),
        "--extract".to_string(),
        "--validate".to_string(),
    ];
    if let Some(extract_path) = &target.extract_path {
        args.push("--extract-path".to_string());
        args.push(extract_path.to_string());
    }
    args.extend([
        "--game".to_string(),
        game.to_string(),
        "--proj-path".to_string(),
        target.proj_path.to_string(),
    ]);
    args
}

pub fn decompile_args(game: GameId, target: &ExtractorTarget, options: &DecompileOptions) -> Vec<String> {
    let mut args = vec![
        target.iso_data_dir.to_string(),
        "--decompile".to_string(),
        "--folder".to_string(),
        "--game".to_string(),
        game.to_string(),
        "--proj-path".to_string(),
        target.proj_path.to_string(),
    ];
    if let Some(config) = options.config_override() {
        args.push("--decomp-config-override".to_string());
        args.push(config);
    }
    args
}

pub fn compile_args(game: GameId, target: &ExtractorTarget) -> Vec<String> {
    vec![
        target.iso_data_dir.to_string(),
        "--compile".to_string(),
        "--folder".to_string(),
        "--game".to_string(),
        game.to_string(),
        "--proj-path".to_string(),
        target.proj_path.to_string(),
    ]
}

/// Runs the extractor for workflow steps
#[derive(Clone)]
pub struct ExtractorTools {
    runner: Arc<dyn ToolRunner>,
    log_dir: Option<Utf8PathBuf>,
    max_log_files: usize,
    timeout: Option<Duration>,
    sink: Option<OutputSink>,
    tracker: Option<JobTracker>,
}

impl ExtractorTools {
    pub fn new(runner: Arc<dyn ToolRunner>) -> Self {
        Self {
            runner,
            log_dir: None,
            max_log_files: 5,
            timeout: None,
            sink: None,
            tracker: None,
        }
    }

    pub fn with_log_dir(mut self, log_dir: impl Into<Utf8PathBuf>, max_files: usize) -> Self {
        self.log_dir = Some(log_dir.into());
        self.max_log_files = max_files;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_sink(mut self, sink: OutputSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Append output lines to the log of the job run current when a tool starts
    pub fn with_tracker(mut self, tracker: JobTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn runner(&self) -> &Arc<dyn ToolRunner> {
        &self.runner
    }

    pub async fn extract_and_validate_iso(
        &self,
        iso_path: &Utf8Path,
        game: GameId,
        target: &ExtractorTarget,
        truncate_logs: bool,
    ) -> Result<(), StepFailure> {
        if !iso_path.exists() {
            return Err(StepFailure::new(format!("ISO not found at {}", iso_path)));
        }
        self.run_extractor(
            "Extraction",
            target,
            extract_args(iso_path, game, target),
            truncate_logs,
        )
        .await
    }

    pub async fn run_decompiler(
        &self,
        game: GameId,
        target: &ExtractorTarget,
        options: &DecompileOptions,
        truncate_logs: bool,
    ) -> Result<(), StepFailure> {
        self.run_extractor(
            "Decompilation",
            target,
            decompile_args(game, target, options),
            truncate_logs,
        )
        .await
    }

    pub async fn run_compiler(
        &self,
        game: GameId,
        target: &ExtractorTarget,
        truncate_logs: bool,
    ) -> Result<(), StepFailure> {
        self.run_extractor("Compilation", target, compile_args(game, target), truncate_logs)
            .await
    }

    async fn run_extractor(
        &self,
        operation: &str,
        target: &ExtractorTarget,
        args: Vec<String>,
        truncate_logs: bool,
    ) -> Result<(), StepFailure> {
        let mut invocation = Invocation::new(&target.extractor)
            .args(args)
            .working_dir(&target.working_dir);
        if let Some(limit) = self.timeout {
            invocation = invocation.timeout(limit);
        }

        let log = self.log_dir.as_deref().and_then(|dir| {
            ToolLog::open(dir, EXTRACTOR_LOG, truncate_logs, self.max_log_files)
                .inspect_err(|e| tracing::warn!("Extractor output will not be logged: {:#}", e))
                .ok()
        });

        let run_log = self.tracker.as_ref().map(JobTracker::run_log);
        let (tx, rx) = mpsc::channel(256);
        let forwarder = tokio::spawn(forward_output(rx, log, run_log, self.sink.clone()));
        let result = self.runner.run(invocation, Some(tx)).await;
        // Ends once every sender held by the run is gone
        if let Err(e) = forwarder.await {
            tracing::warn!("Output forwarder for {} stopped early: {}", operation, e);
        }

        outcome_to_step_result(operation, result)
    }
}

async fn forward_output(
    mut rx: mpsc::Receiver<OutputEvent>,
    mut log: Option<ToolLog>,
    run_log: Option<RunLog>,
    sink: Option<OutputSink>,
) {
    while let Some(event) = rx.recv().await {
        if let Some(line) = event.line() {
            if let Some(file) = log.as_mut() {
                if let Err(e) = file.write_line(line) {
                    tracing::warn!("{:#}", e);
                    log = None;
                }
            }
            if let Some(run_log) = &run_log {
                run_log.append([line]);
            }
        }
        if let Some(sink) = &sink {
            let _ = sink.send(event).await;
        }
    }
}

/// Turn a process result into a step result with a user-facing reason
pub fn outcome_to_step_result(
    operation: &str,
    result: Result<ProcessOutcome, ProcessError>,
) -> Result<(), StepFailure> {
    match result {
        Ok(outcome) if outcome.success() => Ok(()),
        Ok(outcome) => {
            let mut message = match outcome.exit_code {
                Some(code) => format!("{} failed with exit code {}", operation, code),
                None => format!("{} was terminated", operation),
            };
            if let Some(line) = outcome.last_error_line() {
                message.push_str(": ");
                message.push_str(line);
            }
            tracing::error!("{}", message);
            Err(StepFailure::new(message))
        }
        Err(ProcessError::Timeout { after, .. }) => Err(StepFailure::new(format!(
            "{} timed out after {}s",
            operation,
            after.as_secs()
        ))),
        // Spawn and IO errors already name the program and the cause
        Err(e) => {
            tracing::error!("{} could not run: {}", operation, e);
            Err(StepFailure::new(e.to_string()))
        }
    }
}

/// Refresh the game's data directory from the active tool version.
///
/// Everything except the extracted ISO data is replaced.
pub async fn update_data_directory(paths: &LauncherPaths, game: GameId) -> Result<(), StepFailure> {
    let source = paths.version_dir().join("data");
    let destination = paths.data_dir(game);
    run_blocking(move || copy_data_dir(&source, &destination)).await
}

/// Run filesystem work on the blocking pool, flattening errors into a step failure
pub async fn run_blocking<F>(work: F) -> Result<(), StepFailure>
where
    F: FnOnce() -> anyhow::Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| StepFailure::new(format!("Background task failed: {}", e)))?
        .map_err(|e| StepFailure::new(format!("{:#}", e)))
}

fn copy_data_dir(source: &Utf8Path, destination: &Utf8Path) -> anyhow::Result<()> {
    use anyhow::Context;

    if !source.is_dir() {
        anyhow::bail!("Tool data not found at {}", source);
    }
    std::fs::create_dir_all(destination)
        .with_context(|| format!("Failed to create {}", destination))?;

    for entry in destination
        .read_dir_utf8()
        .with_context(|| format!("Failed to read {}", destination))?
    {
        let entry = entry?;
        if entry.file_name() == "iso_data" {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            std::fs::remove_dir_all(path).with_context(|| format!("Failed to remove {}", path))?;
        } else {
            std::fs::remove_file(path).with_context(|| format!("Failed to remove {}", path))?;
        }
    }

    copy_dir_recursive(source, destination)
}

/// Copy `source` into `destination`, overwriting files that already exist
pub fn copy_dir_recursive(source: &Utf8Path, destination: &Utf8Path) -> anyhow::Result<()> {
    use anyhow::Context;

    std::fs::create_dir_all(destination)
        .with_context(|| format!("Failed to create {}", destination))?;
    for entry in source
        .read_dir_utf8()
        .with_context(|| format!("Failed to read {}", source))?
    {
        let entry = entry?;
        let target = destination.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to copy {} to {}", entry.path(), target))?;
        }
    }
    Ok(())
}
