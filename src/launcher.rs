//! Application context tying the stores and services together.

use camino::{Utf8Path, Utf8PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::task::JoinHandle;

use crate::config::ConfigManager;
use crate::error::{LauncherError, Result};
use crate::metrics::Metrics;
use crate::models::{GameId, JobSnapshot, LauncherConfig, ModSourceData, StepFailure};
use crate::services::mods;
use crate::services::paths::LauncherPaths;
use crate::services::process::{Invocation, ProcessRunner, ToolRunner};
use crate::services::requirements::{RequirementChecker, RequirementReport};
use crate::services::tools::{self, DecompileOptions, ExtractorTarget, ExtractorTools};
use crate::services::workflows::{self, JobKind, WorkflowContext};
use crate::settings::SettingsStore;
use crate::state::JobTracker;

/// Background task driving the tracker, plus the final snapshot once it settles
struct RunningJob {
    handle: JoinHandle<()>,
    finished: watch::Receiver<Option<JobSnapshot>>,
}

impl RunningJob {
    fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Everything a front-end talks to. Constructed once and shared.
pub struct Launcher {
    config: LauncherConfig,
    settings: SettingsStore,
    tracker: JobTracker,
    runner: Arc<dyn ToolRunner>,
    requirements: RequirementChecker,
    http: reqwest::Client,
    metrics: Arc<Metrics>,
    active_job: AsyncMutex<Option<RunningJob>>,
    /// Games currently running, to refuse a second launch
    running_games: Arc<Mutex<Vec<GameId>>>,
}

impl Launcher {
    /// Build a launcher running real processes, loading settings from the data directory
    pub fn new(config: LauncherConfig) -> Self {
        let metrics = Arc::new(Metrics::new());
        let runner = Arc::new(ProcessRunner::new().with_metrics(metrics.clone()));
        let settings = SettingsStore::load(
            ConfigManager::settings_path(&config),
            config.settings_debounce(),
        );
        Self::with_parts(config, settings, runner, metrics)
    }

    /// Build a launcher around explicit collaborators
    pub fn with_parts(
        config: LauncherConfig,
        settings: SettingsStore,
        runner: Arc<dyn ToolRunner>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let settings = settings.with_metrics(metrics.clone());
        let tracker = JobTracker::new().with_metrics(metrics.clone());
        let requirements = RequirementChecker::new(runner.clone(), &config);
        Self {
            requirements,
            settings,
            tracker,
            runner,
            http: reqwest::Client::new(),
            metrics,
            active_job: AsyncMutex::new(None),
            running_games: Arc::new(Mutex::new(Vec::new())),
            config,
        }
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn paths(&self) -> Result<LauncherPaths> {
        self.settings.read(LauncherPaths::from_settings)
    }

    /// Extractor runner whose output lands in the tracker log and the tool log
    fn extractor_tools(&self) -> ExtractorTools {
        ExtractorTools::new(self.runner.clone())
            .with_log_dir(&self.config.log_dir, self.config.log_max_files)
            .with_timeout(self.config.tool_timeout())
            .with_tracker(self.tracker.clone())
    }

    fn workflow_context(&self) -> Result<WorkflowContext> {
        Ok(WorkflowContext {
            tools: self.extractor_tools(),
            settings: self.settings.clone(),
            paths: self.paths()?,
            http: self.http.clone(),
        })
    }

    pub async fn check_requirements(&self, force: bool) -> RequirementReport {
        let install_dir = self.settings.installation_dir();
        self.requirements
            .check_all(install_dir.as_deref(), force)
            .await
    }

    /// Start a job in the background.
    ///
    /// Install-type jobs must pass the requirement gate unless the user opted out.
    /// Only one job runs at a time.
    pub async fn start_job(&self, kind: JobKind) -> Result<()> {
        let mut active = self.active_job.lock().await;
        if active.as_ref().is_some_and(|job| !job.is_finished()) {
            return Err(LauncherError::JobAlreadyRunning);
        }

        if kind.is_gated() {
            if self.settings.bypass_requirements() {
                tracing::warn!("Skipping requirement checks for {}: bypassed by user", kind.name());
            } else {
                let report = self.check_requirements(false).await;
                if !report.requirements_met() {
                    return Err(LauncherError::RequirementUnmet(report.blocking()));
                }
            }
        }

        let steps = workflows::build_steps(&self.workflow_context()?, &kind)?;
        self.tracker.init(steps);

        let tracker = self.tracker.clone();
        let (done_tx, finished) = watch::channel(None);
        tracing::info!("Starting {} job for {}", kind.name(), kind.game());
        let handle = tokio::spawn(async move {
            tracker.start().await;
            let _ = done_tx.send(Some(tracker.snapshot()));
        });
        *active = Some(RunningJob { handle, finished });
        Ok(())
    }

    /// Wait for the current job, if any, and return its final state.
    ///
    /// The job stays registered, so a concurrent `start_job` is still refused
    /// while the wait is in progress.
    pub async fn wait_for_job(&self) -> Option<JobSnapshot> {
        let mut finished = self.active_job.lock().await.as_ref()?.finished.clone();
        match finished.wait_for(Option::is_some).await {
            Ok(snapshot) => (*snapshot).clone(),
            Err(_) => {
                tracing::error!("Job task stopped before reporting its result");
                Some(self.tracker.snapshot())
            }
        }
    }

    /// Start a job and wait for it to settle
    pub async fn run_job(&self, kind: JobKind) -> Result<JobSnapshot> {
        self.start_job(kind).await?;
        Ok(self.wait_for_job().await.unwrap_or_else(|| self.tracker.snapshot()))
    }

    /// Reset the tracker unless a job is still running
    pub async fn clear_job(&self) -> Result<()> {
        let active = self.active_job.lock().await;
        if active.as_ref().is_some_and(|job| !job.is_finished()) {
            return Err(LauncherError::JobAlreadyRunning);
        }
        self.tracker.clear();
        Ok(())
    }

    pub async fn extract_and_validate_iso(
        &self,
        iso_path: &Utf8Path,
        game: GameId,
    ) -> Result<std::result::Result<(), StepFailure>> {
        let paths = self.paths()?;
        Ok(self
            .extractor_tools()
            .extract_and_validate_iso(iso_path, game, &ExtractorTarget::for_game(&paths, game), true)
            .await)
    }

    pub async fn run_decompiler(
        &self,
        game: GameId,
        truncate_logs: bool,
    ) -> Result<std::result::Result<(), StepFailure>> {
        let paths = self.paths()?;
        let options = self.settings.read(DecompileOptions::from_settings);
        Ok(self
            .extractor_tools()
            .run_decompiler(game, &ExtractorTarget::for_game(&paths, game), &options, truncate_logs)
            .await)
    }

    pub async fn run_compiler(
        &self,
        game: GameId,
        truncate_logs: bool,
    ) -> Result<std::result::Result<(), StepFailure>> {
        let paths = self.paths()?;
        Ok(self
            .extractor_tools()
            .run_compiler(game, &ExtractorTarget::for_game(&paths, game), truncate_logs)
            .await)
    }

    pub async fn update_data_directory(
        &self,
        game: GameId,
    ) -> Result<std::result::Result<(), StepFailure>> {
        let paths = self.paths()?;
        Ok(tools::update_data_directory(&paths, game).await)
    }

    pub async fn download_file(&self, url: &str, destination: &Utf8Path) -> Result<u64> {
        mods::download_file(&self.http, url, destination).await
    }

    pub async fn fetch_mod_source(&self, url: &str) -> Result<ModSourceData> {
        mods::fetch_mod_source(&self.http, url).await
    }

    /// Launch the game detached; play time is recorded when it exits
    pub fn launch_game(&self, game: GameId) -> Result<()> {
        let paths = self.paths()?;
        {
            let mut running = self.running_games.lock().unwrap();
            if running.contains(&game) {
                tracing::info!("{} is already running", game);
                return Ok(());
            }
            running.push(game);
        }

        let invocation = Invocation::new(paths.game_executable())
            .args(["-boot", "-fakeiso", "-debug", "-proj-path"])
            .arg(paths.data_dir(game).as_str())
            .working_dir(paths.version_dir());
        let mut child = match self.runner.spawn_detached(invocation) {
            Ok(child) => child,
            Err(e) => {
                self.running_games.lock().unwrap().retain(|g| *g != game);
                return Err(e.into());
            }
        };

        let settings = self.settings.clone();
        let running_games = self.running_games.clone();
        let started = Instant::now();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => tracing::info!("{} exited with {}", game, status),
                Err(e) => tracing::warn!("Lost track of {}: {}", game, e),
            }
            let seconds = started.elapsed().as_secs();
            settings.add_seconds_played(game, seconds);
            running_games.lock().unwrap().retain(|g| *g != game);
            tracing::info!("Recorded {}s of play time for {}", seconds, game);
        });
        Ok(())
    }

    /// Flush settings and log metrics before exit
    pub async fn shutdown(&self) {
        if let Some(job) = self.active_job.lock().await.as_ref() {
            if !job.is_finished() {
                tracing::warn!("Shutting down while a job is still running");
            }
        }
        if let Err(e) = self.settings.shutdown().await {
            tracing::error!("Failed to save settings on shutdown: {}", e);
        }
        self.metrics.log_summary();
    }

    /// Settings file location
    pub fn settings_path(&self) -> Utf8PathBuf {
        self.settings.path().to_path_buf()
    }
}
