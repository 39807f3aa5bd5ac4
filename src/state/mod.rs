// Job tracking module
//
// This module provides the JobTracker which owns the state of the one active job run,
// executes its steps in order and emits change events for observers.

use crate::metrics::Metrics;
use crate::models::{JobSnapshot, JobStatus, JobStep, StepFailure, StepStatus};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio::sync::broadcast;

/// Change events emitted while a job run progresses
///
/// Observers (the RPC host, UI surfaces) subscribe instead of polling.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum JobEvent {
    /// A new step list was installed by `init`
    Initialized { total_steps: usize },

    /// `start` was called
    Started,

    /// A step began executing
    StepStarted { index: usize, label: String },

    /// A step settled
    StepFinished {
        index: usize,
        label: String,
        status: StepStatus,
    },

    /// The run reached a terminal state
    Finished {
        status: JobStatus,
        failure_reason: Option<String>,
    },

    FailureReasonChanged { reason: Option<String> },

    LogsAppended { lines: Vec<String> },

    /// Tracker returned to the empty state
    Reset,
}

struct JobState {
    steps: Vec<JobStep>,
    current_step: usize,
    overall_status: JobStatus,
    failure_reason: Option<String>,
    logs: Vec<String>,

    /// Bumped by `init`/`clear`; a run only mutates state for its own generation
    generation: u64,
}

impl JobState {
    fn empty(generation: u64) -> Self {
        Self {
            steps: Vec::new(),
            current_step: 0,
            overall_status: JobStatus::Inactive,
            failure_reason: None,
            logs: Vec::new(),
            generation,
        }
    }

    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            steps: self.steps.iter().map(JobStep::progress).collect(),
            current_step: self.current_step,
            overall_status: self.overall_status,
            failure_reason: self.failure_reason.clone(),
            logs: self.logs.clone(),
        }
    }
}

/// What `execute` decided after a step settled
enum StepOutcome {
    /// Move on to the next step
    Proceed,
    /// The run is over (success, failure, or superseded by `init`/`clear`)
    Halt,
}

/// Sequencer for one job run at a time
///
/// Runs an ordered list of [`JobStep`]s strictly in order, one at a time:
/// - `queued -> pending -> success | failed` per step
/// - `inactive -> pending -> success | failed` for the run
///
/// A failed step stops the run; later steps stay `queued` and are never executed.
/// Step failures are terminal states, never errors: [`start()`](Self::start)
/// always returns normally.
///
/// # Usage
///
/// - [`init()`](Self::init) installs a fresh step list (discarding any previous run)
/// - [`start()`](Self::start) drives the steps from `current_step` to the end
/// - [`snapshot()`](Self::snapshot) / [`subscribe()`](Self::subscribe) for observers
///
/// Cloning is cheap and every clone shares the same run, so one clone can
/// drive `start()` while others read progress.
pub struct JobTracker {
    state: Arc<RwLock<JobState>>,

    /// Broadcast channel for progress events
    event_tx: broadcast::Sender<JobEvent>,

    metrics: Option<Arc<Metrics>>,
}

impl JobTracker {
    /// Create an empty tracker with a broadcast buffer of 256 events
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            state: Arc::new(RwLock::new(JobState::empty(0))),
            event_tx,
            metrics: None,
        }
    }

    /// Record job and step counters into `metrics`
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Get a read-only snapshot of the current run
    pub fn snapshot(&self) -> JobSnapshot {
        self.state.read().unwrap().snapshot()
    }

    pub fn status(&self) -> JobStatus {
        self.state.read().unwrap().overall_status
    }

    /// True while `start()` is driving steps
    pub fn is_running(&self) -> bool {
        self.status() == JobStatus::Pending
    }

    /// Subscribe to progress events
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: JobEvent) {
        // Ignore send errors - it's OK if no one is listening
        let _ = self.event_tx.send(event);
    }

    /// Install a fresh step list.
    ///
    /// Resets to `{current_step: 0, overall_status: inactive, logs: [], failure_reason: none}`.
    /// Calling this while a run is in flight discards that run: its remaining
    /// steps never execute and the in-flight step's result is ignored.
    pub fn init(&self, steps: Vec<JobStep>) {
        let total_steps = steps.len();
        {
            let mut state = self.state.write().unwrap();
            let generation = state.generation + 1;
            *state = JobState::empty(generation);
            state.steps = steps
                .into_iter()
                .map(|mut step| {
                    step.status = StepStatus::Queued;
                    step
                })
                .collect();
        }
        tracing::debug!("Job tracker initialized with {} steps", total_steps);
        self.emit(JobEvent::Initialized { total_steps });
    }

    /// Reset to the initial empty state
    pub fn clear(&self) {
        {
            let mut state = self.state.write().unwrap();
            let generation = state.generation + 1;
            *state = JobState::empty(generation);
        }
        tracing::debug!("Job tracker cleared");
        self.emit(JobEvent::Reset);
    }

    /// Attach (or with `None`, clear) a human-readable failure explanation
    pub fn update_failure_reason(&self, reason: Option<String>) {
        self.state.write().unwrap().failure_reason = reason.clone();
        self.emit(JobEvent::FailureReasonChanged { reason });
    }

    /// Append lines to the run's log buffer; the tracker never truncates it
    pub fn append_logs<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push_logs(None, lines.into_iter().map(Into::into).collect());
    }

    /// Log handle bound to the run installed right now
    pub fn run_log(&self) -> RunLog {
        RunLog {
            tracker: self.clone(),
            generation: self.state.read().unwrap().generation,
        }
    }

    fn push_logs(&self, generation: Option<u64>, lines: Vec<String>) {
        if lines.is_empty() {
            return;
        }
        {
            let mut state = self.state.write().unwrap();
            if generation.is_some_and(|g| g != state.generation) {
                return;
            }
            state.logs.extend(lines.iter().cloned());
        }
        self.emit(JobEvent::LogsAppended { lines });
    }

    /// Run the installed steps in order, starting at `current_step`.
    ///
    /// Suspends at each step's action and only touches tracker state after that
    /// step has settled. Returns once the run is `success`, `failed`, or was
    /// superseded by `init`/`clear`.
    pub async fn start(&self) {
        let generation = {
            let mut state = self.state.write().unwrap();
            state.overall_status = JobStatus::Pending;
            state.generation
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_job_started();
        }
        tracing::info!("Job run started");
        self.emit(JobEvent::Started);

        loop {
            let next = {
                let mut state = self.state.write().unwrap();
                if state.generation != generation {
                    return;
                }
                let index = state.current_step;
                match state.steps.get_mut(index) {
                    Some(step) => {
                        step.status = StepStatus::Pending;
                        Some((index, step.clone()))
                    }
                    None => None,
                }
            };

            let Some((index, step)) = next else {
                self.finish(generation, JobStatus::Success);
                return;
            };

            if let StepOutcome::Halt = self.execute(generation, index, step).await {
                return;
            }
        }
    }

    /// Execute one step and apply its result to the run.
    async fn execute(&self, generation: u64, index: usize, step: JobStep) -> StepOutcome {
        tracing::info!("Step {}: {}", index + 1, step.label);
        self.emit(JobEvent::StepStarted {
            index,
            label: step.label.clone(),
        });

        let started = Instant::now();
        let result = step.run_action().await;
        let elapsed = started.elapsed();

        if !self.is_current(generation) {
            tracing::warn!(
                "Step '{}' settled after its run was discarded; ignoring result",
                step.label
            );
            return StepOutcome::Halt;
        }

        // Hooks run outside the lock so they may use the tracker themselves
        let result = result.and_then(|()| {
            step.run_on_success().map_err(|e| {
                tracing::error!("Post-success callback of '{}' failed: {:#}", step.label, e);
                StepFailure::new(format!("{:#}", e))
            })
        });

        match result {
            Ok(()) => {
                if !self.is_current(generation) {
                    return StepOutcome::Halt;
                }
                self.set_step_status(index, StepStatus::Success);
                if let Some(metrics) = &self.metrics {
                    metrics.record_step(true, elapsed);
                }
                tracing::info!(
                    "Step '{}' succeeded in {:.2}s",
                    step.label,
                    elapsed.as_secs_f32()
                );
                self.emit(JobEvent::StepFinished {
                    index,
                    label: step.label.clone(),
                    status: StepStatus::Success,
                });

                let remaining = {
                    let mut state = self.state.write().unwrap();
                    if state.generation != generation {
                        return StepOutcome::Halt;
                    }
                    state.current_step += 1;
                    let next = state.current_step;
                    match state.steps.get_mut(next) {
                        Some(next_step) => {
                            next_step.status = StepStatus::Pending;
                            true
                        }
                        None => false,
                    }
                };

                if remaining {
                    StepOutcome::Proceed
                } else {
                    self.finish(generation, JobStatus::Success);
                    StepOutcome::Halt
                }
            }
            Err(failure) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_step(false, elapsed);
                }
                tracing::warn!("Step '{}' failed: {}", step.label, failure);
                self.fail_step(generation, index, &step.label, failure.msg);
                StepOutcome::Halt
            }
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.state.read().unwrap().generation == generation
    }

    fn set_step_status(&self, index: usize, status: StepStatus) {
        if let Some(step) = self.state.write().unwrap().steps.get_mut(index) {
            step.status = status;
        }
    }

    fn fail_step(&self, generation: u64, index: usize, label: &str, reason: Option<String>) {
        {
            let mut state = self.state.write().unwrap();
            if state.generation != generation {
                return;
            }
            if let Some(step) = state.steps.get_mut(index) {
                step.status = StepStatus::Failed;
            }
            if reason.is_some() {
                state.failure_reason = reason;
            }
        }
        self.emit(JobEvent::StepFinished {
            index,
            label: label.to_string(),
            status: StepStatus::Failed,
        });
        self.finish(generation, JobStatus::Failed);
    }

    fn finish(&self, generation: u64, status: JobStatus) {
        let failure_reason = {
            let mut state = self.state.write().unwrap();
            if state.generation != generation {
                return;
            }
            state.overall_status = status;
            state.failure_reason.clone()
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_job_finished(status == JobStatus::Success);
        }
        match status {
            JobStatus::Success => tracing::info!("Job run succeeded"),
            _ => tracing::warn!(
                "Job run ended with status {:?}: {}",
                status,
                failure_reason.as_deref().unwrap_or("no reason given")
            ),
        }
        self.emit(JobEvent::Finished {
            status,
            failure_reason,
        });
    }
}

/// Appends to the log of one particular run.
///
/// Lines arriving after `init`/`clear` replaced that run are dropped.
#[derive(Clone)]
pub struct RunLog {
    tracker: JobTracker,
    generation: u64,
}

impl RunLog {
    pub fn append<I, S>(&self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tracker
            .push_logs(Some(self.generation), lines.into_iter().map(Into::into).collect());
    }
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::new()
    }
}

// Every clone observes and drives the same run
impl Clone for JobTracker {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            event_tx: self.event_tx.clone(),
            metrics: self.metrics.clone(),
        }
    }
}
