use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Boxed future produced by a step action.
pub type StepFuture = Pin<Box<dyn Future<Output = Result<(), StepFailure>> + Send>>;

/// The unit of work behind a [`JobStep`].
///
/// Stored behind an `Arc<dyn Fn>` so a step list can be cloned into the
/// tracker while the action itself is only ever invoked once per run.
pub type StepAction = Arc<dyn Fn() -> StepFuture + Send + Sync>;

/// Side effect run after a step's action succeeded.
pub type SuccessHook = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Status of a single step within a job run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Queued,
    Pending,
    Success,
    Failed,
    Inactive,
}

/// Status of the job run as a whole
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Inactive,
    Pending,
    Success,
    Failed,
}

impl JobStatus {
    /// True once a run has reached `success` or `failed`
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }
}

/// Failure reported by a step action.
///
/// `msg` is the user-displayable reason. A failure without a message still
/// halts the run; the UI then falls back to a generic message.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("{}", msg.as_deref().unwrap_or("step failed"))]
pub struct StepFailure {
    pub msg: Option<String>,
}

impl StepFailure {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            msg: Some(msg.into()),
        }
    }

    /// A failure that leaves the tracker's failure reason untouched
    pub fn without_reason() -> Self {
        Self { msg: None }
    }
}

/// One externally observable unit of work with its own status.
///
/// Built by a workflow factory, owned by one tracker run, and discarded
/// when the tracker is cleared or re-initialized.
#[derive(Clone)]
pub struct JobStep {
    pub label: String,
    pub status: StepStatus,
    action: StepAction,
    on_success: Option<SuccessHook>,
}

impl JobStep {
    /// Create a queued step from a label and an async action
    pub fn new<F, Fut>(label: impl Into<String>, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), StepFailure>> + Send + 'static,
    {
        Self {
            label: label.into(),
            status: StepStatus::Queued,
            action: Arc::new(move || -> StepFuture { Box::pin(action()) }),
            on_success: None,
        }
    }

    /// Attach a callback run only after the action succeeds
    pub fn on_success<F>(mut self, hook: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(hook));
        self
    }

    pub fn has_on_success(&self) -> bool {
        self.on_success.is_some()
    }

    /// Start the step's action
    pub fn run_action(&self) -> StepFuture {
        (self.action)()
    }

    /// Run the post-success callback, if any
    pub fn run_on_success(&self) -> anyhow::Result<()> {
        match &self.on_success {
            Some(hook) => hook(),
            None => Ok(()),
        }
    }

    pub fn progress(&self) -> StepProgress {
        StepProgress {
            label: self.label.clone(),
            status: self.status,
        }
    }
}

impl fmt::Debug for JobStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobStep")
            .field("label", &self.label)
            .field("status", &self.status)
            .field("on_success", &self.on_success.is_some())
            .finish()
    }
}

/// Observer view of one step
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepProgress {
    pub label: String,
    pub status: StepStatus,
}

/// Observer view of a whole tracker run.
///
/// Plain data, safe to hand to any number of passive readers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub steps: Vec<StepProgress>,
    pub current_step: usize,
    pub overall_status: JobStatus,
    pub failure_reason: Option<String>,
    pub logs: Vec<String>,
}

impl JobSnapshot {
    /// Label of the step the run stopped on, if it failed
    pub fn failed_step(&self) -> Option<&StepProgress> {
        self.steps.iter().find(|s| s.status == StepStatus::Failed)
    }
}
