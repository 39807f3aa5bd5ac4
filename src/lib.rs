// Launcher core - job orchestration for installing, building and launching game runtimes
//
// This is the library crate containing the stores, services and workflows.
// The binary crate (main.rs) exposes them to a front-end over JSON lines.

pub mod config;
pub mod error;
pub mod launcher;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod rpc;
pub mod services;
pub mod settings;
pub mod state;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use error::{LauncherError, Result};
pub use launcher::Launcher;
pub use metrics::Metrics;
pub use models::{
    GameConfig, GameId, JobSnapshot, JobStatus, JobStep, LauncherConfig, Scope, Settings,
    StepFailure, StepStatus,
};
pub use services::{JobKind, ProcessRunner, ToolRunner};
pub use settings::{SettingsChange, SettingsError, SettingsStore};
pub use state::{JobEvent, JobTracker, RunLog};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
