//! Launcher-level errors.

use thiserror::Error;

use crate::services::process::ProcessError;
use crate::settings::SettingsError;

#[derive(Error, Debug)]
pub enum LauncherError {
    #[error("Requirements not met: {}", .0.join(", "))]
    RequirementUnmet(Vec<String>),

    #[error("A job is already running")]
    JobAlreadyRunning,

    #[error("Launcher is not configured: {0}")]
    NotConfigured(String),

    #[error("Invalid {kind} name: {name:?}")]
    InvalidName { kind: &'static str, name: String },

    #[error("Download failed: {0}")]
    Download(#[from] reqwest::Error),

    #[error("Failed to unpack archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, LauncherError>;
