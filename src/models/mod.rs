//! Data models for the launcher core.
//!
//! This module contains the plain data structures shared by the orchestration layers:
//! - [`JobStep`], [`JobSnapshot`], [`StepStatus`], [`JobStatus`]: one tracked unit of work and the observer view of a run
//! - [`Settings`], [`GameConfig`]: the persisted `settings.json` document
//! - [`ModInfo`], [`ModVersion`], [`ModSourceData`]: read-only mod metadata published by mod sources
//! - [`LauncherConfig`]: launcher configuration loaded from `launcher.yaml`
//!
//! # Architecture Note
//!
//! The models are designed to be:
//! - **Serializable**: Persisted and RPC-visible structs derive `Serialize`/`Deserialize`
//! - **Closed**: Statuses are enums so the step state machine is checked exhaustively
//! - **Owned by a store**: Mutation goes through [`JobTracker`](crate::state::JobTracker) or
//!   [`SettingsStore`](crate::settings::SettingsStore), never directly

pub mod config;
pub mod job;
pub mod mods;
pub mod settings;

pub use config::LauncherConfig;
pub use job::{JobSnapshot, JobStatus, JobStep, StepFailure, StepProgress, StepStatus};
pub use mods::{
    ModInfo, ModSourceData, ModVersion, Platform, is_version_supported_on_platform,
    latest_version_for_platform,
};
pub use settings::{GameConfig, GameId, SCHEMA_VERSION, Scope, Settings, is_schema_compatible};
