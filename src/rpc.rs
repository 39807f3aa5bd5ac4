//! Command surface for front-ends.
//!
//! A request names a command and carries a flat camelCase argument record:
//!
//! ```json
//! {"id": 7, "cmd": "run_compiler", "args": {"gameName": "jak1", "truncateLogs": true}}
//! ```
//!
//! Commands that drive a tool or a job answer `{"success": bool, "msg": string|null}`
//! and never fail at the transport level; the others return their value directly.

use camino::Utf8PathBuf;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use crate::error::LauncherError;
use crate::launcher::Launcher;
use crate::models::{GameId, Scope, StepFailure};
use crate::services::requirements::RequirementReport;
use crate::services::workflows::JobKind;
use crate::settings::SettingsError;
use crate::state::JobEvent;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid arguments for {cmd}: {source}")]
    InvalidArgs {
        cmd: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Malformed request: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("Failed to encode response: {0}")]
    Encode(#[source] serde_json::Error),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Launcher(#[from] LauncherError),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Value,
    pub cmd: String,
    #[serde(default)]
    pub args: Value,
}

/// Outcome envelope of tool and job commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub success: bool,
    pub msg: Option<String>,
}

impl JobResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            msg: None,
        }
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            msg: Some(msg.into()),
        }
    }
}

impl From<Result<(), StepFailure>> for JobResult {
    fn from(result: Result<(), StepFailure>) -> Self {
        match result {
            Ok(()) => JobResult::ok(),
            Err(failure) => JobResult {
                success: false,
                msg: failure.msg,
            },
        }
    }
}

impl From<Result<(), LauncherError>> for JobResult {
    fn from(result: Result<(), LauncherError>) -> Self {
        match result {
            Ok(()) => JobResult::ok(),
            Err(e) => JobResult::failed(e.to_string()),
        }
    }
}

impl From<Result<Result<(), StepFailure>, LauncherError>> for JobResult {
    fn from(result: Result<Result<(), StepFailure>, LauncherError>) -> Self {
        match result {
            Ok(step) => step.into(),
            Err(e) => JobResult::failed(e.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequirementsResponse {
    #[serde(flatten)]
    report: RequirementReport,
    requirements_met: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GameArgs {
    game_name: GameId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IsoArgs {
    path_to_iso: Utf8PathBuf,
    game_name: GameId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildArgs {
    game_name: GameId,
    #[serde(default)]
    truncate_logs: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetSettingArgs {
    key: String,
    game_name: Option<GameId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetSettingArgs {
    key: String,
    val: Value,
    game_name: Option<GameId>,
}

#[derive(Deserialize)]
struct DownloadArgs {
    url: String,
    destination: Utf8PathBuf,
}

#[derive(Deserialize)]
struct UrlArgs {
    url: String,
}

#[derive(Deserialize)]
struct CheckArgs {
    #[serde(default)]
    force: bool,
}

#[derive(Deserialize)]
struct StartJobArgs {
    job: JobKind,
}

fn parse_args<T: DeserializeOwned>(cmd: &str, args: Value) -> Result<T, RpcError> {
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args).map_err(|source| RpcError::InvalidArgs {
        cmd: cmd.to_string(),
        source,
    })
}

fn job_result(result: impl Into<JobResult>) -> Result<Value, RpcError> {
    serde_json::to_value(result.into()).map_err(RpcError::Encode)
}

/// Execute one command
pub async fn dispatch(launcher: &Launcher, request: Request) -> Result<Value, RpcError> {
    let Request { cmd, args, .. } = request;
    tracing::debug!("RPC {}", cmd);

    match cmd.as_str() {
        "extract_and_validate_iso" => {
            let IsoArgs {
                path_to_iso,
                game_name,
            } = parse_args(&cmd, args)?;
            job_result(launcher.extract_and_validate_iso(&path_to_iso, game_name).await)
        }
        "run_decompiler" => {
            let BuildArgs {
                game_name,
                truncate_logs,
            } = parse_args(&cmd, args)?;
            job_result(launcher.run_decompiler(game_name, truncate_logs).await)
        }
        "run_compiler" => {
            let BuildArgs {
                game_name,
                truncate_logs,
            } = parse_args(&cmd, args)?;
            job_result(launcher.run_compiler(game_name, truncate_logs).await)
        }
        "update_data_directory" => {
            let GameArgs { game_name } = parse_args(&cmd, args)?;
            job_result(launcher.update_data_directory(game_name).await)
        }
        "get_setting_value" => {
            let GetSettingArgs { key, game_name } = parse_args(&cmd, args)?;
            Ok(launcher.settings().get(&key, Scope::from(game_name))?)
        }
        "update_setting_value" => {
            let SetSettingArgs {
                key,
                val,
                game_name,
            } = parse_args(&cmd, args)?;
            launcher.settings().set(&key, val, Scope::from(game_name))?;
            Ok(Value::Null)
        }
        "download_file" => {
            let DownloadArgs { url, destination } = parse_args(&cmd, args)?;
            job_result(launcher.download_file(&url, &destination).await.map(|_| ()))
        }
        "get_mod_sources" => Ok(json!(launcher.settings().mod_sources())),
        "add_mod_source" => {
            let UrlArgs { url } = parse_args(&cmd, args)?;
            Ok(json!(launcher.settings().add_mod_source(&url)))
        }
        "remove_mod_source" => {
            let UrlArgs { url } = parse_args(&cmd, args)?;
            Ok(json!(launcher.settings().remove_mod_source(&url)))
        }
        "fetch_mod_source" => {
            let UrlArgs { url } = parse_args(&cmd, args)?;
            let data = launcher.fetch_mod_source(&url).await?;
            serde_json::to_value(data).map_err(RpcError::Encode)
        }
        "check_requirements" => {
            let CheckArgs { force } = parse_args(&cmd, args)?;
            let report = launcher.check_requirements(force).await;
            let response = RequirementsResponse {
                requirements_met: report.requirements_met(),
                report,
            };
            serde_json::to_value(response).map_err(RpcError::Encode)
        }
        "start_job" => {
            let StartJobArgs { job } = parse_args(&cmd, args)?;
            job_result(launcher.start_job(job).await)
        }
        "get_job_status" => {
            serde_json::to_value(launcher.tracker().snapshot()).map_err(RpcError::Encode)
        }
        "clear_job" => job_result(launcher.clear_job().await),
        "launch_game" => {
            let GameArgs { game_name } = parse_args(&cmd, args)?;
            job_result(launcher.launch_game(game_name))
        }
        "reset_settings" => {
            launcher.settings().reset_to_defaults();
            Ok(Value::Null)
        }
        _ => Err(RpcError::UnknownCommand(cmd.clone())),
    }
}

/// Handle one JSON line and produce the reply line
pub async fn handle_line(launcher: &Launcher, line: &str) -> String {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!("Rejected malformed request: {}", e);
            return json!({ "id": Value::Null, "error": RpcError::Malformed(e).to_string() })
                .to_string();
        }
    };

    let id = request.id.clone();
    match dispatch(launcher, request).await {
        Ok(result) => json!({ "id": id, "result": result }).to_string(),
        Err(e) => {
            tracing::warn!("RPC error: {}", e);
            json!({ "id": id, "error": e.to_string() }).to_string()
        }
    }
}

/// Line announcing a job event to front-ends
pub fn event_line(event: &JobEvent) -> String {
    json!({ "event": event }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_result_from_step() {
        let ok: Result<(), StepFailure> = Ok(());
        let missing: Result<(), StepFailure> = Err(StepFailure::new("ISO not found"));
        let silent: Result<(), StepFailure> = Err(StepFailure::without_reason());
        let rejected: Result<(), LauncherError> = Err(LauncherError::JobAlreadyRunning);

        assert_eq!(JobResult::from(ok), JobResult::ok());
        assert_eq!(JobResult::from(missing), JobResult::failed("ISO not found"));
        assert_eq!(JobResult::from(rejected), JobResult::failed("A job is already running"));
        assert_eq!(
            JobResult::from(silent),
            JobResult {
                success: false,
                msg: None
            }
        );
    }

    #[test]
    fn test_parse_args_accepts_missing_args() {
        let args: CheckArgs = parse_args("check_requirements", Value::Null).unwrap();
        assert!(!args.force);

        let result: Result<GameArgs, _> = parse_args("launch_game", json!({"gameName": "jak9"}));
        assert!(matches!(result, Err(RpcError::InvalidArgs { .. })));
    }

    #[test]
    fn test_event_line() {
        let line = event_line(&JobEvent::Started);
        assert_eq!(line, r#"{"event":{"type":"started"}}"#);
    }
}
