use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Launcher configuration from `launcher.yaml`
///
/// Every field has a default so the file is optional; environment variables
/// (`LAUNCHER__<FIELD>`) override whatever the file says.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Directory holding `settings.json`
    pub data_dir: Utf8PathBuf,

    /// Directory for launcher and tool logs
    pub log_dir: Utf8PathBuf,

    /// Maximum number of files kept per log stream
    pub log_max_files: usize,

    /// Window in which settings patches coalesce into one write
    pub settings_debounce_ms: u64,

    /// Hard limit for a single extractor invocation, if any
    pub tool_timeout_secs: Option<u64>,

    pub min_disk_space_gb: u64,
    pub min_opengl_version: String,
    pub min_macos_version: String,

    /// OpenGL probe program, resolved through PATH unless absolute
    pub glewinfo_path: Utf8PathBuf,

    pub debug: bool,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            data_dir: Utf8PathBuf::from("launcher-data"),
            log_dir: Utf8PathBuf::from("launcher-data/logs"),
            log_max_files: default_log_max_files(),
            settings_debounce_ms: default_settings_debounce_ms(),
            tool_timeout_secs: None,
            min_disk_space_gb: 20,
            min_opengl_version: "4.3".to_string(),
            min_macos_version: "15.0".to_string(),
            glewinfo_path: Utf8PathBuf::from("glewinfo"),
            debug: false,
        }
    }
}

impl LauncherConfig {
    pub fn settings_debounce(&self) -> Duration {
        Duration::from_millis(self.settings_debounce_ms)
    }

    pub fn tool_timeout(&self) -> Option<Duration> {
        self.tool_timeout_secs.map(Duration::from_secs)
    }

    pub fn min_disk_space_bytes(&self) -> u64 {
        self.min_disk_space_gb.saturating_mul(1024 * 1024 * 1024)
    }
}

fn default_log_max_files() -> usize {
    5
}

fn default_settings_debounce_ms() -> u64 {
    150
}
