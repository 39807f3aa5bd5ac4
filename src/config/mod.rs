use crate::models::LauncherConfig;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, Environment, File, FileFormat};
use std::fs;

/// File name of the launcher configuration inside the data directory
pub const LAUNCHER_CONFIG_FILE: &str = "launcher.yaml";

/// File name of the persisted user settings inside the data directory
pub const SETTINGS_FILE: &str = "settings.json";

/// Configuration manager for the launcher data directory.
///
/// Owns two files:
/// - Launcher config (`launcher.yaml`): paths, timeouts and probe thresholds, optional
/// - User settings (`settings.json`): read and written only by the
///   [`SettingsStore`](crate::settings::SettingsStore); this type only knows where it lives
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    launcher_config_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager for `config_dir`, creating the directory if needed.
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            launcher_config_path: config_dir.join(LAUNCHER_CONFIG_FILE),
            config_dir,
        })
    }

    /// Load the launcher configuration.
    ///
    /// Layers, lowest priority first: built-in defaults with paths relative to the
    /// config directory, `launcher.yaml` if present, `LAUNCHER__<FIELD>` environment
    /// variables.
    pub fn load_launcher_config(&self) -> Result<LauncherConfig> {
        if !self.launcher_config_path.exists() {
            tracing::info!(
                "Launcher config not found at {}, using defaults",
                self.launcher_config_path
            );
        }

        let config = Config::builder()
            .set_default("data_dir", self.config_dir.as_str())?
            .set_default("log_dir", self.config_dir.join("logs").as_str())?
            .add_source(
                File::new(self.launcher_config_path.as_str(), FileFormat::Yaml).required(false),
            )
            .add_source(
                Environment::with_prefix("LAUNCHER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read launcher config: {}", self.launcher_config_path))?;

        let config: LauncherConfig = config.try_deserialize().with_context(|| {
            format!("Failed to parse launcher config: {}", self.launcher_config_path)
        })?;

        tracing::debug!("Launcher config: {:?}", config);
        Ok(config)
    }

    /// Save the launcher configuration.
    pub fn save_launcher_config(&self, config: &LauncherConfig) -> Result<()> {
        let yaml_string = serde_yaml_ng::to_string(config)
            .context("Failed to serialize launcher config to YAML")?;

        fs::write(&self.launcher_config_path, yaml_string).with_context(|| {
            format!("Failed to write launcher config: {}", self.launcher_config_path)
        })?;

        tracing::info!("Saved launcher config to {}", self.launcher_config_path);
        Ok(())
    }

    /// Where the settings store keeps `settings.json` for `config`
    pub fn settings_path(config: &LauncherConfig) -> Utf8PathBuf {
        config.data_dir.join(SETTINGS_FILE)
    }

    pub fn launcher_config_path(&self) -> &Utf8Path {
        &self.launcher_config_path
    }

    /// Get the configuration directory path.
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }
}
