//! Persistent settings store.
//!
//! The store keeps the authoritative [`Settings`] in memory and mirrors it to
//! `settings.json`. Patches apply to memory immediately and are written out
//! after a debounce window, so a burst of patches becomes a single write. At
//! most one write is in flight at a time. When a write fails, memory is
//! restored to the last state that reached disk and subscribers receive
//! [`SettingsChange::WriteFailed`].

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::metrics::Metrics;
use crate::models::{GameId, SCHEMA_VERSION, Scope, Settings, is_schema_compatible};

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Settings version {found} is not compatible with {expected}")]
    VersionMismatch { found: String, expected: String },

    #[error("Failed to read settings file {path}: {source}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings file {path}: {source}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write settings file {path}: {source}")]
    Write {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid settings patch: {0}")]
    InvalidPatch(String),

    #[error("Unknown settings key: {0}")]
    UnknownKey(String),
}

/// What happened when the settings file was loaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    Loaded,
    /// No file yet; defaults in use
    Missing,
    /// File has an incompatible schema version; defaults in use, file untouched
    Incompatible { found: String },
    /// File could not be read or parsed; defaults in use, file untouched
    Unreadable { reason: String },
}

/// Notifications sent to settings subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsChange {
    /// In-memory settings changed
    Patched,
    /// Pending changes reached disk
    Flushed,
    /// A write failed
    WriteFailed { message: String },
    /// Memory was restored to the last persisted state after a failed write
    RolledBack,
}

#[derive(Debug, Default)]
struct WriteQueue {
    dirty: bool,
    /// State before the first unflushed patch, restored if the write fails
    rollback: Option<Settings>,
    /// A debounced flush task is pending
    scheduled: bool,
}

#[derive(Debug)]
struct StoreInner {
    path: Utf8PathBuf,
    debounce: Duration,
    load_status: LoadStatus,
    settings: RwLock<Settings>,
    // Lock order: `settings` before `queue`
    queue: Mutex<WriteQueue>,
    flush_lock: tokio::sync::Mutex<()>,
    change_tx: broadcast::Sender<SettingsChange>,
    metrics: OnceLock<Arc<Metrics>>,
}

/// Shared handle to the settings store. Clones refer to the same store.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    inner: Arc<StoreInner>,
}

impl SettingsStore {
    /// Load settings from `path`, falling back to defaults.
    ///
    /// A missing, unreadable or version-incompatible file yields defaults and
    /// is never overwritten by the load itself.
    pub fn load(path: impl AsRef<Utf8Path>, debounce: Duration) -> Self {
        let path = path.as_ref().to_path_buf();
        let (settings, load_status) = match read_settings_file(&path) {
            Ok(settings) => {
                tracing::info!("Loaded settings from {}", path);
                (settings, LoadStatus::Loaded)
            }
            Err(SettingsError::Read { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                tracing::info!("No settings file at {}, using defaults", path);
                (Settings::default(), LoadStatus::Missing)
            }
            Err(SettingsError::VersionMismatch { found, expected }) => {
                tracing::warn!(
                    "Settings version {} is incompatible with {}, using defaults",
                    found,
                    expected
                );
                (Settings::default(), LoadStatus::Incompatible { found })
            }
            Err(e) => {
                tracing::warn!("{}, using defaults", e);
                (
                    Settings::default(),
                    LoadStatus::Unreadable {
                        reason: e.to_string(),
                    },
                )
            }
        };

        Self::from_parts(path, debounce, settings, load_status)
    }

    /// Start from the given settings without touching disk
    pub fn with_settings(path: impl AsRef<Utf8Path>, debounce: Duration, settings: Settings) -> Self {
        Self::from_parts(
            path.as_ref().to_path_buf(),
            debounce,
            settings,
            LoadStatus::Loaded,
        )
    }

    fn from_parts(
        path: Utf8PathBuf,
        debounce: Duration,
        settings: Settings,
        load_status: LoadStatus,
    ) -> Self {
        let (change_tx, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(StoreInner {
                path,
                debounce,
                load_status,
                settings: RwLock::new(settings),
                queue: Mutex::new(WriteQueue::default()),
                flush_lock: tokio::sync::Mutex::new(()),
                change_tx,
                metrics: OnceLock::new(),
            }),
        }
    }

    /// Record flush outcomes into `metrics`. Only the first call takes effect.
    pub fn with_metrics(self, metrics: Arc<Metrics>) -> Self {
        let _ = self.inner.metrics.set(metrics);
        self
    }

    pub fn path(&self) -> &Utf8Path {
        &self.inner.path
    }

    pub fn load_status(&self) -> &LoadStatus {
        &self.inner.load_status
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SettingsChange> {
        self.inner.change_tx.subscribe()
    }

    /// Copy of the current in-memory settings
    pub fn snapshot(&self) -> Settings {
        self.inner.settings.read().unwrap().clone()
    }

    /// Read from the current settings without cloning them
    pub fn read<R>(&self, f: impl FnOnce(&Settings) -> R) -> R {
        f(&self.inner.settings.read().unwrap())
    }

    /// Whether changes are waiting to be written
    pub fn has_pending_changes(&self) -> bool {
        self.inner.queue.lock().unwrap().dirty
    }

    /// Value of a camelCase key, globally or for one game
    pub fn get(&self, key: &str, scope: Scope) -> Result<Value, SettingsError> {
        let document = serde_json::to_value(&*self.inner.settings.read().unwrap())?;
        let value = match scope {
            Scope::Global => document.get(key),
            Scope::Game(game) => document
                .get("games")
                .and_then(|games| games.get(game.as_str()))
                .and_then(|config| config.get(key)),
        };
        value
            .cloned()
            .ok_or_else(|| SettingsError::UnknownKey(scoped_key(key, scope)))
    }

    /// Set one camelCase key.
    ///
    /// Setting a game-scoped key for a game missing from the document is a no-op.
    pub fn set(&self, key: &str, value: Value, scope: Scope) -> Result<(), SettingsError> {
        let document = serde_json::to_value(&*self.inner.settings.read().unwrap())?;
        let patch = match scope {
            Scope::Global => {
                if document.get(key).is_none() {
                    return Err(SettingsError::UnknownKey(key.to_string()));
                }
                let mut fields = Map::new();
                fields.insert(key.to_string(), value);
                Value::Object(fields)
            }
            Scope::Game(game) => {
                let Some(config) = document.get("games").and_then(|g| g.get(game.as_str())) else {
                    tracing::debug!("Ignoring {} for {}: game has no settings", key, game);
                    return Ok(());
                };
                if config.get(key).is_none() {
                    return Err(SettingsError::UnknownKey(scoped_key(key, scope)));
                }
                serde_json::json!({ "games": { game.as_str(): { key: value } } })
            }
        };
        self.patch(patch).map(|_| ())
    }

    /// Merge a partial JSON document into the settings.
    ///
    /// Objects merge recursively and any other value replaces what was there.
    /// The change is visible immediately and persisted after the debounce window.
    pub fn patch(&self, partial: Value) -> Result<Settings, SettingsError> {
        self.apply(|current| {
            let mut document = serde_json::to_value(current)?;
            merge_patch(&mut document, &partial);
            let updated: Settings = serde_json::from_value(document.clone())
                .map_err(|e| SettingsError::InvalidPatch(e.to_string()))?;
            // Unknown keys are silently dropped by serde; catch them here
            if serde_json::to_value(&updated)? != document {
                return Err(SettingsError::InvalidPatch(
                    "patch contains keys that are not settings".to_string(),
                ));
            }
            if !is_schema_compatible(&updated.version) {
                return Err(SettingsError::VersionMismatch {
                    found: updated.version,
                    expected: SCHEMA_VERSION.to_string(),
                });
            }
            Ok(updated)
        })
    }

    /// Change the settings through a closure, with the same persistence as [`patch`](Self::patch)
    pub fn update(&self, f: impl FnOnce(&mut Settings)) -> Settings {
        let result = self.apply(|current| {
            let mut updated = current.clone();
            f(&mut updated);
            Ok(updated)
        });
        match result {
            Ok(settings) => settings,
            Err(_) => self.snapshot(),
        }
    }

    fn apply<F>(&self, f: F) -> Result<Settings, SettingsError>
    where
        F: FnOnce(&Settings) -> Result<Settings, SettingsError>,
    {
        let updated = {
            let mut settings = self.inner.settings.write().unwrap();
            let updated = f(&settings)?;
            if updated == *settings {
                return Ok(updated);
            }
            let previous = std::mem::replace(&mut *settings, updated.clone());
            let mut queue = self.inner.queue.lock().unwrap();
            if queue.rollback.is_none() {
                queue.rollback = Some(previous);
            }
            queue.dirty = true;
            updated
        };

        let _ = self.inner.change_tx.send(SettingsChange::Patched);
        self.schedule_flush();
        Ok(updated)
    }

    fn schedule_flush(&self) {
        {
            let mut queue = self.inner.queue.lock().unwrap();
            if queue.scheduled {
                return;
            }
            queue.scheduled = true;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No async runtime; settings will be written on the next flush");
            self.inner.queue.lock().unwrap().scheduled = false;
            return;
        };

        let store = self.clone();
        handle.spawn(async move {
            tokio::time::sleep(store.inner.debounce).await;
            // Patches arriving while we write schedule the next flush
            store.inner.queue.lock().unwrap().scheduled = false;
            if let Err(e) = store.flush().await {
                tracing::error!("Debounced settings write failed: {}", e);
            }
        });
    }

    /// Write pending changes now. A no-op when nothing changed.
    pub async fn flush(&self) -> Result<(), SettingsError> {
        let _in_flight = self.inner.flush_lock.lock().await;

        let (snapshot, rollback) = {
            let settings = self.inner.settings.read().unwrap();
            let mut queue = self.inner.queue.lock().unwrap();
            if !queue.dirty {
                return Ok(());
            }
            queue.dirty = false;
            (settings.clone(), queue.rollback.take())
        };

        match write_settings_file(&self.inner.path, &snapshot).await {
            Ok(()) => {
                if let Some(metrics) = self.inner.metrics.get() {
                    metrics.record_settings_flush(true);
                }
                tracing::debug!("Saved settings to {}", self.inner.path);
                let _ = self.inner.change_tx.send(SettingsChange::Flushed);
                Ok(())
            }
            Err(e) => {
                if let Some(metrics) = self.inner.metrics.get() {
                    metrics.record_settings_flush(false);
                }
                tracing::error!("{}; restoring last saved settings", e);
                if let Some(previous) = rollback {
                    let mut settings = self.inner.settings.write().unwrap();
                    let mut queue = self.inner.queue.lock().unwrap();
                    *settings = previous;
                    // Patches made during the failed write are discarded too
                    queue.dirty = false;
                    queue.rollback = None;
                }
                let _ = self.inner.change_tx.send(SettingsChange::WriteFailed {
                    message: e.to_string(),
                });
                let _ = self.inner.change_tx.send(SettingsChange::RolledBack);
                Err(e)
            }
        }
    }

    /// Flush outstanding changes before exit
    pub async fn shutdown(&self) -> Result<(), SettingsError> {
        if self.has_pending_changes() {
            tracing::info!("Writing pending settings before shutdown");
        }
        self.flush().await
    }

    pub fn reset_to_defaults(&self) -> Settings {
        self.update(|settings| *settings = Settings::default())
    }

    pub fn installation_dir(&self) -> Option<Utf8PathBuf> {
        self.read(|s| s.installation_dir.clone())
    }

    pub fn set_installation_dir(&self, dir: impl Into<Utf8PathBuf>) {
        let dir = dir.into();
        self.update(|s| s.installation_dir = Some(dir));
    }

    /// Active tool version and its folder, when both are set
    pub fn active_version(&self) -> Option<(String, String)> {
        self.read(|s| {
            s.active_version
                .clone()
                .zip(s.active_version_folder.clone())
        })
    }

    pub fn set_active_version(&self, version: impl Into<String>, folder: impl Into<String>) {
        let (version, folder) = (version.into(), folder.into());
        self.update(|s| {
            s.active_version = Some(version);
            s.active_version_folder = Some(folder);
        });
    }

    pub fn bypass_requirements(&self) -> bool {
        self.read(|s| s.bypass_requirements)
    }

    pub fn is_game_installed(&self, game: GameId) -> bool {
        self.read(|s| s.is_game_installed(game))
    }

    pub fn installed_version(&self, game: GameId) -> Option<String> {
        self.read(|s| s.game(game).and_then(|g| g.installed_version.clone()))
    }

    /// Mark a game installed with the given tool version
    pub fn finalize_installation(&self, game: GameId, version: &str, folder: &str) {
        self.update(|s| {
            if let Some(config) = s.game_mut(game) {
                config.is_installed = true;
                config.installed_version = Some(version.to_string());
                config.installed_version_folder = Some(folder.to_string());
            }
        });
    }

    /// Forget an installation. Play time survives.
    pub fn uninstall_game(&self, game: GameId) {
        self.update(|s| {
            if let Some(config) = s.game_mut(game) {
                config.is_installed = false;
                config.installed_version = None;
                config.installed_version_folder = None;
                config.active_texture_packs.clear();
                config.mods.clear();
            }
        });
    }

    pub fn active_texture_packs(&self, game: GameId) -> Vec<String> {
        self.read(|s| {
            s.game(game)
                .map(|g| g.active_texture_packs.clone())
                .unwrap_or_default()
        })
    }

    pub fn set_active_texture_packs(&self, game: GameId, packs: Vec<String>) {
        self.update(|s| {
            if let Some(config) = s.game_mut(game) {
                config.active_texture_packs = packs;
            }
        });
    }

    pub fn add_seconds_played(&self, game: GameId, seconds: u64) {
        self.update(|s| {
            if let Some(config) = s.game_mut(game) {
                config.seconds_played = config.seconds_played.saturating_add(seconds);
            }
        });
    }

    pub fn save_mod_install_info(&self, game: GameId, source: &str, mod_name: &str, version: &str) {
        self.update(|s| {
            if let Some(config) = s.game_mut(game) {
                config
                    .mods
                    .entry(source.to_string())
                    .or_default()
                    .insert(mod_name.to_string(), version.to_string());
            }
        });
    }

    pub fn installed_mod_version(&self, game: GameId, source: &str, mod_name: &str) -> Option<String> {
        self.read(|s| {
            s.game(game)
                .and_then(|g| g.mods.get(source))
                .and_then(|mods| mods.get(mod_name))
                .cloned()
        })
    }

    pub fn uninstall_mod(&self, game: GameId, source: &str, mod_name: &str) {
        self.update(|s| {
            if let Some(config) = s.game_mut(game) {
                if let Some(mods) = config.mods.get_mut(source) {
                    mods.shift_remove(mod_name);
                    if mods.is_empty() {
                        config.mods.shift_remove(source);
                    }
                }
            }
        });
    }

    pub fn mod_sources(&self) -> Vec<String> {
        self.read(|s| s.mod_sources.clone())
    }

    /// Returns false when the source was already registered
    pub fn add_mod_source(&self, url: &str) -> bool {
        let mut added = false;
        self.update(|s| {
            if !s.mod_sources.iter().any(|u| u == url) {
                s.mod_sources.push(url.to_string());
                added = true;
            }
        });
        added
    }

    pub fn remove_mod_source(&self, url: &str) -> bool {
        let mut removed = false;
        self.update(|s| {
            let before = s.mod_sources.len();
            s.mod_sources.retain(|u| u != url);
            removed = s.mod_sources.len() != before;
        });
        removed
    }
}

fn scoped_key(key: &str, scope: Scope) -> String {
    match scope {
        Scope::Global => key.to_string(),
        Scope::Game(game) => format!("games.{}.{}", game, key),
    }
}

/// Merge `patch` into `target`: objects merge key by key, anything else replaces
fn merge_patch(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(key) {
                    Some(existing) => merge_patch(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

/// Read and version-check a settings file
pub fn read_settings_file(path: &Utf8Path) -> Result<Settings, SettingsError> {
    let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let document: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let found = document
        .get("version")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if !is_schema_compatible(found) {
        return Err(SettingsError::VersionMismatch {
            found: found.to_string(),
            expected: SCHEMA_VERSION.to_string(),
        });
    }

    serde_json::from_value(document).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Write through a temporary file so a crash never leaves a torn document
async fn write_settings_file(path: &Utf8Path, settings: &Settings) -> Result<(), SettingsError> {
    let write_error = |source| SettingsError::Write {
        path: path.to_path_buf(),
        source,
    };

    let json = serde_json::to_string_pretty(settings)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_error)?;
    }
    let temp_path = Utf8PathBuf::from(format!("{}.tmp", path));
    tokio::fs::write(&temp_path, json).await.map_err(write_error)?;
    tokio::fs::rename(&temp_path, path).await.map_err(write_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> SettingsStore {
        SettingsStore::with_settings(
            "unused/settings.json",
            Duration::from_secs(60),
            Settings::default(),
        )
    }

    #[test]
    fn test_concurrent_adds_register_a_source_once() {
        let store = store();
        let url = "https://example.com/mods.json";

        let added: Vec<bool> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| store.add_mod_source(url)))
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        assert_eq!(added.iter().filter(|a| **a).count(), 1);
        assert_eq!(store.read(|s| s.mod_sources.clone()), vec![url.to_string()]);
        assert!(store.remove_mod_source(url));
        assert!(!store.remove_mod_source(url));
    }

    #[test]
    fn test_merge_patch_nested() {
        let mut target = json!({"a": 1, "games": {"jak1": {"isInstalled": false, "secondsPlayed": 3}}});
        merge_patch(&mut target, &json!({"games": {"jak1": {"isInstalled": true}}}));
        assert_eq!(
            target,
            json!({"a": 1, "games": {"jak1": {"isInstalled": true, "secondsPlayed": 3}}})
        );
    }

    #[test]
    fn test_patch_is_visible_immediately() {
        let store = store();
        store.patch(json!({"locale": "fr-FR"})).unwrap();
        assert_eq!(store.get("locale", Scope::Global).unwrap(), json!("fr-FR"));
        assert!(store.has_pending_changes());
    }

    #[test]
    fn test_patch_rejects_unknown_keys() {
        let store = store();
        let result = store.patch(json!({"notASetting": true}));
        assert!(matches!(result, Err(SettingsError::InvalidPatch(_))));
        assert!(!store.has_pending_changes());
    }

    #[test]
    fn test_patch_rejects_wrong_types() {
        let store = store();
        let result = store.patch(json!({"bypassRequirements": "yes"}));
        assert!(matches!(result, Err(SettingsError::InvalidPatch(_))));
        assert!(!store.snapshot().bypass_requirements);
    }

    #[test]
    fn test_patch_cannot_downgrade_version() {
        let store = store();
        let result = store.patch(json!({"version": "0.9"}));
        assert!(matches!(result, Err(SettingsError::VersionMismatch { .. })));
    }

    #[test]
    fn test_get_and_set_game_scoped() {
        let store = store();
        store
            .set("secondsPlayed", json!(42), Scope::Game(GameId::Jak2))
            .unwrap();
        assert_eq!(
            store.get("secondsPlayed", Scope::Game(GameId::Jak2)).unwrap(),
            json!(42)
        );
        assert_eq!(
            store.get("secondsPlayed", Scope::Game(GameId::Jak1)).unwrap(),
            json!(0)
        );
    }

    #[test]
    fn test_unknown_key() {
        let store = store();
        assert!(matches!(
            store.get("nope", Scope::Global),
            Err(SettingsError::UnknownKey(_))
        ));
        assert!(matches!(
            store.set("nope", json!(1), Scope::Game(GameId::Jak1)),
            Err(SettingsError::UnknownKey(key)) if key == "games.jak1.nope"
        ));
    }

    #[test]
    fn test_set_for_missing_game_is_noop() {
        let mut settings = Settings::default();
        settings.games.shift_remove(&GameId::JakX);
        let store = SettingsStore::with_settings("unused.json", Duration::from_secs(60), settings);

        store
            .set("isInstalled", json!(true), Scope::Game(GameId::JakX))
            .unwrap();

        assert!(store.snapshot().game(GameId::JakX).is_none());
        assert!(!store.has_pending_changes());
    }

    #[test]
    fn test_unchanged_update_is_not_dirty() {
        let store = store();
        store.update(|s| s.bypass_requirements = false);
        assert!(!store.has_pending_changes());
    }

    #[test]
    fn test_typed_helpers() {
        let store = store();
        store.finalize_installation(GameId::Jak1, "v0.2.1", "official");
        store.add_seconds_played(GameId::Jak1, 30);
        store.add_seconds_played(GameId::Jak1, 12);
        store.save_mod_install_info(GameId::Jak1, "community", "randomizer", "1.2.0");
        assert!(store.add_mod_source("https://example.com/mods.json"));
        assert!(!store.add_mod_source("https://example.com/mods.json"));

        assert!(store.is_game_installed(GameId::Jak1));
        assert_eq!(store.installed_version(GameId::Jak1).as_deref(), Some("v0.2.1"));
        assert_eq!(
            store.installed_mod_version(GameId::Jak1, "community", "randomizer").as_deref(),
            Some("1.2.0")
        );
        assert_eq!(store.snapshot().game(GameId::Jak1).unwrap().seconds_played, 42);

        store.uninstall_mod(GameId::Jak1, "community", "randomizer");
        store.uninstall_game(GameId::Jak1);
        assert!(!store.is_game_installed(GameId::Jak1));
        assert!(store.snapshot().game(GameId::Jak1).unwrap().mods.is_empty());
        assert_eq!(store.snapshot().game(GameId::Jak1).unwrap().seconds_played, 42);
        assert!(store.remove_mod_source("https://example.com/mods.json"));
        assert!(store.mod_sources().is_empty());
    }
}
