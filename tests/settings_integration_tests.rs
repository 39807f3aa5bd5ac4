//! Integration tests for the SettingsStore persistence layer
//!
//! These tests verify that the SettingsStore correctly:
//! - Serves reads from memory immediately after a patch
//! - Coalesces bursts of patches into a single write
//! - Refuses to load, and never overwrites, an incompatible file
//! - Restores the last persisted state when a write fails

use camino::Utf8PathBuf;
use launcher_core::models::{GameId, SCHEMA_VERSION, Scope};
use launcher_core::settings::{LoadStatus, read_settings_file};
use launcher_core::{Metrics, SettingsChange, SettingsError, SettingsStore};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tempfile::TempDir;
use tokio::time::{Duration, sleep};

fn create_test_dir() -> (TempDir, Utf8PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
    (temp_dir, path)
}

#[tokio::test]
async fn test_load_missing_file_uses_defaults_without_writing() {
    let (_temp, dir) = create_test_dir();
    let path = dir.join("settings.json");

    let store = SettingsStore::load(&path, Duration::from_millis(10));

    assert_eq!(store.load_status(), &LoadStatus::Missing);
    assert_eq!(store.snapshot().version, SCHEMA_VERSION);
    sleep(Duration::from_millis(50)).await;
    assert!(!path.exists());
}

#[tokio::test]
async fn test_patches_are_coalesced_into_one_write() {
    let (_temp, dir) = create_test_dir();
    let path = dir.join("settings.json");
    let metrics = Arc::new(Metrics::new());
    let store = SettingsStore::load(&path, Duration::from_millis(50)).with_metrics(metrics.clone());

    for locale in ["en-US", "fr-FR", "de-DE"] {
        store.set("locale", json!(locale), Scope::Global).unwrap();
        // Reads never wait for the disk
        assert_eq!(store.get("locale", Scope::Global).unwrap(), json!(locale));
    }
    assert!(store.has_pending_changes());
    assert!(!path.exists());

    sleep(Duration::from_millis(300)).await;

    assert!(!store.has_pending_changes());
    assert_eq!(metrics.settings_flushes.load(Ordering::Relaxed), 1);
    let on_disk = read_settings_file(&path).unwrap();
    assert_eq!(on_disk.locale.as_deref(), Some("de-DE"));
}

#[tokio::test]
async fn test_persisted_settings_survive_reload() {
    let (_temp, dir) = create_test_dir();
    let path = dir.join("settings.json");

    let store = SettingsStore::load(&path, Duration::from_secs(60));
    store.set_installation_dir(dir.join("install"));
    store.set_active_version("v0.2.1", "official");
    store.finalize_installation(GameId::Jak2, "v0.2.1", "official");
    store
        .set("secondsPlayed", json!(3600), Scope::Game(GameId::Jak2))
        .unwrap();
    store.shutdown().await.unwrap();

    let reloaded = SettingsStore::load(&path, Duration::from_secs(60));
    assert_eq!(reloaded.load_status(), &LoadStatus::Loaded);
    assert!(reloaded.is_game_installed(GameId::Jak2));
    assert!(!reloaded.is_game_installed(GameId::Jak1));
    assert_eq!(
        reloaded.active_version(),
        Some(("v0.2.1".to_string(), "official".to_string()))
    );
    assert_eq!(
        reloaded.get("secondsPlayed", Scope::Game(GameId::Jak2)).unwrap(),
        json!(3600)
    );
}

#[tokio::test]
async fn test_incompatible_file_is_not_loaded_or_overwritten() {
    let (_temp, dir) = create_test_dir();
    let path = dir.join("settings.json");
    let original = r#"{"version": "0.9", "locale": "ja-JP"}"#;
    std::fs::write(&path, original).unwrap();

    let store = SettingsStore::load(&path, Duration::from_millis(10));

    assert_eq!(
        store.load_status(),
        &LoadStatus::Incompatible {
            found: "0.9".to_string()
        }
    );
    assert_eq!(store.snapshot().locale, None);
    sleep(Duration::from_millis(50)).await;
    assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
}

#[tokio::test]
async fn test_newer_minor_version_is_compatible() {
    let (_temp, dir) = create_test_dir();
    let path = dir.join("settings.json");
    std::fs::write(&path, r#"{"version": "1.3", "ripLevels": true}"#).unwrap();

    let store = SettingsStore::load(&path, Duration::from_secs(60));

    assert_eq!(store.load_status(), &LoadStatus::Loaded);
    assert!(store.snapshot().rip_levels);
}

#[tokio::test]
async fn test_unparseable_file_is_left_alone() {
    let (_temp, dir) = create_test_dir();
    let path = dir.join("settings.json");
    std::fs::write(&path, "{ not json").unwrap();

    let store = SettingsStore::load(&path, Duration::from_secs(60));

    assert!(matches!(store.load_status(), LoadStatus::Unreadable { .. }));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
}

#[tokio::test]
async fn test_failed_write_rolls_back() {
    let (_temp, dir) = create_test_dir();
    // A file where the parent directory should be makes every write fail
    std::fs::write(dir.join("blocker"), "").unwrap();
    let path = dir.join("blocker").join("settings.json");
    let metrics = Arc::new(Metrics::new());
    let store = SettingsStore::load(&path, Duration::from_secs(60)).with_metrics(metrics.clone());
    let mut rx = store.subscribe();

    store.set("bypassRequirements", json!(true), Scope::Global).unwrap();
    assert!(store.bypass_requirements());

    let result = store.flush().await;
    assert!(matches!(result, Err(SettingsError::Write { .. })));

    assert!(!store.bypass_requirements());
    assert!(!store.has_pending_changes());
    assert_eq!(metrics.settings_flush_failures.load(Ordering::Relaxed), 1);

    let mut changes = Vec::new();
    while let Ok(change) = rx.try_recv() {
        changes.push(change);
    }
    assert_eq!(changes.first(), Some(&SettingsChange::Patched));
    assert!(
        changes
            .iter()
            .any(|c| matches!(c, SettingsChange::WriteFailed { .. }))
    );
    assert_eq!(changes.last(), Some(&SettingsChange::RolledBack));
}

#[tokio::test]
async fn test_patch_during_flush_is_written_by_next_flush() {
    let (_temp, dir) = create_test_dir();
    let path = dir.join("settings.json");
    let store = SettingsStore::load(&path, Duration::from_secs(60));

    store.set("locale", json!("en-US"), Scope::Global).unwrap();
    let in_flight = tokio::spawn({
        let store = store.clone();
        async move { store.flush().await }
    });
    // Let the flush take its snapshot and park on the file write
    tokio::task::yield_now().await;
    store.set("locale", json!("fr-FR"), Scope::Global).unwrap();

    in_flight.await.unwrap().unwrap();
    assert!(store.has_pending_changes());
    store.flush().await.unwrap();

    assert!(!store.has_pending_changes());
    let on_disk = read_settings_file(&path).unwrap();
    assert_eq!(on_disk.locale.as_deref(), Some("fr-FR"));
}

#[tokio::test]
async fn test_failed_write_discards_patches_made_during_it() {
    let (_temp, dir) = create_test_dir();
    std::fs::write(dir.join("blocker"), "").unwrap();
    let store = SettingsStore::load(dir.join("blocker").join("settings.json"), Duration::from_secs(60));

    store.set("locale", json!("en-US"), Scope::Global).unwrap();
    let in_flight = tokio::spawn({
        let store = store.clone();
        async move { store.flush().await }
    });
    tokio::task::yield_now().await;
    store.set("bypassRequirements", json!(true), Scope::Global).unwrap();

    assert!(matches!(
        in_flight.await.unwrap(),
        Err(SettingsError::Write { .. })
    ));
    assert_eq!(store.snapshot().locale, None);
    assert!(!store.bypass_requirements());
    assert!(!store.has_pending_changes());
}

#[tokio::test]
async fn test_flush_without_changes_writes_nothing() {
    let (_temp, dir) = create_test_dir();
    let path = dir.join("settings.json");
    let store = SettingsStore::load(&path, Duration::from_secs(60));

    store.flush().await.unwrap();

    assert!(!path.exists());
}

#[tokio::test]
async fn test_invalid_patch_changes_nothing() {
    let (_temp, dir) = create_test_dir();
    let store = SettingsStore::load(dir.join("settings.json"), Duration::from_secs(60));
    let before = store.snapshot();

    assert!(store.patch(json!({"notASetting": 1})).is_err());
    assert!(store.patch(json!({"ripLevels": "yes"})).is_err());
    assert!(matches!(
        store.set("nope", json!(1), Scope::Global),
        Err(SettingsError::UnknownKey(_))
    ));

    assert_eq!(store.snapshot(), before);
    assert!(!store.has_pending_changes());
}

#[tokio::test]
async fn test_mod_sources_are_deduplicated() {
    let (_temp, dir) = create_test_dir();
    let store = SettingsStore::load(dir.join("settings.json"), Duration::from_secs(60));

    assert!(store.add_mod_source("https://example.com/mods.json"));
    assert!(!store.add_mod_source("https://example.com/mods.json"));
    assert_eq!(store.mod_sources(), vec!["https://example.com/mods.json".to_string()]);

    assert!(store.remove_mod_source("https://example.com/mods.json"));
    assert!(!store.remove_mod_source("https://example.com/mods.json"));
    assert!(store.mod_sources().is_empty());
}
