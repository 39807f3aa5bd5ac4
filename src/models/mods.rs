use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::settings::GameId;

/// Platform key used in mod asset tables
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Linux,
    Macos,
}

impl Platform {
    /// Platform of the running build
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::Macos
        } else {
            Platform::Linux
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::Linux => "linux",
            Platform::Macos => "macos",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One published version of a mod
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModVersion {
    pub version: String,
    #[serde(default)]
    pub published_date: String,
    /// Platform key -> download URL; `null` means "not built for this platform"
    #[serde(default)]
    pub assets: IndexMap<String, Option<String>>,
    #[serde(default)]
    pub supported_games: Option<Vec<GameId>>,
}

impl ModVersion {
    pub fn asset_url(&self, platform: &str) -> Option<&str> {
        self.assets.get(platform).and_then(|url| url.as_deref())
    }
}

/// Mod metadata as published by a mod source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModInfo {
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub supported_games: Vec<GameId>,
    /// Newest first; order is taken as published, never re-sorted
    #[serde(default)]
    pub versions: Vec<ModVersion>,
}

/// Document served by a mod source URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModSourceData {
    #[serde(default)]
    pub schema_version: String,
    pub source_name: String,
    #[serde(default)]
    pub mods: IndexMap<String, ModInfo>,
    #[serde(default)]
    pub texture_packs: IndexMap<String, ModInfo>,
}

/// Whether a version ships a non-null asset for `platform`
pub fn is_version_supported_on_platform(platform: &str, version: &ModVersion) -> bool {
    version.asset_url(platform).is_some()
}

/// First version (in published order) with an asset for `platform`
pub fn latest_version_for_platform<'a>(
    info: &'a ModInfo,
    platform: &str,
) -> Option<&'a ModVersion> {
    info.versions
        .iter()
        .find(|version| is_version_supported_on_platform(platform, version))
}
