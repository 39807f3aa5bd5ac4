//! On-disk layout of an installation directory.
//!
//! ```text
//! <install>/versions/<folder>/<version>/   extractor, gk, data/
//! <install>/active/<game>/data/            per-game project data
//! <install>/features/<game>/mods/          mod sources and the shared ISO extraction
//! <install>/features/<game>/texture-packs/ installed texture packs
//! ```

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::{LauncherError, Result};
use crate::models::{GameId, Settings};
use crate::services::process::executable_name;

/// Directory name reserved for the ISO extraction shared by all mods of a game
pub const MOD_ISO_DATA_DIR: &str = "_iso_data";

/// Check that `name` is usable as a single directory component below the
/// features tree. Separators, drive prefixes, `.`/`..` and the reserved ISO
/// directory are rejected.
pub fn check_component(kind: &'static str, name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name == MOD_ISO_DATA_DIR
        || name.contains(['/', '\\', ':', '\0']);
    if invalid {
        return Err(LauncherError::InvalidName {
            kind,
            name: name.to_string(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherPaths {
    install_dir: Utf8PathBuf,
    version_folder: String,
    version: String,
}

impl LauncherPaths {
    pub fn new(
        install_dir: impl Into<Utf8PathBuf>,
        version_folder: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            install_dir: install_dir.into(),
            version_folder: version_folder.into(),
            version: version.into(),
        }
    }

    /// Resolve from settings; needs an installation directory and an active version
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let install_dir = settings.installation_dir.clone().ok_or_else(|| {
            LauncherError::NotConfigured("no installation directory set".to_string())
        })?;
        let (Some(version), Some(folder)) = (
            settings.active_version.clone(),
            settings.active_version_folder.clone(),
        ) else {
            return Err(LauncherError::NotConfigured(
                "no active tool version selected".to_string(),
            ));
        };
        Ok(Self::new(install_dir, folder, version))
    }

    pub fn install_dir(&self) -> &Utf8Path {
        &self.install_dir
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn version_folder(&self) -> &str {
        &self.version_folder
    }

    pub fn version_dir(&self) -> Utf8PathBuf {
        self.install_dir
            .join("versions")
            .join(&self.version_folder)
            .join(&self.version)
    }

    pub fn extractor(&self) -> Utf8PathBuf {
        self.version_dir().join(executable_name("extractor"))
    }

    pub fn game_executable(&self) -> Utf8PathBuf {
        self.version_dir().join(executable_name("gk"))
    }

    pub fn active_dir(&self, game: GameId) -> Utf8PathBuf {
        self.install_dir.join("active").join(game.as_str())
    }

    pub fn data_dir(&self, game: GameId) -> Utf8PathBuf {
        self.active_dir(game).join("data")
    }

    /// Where the extractor places the validated ISO contents
    pub fn iso_data_dir(&self, game: GameId) -> Utf8PathBuf {
        self.data_dir(game).join("iso_data").join(game.as_str())
    }

    pub fn texture_replacements_dir(&self, game: GameId) -> Utf8PathBuf {
        self.data_dir(game)
            .join("custom_assets")
            .join(game.as_str())
            .join("texture_replacements")
    }

    pub fn features_dir(&self, game: GameId) -> Utf8PathBuf {
        self.install_dir.join("features").join(game.as_str())
    }

    pub fn mods_dir(&self, game: GameId) -> Utf8PathBuf {
        self.features_dir(game).join("mods")
    }

    pub fn mod_dir(&self, game: GameId, source: &str, mod_name: &str) -> Utf8PathBuf {
        self.mods_dir(game).join(source).join(mod_name)
    }

    /// Root passed to mod extractors as the extraction target
    pub fn mod_iso_data_root(&self, game: GameId) -> Utf8PathBuf {
        self.mods_dir(game).join(MOD_ISO_DATA_DIR)
    }

    pub fn mod_iso_data_dir(&self, game: GameId) -> Utf8PathBuf {
        self.mod_iso_data_root(game).join(game.as_str())
    }

    /// Whether a previous mod install already extracted the ISO
    pub fn has_mod_base_extraction(&self, game: GameId) -> bool {
        let dir = self.mod_iso_data_dir(game);
        dir.is_dir()
            && std::fs::read_dir(&dir)
                .map(|mut entries| entries.next().is_some())
                .unwrap_or(false)
    }

    pub fn texture_packs_dir(&self, game: GameId) -> Utf8PathBuf {
        self.features_dir(game).join("texture-packs")
    }

    pub fn texture_pack_dir(&self, game: GameId, pack: &str) -> Utf8PathBuf {
        self.texture_packs_dir(game).join(pack)
    }

    /// Replacement textures shipped inside a texture pack
    pub fn texture_pack_replacements(&self, game: GameId, pack: &str) -> Utf8PathBuf {
        self.texture_pack_dir(game, pack)
            .join("custom_assets")
            .join(game.as_str())
            .join("texture_replacements")
    }
}
