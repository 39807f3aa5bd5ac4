use camino::Utf8PathBuf;
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// Schema version written by this build into `settings.json`
pub const SCHEMA_VERSION: &str = "1.0";

static SCHEMA_VERSION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+)\.(\d+)").expect("Invalid schema version regex"));

/// Parse a `major.minor[.patch]` schema string
pub fn parse_schema_version(version: &str) -> Option<(u32, u32)> {
    let captures = SCHEMA_VERSION_PATTERN.captures(version)?;
    let major = captures.get(1)?.as_str().parse().ok()?;
    let minor = captures.get(2)?.as_str().parse().ok()?;
    Some((major, minor))
}

/// Whether a stored schema version can be trusted by this build.
///
/// A different major, an older minor, or an unparseable string are all
/// incompatible. Newer minors are accepted since they only add fields.
pub fn is_schema_compatible(stored: &str) -> bool {
    let Some((expected_major, expected_minor)) = parse_schema_version(SCHEMA_VERSION) else {
        return false;
    };
    match parse_schema_version(stored) {
        Some((major, minor)) => major == expected_major && minor >= expected_minor,
        None => false,
    }
}

/// Supported games
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameId {
    Jak1,
    Jak2,
    Jak3,
    JakX,
}

impl GameId {
    pub const ALL: [GameId; 4] = [GameId::Jak1, GameId::Jak2, GameId::Jak3, GameId::JakX];

    pub fn as_str(&self) -> &'static str {
        match self {
            GameId::Jak1 => "jak1",
            GameId::Jak2 => "jak2",
            GameId::Jak3 => "jak3",
            GameId::JakX => "jakx",
        }
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GameId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GameId::ALL
            .into_iter()
            .find(|game| game.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown game: {}", s))
    }
}

/// Which part of the settings document a key lives in
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    Global,
    Game(GameId),
}

impl From<Option<GameId>> for Scope {
    fn from(game: Option<GameId>) -> Self {
        game.map_or(Scope::Global, Scope::Game)
    }
}

/// Per-game persisted state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GameConfig {
    pub is_installed: bool,
    pub installed_version: Option<String>,
    pub installed_version_folder: Option<String>,
    /// Highest priority first
    pub active_texture_packs: Vec<String>,
    /// source -> mod name -> installed version
    pub mods: IndexMap<String, IndexMap<String, String>>,
    pub seconds_played: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            is_installed: false,
            installed_version: None,
            installed_version_folder: None,
            active_texture_packs: Vec::new(),
            mods: IndexMap::new(),
            seconds_played: 0,
        }
    }
}

/// The persisted `settings.json` document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub version: String,
    pub installation_dir: Option<Utf8PathBuf>,
    pub active_version: Option<String>,
    pub active_version_folder: Option<String>,
    pub locale: Option<String>,
    pub auto_update_games: bool,
    pub delete_previous_versions: bool,
    pub bypass_requirements: bool,
    pub check_for_latest_mod_version: bool,
    pub rip_levels: bool,
    pub rip_collision: bool,
    pub rip_textures: bool,
    pub rip_streamed_audio: bool,
    pub mod_sources: Vec<String>,
    pub games: IndexMap<GameId, GameConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION.to_string(),
            installation_dir: None,
            active_version: None,
            active_version_folder: None,
            locale: None,
            auto_update_games: false,
            delete_previous_versions: false,
            bypass_requirements: false,
            check_for_latest_mod_version: true,
            rip_levels: false,
            rip_collision: false,
            rip_textures: false,
            rip_streamed_audio: false,
            mod_sources: Vec::new(),
            games: GameId::ALL
                .into_iter()
                .map(|game| (game, GameConfig::default()))
                .collect(),
        }
    }
}

impl Settings {
    pub fn game(&self, game: GameId) -> Option<&GameConfig> {
        self.games.get(&game)
    }

    pub fn game_mut(&mut self, game: GameId) -> Option<&mut GameConfig> {
        self.games.get_mut(&game)
    }

    /// Whether the game is recorded as installed
    pub fn is_game_installed(&self, game: GameId) -> bool {
        self.game(game).is_some_and(|g| g.is_installed)
    }
}
