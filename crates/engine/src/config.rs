// Local configuration for scriptdesk.
//
// Global config: `~/.scriptdesk/config.toml`

use std::path::{Path, PathBuf};

use scriptdesk_common::types::Role;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::drafts::debounce::AutosaveConfig;
use crate::lines::reconcile::MatchOptions;

/// Default window, in positions, for nearby fuzzy line matching.
pub const DEFAULT_NEARBY_WINDOW: usize = 5;
/// Default autosave debounce window.
pub const DEFAULT_AUTOSAVE_DEBOUNCE_MS: u64 = 1_000;

/// Root directory for scriptdesk state: `~/.scriptdesk/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".scriptdesk"))
}

/// Path to the global config file: `~/.scriptdesk/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("config.toml"))
}

/// Default SQLite database location: `~/.scriptdesk/scriptdesk.db`.
pub fn default_database_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("scriptdesk.db"))
}

// ── Global config ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GlobalConfig {
    /// Identity recorded as author / editor on suggestions and lines.
    pub user_id: Option<String>,
    pub display_name: Option<String>,
    pub role: Role,
    /// Overrides the default `~/.scriptdesk/scriptdesk.db`.
    pub database_path: Option<PathBuf>,
    pub autosave: AutosaveSettings,
    pub matching: MatchingSettings,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            user_id: None,
            display_name: None,
            role: Role::Contributor,
            database_path: None,
            autosave: AutosaveSettings::default(),
            matching: MatchingSettings::default(),
        }
    }
}

impl GlobalConfig {
    /// Load from `~/.scriptdesk/config.toml`. Returns defaults if the file
    /// doesn't exist or can't be parsed.
    pub fn load() -> Self {
        global_config_path().and_then(|p| Self::load_from(&p).ok()).unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Save to `~/.scriptdesk/config.toml`.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = global_config_path().ok_or(ConfigError::NoHomeDirectory)?;
        self.save_to(&path)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn database_path(&self) -> Option<PathBuf> {
        self.database_path.clone().or_else(default_database_path)
    }

    pub fn match_options(&self) -> MatchOptions {
        MatchOptions { nearby_window: self.matching.nearby_window }
    }

    pub fn autosave_config(&self) -> AutosaveConfig {
        AutosaveConfig::with_millis(self.autosave.debounce_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AutosaveSettings {
    /// Clamped to 250–5000 ms when applied.
    pub debounce_ms: u64,
}

impl Default for AutosaveSettings {
    fn default() -> Self {
        Self { debounce_ms: DEFAULT_AUTOSAVE_DEBOUNCE_MS }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MatchingSettings {
    pub nearby_window: usize,
}

impl Default for MatchingSettings {
    fn default() -> Self {
        Self { nearby_window: DEFAULT_NEARBY_WINDOW }
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("could not determine home directory")]
    NoHomeDirectory,
}
