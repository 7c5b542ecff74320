//! clipmesh configuration file handling
//!
//! Configuration is TOML, stored under the user's data directory by default
//! (`~/.local/share/clipmesh/config.toml` on Linux). The state file with the
//! sync code and history lives next to it unless `[state] path` says otherwise.

use clipmesh::history::MAX_HISTORY;
use clipmesh::sync::BackoffPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default log level
const DEFAULT_LOG_LEVEL: &str = "info";

const STATE_FILE_NAME: &str = "state.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipMeshConfig {
    pub state: StateConfig,

    #[serde(default)]
    pub reconnect: ReconnectConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Path to the JSON state file (sync code and history)
    pub path: PathBuf,
}

/// Rendezvous reconnection backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_confirm_window_ms")]
    pub confirm_window_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_max_items")]
    pub max_items: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_base_delay_ms() -> u64 {
    BackoffPolicy::default().base_delay.as_millis() as u64
}

fn default_max_attempts() -> u32 {
    BackoffPolicy::default().max_attempts
}

fn default_confirm_window_ms() -> u64 {
    BackoffPolicy::default().confirm_window.as_millis() as u64
}

fn default_max_items() -> usize {
    MAX_HISTORY
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_attempts: default_max_attempts(),
            confirm_window_ms: default_confirm_window_ms(),
        }
    }
}

impl ReconnectConfig {
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_attempts: self.max_attempts,
            confirm_window: Duration::from_millis(self.confirm_window_ms),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_items: MAX_HISTORY,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl ClipMeshConfig {
    #[cfg(test)]
    pub fn new(state_path: PathBuf) -> Self {
        Self {
            state: StateConfig { path: state_path },
            reconnect: ReconnectConfig::default(),
            history: HistoryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;

        let config: ClipMeshConfig = toml::from_str(&contents)
            .map_err(|e| format!("Failed to parse config file '{}': {}", path.display(), e))?;

        Ok(config)
    }

    /// Load the config at `path`, writing the default one first if missing.
    pub fn load_or_create(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            Self::create_default(path, &default_state_path(path))?;
        }
        Self::load(path)
    }

    #[cfg(test)]
    pub fn save(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }

        fs::write(path, contents)
            .map_err(|e| format!("Failed to write config file '{}': {}", path.display(), e))?;

        Ok(())
    }

    /// Default configuration as TOML, with comments
    pub fn generate_default_toml(state_path: &Path) -> String {
        format!(
            r#"# clipmesh configuration

[state]
# JSON file holding the sync code and clipboard history
path = "{state_path}"

[reconnect]
# Delay before the first rendezvous reconnect; doubles per attempt
base_delay_ms = 1000
# Attempts before giving up (manual reconnect needed afterwards)
max_attempts = 5
# Wait after each reconnect request before checking the result
confirm_window_ms = 2000

[history]
# Items kept, newest first
max_items = 20

[logging]
# Log level: trace, debug, info, warn, error (RUST_LOG takes precedence)
level = "info"
"#,
            state_path = state_path.display()
        )
    }

    pub fn create_default(
        config_path: &Path,
        state_path: &Path,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let contents = Self::generate_default_toml(state_path);

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }

        fs::write(config_path, contents).map_err(|e| {
            format!(
                "Failed to write config file '{}': {}",
                config_path.display(),
                e
            )
        })?;

        Ok(())
    }
}

/// Default config location: `<data dir>/clipmesh/config.toml`
pub fn default_config_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("clipmesh")
        .join("config.toml")
}

/// State file adjacent to the config file
pub fn default_state_path(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .unwrap_or(config_path)
        .join(STATE_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = ClipMeshConfig::new(PathBuf::from("/data/clipmesh/state.json"));

        assert_eq!(config.reconnect.policy(), BackoffPolicy::default());
        assert_eq!(config.history.max_items, 20);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_save_and_load_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        let state_path = PathBuf::from("/data/clipmesh/state.json");

        let mut config = ClipMeshConfig::new(state_path.clone());
        config.reconnect.max_attempts = 3;
        config.save(&config_path).unwrap();

        let loaded = ClipMeshConfig::load(&config_path).unwrap();
        assert_eq!(loaded.state.path, state_path);
        assert_eq!(loaded.reconnect.max_attempts, 3);
    }

    #[test]
    fn test_generated_default_matches_builtin_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        let state_path = temp_dir.path().join("state.json");

        ClipMeshConfig::create_default(&config_path, &state_path).unwrap();
        let config = ClipMeshConfig::load(&config_path).unwrap();

        assert_eq!(config.state.path, state_path);
        assert_eq!(config.reconnect, ReconnectConfig::default());
        assert_eq!(config.history, HistoryConfig::default());
    }

    #[test]
    fn test_load_or_create_writes_default() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let config = ClipMeshConfig::load_or_create(&config_path).unwrap();
        assert!(config_path.exists());
        assert_eq!(config.state.path, temp_dir.path().join("nested").join("state.json"));
    }

    #[test]
    fn test_load_config_with_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[state]
path = "/tmp/state.json"

[reconnect]
max_attempts = 2
"#,
        )
        .unwrap();

        let config = ClipMeshConfig::load(&config_path).unwrap();
        assert_eq!(config.reconnect.max_attempts, 2);
        assert_eq!(config.reconnect.base_delay_ms, 1000);
        assert_eq!(config.reconnect.confirm_window_ms, 2000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_default_state_path() {
        let state = default_state_path(Path::new("/data/clipmesh/config.toml"));
        assert_eq!(state, PathBuf::from("/data/clipmesh/state.json"));
    }
}
