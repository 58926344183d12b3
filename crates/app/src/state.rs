use std::{fs, path::PathBuf};

use common::prelude::{SecretKey, StateSnapshot};
use serde::{Deserialize, Serialize};
use url::Url;

pub const APP_NAME: &str = "keyward";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const KEY_FILE_NAME: &str = "key.pem";
pub const STATE_FILE_NAME: &str = "state.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Port the local message transport listens on
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Network name reported in bucket metadata
    #[serde(default = "default_network")]
    pub network: String,
    /// Base URL of the ledger's HTTP endpoint
    #[serde(default = "default_ledger_url")]
    pub ledger_url: Url,
    /// Page the agent points callers at after a prompt
    #[serde(default = "default_popup_base")]
    pub popup_base: String,
    /// Default log level, overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_listen_port() -> u16 {
    5150
}

fn default_network() -> String {
    "local".to_string()
}

fn default_ledger_url() -> Url {
    Url::parse("http://localhost:3000").expect("hardcoded URL must parse")
}

fn default_popup_base() -> String {
    "popup.html".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            network: default_network(),
            ledger_url: default_ledger_url(),
            popup_base: default_popup_base(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the keyward directory (~/.keyward)
    pub keyward_dir: PathBuf,
    /// Path to the agent key PEM file
    pub key_path: PathBuf,
    /// Path to the persisted agent state
    pub state_path: PathBuf,
    /// Path to the config file
    pub config_path: PathBuf,
    /// Loaded configuration
    pub config: AppConfig,
}

impl AppState {
    /// Get the keyward directory path (custom or default ~/.keyward)
    pub fn keyward_dir(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }

        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    /// Initialize a new keyward directory with a fresh keypair
    pub fn init(
        custom_path: Option<PathBuf>,
        config: Option<AppConfig>,
    ) -> Result<Self, StateError> {
        let keyward_dir = Self::keyward_dir(custom_path)?;

        if keyward_dir.exists() {
            return Err(StateError::AlreadyInitialized);
        }

        fs::create_dir_all(&keyward_dir)?;

        let key = SecretKey::generate().map_err(|e| StateError::InvalidKey(e.to_string()))?;
        let key_path = keyward_dir.join(KEY_FILE_NAME);
        fs::write(&key_path, key.to_pem())?;

        let config = config.unwrap_or_default();
        let config_path = keyward_dir.join(CONFIG_FILE_NAME);
        fs::write(&config_path, toml::to_string_pretty(&config)?)?;

        let snapshot = StateSnapshot {
            public_key: Some(key.public()),
            ..Default::default()
        };
        let state_path = keyward_dir.join(STATE_FILE_NAME);
        fs::write(&state_path, snapshot.to_json()?)?;

        Ok(Self {
            keyward_dir,
            key_path,
            state_path,
            config_path,
            config,
        })
    }

    /// Load existing state from the keyward directory
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let keyward_dir = Self::keyward_dir(custom_path)?;

        if !keyward_dir.exists() {
            return Err(StateError::NotInitialized);
        }

        let key_path = keyward_dir.join(KEY_FILE_NAME);
        let state_path = keyward_dir.join(STATE_FILE_NAME);
        let config_path = keyward_dir.join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            return Err(StateError::MissingFile(CONFIG_FILE_NAME.to_string()));
        }

        let config_toml = fs::read_to_string(&config_path)?;
        let config: AppConfig = toml::from_str(&config_toml)?;

        Ok(Self {
            keyward_dir,
            key_path,
            state_path,
            config_path,
            config,
        })
    }

    /// Load the secret key, if the user has not logged out
    pub fn load_key(&self) -> Result<Option<SecretKey>, StateError> {
        if !self.key_path.exists() {
            return Ok(None);
        }
        let pem = fs::read_to_string(&self.key_path)?;
        let key = SecretKey::from_pem(&pem).map_err(|e| StateError::InvalidKey(e.to_string()))?;
        Ok(Some(key))
    }

    /// Write the key file, or remove it when logged out
    pub fn save_key(&self, pem: Option<&str>) -> Result<(), StateError> {
        match pem {
            Some(pem) => {
                let tmp_path = self.key_path.with_extension("pem.tmp");
                fs::write(&tmp_path, pem)?;
                fs::rename(&tmp_path, &self.key_path)?;
            }
            None if self.key_path.exists() => fs::remove_file(&self.key_path)?,
            None => {}
        }
        Ok(())
    }

    /// Load the persisted agent state; a missing file is an empty state
    pub fn load_snapshot(&self) -> Result<StateSnapshot, StateError> {
        if !self.state_path.exists() {
            return Ok(StateSnapshot::default());
        }
        let json = fs::read_to_string(&self.state_path)?;
        Ok(StateSnapshot::from_json(&json)?)
    }

    /// Persist the agent state, replacing the previous file atomically
    pub fn save_snapshot(&self, snapshot: &StateSnapshot) -> Result<(), StateError> {
        let tmp_path = self.state_path.with_extension("json.tmp");
        fs::write(&tmp_path, snapshot.to_json()?)?;
        fs::rename(&tmp_path, &self.state_path)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("keyward directory not initialized. Run 'keyward init' first")]
    NotInitialized,

    #[error("keyward directory already initialized")]
    AlreadyInitialized,

    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("missing required file: {0}")]
    MissingFile(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("state file error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::prelude::PermissionSet;

    #[test]
    fn test_init_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keyward");

        let state = AppState::init(Some(path.clone()), None).unwrap();
        assert!(state.key_path.exists());
        assert!(state.state_path.exists());

        let loaded = AppState::load(Some(path)).unwrap();
        assert_eq!(loaded.config, AppConfig::default());

        let key = loaded.load_key().unwrap().unwrap();
        let snapshot = loaded.load_snapshot().unwrap();
        assert_eq!(snapshot.public_key, Some(key.public()));
    }

    #[test]
    fn test_init_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keyward");

        AppState::init(Some(path.clone()), None).unwrap();
        assert!(matches!(
            AppState::init(Some(path), None),
            Err(StateError::AlreadyInitialized)
        ));
    }

    #[test]
    fn test_load_uninitialized_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            AppState::load(Some(dir.path().join("missing"))),
            Err(StateError::NotInitialized)
        ));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: AppConfig = toml::from_str("listen_port = 6000").unwrap();
        assert_eq!(config.listen_port, 6000);
        assert_eq!(config.network, "local");
        assert_eq!(config.ledger_url.as_str(), "http://localhost:3000/");
    }

    #[test]
    fn test_snapshot_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::init(Some(dir.path().join("keyward")), None).unwrap();

        let mut snapshot = state.load_snapshot().unwrap();
        snapshot
            .permissions
            .insert("app.example".into(), PermissionSet::new().with_public_key());
        state.save_snapshot(&snapshot).unwrap();

        assert_eq!(state.load_snapshot().unwrap(), snapshot);
        assert!(!state.state_path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_save_key_replaces_or_removes() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::init(Some(dir.path().join("keyward")), None).unwrap();

        let key = SecretKey::generate().unwrap();
        state.save_key(Some(&key.to_pem())).unwrap();
        assert_eq!(state.load_key().unwrap().unwrap().public(), key.public());

        state.save_key(None).unwrap();
        assert!(!state.key_path.exists());
        assert!(state.load_key().unwrap().is_none());
        state.save_key(None).unwrap();
    }

    #[test]
    fn test_missing_key_means_logged_out() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::init(Some(dir.path().join("keyward")), None).unwrap();
        fs::remove_file(&state.key_path).unwrap();
        assert!(state.load_key().unwrap().is_none());
    }
}
