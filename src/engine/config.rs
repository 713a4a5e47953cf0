//! Cutover Configuration Module
//! Handles loading and validating cutover.config.json

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "cutover.config.json";
pub const CONFIG_ENV_VAR: &str = "CUTOVER_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Invalid config format: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Everything the updater needs to know about one installation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdaterConfig {
    /// Install root holding `versions/`, `current`, `state.json`
    #[serde(default = "default_install_root")]
    pub install_root: PathBuf,
    /// Prefix of artifact file names (`<artifact_name>-<version>`)
    #[serde(default = "default_artifact_name")]
    pub artifact_name: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    /// Init system CLI used to stop/start the service
    #[serde(default = "default_supervisor")]
    pub supervisor: String,
    #[serde(default = "default_metadata_url")]
    pub metadata_url: String,
    /// Flag that makes the managed binary print its version
    #[serde(default = "default_version_flag")]
    pub version_flag: String,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeoutConfig {
    #[serde(default = "default_fetch_secs")]
    pub fetch_secs: u64,
    #[serde(default = "default_download_secs")]
    pub download_secs: u64,
    #[serde(default = "default_probe_secs")]
    pub probe_secs: u64,
    #[serde(default = "default_service_secs")]
    pub service_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            fetch_secs: default_fetch_secs(),
            download_secs: default_download_secs(),
            probe_secs: default_probe_secs(),
            service_secs: default_service_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn fetch(&self) -> Duration {
        Duration::from_secs(self.fetch_secs)
    }

    pub fn download(&self) -> Duration {
        Duration::from_secs(self.download_secs)
    }

    pub fn probe(&self) -> Duration {
        Duration::from_secs(self.probe_secs)
    }

    pub fn service(&self) -> Duration {
        Duration::from_secs(self.service_secs)
    }
}

fn default_install_root() -> PathBuf {
    PathBuf::from("/opt/myapp")
}

fn default_artifact_name() -> String {
    "myapp".to_string()
}

fn default_service_name() -> String {
    "myapp.service".to_string()
}

fn default_supervisor() -> String {
    "systemctl".to_string()
}

fn default_metadata_url() -> String {
    "http://localhost:8080/latest.json".to_string()
}

fn default_version_flag() -> String {
    "--version".to_string()
}

fn default_fetch_secs() -> u64 {
    30
}

fn default_download_secs() -> u64 {
    600
}

fn default_probe_secs() -> u64 {
    10
}

fn default_service_secs() -> u64 {
    60
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            install_root: default_install_root(),
            artifact_name: default_artifact_name(),
            service_name: default_service_name(),
            supervisor: default_supervisor(),
            metadata_url: default_metadata_url(),
            version_flag: default_version_flag(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl UpdaterConfig {
    /// Config rooted at `install_root`, everything else default. Used by tests.
    pub fn for_install_root(install_root: impl Into<PathBuf>) -> Self {
        Self {
            install_root: install_root.into(),
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: UpdaterConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config: explicit path, then `$CUTOVER_CONFIG`, then the
    /// user config directory, then built-in defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
            return Self::load(Path::new(&path));
        }
        if let Some(path) = Self::user_config_path().filter(|p| p.exists()) {
            return Self::load(&path);
        }
        Ok(Self::default())
    }

    /// `~/.config/cutover/cutover.config.json` on Linux
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("cutover").join(CONFIG_FILE_NAME))
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.install_root.is_absolute() {
            return Err(ConfigError::Invalid(format!(
                "install_root must be absolute, got {}",
                self.install_root.display()
            )));
        }
        if self.artifact_name.is_empty()
            || self.artifact_name.starts_with('.')
            || self.artifact_name.contains(['/', '\\'])
        {
            return Err(ConfigError::Invalid(format!(
                "artifact_name must be a plain, non-hidden file name, got {:?}",
                self.artifact_name
            )));
        }
        if self.service_name.is_empty() {
            return Err(ConfigError::Invalid("service_name is empty".to_string()));
        }
        Ok(())
    }

    pub fn versions_dir(&self) -> PathBuf {
        self.install_root.join("versions")
    }

    pub fn current_link(&self) -> PathBuf {
        self.install_root.join("current")
    }

    pub fn state_path(&self) -> PathBuf {
        self.install_root.join("state.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_match_legacy_layout() {
        let config = UpdaterConfig::default();
        assert_eq!(config.versions_dir(), PathBuf::from("/opt/myapp/versions"));
        assert_eq!(config.current_link(), PathBuf::from("/opt/myapp/current"));
        assert_eq!(config.service_name, "myapp.service");
        assert_eq!(config.timeouts.download(), Duration::from_secs(600));
    }

    #[test]
    fn test_partial_file_takes_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            r#"{"install_root": "/srv/web", "artifact_name": "web", "timeouts": {"fetch_secs": 5}}"#,
        ).unwrap();

        let config = UpdaterConfig::load(&path).unwrap();
        assert_eq!(config.install_root, PathBuf::from("/srv/web"));
        assert_eq!(config.artifact_name, "web");
        assert_eq!(config.supervisor, "systemctl");
        assert_eq!(config.timeouts.fetch_secs, 5);
        assert_eq!(config.timeouts.probe_secs, 10);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let config = UpdaterConfig::for_install_root(dir.path());
        config.save(&path).unwrap();
        assert_eq!(UpdaterConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let result = UpdaterConfig::load(&dir.path().join("nope.json"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = UpdaterConfig::for_install_root("relative/root");
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.install_root = PathBuf::from("/opt/x");
        config.artifact_name = "../x".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        // Hidden names would make every slot look like a pending download
        config.artifact_name = ".myapp".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.artifact_name = "myapp".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_discover_explicit_path_wins() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("custom.json");
        std::fs::write(&path, r#"{"install_root": "/srv/explicit"}"#).unwrap();

        let config = UpdaterConfig::discover(Some(&path)).unwrap();
        assert_eq!(config.install_root, PathBuf::from("/srv/explicit"));
    }
}
