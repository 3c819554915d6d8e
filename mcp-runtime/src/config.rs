use std::io::Write;
use std::path::{Path, PathBuf};

use harbor_core::{HarborError, Result};
use serde::{Deserialize, Serialize};

pub const API_KEY_ENV: &str = "HARBOR_API_KEY";
pub const HOST_ENV: &str = "HARBOR_HOST";
pub const WORKSPACE_ENV: &str = "HARBOR_WORKSPACE";
pub const CONFIG_PATH_ENV: &str = "HARBOR_CONFIG_PATH";
pub const DEFAULT_HOST: &str = "https://api.harbor.dev/v1/";

const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_name: Option<String>,
    #[serde(default)]
    pub api: ApiConfig,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            workspace: None,
            workspace_name: None,
            api: ApiConfig::default(),
        }
    }
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

pub fn default_config_path() -> PathBuf {
    let config_dir = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("harbor");
    config_dir.join("mcp-server.json")
}

/// Machine-level configuration file plus the environment overrides read at
/// startup.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    workspace_override: Option<String>,
    api_key_override: Option<String>,
}

impl ConfigStore {
    pub fn from_env() -> Self {
        let path = non_empty_env(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(default_config_path);
        Self {
            path,
            workspace_override: non_empty_env(WORKSPACE_ENV),
            api_key_override: non_empty_env(API_KEY_ENV),
        }
    }

    /// Store at an explicit path with no environment overrides.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            workspace_override: None,
            api_key_override: None,
        }
    }

    pub fn with_workspace_override(mut self, workspace: impl Into<String>) -> Self {
        self.workspace_override = Some(workspace.into());
        self
    }

    pub fn with_api_key_override(mut self, key: impl Into<String>) -> Self {
        self.api_key_override = Some(key.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the config file; a missing file is the default config.
    pub fn load(&self) -> Result<ConfigFile> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ConfigFile::default());
            }
            Err(err) => {
                return Err(HarborError::Config(format!(
                    "failed to read {}: {err}",
                    self.path.display()
                )));
            }
        };
        serde_json::from_str(&data).map_err(|err| {
            HarborError::Config(format!("failed to parse {}: {err}", self.path.display()))
        })
    }

    pub fn save(&self, config: &ConfigFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| {
                HarborError::Config(format!("failed to create {}: {err}", parent.display()))
            })?;
        }

        let data = serde_json::to_string_pretty(config)
            .map_err(|err| HarborError::Config(format!("failed to encode config: {err}")))?;

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&self.path)
            .map_err(|err| {
                HarborError::Config(format!("failed to open {}: {err}", self.path.display()))
            })?;
        file.write_all(data.as_bytes()).map_err(|err| {
            HarborError::Config(format!("failed to write {}: {err}", self.path.display()))
        })?;

        Ok(())
    }

    /// Selected workspace: `HARBOR_WORKSPACE` first, then the config file.
    pub fn current_workspace_id(&self) -> Result<String> {
        if let Some(workspace) = &self.workspace_override {
            return Ok(workspace.clone());
        }
        self.load()?
            .workspace
            .filter(|workspace| !workspace.is_empty())
            .ok_or(HarborError::NoWorkspace)
    }

    pub fn persist_workspace_id(&self, workspace_id: &str) -> Result<()> {
        let mut config = self.load()?;
        if config.workspace.as_deref() != Some(workspace_id) {
            config.workspace_name = None;
        }
        config.workspace = Some(workspace_id.to_string());
        self.save(&config)
    }

    /// API key: `HARBOR_API_KEY` first, then the config file.
    pub fn resolve_token(&self) -> Result<String> {
        if let Some(key) = &self.api_key_override {
            return Ok(key.clone());
        }
        self.load()?
            .api
            .key
            .filter(|key| !key.is_empty())
            .ok_or(HarborError::NotAuthenticated)
    }

    pub fn api_host(&self) -> Option<String> {
        self.load().ok()?.api.host.filter(|host| !host.is_empty())
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

#[cfg(not(unix))]
trait OpenOptionsExt {
    fn mode(&mut self, _mode: u32) -> &mut Self;
}

#[cfg(not(unix))]
impl OpenOptionsExt for std::fs::OpenOptions {
    fn mode(&mut self, _mode: u32) -> &mut Self {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> ConfigStore {
        ConfigStore::at(dir.path().join("nested").join("mcp-server.json"))
    }

    #[test]
    fn missing_file_means_no_workspace_and_no_token() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        assert!(matches!(
            store.current_workspace_id(),
            Err(HarborError::NoWorkspace)
        ));
        assert!(matches!(
            store.resolve_token(),
            Err(HarborError::NotAuthenticated)
        ));
        assert_eq!(store.load().unwrap(), ConfigFile::default());
    }

    #[test]
    fn persisted_workspace_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.persist_workspace_id("tea-123").unwrap();

        let reopened = store_in(&dir);
        assert_eq!(reopened.current_workspace_id().unwrap(), "tea-123");
    }

    #[test]
    fn persisting_keeps_api_section() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store
            .save(&ConfigFile {
                api: ApiConfig {
                    key: Some("rnd_key".to_string()),
                    host: Some("https://example.test/v1/".to_string()),
                },
                ..ConfigFile::default()
            })
            .unwrap();
        store.persist_workspace_id("tea-9").unwrap();

        assert_eq!(store.resolve_token().unwrap(), "rnd_key");
        assert_eq!(
            store.api_host().as_deref(),
            Some("https://example.test/v1/")
        );
    }

    #[test]
    fn overrides_win_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir)
            .with_workspace_override("tea-env")
            .with_api_key_override("env-key");
        store.persist_workspace_id("tea-file").unwrap();
        assert_eq!(store.current_workspace_id().unwrap(), "tea-env");
        assert_eq!(store.resolve_token().unwrap(), "env-key");
    }

    #[test]
    fn corrupt_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp-server.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = ConfigStore::at(&path);
        assert!(matches!(store.load(), Err(HarborError::Config(_))));
    }

    #[cfg(unix)]
    #[test]
    fn config_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.persist_workspace_id("tea-1").unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
