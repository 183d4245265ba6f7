use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fbls_core::AcquireError;
use serde::{Deserialize, Serialize};

pub const SERVER_PATH_ENV: &str = "FBLS_SERVER_PATH";
pub const RELEASE_URL_ENV: &str = "FBLS_RELEASE_URL";

/// User settings read from `config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Explicit server binary. Trusted as-is: existence is not checked.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_path: Option<PathBuf>,
    /// Releases-latest endpoint of the server project. Downloads fail with
    /// a configuration error until it is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_url: Option<String>,
    pub watch_patterns: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_path: None,
            release_url: None,
            watch_patterns: vec!["**/*.fbs".to_string()],
        }
    }
}

impl ClientConfig {
    pub fn load(path: &Path) -> Result<Self, AcquireError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(AcquireError::Configuration(format!(
                    "failed reading {}: {err}",
                    path.display()
                )));
            }
        };

        let mut config: Self = toml::from_str(&content).map_err(|err| {
            AcquireError::Configuration(format!("failed parsing {}: {err}", path.display()))
        })?;
        config.server_path = config
            .server_path
            .filter(|value| !value.as_os_str().is_empty());
        config.release_url = config
            .release_url
            .filter(|value| !value.trim().is_empty());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed creating config dir: {}", parent.display()))?;
        }
        let content = toml::to_string(self)
            .with_context(|| format!("failed serializing config: {}", path.display()))?;
        fs::write(path, content)
            .with_context(|| format!("failed writing config: {}", path.display()))
    }

    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(server_path) = lookup(SERVER_PATH_ENV).filter(|value| !value.trim().is_empty())
        {
            self.server_path = Some(PathBuf::from(server_path));
        }
        if let Some(release_url) = lookup(RELEASE_URL_ENV).filter(|value| !value.trim().is_empty())
        {
            self.release_url = Some(release_url);
        }
        self
    }

    pub fn with_process_env(self) -> Self {
        self.with_env_overrides(|key| std::env::var(key).ok())
    }
}
