use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fbls_core::{version_dir_name, SERVER_BINARY_NAME};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    prefix: PathBuf,
}

impl StorageLayout {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// Storage root holding one directory per installed version.
    pub fn servers_dir(&self) -> PathBuf {
        self.prefix.join("servers")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.prefix.join("state")
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.state_dir().join("preferences.toml")
    }

    pub fn config_path(&self) -> PathBuf {
        self.prefix.join("config.toml")
    }

    pub fn version_dir(&self, version: &str) -> PathBuf {
        self.servers_dir().join(version_dir_name(version))
    }

    pub fn binary_path(&self, version: &str) -> PathBuf {
        self.version_dir(version).join(executable_file_name())
    }
}

pub fn executable_file_name() -> String {
    if cfg!(windows) {
        return format!("{SERVER_BINARY_NAME}.exe");
    }
    SERVER_BINARY_NAME.to_string()
}

pub fn default_user_prefix() -> Result<PathBuf> {
    if let Some(home) = std::env::var_os("FBLS_HOME").filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(home));
    }

    if cfg!(windows) {
        let app_data = std::env::var("LOCALAPPDATA")
            .context("LOCALAPPDATA is not set; cannot resolve Windows user prefix")?;
        return Ok(PathBuf::from(app_data).join("Fbls"));
    }

    let home = std::env::var("HOME").context("HOME is not set; cannot resolve user prefix")?;
    Ok(PathBuf::from(home).join(".fbls"))
}
