use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::fs_utils::unique_suffix;

/// Everything the version store persists between sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Preferences {
    pub latest_known_version: Option<String>,
    pub latest_skipped_version: Option<String>,
    pub auto_download: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PreferencesFile {
    #[serde(default = "preferences_file_version")]
    version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    latest_known_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    latest_skipped_version: Option<String>,
    #[serde(default)]
    auto_download: bool,
}

impl From<PreferencesFile> for Preferences {
    fn from(value: PreferencesFile) -> Self {
        Self {
            latest_known_version: value.latest_known_version,
            latest_skipped_version: value.latest_skipped_version,
            auto_download: value.auto_download,
        }
    }
}

impl From<&Preferences> for PreferencesFile {
    fn from(value: &Preferences) -> Self {
        Self {
            version: preferences_file_version(),
            latest_known_version: value.latest_known_version.clone(),
            latest_skipped_version: value.latest_skipped_version.clone(),
            auto_download: value.auto_download,
        }
    }
}

/// File-backed version store.
///
/// Every update is a read-modify-write under one lock, and the file is
/// replaced by rename so readers never observe a partial write.
#[derive(Debug)]
pub struct PreferenceStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl PreferenceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> Result<Preferences> {
        let _guard = self.guard();
        self.load()
    }

    pub fn cached_version(&self) -> Result<Option<String>> {
        Ok(self.snapshot()?.latest_known_version)
    }

    pub fn set_cached_version(&self, version: &str) -> Result<()> {
        self.update(|prefs| prefs.latest_known_version = Some(version.to_string()))
    }

    pub fn skipped_version(&self) -> Result<Option<String>> {
        Ok(self.snapshot()?.latest_skipped_version)
    }

    pub fn set_skipped_version(&self, version: &str) -> Result<()> {
        self.update(|prefs| prefs.latest_skipped_version = Some(version.to_string()))
    }

    pub fn is_auto_download_enabled(&self) -> Result<bool> {
        Ok(self.snapshot()?.auto_download)
    }

    pub fn set_auto_download_enabled(&self, enabled: bool) -> Result<()> {
        self.update(|prefs| prefs.auto_download = enabled)
    }

    fn update(&self, apply: impl FnOnce(&mut Preferences)) -> Result<()> {
        let _guard = self.guard();
        let mut prefs = self.load()?;
        apply(&mut prefs);
        self.save(&prefs)
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load(&self) -> Result<Preferences> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(Preferences::default());
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed reading preferences: {}", self.path.display())
                });
            }
        };

        parse_preferences_file(&content)
            .with_context(|| format!("failed parsing preferences: {}", self.path.display()))
    }

    fn save(&self, prefs: &Preferences) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed creating state dir: {}", parent.display()))?;
        }

        let content = toml::to_string(&PreferencesFile::from(prefs))
            .with_context(|| format!("failed serializing preferences: {}", self.path.display()))?;
        let tmp_path = self
            .path
            .with_extension(format!("toml.tmp-{}", unique_suffix()));
        fs::write(&tmp_path, content)
            .with_context(|| format!("failed writing preferences: {}", tmp_path.display()))?;
        if let Err(err) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err).with_context(|| {
                format!("failed replacing preferences: {}", self.path.display())
            });
        }
        Ok(())
    }
}

fn parse_preferences_file(content: &str) -> Result<Preferences> {
    let parsed: PreferencesFile = toml::from_str(content)?;
    let expected = preferences_file_version();
    if parsed.version != expected {
        anyhow::bail!(
            "unsupported preferences version {} (expected {})",
            parsed.version,
            expected
        );
    }
    Ok(parsed.into())
}

fn preferences_file_version() -> u32 {
    1
}
