use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

pub fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

pub(crate) const DOWNLOAD_PREFIX: &str = ".download-";
pub(crate) const STAGING_PREFIX: &str = ".staging-";

/// `<pid>-<nanos>`: the leading pid tells the reaper which process owns a
/// transient entry.
pub(crate) fn unique_suffix() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{}-{nanos}", std::process::id())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopedKind {
    File,
    Dir,
}

/// Removes the wrapped path when dropped, whichever way the owning scope exits.
#[derive(Debug)]
pub struct ScopedPath {
    path: PathBuf,
    kind: ScopedKind,
}

impl ScopedPath {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: ScopedKind::File,
        }
    }

    pub fn dir(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: ScopedKind::Dir,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScopedPath {
    fn drop(&mut self) {
        let result = match self.kind {
            ScopedKind::File => remove_file_if_exists(&self.path),
            ScopedKind::Dir => match fs::remove_dir_all(&self.path) {
                Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                other => other,
            },
        };
        if let Err(err) = result {
            warn!(path = %self.path.display(), error = %err, "failed to clean up temporary path");
        }
    }
}
