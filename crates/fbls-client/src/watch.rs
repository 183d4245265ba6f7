use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use fbls_core::AcquireError;
use globset::{Glob, GlobSet, GlobSetBuilder};
use lsp_types::{DidChangeWatchedFilesParams, FileChangeType, FileEvent, Uri};
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostFileChange {
    Created,
    Changed,
    Deleted,
}

impl HostFileChange {
    fn lsp_type(self) -> FileChangeType {
        match self {
            Self::Created => FileChangeType::CREATED,
            Self::Changed => FileChangeType::CHANGED,
            Self::Deleted => FileChangeType::DELETED,
        }
    }

    fn from_lsp(typ: FileChangeType) -> Option<Self> {
        if typ == FileChangeType::CREATED {
            Some(Self::Created)
        } else if typ == FileChangeType::CHANGED {
            Some(Self::Changed)
        } else if typ == FileChangeType::DELETED {
            Some(Self::Deleted)
        } else {
            None
        }
    }
}

/// A raw change as reported by the host. The host cannot tell a renamed
/// directory apart from a new one, so directories arrive as single events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostFileEvent {
    pub path: PathBuf,
    pub change: HostFileChange,
}

impl HostFileEvent {
    pub fn new(path: impl Into<PathBuf>, change: HostFileChange) -> Self {
        Self {
            path: path.into(),
            change,
        }
    }

    /// Reads back an event the editor reported itself. Non-file URIs and
    /// unknown change kinds yield `None`.
    pub fn from_lsp(event: &FileEvent) -> Option<Self> {
        let change = HostFileChange::from_lsp(event.typ)?;
        let path = Url::parse(event.uri.as_str())
            .ok()
            .and_then(|url| url.to_file_path().ok());
        match path {
            Some(path) => Some(Self { path, change }),
            None => {
                debug!(uri = event.uri.as_str(), "ignoring change for non-file uri");
                None
            }
        }
    }
}

/// Turns host change events into `workspace/didChangeWatchedFiles` payloads.
#[derive(Debug, Clone)]
pub struct WatchedFilesForwarder {
    patterns: GlobSet,
}

impl WatchedFilesForwarder {
    pub fn new(patterns: &[String]) -> Result<Self, AcquireError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern).map_err(|err| {
                AcquireError::Configuration(format!("invalid watch pattern '{pattern}': {err}"))
            })?;
            builder.add(glob);
        }
        let patterns = builder
            .build()
            .map_err(|err| AcquireError::Configuration(format!("invalid watch patterns: {err}")))?;
        Ok(Self { patterns })
    }

    pub fn matches(&self, path: &Path) -> bool {
        self.patterns.is_match(path)
    }

    /// Created or changed directories are expanded into the matching files
    /// beneath them. Deletions are forwarded unexpanded since the directory
    /// contents are already gone. Returns `None` when nothing is left to send.
    pub fn translate(&self, events: &[HostFileEvent]) -> Option<DidChangeWatchedFilesParams> {
        let mut seen = HashSet::new();
        let mut changes = Vec::new();

        for event in events {
            let paths = match event.change {
                HostFileChange::Deleted => vec![event.path.clone()],
                HostFileChange::Created | HostFileChange::Changed if event.path.is_dir() => {
                    self.expand_dir(&event.path)
                }
                HostFileChange::Created | HostFileChange::Changed => {
                    if self.matches(&event.path) {
                        vec![event.path.clone()]
                    } else {
                        Vec::new()
                    }
                }
            };

            for path in paths {
                let Some((key, uri)) = file_uri(&path) else {
                    continue;
                };
                if seen.insert((key, event.change)) {
                    changes.push(FileEvent::new(uri, event.change.lsp_type()));
                }
            }
        }

        if changes.is_empty() {
            return None;
        }
        debug!(count = changes.len(), "forwarding watched file changes");
        Some(DidChangeWatchedFilesParams { changes })
    }

    fn expand_dir(&self, root: &Path) -> Vec<PathBuf> {
        let mut found = Vec::new();
        let mut queue = VecDeque::from([root.to_path_buf()]);
        while let Some(dir) = queue.pop_front() {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(dir = %dir.display(), error = %err, "failed expanding changed directory");
                    continue;
                }
            };
            for entry in entries.filter_map(Result::ok) {
                let path = entry.path();
                let Ok(kind) = entry.file_type() else {
                    continue;
                };
                if kind.is_dir() {
                    queue.push_back(path);
                } else if kind.is_file() && self.matches(&path) {
                    found.push(path);
                }
            }
        }
        found.sort();
        found
    }
}

fn file_uri(path: &Path) -> Option<(String, Uri)> {
    let Ok(url) = Url::from_file_path(path) else {
        warn!(path = %path.display(), "skipping change for non-absolute path");
        return None;
    };
    match Uri::from_str(url.as_str()) {
        Ok(uri) => Some((url.into(), uri)),
        Err(err) => {
            warn!(url = %url, error = ?err, "skipping change with unrepresentable uri");
            None
        }
    }
}
