use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use fbls_core::{select_asset_name, version_dir_name, AcquireError, Release, SERVER_BINARY_NAME};
use fbls_installer::{
    ensure_installed, reap_old_versions, CachedInstallation, InstallRequest, PreferenceStore,
    StorageLayout,
};
use fbls_release::{ArtifactDownloader, ReleaseSource};
use fbls_security::parse_checksum_file;
use tracing::{debug, info, warn};

use crate::prompt::{DownloadDecision, Prompter};
use crate::search_path::ExecutableLookup;
use crate::update::UpdateCheck;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerSource {
    Configured,
    SystemPath,
    Cached { version: String },
    Downloaded { version: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedServer {
    pub path: PathBuf,
    pub source: ServerSource,
}

impl ResolvedServer {
    pub fn version(&self) -> Option<&str> {
        match &self.source {
            ServerSource::Cached { version } | ServerSource::Downloaded { version } => {
                Some(version)
            }
            ServerSource::Configured | ServerSource::SystemPath => None,
        }
    }
}

/// States of a single acquisition. `Resolved` and `Failed` are terminal;
/// `Failed(None)` means the user cancelled and nothing should be reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireState {
    NoPathConfigured,
    CheckingSystemPath,
    CacheHit(CachedInstallation),
    CacheMissPromptPending,
    Downloading { enable_auto_download: bool },
    Resolved(ResolvedServer),
    Failed(Option<AcquireError>),
}

impl AcquireState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved(_) | Self::Failed(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::NoPathConfigured => "no-path-configured",
            Self::CheckingSystemPath => "checking-system-path",
            Self::CacheHit(_) => "cache-hit",
            Self::CacheMissPromptPending => "cache-miss-prompt-pending",
            Self::Downloading { .. } => "downloading",
            Self::Resolved(_) => "resolved",
            Self::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Resolved(ResolvedServer),
    Cancelled,
    Failed(AcquireError),
}

#[derive(Debug)]
pub struct Acquisition {
    pub outcome: AcquireOutcome,
    /// Present only on a cache hit; dropping it detaches the check.
    pub update_check: Option<UpdateCheck>,
}

impl Acquisition {
    pub fn server(&self) -> Option<&ResolvedServer> {
        match &self.outcome {
            AcquireOutcome::Resolved(server) => Some(server),
            AcquireOutcome::Cancelled | AcquireOutcome::Failed(_) => None,
        }
    }
}

/// Decides which server binary a session runs, installing one when needed.
///
/// Cheap to clone: every collaborator is shared, which is what lets the
/// background update check run on its own thread.
#[derive(Clone)]
pub struct Acquirer {
    pub(crate) layout: StorageLayout,
    pub(crate) os: String,
    pub(crate) arch: String,
    pub(crate) releases: Arc<dyn ReleaseSource>,
    pub(crate) downloader: Arc<dyn ArtifactDownloader>,
    pub(crate) prompter: Arc<dyn Prompter>,
    pub(crate) lookup: Arc<dyn ExecutableLookup>,
    pub(crate) store: Arc<PreferenceStore>,
    pub(crate) update_in_flight: Arc<AtomicBool>,
}

impl Acquirer {
    pub fn new(
        layout: StorageLayout,
        releases: Arc<dyn ReleaseSource>,
        downloader: Arc<dyn ArtifactDownloader>,
        prompter: Arc<dyn Prompter>,
        lookup: Arc<dyn ExecutableLookup>,
    ) -> Self {
        let store = Arc::new(PreferenceStore::new(layout.preferences_path()));
        Self {
            layout,
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            releases,
            downloader,
            prompter,
            lookup,
            store,
            update_in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_platform(mut self, os: impl Into<String>, arch: impl Into<String>) -> Self {
        self.os = os.into();
        self.arch = arch.into();
        self
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn store(&self) -> &PreferenceStore {
        &self.store
    }

    /// Runs the acquisition state machine to a terminal state.
    ///
    /// A configured path wins without any checks. On a cache hit the cached
    /// binary is returned right away and an update check is started in the
    /// background.
    pub fn acquire(&self, configured_path: Option<&Path>) -> Acquisition {
        if let Some(path) = configured_path {
            info!(path = %path.display(), "using configured server path");
            return Acquisition {
                outcome: AcquireOutcome::Resolved(ResolvedServer {
                    path: path.to_path_buf(),
                    source: ServerSource::Configured,
                }),
                update_check: None,
            };
        }

        let mut state = AcquireState::NoPathConfigured;
        let mut update_check = None;
        loop {
            if let AcquireState::CacheHit(installation) = &state {
                update_check = self.spawn_update_check(installation.version.clone());
            }

            state = match state {
                AcquireState::Resolved(server) => {
                    info!(path = %server.path.display(), "server binary resolved");
                    return Acquisition {
                        outcome: AcquireOutcome::Resolved(server),
                        update_check,
                    };
                }
                AcquireState::Failed(None) => {
                    info!("server acquisition cancelled");
                    return Acquisition {
                        outcome: AcquireOutcome::Cancelled,
                        update_check: None,
                    };
                }
                AcquireState::Failed(Some(err)) => {
                    warn!(kind = err.kind(), error = %err, "server acquisition failed");
                    return Acquisition {
                        outcome: AcquireOutcome::Failed(err),
                        update_check: None,
                    };
                }
                current => {
                    let from = current.name();
                    let next = self.step(current);
                    debug!(from, to = next.name(), "acquisition transition");
                    next
                }
            };
        }
    }

    /// Applies one transition. Terminal states are returned unchanged.
    pub fn step(&self, state: AcquireState) -> AcquireState {
        match state {
            AcquireState::NoPathConfigured => AcquireState::CheckingSystemPath,
            AcquireState::CheckingSystemPath => {
                if let Some(path) = self.lookup.find(SERVER_BINARY_NAME) {
                    return AcquireState::Resolved(ResolvedServer {
                        path,
                        source: ServerSource::SystemPath,
                    });
                }
                match self.usable_cache() {
                    Some(installation) => AcquireState::CacheHit(installation),
                    None => AcquireState::CacheMissPromptPending,
                }
            }
            AcquireState::CacheHit(installation) => AcquireState::Resolved(ResolvedServer {
                path: installation.binary,
                source: ServerSource::Cached {
                    version: installation.version,
                },
            }),
            AcquireState::CacheMissPromptPending => {
                if self.auto_download_enabled() {
                    return AcquireState::Downloading {
                        enable_auto_download: false,
                    };
                }
                match self.prompter.ask_download() {
                    DownloadDecision::DownloadAndEnableAutoUpdate => AcquireState::Downloading {
                        enable_auto_download: true,
                    },
                    DownloadDecision::DownloadOnce => AcquireState::Downloading {
                        enable_auto_download: false,
                    },
                    DownloadDecision::Cancel => AcquireState::Failed(None),
                }
            }
            AcquireState::Downloading {
                enable_auto_download,
            } => {
                if enable_auto_download {
                    if let Err(err) = self.store.set_auto_download_enabled(true) {
                        warn!(error = %format!("{err:#}"), "failed persisting auto-download preference");
                    }
                }
                match self.install_latest() {
                    Ok(installation) => AcquireState::Resolved(ResolvedServer {
                        path: installation.binary,
                        source: ServerSource::Downloaded {
                            version: installation.version,
                        },
                    }),
                    Err(err) => AcquireState::Failed(Some(err)),
                }
            }
            terminal @ (AcquireState::Resolved(_) | AcquireState::Failed(_)) => terminal,
        }
    }

    /// The cached installation, if its record exists and its binary is on disk.
    pub fn usable_cache(&self) -> Option<CachedInstallation> {
        let version = match self.store.cached_version() {
            Ok(Some(version)) => version,
            Ok(None) => return None,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "ignoring unreadable version record");
                return None;
            }
        };

        let binary = self.layout.binary_path(&version);
        if !binary.is_file() {
            debug!(%version, path = %binary.display(), "cached version has no binary on disk");
            return None;
        }

        Some(CachedInstallation {
            directory: self.layout.version_dir(&version),
            binary,
            version,
        })
    }

    pub(crate) fn auto_download_enabled(&self) -> bool {
        self.store.is_auto_download_enabled().unwrap_or_else(|err| {
            warn!(error = %format!("{err:#}"), "treating unreadable auto-download preference as off");
            false
        })
    }

    fn install_latest(&self) -> Result<CachedInstallation, AcquireError> {
        let release = self.releases.latest_release()?;
        self.install_release(&release)
    }

    /// Selector, fetch & install, version record, then cleanup of older
    /// version directories.
    pub(crate) fn install_release(&self, release: &Release) -> Result<CachedInstallation, AcquireError> {
        let asset_name = select_asset_name(&self.os, &self.arch, SERVER_BINARY_NAME, &release.version)?;
        let asset = release.require_asset(&asset_name)?;
        let expected_sha256 = self.expected_checksum(release, &asset_name)?;

        let request = InstallRequest {
            version: &release.version,
            asset_name: &asset_name,
            download_url: &asset.download_url,
            expected_sha256: expected_sha256.as_deref(),
        };
        let outcome = ensure_installed(
            &self.layout,
            self.downloader.as_ref(),
            &request,
            &mut |downloaded, total| {
                self.prompter
                    .download_progress(&release.version, downloaded, total)
            },
        )?;

        self.store
            .set_cached_version(&release.version)
            .map_err(|err| AcquireError::Permission(format!("failed recording installed version: {err:#}")))?;

        let report = reap_old_versions(&self.layout.servers_dir(), &version_dir_name(&release.version));
        if !report.removed.is_empty() {
            info!(count = report.removed.len(), "removed superseded server versions");
        }

        Ok(outcome.installation)
    }

    fn expected_checksum(&self, release: &Release, asset_name: &str) -> Result<Option<String>, AcquireError> {
        let Some(checksum_asset) = release.checksum_asset_for(asset_name) else {
            return Ok(None);
        };

        let content = self.downloader.fetch_text(&checksum_asset.download_url)?;
        parse_checksum_file(&content).map(Some).ok_or_else(|| {
            AcquireError::MalformedResponse(format!(
                "checksum asset {} does not contain a sha256 digest",
                checksum_asset.name
            ))
        })
    }
}
