use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use fbls_core::AcquireError;
use tracing::{debug, info, warn};

use crate::acquire::Acquirer;
use crate::prompt::{RestartDecision, UpdateDecision};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateCheckOutcome {
    UpToDate,
    /// The remote version equals the one the user skipped earlier.
    AlreadySkipped(String),
    Skipped(String),
    Dismissed,
    Installed {
        version: String,
        path: PathBuf,
        restart_requested: bool,
    },
    Failed(AcquireError),
}

/// Handle to a background update check.
#[derive(Debug)]
pub struct UpdateCheck {
    handle: JoinHandle<UpdateCheckOutcome>,
}

impl UpdateCheck {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Blocks until the check ends. `None` if the check thread panicked.
    pub fn wait(self) -> Option<UpdateCheckOutcome> {
        self.handle.join().ok()
    }
}

struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Acquirer {
    /// Starts the advisory update check for `current_version` on its own
    /// thread. Returns `None` when a check from this acquirer is already
    /// running or the thread could not be spawned.
    pub fn spawn_update_check(&self, current_version: String) -> Option<UpdateCheck> {
        if self
            .update_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("update check already running");
            return None;
        }

        let guard = InFlightGuard(Arc::clone(&self.update_in_flight));
        let acquirer = self.clone();
        let spawned = thread::Builder::new()
            .name("fbls-update-check".to_string())
            .spawn(move || {
                let _guard = guard;
                acquirer.run_update_check(&current_version)
            });

        match spawned {
            Ok(handle) => Some(UpdateCheck { handle }),
            Err(err) => {
                warn!(error = %err, "failed starting background update check");
                None
            }
        }
    }

    /// Compares the latest release against `current_version` and applies the
    /// update policy. Errors end up in `Failed` and are only logged.
    pub fn run_update_check(&self, current_version: &str) -> UpdateCheckOutcome {
        let outcome = self.check_and_apply(current_version);
        match &outcome {
            UpdateCheckOutcome::Failed(err) => {
                warn!(kind = err.kind(), error = %err, "background update check failed");
            }
            UpdateCheckOutcome::Installed { version, .. } => {
                info!(%version, "installed newer server version");
            }
            other => debug!(outcome = ?other, "update check finished"),
        }
        outcome
    }

    /// Foreground variant: checks against the cached installation, if any.
    pub fn check_for_update(&self) -> Option<UpdateCheckOutcome> {
        let installation = self.usable_cache()?;
        Some(self.run_update_check(&installation.version))
    }

    fn check_and_apply(&self, current_version: &str) -> UpdateCheckOutcome {
        let release = match self.releases.latest_release() {
            Ok(release) => release,
            Err(err) => return UpdateCheckOutcome::Failed(err),
        };
        if release.version == current_version {
            return UpdateCheckOutcome::UpToDate;
        }

        if !self.auto_download_enabled() {
            let skipped = self.store.skipped_version().unwrap_or_else(|err| {
                warn!(error = %format!("{err:#}"), "ignoring unreadable skipped version");
                None
            });
            if skipped.as_deref() == Some(release.version.as_str()) {
                return UpdateCheckOutcome::AlreadySkipped(release.version);
            }

            match self.prompter.ask_update(current_version, &release.version) {
                UpdateDecision::InstallOnce => {
                    return match self.install_release(&release) {
                        Ok(installation) => {
                            let restart_requested = self.prompter.offer_restart(&installation.version)
                                == RestartDecision::Restart;
                            UpdateCheckOutcome::Installed {
                                version: installation.version,
                                path: installation.binary,
                                restart_requested,
                            }
                        }
                        Err(err) => UpdateCheckOutcome::Failed(err),
                    };
                }
                UpdateDecision::InstallAndEnableAutoUpdate => {
                    if let Err(err) = self.store.set_auto_download_enabled(true) {
                        warn!(error = %format!("{err:#}"), "failed persisting auto-download preference");
                    }
                }
                UpdateDecision::Skip => {
                    if let Err(err) = self.store.set_skipped_version(&release.version) {
                        warn!(error = %format!("{err:#}"), "failed persisting skipped version");
                    }
                    return UpdateCheckOutcome::Skipped(release.version);
                }
                UpdateDecision::Dismissed => return UpdateCheckOutcome::Dismissed,
            }
        }

        match self.install_release(&release) {
            Ok(installation) => UpdateCheckOutcome::Installed {
                version: installation.version,
                path: installation.binary,
                restart_requested: false,
            },
            Err(err) => UpdateCheckOutcome::Failed(err),
        }
    }
}
