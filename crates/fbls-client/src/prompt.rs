/// Answer to the first-run download prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadDecision {
    DownloadAndEnableAutoUpdate,
    DownloadOnce,
    Cancel,
}

/// Answer to the "newer version available" prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateDecision {
    InstallOnce,
    InstallAndEnableAutoUpdate,
    Skip,
    /// The prompt was closed without choosing; nothing is persisted.
    Dismissed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    Restart,
    Later,
}

/// User-facing decisions the acquisition flow needs from its host.
pub trait Prompter: Send + Sync {
    fn ask_download(&self) -> DownloadDecision;

    fn ask_update(&self, current_version: &str, latest_version: &str) -> UpdateDecision;

    fn offer_restart(&self, installed_version: &str) -> RestartDecision;

    fn download_progress(&self, _version: &str, _downloaded: u64, _total: Option<u64>) {}
}
