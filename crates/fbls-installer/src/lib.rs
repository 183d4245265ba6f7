mod fs_utils;
mod install;
mod layout;
mod preferences;
mod reaper;

pub use fs_utils::{remove_file_if_exists, ScopedPath};
pub use install::{
    ensure_installed, mark_executable, CachedInstallation, InstallOutcome, InstallRequest,
    InstallStatus,
};
pub use layout::{default_user_prefix, executable_file_name, StorageLayout};
pub use preferences::{PreferenceStore, Preferences};
pub use reaper::{list_installed_versions, reap_old_versions, ReapReport, STALE_TRANSIENT_AGE};

#[cfg(test)]
mod tests;
