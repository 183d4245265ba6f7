use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use fbls_core::version_from_dir_name;
use tracing::{debug, warn};

use crate::fs_utils::{remove_file_if_exists, DOWNLOAD_PREFIX, STAGING_PREFIX};

/// Download and staging entries untouched for this long are abandoned even
/// when their owning pid is still in use.
pub const STALE_TRANSIENT_AGE: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

/// Deletes every version directory under `servers_dir` except `keep_dir_name`,
/// along with download and staging leftovers of installs that were cut off.
///
/// Best effort: failures are logged and reported, never returned as errors.
pub fn reap_old_versions(servers_dir: &Path, keep_dir_name: &str) -> ReapReport {
    let mut report = ReapReport::default();
    let entries = match fs::read_dir(servers_dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(
                dir = %servers_dir.display(),
                error = %err,
                "skipping cleanup of old server versions"
            );
            return report;
        }
    };

    let now = SystemTime::now();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(dir = %servers_dir.display(), error = %err, "failed reading storage entry");
                continue;
            }
        };
        let is_dir = entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false);
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        let path = entry.path();

        if let Some(owner) = transient_owner(name) {
            if is_abandoned(&path, owner, now) {
                remove_entry(&path, is_dir, &mut report);
            }
            continue;
        }
        if !is_dir || name == keep_dir_name || version_from_dir_name(name).is_none() {
            continue;
        }
        remove_entry(&path, true, &mut report);
    }

    report.removed.sort();
    report
}

fn remove_entry(path: &Path, is_dir: bool, report: &mut ReapReport) {
    let result = if is_dir {
        fs::remove_dir_all(path)
    } else {
        remove_file_if_exists(path)
    };
    match result {
        Ok(()) => {
            debug!(path = %path.display(), "removed stale server entry");
            report.removed.push(path.to_path_buf());
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed removing stale server entry");
            report.failed.push((path.to_path_buf(), err.to_string()));
        }
    }
}

/// `Some(owner pid)` for download and staging entries; the pid is `None`
/// when the name carries none.
fn transient_owner(name: &str) -> Option<Option<u32>> {
    let rest = name
        .strip_prefix(DOWNLOAD_PREFIX)
        .or_else(|| name.strip_prefix(STAGING_PREFIX))?;
    Some(rest.split('-').next().and_then(|pid| pid.parse().ok()))
}

fn is_abandoned(path: &Path, owner: Option<u32>, now: SystemTime) -> bool {
    let owner_gone = match owner {
        Some(pid) if pid == std::process::id() => false,
        Some(pid) => !process_is_running(pid),
        None => false,
    };
    owner_gone || untouched_for(path, now, STALE_TRANSIENT_AGE)
}

fn untouched_for(path: &Path, now: SystemTime, age: Duration) -> bool {
    fs::symlink_metadata(path)
        .and_then(|metadata| metadata.modified())
        .ok()
        .and_then(|modified| now.duration_since(modified).ok())
        .is_some_and(|elapsed| elapsed >= age)
}

#[cfg(target_os = "linux")]
fn process_is_running(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

// Without a cheap liveness probe, only the age rule applies.
#[cfg(not(target_os = "linux"))]
fn process_is_running(_pid: u32) -> bool {
    true
}

pub fn list_installed_versions(servers_dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(servers_dir) else {
        return Vec::new();
    };

    let mut versions = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false))
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            version_from_dir_name(&name).map(str::to_string)
        })
        .collect::<Vec<_>>();
    versions.sort();
    versions
}
