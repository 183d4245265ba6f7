use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use fbls_core::{AcquireError, ArchiveType};
use fbls_release::ArtifactDownloader;
use fbls_security::verify_sha256_file;
use tracing::{debug, info};

use crate::fs_utils::{unique_suffix, ScopedPath, DOWNLOAD_PREFIX, STAGING_PREFIX};
use crate::layout::{executable_file_name, StorageLayout};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallRequest<'a> {
    pub version: &'a str,
    pub asset_name: &'a str,
    pub download_url: &'a str,
    pub expected_sha256: Option<&'a str>,
}

/// A version whose directory and binary exist under the storage root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedInstallation {
    pub version: String,
    pub directory: PathBuf,
    pub binary: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStatus {
    AlreadyInstalled,
    Installed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub installation: CachedInstallation,
    pub status: InstallStatus,
}

/// Downloads and unpacks `request` into its version directory.
///
/// When the binary for the version is already present no network or
/// extraction work happens; only the executable bit is re-applied. The
/// temporary archive and staging directory never outlive this call.
pub fn ensure_installed(
    layout: &StorageLayout,
    downloader: &dyn ArtifactDownloader,
    request: &InstallRequest<'_>,
    progress: &mut dyn FnMut(u64, Option<u64>),
) -> Result<InstallOutcome, AcquireError> {
    let installation = CachedInstallation {
        version: request.version.to_string(),
        directory: layout.version_dir(request.version),
        binary: layout.binary_path(request.version),
    };

    if installation.binary.is_file() {
        debug!(version = request.version, "server binary already installed");
        mark_executable(&installation.binary)?;
        return Ok(InstallOutcome {
            installation,
            status: InstallStatus::AlreadyInstalled,
        });
    }

    let archive_type = ArchiveType::infer_from_name(request.asset_name).ok_or_else(|| {
        AcquireError::Extraction(format!(
            "cannot infer archive format from asset name '{}'",
            request.asset_name
        ))
    })?;

    let servers_dir = layout.servers_dir();
    fs::create_dir_all(&servers_dir)
        .map_err(|err| io_permission_error(&servers_dir, "failed to create storage root", err))?;

    let suffix = unique_suffix();
    let archive = ScopedPath::file(
        servers_dir.join(format!("{DOWNLOAD_PREFIX}{suffix}-{}", request.asset_name)),
    );
    download_to_file(downloader, request.download_url, archive.path(), progress)?;

    if let Some(expected) = request.expected_sha256 {
        verify_archive_checksum(archive.path(), request.asset_name, expected)?;
    }

    let staging = ScopedPath::dir(servers_dir.join(format!("{STAGING_PREFIX}{suffix}")));
    fs::create_dir_all(staging.path()).map_err(|err| {
        io_permission_error(staging.path(), "failed to create staging directory", err)
    })?;
    extract_archive(archive.path(), staging.path(), archive_type)?;

    let staged_binary = staging.path().join(executable_file_name());
    if !staged_binary.is_file() {
        return Err(AcquireError::Extraction(format!(
            "archive {} does not contain {} at its root",
            request.asset_name,
            executable_file_name()
        )));
    }

    if promote_staging(staging.path(), &installation)? {
        info!(version = request.version, "concurrent install already produced the binary");
        mark_executable(&installation.binary)?;
        return Ok(InstallOutcome {
            installation,
            status: InstallStatus::AlreadyInstalled,
        });
    }

    mark_executable(&installation.binary)?;
    info!(
        version = request.version,
        path = %installation.binary.display(),
        "installed server binary"
    );
    Ok(InstallOutcome {
        installation,
        status: InstallStatus::Installed,
    })
}

fn download_to_file(
    downloader: &dyn ArtifactDownloader,
    url: &str,
    path: &Path,
    progress: &mut dyn FnMut(u64, Option<u64>),
) -> Result<(), AcquireError> {
    let file =
        File::create(path).map_err(|err| io_permission_error(path, "failed to create", err))?;
    let mut writer = BufWriter::new(file);
    downloader.download(url, &mut writer, progress)?;
    writer
        .flush()
        .map_err(|err| io_permission_error(path, "failed to write", err))
}

fn verify_archive_checksum(
    archive: &Path,
    asset_name: &str,
    expected: &str,
) -> Result<(), AcquireError> {
    let mismatch = verify_sha256_file(archive, expected)
        .map_err(|err| AcquireError::Download(format!("{err:#}")))?;
    match mismatch {
        None => Ok(()),
        Some(actual) => Err(AcquireError::ChecksumMismatch {
            asset: asset_name.to_string(),
            expected: expected.to_string(),
            actual,
        }),
    }
}

/// Moves the staged tree into place. Returns `true` when another install won
/// the race and the destination binary already exists.
fn promote_staging(staging: &Path, installation: &CachedInstallation) -> Result<bool, AcquireError> {
    if installation.directory.exists() {
        if installation.binary.is_file() {
            return Ok(true);
        }
        // Leftover from an interrupted install; nothing usable inside.
        fs::remove_dir_all(&installation.directory).map_err(|err| {
            io_permission_error(
                &installation.directory,
                "failed to remove incomplete version directory",
                err,
            )
        })?;
    }

    match fs::rename(staging, &installation.directory) {
        Ok(()) => Ok(false),
        Err(_) if installation.binary.is_file() => Ok(true),
        Err(err) => Err(io_permission_error(
            &installation.directory,
            "failed to move staged install into place",
            err,
        )),
    }
}

fn extract_archive(archive: &Path, dst: &Path, archive_type: ArchiveType) -> Result<(), AcquireError> {
    debug!(
        archive = %archive.display(),
        format = archive_type.as_str(),
        "extracting archive"
    );
    match archive_type {
        ArchiveType::TarGz => extract_tar_gz(archive, dst),
        ArchiveType::Zip => extract_zip(archive, dst),
    }
}

fn extract_tar_gz(archive: &Path, dst: &Path) -> Result<(), AcquireError> {
    let file = File::open(archive)
        .map_err(|err| AcquireError::Extraction(format!("failed to open {}: {err}", archive.display())))?;
    let mut tarball = tar::Archive::new(flate2::read::GzDecoder::new(file));
    tarball
        .unpack(dst)
        .map_err(|err| AcquireError::Extraction(format!("failed to unpack tar.gz: {err}")))
}

fn extract_zip(archive: &Path, dst: &Path) -> Result<(), AcquireError> {
    let file = File::open(archive)
        .map_err(|err| AcquireError::Extraction(format!("failed to open {}: {err}", archive.display())))?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|err| AcquireError::Extraction(format!("failed to read zip: {err}")))?;

    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|err| AcquireError::Extraction(format!("failed to read zip entry: {err}")))?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(AcquireError::Extraction(format!(
                "zip entry '{}' escapes the extraction directory",
                entry.name()
            )));
        };
        let out_path = dst.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)
                .map_err(|err| io_permission_error(&out_path, "failed to create", err))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| io_permission_error(parent, "failed to create", err))?;
        }
        let mut out_file = File::create(&out_path)
            .map_err(|err| io_permission_error(&out_path, "failed to create", err))?;
        io::copy(&mut entry, &mut out_file).map_err(|err| {
            AcquireError::Extraction(format!("failed to extract {}: {err}", entry.name()))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&out_path, fs::Permissions::from_mode(mode & 0o7777))
                    .map_err(|err| io_permission_error(&out_path, "failed to set mode on", err))?;
            }
        }
    }

    Ok(())
}

/// Sets `0o755` on Unix; other platforms have no executable bit.
pub fn mark_executable(path: &Path) -> Result<(), AcquireError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mut permissions = fs::metadata(path)
            .map_err(|err| io_permission_error(path, "failed to stat", err))?
            .permissions();
        permissions.set_mode(0o755);
        fs::set_permissions(path, permissions)
            .map_err(|err| io_permission_error(path, "failed to set executable mode on", err))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }

    Ok(())
}

fn io_permission_error(path: &Path, action: &str, err: io::Error) -> AcquireError {
    AcquireError::Permission(format!("{action} {}: {err}", path.display()))
}
