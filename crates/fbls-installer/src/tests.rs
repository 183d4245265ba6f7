use super::*;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use fbls_core::{version_dir_name, AcquireError};
use fbls_release::ArtifactDownloader;
use fbls_security::sha256_hex;

struct StaticDownloader {
    payload: Vec<u8>,
    fail_after: Option<usize>,
    calls: AtomicUsize,
}

impl StaticDownloader {
    fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            fail_after: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn failing_after(payload: Vec<u8>, bytes: usize) -> Self {
        Self {
            payload,
            fail_after: Some(bytes),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ArtifactDownloader for StaticDownloader {
    fn download(
        &self,
        _url: &str,
        sink: &mut dyn Write,
        progress: &mut dyn FnMut(u64, Option<u64>),
    ) -> Result<u64, AcquireError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.fail_after {
            sink.write_all(&self.payload[..limit.min(self.payload.len())])
                .expect("partial write must succeed");
            return Err(AcquireError::Download("connection reset".to_string()));
        }
        sink.write_all(&self.payload).expect("write must succeed");
        progress(self.payload.len() as u64, Some(self.payload.len() as u64));
        Ok(self.payload.len() as u64)
    }
}

fn test_layout() -> StorageLayout {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
    StorageLayout::new(std::env::temp_dir().join(format!("fbls-installer-test-{nanos}-{counter}")))
}

static TEST_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn tar_gz_with(entries: &[(&str, &[u8], u32)]) -> Vec<u8> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, content, mode) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(*mode);
        header.set_cksum();
        builder
            .append_data(&mut header, name, *content)
            .expect("must append tar entry");
    }
    builder
        .into_inner()
        .expect("must finish tar")
        .finish()
        .expect("must finish gzip")
}

fn server_tar_gz(content: &[u8]) -> Vec<u8> {
    tar_gz_with(&[
        (executable_file_name().as_str(), content, 0o644),
        ("LICENSE", &b"MIT"[..], 0o644),
    ])
}

fn server_zip(content: &[u8]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .unix_permissions(0o644);
    writer
        .start_file(executable_file_name(), options)
        .expect("must start zip entry");
    writer.write_all(content).expect("must write zip entry");
    writer
        .finish()
        .expect("must finish zip")
        .into_inner()
}

fn request<'a>(version: &'a str, asset_name: &'a str) -> InstallRequest<'a> {
    InstallRequest {
        version,
        asset_name,
        download_url: "https://example.test/artifact",
        expected_sha256: None,
    }
}

fn entry_names(dir: &Path) -> Vec<String> {
    let mut names = fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|entry| entry.file_name().to_string_lossy().to_string())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    names.sort();
    names
}

fn cleanup(layout: &StorageLayout) {
    let _ = fs::remove_dir_all(layout.prefix());
}

const LINUX_ASSET: &str = "flatbuffers-language-server-v1.2.0-x86_64-unknown-linux-gnu.tar.gz";
const WINDOWS_ASSET: &str = "flatbuffers-language-server-v1.2.0-x86_64-pc-windows-msvc.zip";

#[test]
fn ensure_installed_extracts_tar_gz_into_version_dir() {
    let layout = test_layout();
    let downloader = StaticDownloader::new(server_tar_gz(b"#!/bin/sh\necho server\n"));
    let mut progress_events = 0;

    let outcome = ensure_installed(
        &layout,
        &downloader,
        &request("v1.2.0", LINUX_ASSET),
        &mut |_, _| progress_events += 1,
    )
    .expect("install must succeed");

    assert_eq!(outcome.status, InstallStatus::Installed);
    assert_eq!(outcome.installation.version, "v1.2.0");
    assert_eq!(outcome.installation.directory, layout.version_dir("v1.2.0"));
    assert_eq!(outcome.installation.binary, layout.binary_path("v1.2.0"));
    assert_eq!(
        fs::read(&outcome.installation.binary).expect("binary must exist"),
        b"#!/bin/sh\necho server\n"
    );
    assert!(outcome.installation.directory.join("LICENSE").is_file());
    assert_eq!(progress_events, 1);
    assert_eq!(
        entry_names(&layout.servers_dir()),
        vec![version_dir_name("v1.2.0")],
        "temporary archive and staging directory must be gone"
    );

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(&outcome.installation.binary)
            .expect("must stat binary")
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    cleanup(&layout);
}

#[test]
fn ensure_installed_skips_network_when_binary_exists() {
    let layout = test_layout();
    let binary = layout.binary_path("v1.2.0");
    fs::create_dir_all(binary.parent().expect("binary has parent")).expect("must create dir");
    fs::write(&binary, b"existing-binary").expect("must write binary");
    let downloader = StaticDownloader::new(server_tar_gz(b"new-binary"));

    let outcome = ensure_installed(
        &layout,
        &downloader,
        &request("v1.2.0", LINUX_ASSET),
        &mut |_, _| {},
    )
    .expect("repeat install must succeed");

    assert_eq!(outcome.status, InstallStatus::AlreadyInstalled);
    assert_eq!(downloader.calls(), 0, "no network work for an installed version");
    assert_eq!(fs::read(&binary).expect("must read binary"), b"existing-binary");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(&binary)
            .expect("must stat binary")
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755, "executable bit must be re-asserted");
    }

    cleanup(&layout);
}

#[test]
fn ensure_installed_is_idempotent_across_calls() {
    let layout = test_layout();
    let downloader = StaticDownloader::new(server_tar_gz(b"server-v1"));

    ensure_installed(&layout, &downloader, &request("v1.2.0", LINUX_ASSET), &mut |_, _| {})
        .expect("first install must succeed");
    let second = ensure_installed(
        &layout,
        &downloader,
        &request("v1.2.0", LINUX_ASSET),
        &mut |_, _| {},
    )
    .expect("second install must succeed");

    assert_eq!(downloader.calls(), 1);
    assert_eq!(second.status, InstallStatus::AlreadyInstalled);
    assert_eq!(
        fs::read(&second.installation.binary).expect("must read binary"),
        b"server-v1"
    );

    cleanup(&layout);
}

#[test]
fn interrupted_download_leaves_no_temporary_archive() {
    let layout = test_layout();
    let downloader = StaticDownloader::failing_after(server_tar_gz(b"server"), 10);

    let err = ensure_installed(
        &layout,
        &downloader,
        &request("v1.2.0", LINUX_ASSET),
        &mut |_, _| {},
    )
    .expect_err("interrupted download must fail");

    assert!(matches!(err, AcquireError::Download(_)), "unexpected error: {err}");
    assert!(entry_names(&layout.servers_dir()).is_empty());

    cleanup(&layout);
}

#[test]
fn corrupt_archive_fails_extraction_and_cleans_up() {
    let layout = test_layout();
    let downloader = StaticDownloader::new(b"definitely not gzip".to_vec());

    let err = ensure_installed(
        &layout,
        &downloader,
        &request("v1.2.0", LINUX_ASSET),
        &mut |_, _| {},
    )
    .expect_err("corrupt archive must fail");

    assert!(matches!(err, AcquireError::Extraction(_)), "unexpected error: {err}");
    assert!(entry_names(&layout.servers_dir()).is_empty());
    assert!(!layout.binary_path("v1.2.0").exists());

    cleanup(&layout);
}

#[test]
fn archive_without_binary_at_root_is_rejected() {
    let layout = test_layout();
    let payload = tar_gz_with(&[("nested/flatbuffers-language-server", &b"server"[..], 0o755)]);
    let downloader = StaticDownloader::new(payload);

    let err = ensure_installed(
        &layout,
        &downloader,
        &request("v1.2.0", LINUX_ASSET),
        &mut |_, _| {},
    )
    .expect_err("unexpected layout must fail");

    assert!(matches!(err, AcquireError::Extraction(_)), "unexpected error: {err}");
    assert!(entry_names(&layout.servers_dir()).is_empty());

    cleanup(&layout);
}

#[test]
fn ensure_installed_extracts_zip_assets() {
    let layout = test_layout();
    let downloader = StaticDownloader::new(server_zip(b"zip-server"));

    let outcome = ensure_installed(
        &layout,
        &downloader,
        &request("v1.2.0", WINDOWS_ASSET),
        &mut |_, _| {},
    )
    .expect("zip install must succeed");

    assert_eq!(outcome.status, InstallStatus::Installed);
    assert_eq!(
        fs::read(&outcome.installation.binary).expect("must read binary"),
        b"zip-server"
    );

    cleanup(&layout);
}

#[test]
fn ensure_installed_verifies_checksum_when_provided() {
    let layout = test_layout();
    let payload = server_tar_gz(b"verified");
    let digest = sha256_hex(&payload);
    let downloader = StaticDownloader::new(payload);
    let mut verified = request("v1.2.0", LINUX_ASSET);
    verified.expected_sha256 = Some(&digest);

    let outcome = ensure_installed(&layout, &downloader, &verified, &mut |_, _| {})
        .expect("matching checksum must install");

    assert_eq!(outcome.status, InstallStatus::Installed);
    cleanup(&layout);
}

#[test]
fn checksum_mismatch_aborts_before_extraction() {
    let layout = test_layout();
    let downloader = StaticDownloader::new(server_tar_gz(b"tampered"));
    let wrong = "0".repeat(64);
    let mut tampered = request("v1.2.0", LINUX_ASSET);
    tampered.expected_sha256 = Some(&wrong);

    let err = ensure_installed(&layout, &downloader, &tampered, &mut |_, _| {})
        .expect_err("mismatched checksum must fail");

    assert!(
        matches!(err, AcquireError::ChecksumMismatch { .. }),
        "unexpected error: {err}"
    );
    assert!(entry_names(&layout.servers_dir()).is_empty());
    cleanup(&layout);
}

#[test]
fn incomplete_version_dir_is_replaced() {
    let layout = test_layout();
    let stale_dir = layout.version_dir("v1.2.0");
    fs::create_dir_all(&stale_dir).expect("must create stale dir");
    fs::write(stale_dir.join("partial"), b"junk").expect("must write junk");
    let downloader = StaticDownloader::new(server_tar_gz(b"fresh"));

    let outcome = ensure_installed(
        &layout,
        &downloader,
        &request("v1.2.0", LINUX_ASSET),
        &mut |_, _| {},
    )
    .expect("install must replace incomplete dir");

    assert_eq!(outcome.status, InstallStatus::Installed);
    assert!(!stale_dir.join("partial").exists());
    cleanup(&layout);
}

#[test]
fn unknown_asset_format_is_an_extraction_error() {
    let layout = test_layout();
    let downloader = StaticDownloader::new(b"payload".to_vec());

    let err = ensure_installed(
        &layout,
        &downloader,
        &request("v1.2.0", "flatbuffers-language-server-v1.2.0.tar.zst"),
        &mut |_, _| {},
    )
    .expect_err("unknown format must fail");

    assert!(matches!(err, AcquireError::Extraction(_)));
    assert_eq!(downloader.calls(), 0);
    cleanup(&layout);
}

#[test]
fn reaper_keeps_only_the_designated_version() {
    let layout = test_layout();
    let servers = layout.servers_dir();
    for version in ["v1.0.0", "v1.1.0", "v1.2.0", "v1.3.0"] {
        fs::create_dir_all(layout.version_dir(version)).expect("must create version dir");
        fs::write(layout.binary_path(version), version).expect("must write binary");
    }
    fs::create_dir_all(servers.join("unrelated")).expect("must create unrelated dir");
    fs::write(servers.join(version_dir_name("v0.9.0")), b"file, not dir")
        .expect("must write file");

    let report = reap_old_versions(&servers, &version_dir_name("v1.3.0"));

    assert_eq!(report.removed.len(), 3);
    assert!(report.failed.is_empty());
    assert_eq!(
        entry_names(&servers),
        vec![
            version_dir_name("v0.9.0"),
            version_dir_name("v1.3.0"),
            "unrelated".to_string(),
        ]
    );
    assert_eq!(list_installed_versions(&servers), vec!["v1.3.0".to_string()]);

    cleanup(&layout);
}

#[test]
fn reaper_tolerates_missing_storage_root() {
    let layout = test_layout();
    let report = reap_old_versions(&layout.servers_dir(), &version_dir_name("v1.0.0"));
    assert_eq!(report, ReapReport::default());
}

#[cfg(target_os = "linux")]
#[test]
fn reaper_sweeps_leftovers_of_exited_installs() {
    let layout = test_layout();
    let servers = layout.servers_dir();
    fs::create_dir_all(layout.version_dir("v1.2.0")).expect("must create version dir");
    // u32::MAX is above any kernel pid limit, so the owner is never running.
    let dead_staging = servers.join(".staging-4294967295-1");
    fs::create_dir_all(&dead_staging).expect("must create staging dir");
    fs::write(dead_staging.join(executable_file_name()), b"partial").expect("must write");
    fs::write(servers.join(".download-4294967295-1-x.tar.gz"), b"partial")
        .expect("must write archive");
    let live_staging = format!(".staging-{}-1", std::process::id());
    fs::create_dir_all(servers.join(&live_staging)).expect("must create live staging dir");

    let report = reap_old_versions(&servers, &version_dir_name("v1.2.0"));

    assert_eq!(report.removed.len(), 2, "removed: {:?}", report.removed);
    assert!(report.failed.is_empty());
    assert_eq!(
        entry_names(&servers),
        vec![live_staging, version_dir_name("v1.2.0")]
    );

    cleanup(&layout);
}

#[test]
fn reaper_sweeps_transients_untouched_past_stale_age() {
    let layout = test_layout();
    let servers = layout.servers_dir();
    fs::create_dir_all(&servers).expect("must create storage root");
    let pid = std::process::id();
    let old_archive = servers.join(format!(".download-{pid}-1-x.tar.gz"));
    let fresh_archive = servers.join(format!(".download-{pid}-2-x.tar.gz"));
    fs::write(&old_archive, b"partial").expect("must write archive");
    fs::write(&fresh_archive, b"partial").expect("must write archive");
    let long_ago =
        std::time::SystemTime::now() - STALE_TRANSIENT_AGE - std::time::Duration::from_secs(60);
    fs::File::options()
        .write(true)
        .open(&old_archive)
        .expect("must open archive")
        .set_modified(long_ago)
        .expect("must backdate archive");

    let report = reap_old_versions(&servers, &version_dir_name("v1.2.0"));

    assert_eq!(report.removed, vec![old_archive]);
    assert_eq!(
        entry_names(&servers),
        vec![format!(".download-{pid}-2-x.tar.gz")]
    );

    cleanup(&layout);
}

#[cfg(unix)]
fn make_read_only(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o555)).expect("must restrict dir");
}

#[cfg(unix)]
fn make_writable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).expect("must restore dir");
}

/// Root ignores directory permissions, so restricted-dir tests cannot fail
/// a write there.
#[cfg(unix)]
fn writes_are_blocked_in(dir: &Path) -> bool {
    let check = dir.join(".write-check");
    match fs::write(&check, b"x") {
        Ok(()) => {
            let _ = fs::remove_file(&check);
            false
        }
        Err(_) => true,
    }
}

#[cfg(unix)]
#[test]
fn reaper_logs_failed_deletion_and_keeps_going() {
    let layout = test_layout();
    let servers = layout.servers_dir();
    for version in ["v1.0.0", "v1.1.0", "v1.2.0"] {
        fs::create_dir_all(layout.version_dir(version)).expect("must create version dir");
        fs::write(layout.binary_path(version), version).expect("must write binary");
    }
    let locked = layout.version_dir("v1.0.0").join("locked");
    fs::create_dir_all(&locked).expect("must create locked dir");
    fs::write(locked.join("held.log"), b"in use").expect("must write held file");
    make_read_only(&locked);
    if !writes_are_blocked_in(&locked) {
        make_writable(&locked);
        cleanup(&layout);
        return;
    }

    let report = reap_old_versions(&servers, &version_dir_name("v1.2.0"));

    make_writable(&locked);
    assert_eq!(report.removed, vec![layout.version_dir("v1.1.0")]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, layout.version_dir("v1.0.0"));
    assert!(!layout.version_dir("v1.1.0").exists());
    assert!(layout.binary_path("v1.2.0").is_file());

    cleanup(&layout);
}

#[cfg(unix)]
#[test]
fn unwritable_storage_root_is_a_permission_error() {
    let layout = test_layout();
    let servers = layout.servers_dir();
    fs::create_dir_all(&servers).expect("must create storage root");
    make_read_only(&servers);
    if !writes_are_blocked_in(&servers) {
        make_writable(&servers);
        cleanup(&layout);
        return;
    }
    let downloader = StaticDownloader::new(server_tar_gz(b"server"));

    let result = ensure_installed(
        &layout,
        &downloader,
        &request("v1.2.0", LINUX_ASSET),
        &mut |_, _| {},
    );

    make_writable(&servers);
    let err = result.expect_err("read-only storage root must fail");
    assert!(matches!(err, AcquireError::Permission(_)), "unexpected error: {err}");
    assert_eq!(downloader.calls(), 0);
    assert!(entry_names(&servers).is_empty());

    cleanup(&layout);
}

#[test]
fn preferences_default_when_file_missing() {
    let layout = test_layout();
    let store = PreferenceStore::new(layout.preferences_path());

    assert_eq!(store.snapshot().expect("must load"), Preferences::default());
    assert_eq!(store.cached_version().expect("must load"), None);
    assert_eq!(store.skipped_version().expect("must load"), None);
    assert!(!store.is_auto_download_enabled().expect("must load"));
}

#[test]
fn preferences_persist_across_store_instances() {
    let layout = test_layout();
    let store = PreferenceStore::new(layout.preferences_path());
    store.set_cached_version("v1.2.0").expect("must write cached");
    store.set_skipped_version("v1.3.0").expect("must write skipped");
    store.set_auto_download_enabled(true).expect("must write auto");

    let reopened = PreferenceStore::new(layout.preferences_path());
    assert_eq!(
        reopened.snapshot().expect("must load"),
        Preferences {
            latest_known_version: Some("v1.2.0".to_string()),
            latest_skipped_version: Some("v1.3.0".to_string()),
            auto_download: true,
        }
    );
    assert_eq!(
        entry_names(&layout.state_dir()),
        vec!["preferences.toml".to_string()],
        "atomic writes must not leave temp files behind"
    );

    cleanup(&layout);
}

#[test]
fn skipped_version_is_superseded_not_deleted() {
    let layout = test_layout();
    let store = PreferenceStore::new(layout.preferences_path());
    store.set_skipped_version("v1.3.0").expect("must write skipped");
    store.set_skipped_version("v1.4.0").expect("must overwrite skipped");

    assert_eq!(
        store.skipped_version().expect("must load").as_deref(),
        Some("v1.4.0")
    );
    cleanup(&layout);
}

#[test]
fn preferences_reject_unknown_file_version() {
    let layout = test_layout();
    fs::create_dir_all(layout.state_dir()).expect("must create state dir");
    fs::write(layout.preferences_path(), "version = 7\nauto_download = true\n")
        .expect("must write preferences");
    let store = PreferenceStore::new(layout.preferences_path());

    let err = store.snapshot().expect_err("unknown version must fail");
    assert!(
        format!("{err:#}").contains("unsupported preferences version 7"),
        "unexpected error: {err:#}"
    );
    cleanup(&layout);
}

#[test]
fn preferences_file_uses_documented_keys() {
    let layout = test_layout();
    let store = PreferenceStore::new(layout.preferences_path());
    store.set_cached_version("v1.2.0").expect("must write cached");
    store.set_auto_download_enabled(true).expect("must write auto");

    let raw = fs::read_to_string(layout.preferences_path()).expect("must read file");
    assert!(raw.contains("version = 1"), "unexpected file: {raw}");
    assert!(raw.contains("latest_known_version = \"v1.2.0\""), "unexpected file: {raw}");
    assert!(raw.contains("auto_download = true"), "unexpected file: {raw}");
    assert!(!raw.contains("latest_skipped_version"), "unexpected file: {raw}");
    cleanup(&layout);
}

#[test]
fn scoped_path_removes_file_and_dir_on_drop() {
    let layout = test_layout();
    fs::create_dir_all(layout.prefix()).expect("must create prefix");
    let file: PathBuf = layout.prefix().join("scoped.tmp");
    let dir: PathBuf = layout.prefix().join("scoped-dir");
    fs::write(&file, b"tmp").expect("must write file");
    fs::create_dir_all(dir.join("nested")).expect("must create dir");

    {
        let _file_guard = ScopedPath::file(&file);
        let _dir_guard = ScopedPath::dir(&dir);
    }

    assert!(!file.exists());
    assert!(!dir.exists());
    {
        let _missing = ScopedPath::file(layout.prefix().join("never-created"));
    }
    cleanup(&layout);
}
