mod archive;
mod error;
mod platform;
mod release;

pub use archive::ArchiveType;
pub use error::AcquireError;
pub use platform::{select_asset_name, Arch, OsFamily, TargetPlatform};
pub use release::{Release, ReleaseAsset};

/// Name of the language-server executable shipped in every release archive.
pub const SERVER_BINARY_NAME: &str = "flatbuffers-language-server";

/// Prefix of every installed version directory under the storage root.
pub const VERSION_DIR_PREFIX: &str = "flatbuffers-language-server-";

pub fn version_dir_name(version: &str) -> String {
    format!("{VERSION_DIR_PREFIX}{version}")
}

/// Inverse of [`version_dir_name`]; `None` for names outside the convention.
pub fn version_from_dir_name(name: &str) -> Option<&str> {
    name.strip_prefix(VERSION_DIR_PREFIX)
        .filter(|version| !version.is_empty())
}
