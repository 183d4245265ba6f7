mod download;
mod index;

pub use download::{ArtifactDownloader, HttpDownloader, DOWNLOAD_CONNECT_TIMEOUT};
pub use index::{
    parse_release_json, GithubReleaseIndex, ReleaseSource, UnconfiguredReleaseIndex,
    RELEASE_REQUEST_TIMEOUT,
};

pub(crate) const USER_AGENT: &str = concat!("fbls/", env!("CARGO_PKG_VERSION"));
