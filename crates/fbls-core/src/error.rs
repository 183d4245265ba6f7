use thiserror::Error;

/// Failure taxonomy shared by every stage of binary acquisition.
///
/// Each message carries the underlying cause so foreground callers can show
/// it to the user unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcquireError {
    #[error("network error: {0}")]
    Network(String),
    #[error("malformed release response: {0}")]
    MalformedResponse(String),
    #[error("unsupported platform: {os}/{arch}")]
    UnsupportedPlatform { os: String, arch: String },
    #[error("release {version} has no asset named '{asset}'")]
    AssetNotFound { version: String, asset: String },
    #[error("download failed: {0}")]
    Download(String),
    #[error("failed to extract archive: {0}")]
    Extraction(String),
    #[error("checksum mismatch for {asset}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        asset: String,
        expected: String,
        actual: String,
    },
    #[error("permission error: {0}")]
    Permission(String),
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl AcquireError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::MalformedResponse(_) => "malformed-response",
            Self::UnsupportedPlatform { .. } => "unsupported-platform",
            Self::AssetNotFound { .. } => "asset-not-found",
            Self::Download(_) => "download",
            Self::Extraction(_) => "extraction",
            Self::ChecksumMismatch { .. } => "checksum-mismatch",
            Self::Permission(_) => "permission",
            Self::Configuration(_) => "configuration",
        }
    }
}
