use std::time::Duration;

use fbls_core::{AcquireError, Release, ReleaseAsset};
use reqwest::blocking::Client;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use tracing::debug;

use crate::USER_AGENT;

pub const RELEASE_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Source of the latest published release.
///
/// Implementations make a single attempt per call; retry policy belongs to
/// the caller.
pub trait ReleaseSource: Send + Sync {
    fn latest_release(&self) -> Result<Release, AcquireError>;
}

/// Used when no release endpoint is configured. Every lookup fails with a
/// configuration error naming the settings to fill in.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredReleaseIndex;

impl ReleaseSource for UnconfiguredReleaseIndex {
    fn latest_release(&self) -> Result<Release, AcquireError> {
        Err(AcquireError::Configuration(
            "no release index configured; set release_url in config.toml or FBLS_RELEASE_URL"
                .to_string(),
        ))
    }
}

#[derive(Debug, Clone)]
pub struct GithubReleaseIndex {
    url: String,
    token: Option<String>,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct ReleasePayload {
    tag_name: String,
    assets: Vec<AssetPayload>,
}

#[derive(Debug, Deserialize)]
struct AssetPayload {
    name: String,
    browser_download_url: String,
}

impl GithubReleaseIndex {
    pub fn new(url: impl Into<String>) -> Result<Self, AcquireError> {
        let client = Client::builder()
            .timeout(RELEASE_REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| AcquireError::Network(format!("failed building HTTP client: {err}")))?;
        Ok(Self {
            url: url.into(),
            token: None,
            client,
        })
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|value| !value.trim().is_empty());
        self
    }
}

impl ReleaseSource for GithubReleaseIndex {
    fn latest_release(&self) -> Result<Release, AcquireError> {
        debug!(url = %self.url, "querying latest release");
        let mut request = self
            .client
            .get(&self.url)
            .header(ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .map_err(|err| AcquireError::Network(format!("request to {} failed: {err}", self.url)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(AcquireError::Network(format!(
                "{} returned HTTP {status}",
                self.url
            )));
        }

        let body = response.text().map_err(|err| {
            AcquireError::Network(format!("failed reading response from {}: {err}", self.url))
        })?;
        let release = parse_release_json(&body)?;
        debug!(
            version = %release.version,
            assets = release.assets.len(),
            "resolved latest release"
        );
        Ok(release)
    }
}

pub fn parse_release_json(body: &str) -> Result<Release, AcquireError> {
    let payload: ReleasePayload = serde_json::from_str(body)
        .map_err(|err| AcquireError::MalformedResponse(err.to_string()))?;

    let version = payload.tag_name.trim();
    if version.is_empty() {
        return Err(AcquireError::MalformedResponse(
            "release tag_name is empty".to_string(),
        ));
    }

    Ok(Release {
        version: version.to_string(),
        assets: payload
            .assets
            .into_iter()
            .map(|asset| ReleaseAsset {
                name: asset.name,
                download_url: asset.browser_download_url,
            })
            .collect(),
    })
}
