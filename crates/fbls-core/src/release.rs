use crate::error::AcquireError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseAsset {
    pub name: String,
    pub download_url: String,
}

/// A published release as reported by the release index.
///
/// Never cached beyond the operation that fetched it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub version: String,
    pub assets: Vec<ReleaseAsset>,
}

impl Release {
    pub fn find_asset(&self, name: &str) -> Option<&ReleaseAsset> {
        self.assets.iter().find(|asset| asset.name == name)
    }

    pub fn require_asset(&self, name: &str) -> Result<&ReleaseAsset, AcquireError> {
        self.find_asset(name)
            .ok_or_else(|| AcquireError::AssetNotFound {
                version: self.version.clone(),
                asset: name.to_string(),
            })
    }

    pub fn checksum_asset_for(&self, name: &str) -> Option<&ReleaseAsset> {
        self.find_asset(&format!("{name}.sha256"))
    }
}
