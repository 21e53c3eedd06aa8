//! Patch-server build discovery.
//!
//! Before anything can be fetched from a CDN, the patch service says
//! which build is current (`versions`) and where its content lives
//! (`cdns`). Both documents are pipe-separated manifests served over
//! plain HTTP on port 1119.

use std::fmt;
use std::str::FromStr;

use tracing::debug;

use cascade_tact::manifest::{self, CdnEntry, VersionEntry};

use crate::client::CdnClient;
use crate::{Error, Result};

/// Patch-service regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Region {
    #[default]
    Us,
    Eu,
    Kr,
    Cn,
    Tw,
    Sg,
}

impl Region {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Us => "us",
            Self::Eu => "eu",
            Self::Kr => "kr",
            Self::Cn => "cn",
            Self::Tw => "tw",
            Self::Sg => "sg",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "us" => Ok(Self::Us),
            "eu" => Ok(Self::Eu),
            "kr" => Ok(Self::Kr),
            "cn" => Ok(Self::Cn),
            "tw" => Ok(Self::Tw),
            "sg" => Ok(Self::Sg),
            other => Err(Error::RegionMissing {
                region: other.to_string(),
            }),
        }
    }
}

/// Products the patch service currently publishes for this game family.
pub const KNOWN_PRODUCTS: &[&str] = &[
    "wow",
    "wowt",
    "wowxptr",
    "wow_beta",
    "wow_classic",
    "wow_classic_era",
    "wow_classic_era_ptr",
    "wow_classic_ptr",
];

/// Client for the version/CDN discovery endpoints.
pub struct PatchServer {
    client: CdnClient,
    base: String,
}

impl PatchServer {
    /// Point at the public patch host for `region`.
    pub fn new(client: CdnClient, region: Region) -> Self {
        let base = format!("http://{region}.patch.battle.net:1119");
        Self { client, base }
    }

    /// Point at an explicit base URL. Tests use this to aim at a local
    /// server; it also covers community mirrors.
    pub fn with_base(client: CdnClient, base: impl Into<String>) -> Self {
        Self {
            client,
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    /// All rows of the `versions` manifest for a product.
    pub async fn versions(&self, product: &str) -> Result<Vec<VersionEntry>> {
        let text = self.fetch_text(product, "versions").await?;
        Ok(manifest::parse_versions(&text)?)
    }

    /// The `versions` row for one region.
    pub async fn version_for(&self, product: &str, region: Region) -> Result<VersionEntry> {
        self.versions(product)
            .await?
            .into_iter()
            .find(|entry| entry.region.eq_ignore_ascii_case(region.as_str()))
            .ok_or(Error::RegionMissing {
                region: region.to_string(),
            })
    }

    /// All rows of the `cdns` manifest for a product.
    pub async fn cdns(&self, product: &str) -> Result<Vec<CdnEntry>> {
        let text = self.fetch_text(product, "cdns").await?;
        Ok(manifest::parse_cdns(&text)?)
    }

    /// The `cdns` row for one region, falling back to the first row when
    /// the region has no dedicated entry.
    pub async fn cdn_for(&self, product: &str, region: Region) -> Result<CdnEntry> {
        let mut entries = self.cdns(product).await?;
        let at = entries
            .iter()
            .position(|entry| entry.name.eq_ignore_ascii_case(region.as_str()))
            .unwrap_or(0);
        if entries.is_empty() {
            return Err(Error::RegionMissing {
                region: region.to_string(),
            });
        }
        Ok(entries.swap_remove(at))
    }

    async fn fetch_text(&self, product: &str, endpoint: &str) -> Result<String> {
        let url = format!("{}/{}/{}", self.base, product, endpoint);
        debug!("Fetching {}", url);
        let bytes = self.client.get(&url, None).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regions_round_trip() {
        for region in [Region::Us, Region::Eu, Region::Kr, Region::Cn, Region::Tw, Region::Sg] {
            assert_eq!(region.as_str().parse::<Region>().unwrap(), region);
        }
        assert!("mars".parse::<Region>().is_err());
        assert_eq!(Region::default(), Region::Us);
    }

    #[test]
    fn known_products_are_lowercase() {
        assert!(KNOWN_PRODUCTS.contains(&"wow"));
        assert!(
            KNOWN_PRODUCTS
                .iter()
                .all(|p| p.chars().all(|c| c.is_ascii_lowercase() || c == '_'))
        );
    }
}
