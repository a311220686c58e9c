// SPDX-License-Identifier: GPL-3.0-or-later

//! GitHub API release lookup

use crate::config::UpdaterConfig;
use crate::downloader::{Fetch, fetch_text};
use crate::error::ResolutionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const GITHUB_JSON: &str = "application/vnd.github.v3+json";
const ASSET_PREFIX: &str = "MiniDexed";
const ASSET_SUFFIX: &str = ".zip";

/// Which published release to take
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseKind {
    Latest,
    Continuous,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
    /// e.g. "sha256:..."; only present on newer releases
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    /// Bytes; zero when the listing leaves it out
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Deserialize, Serialize)]
struct GithubRelease {
    tag_name: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
}

impl GithubRelease {
    fn is_continuous(&self) -> bool {
        let label = format!("{}{}", self.tag_name, self.name.as_deref().unwrap_or_default());
        label.to_lowercase().contains("continuous")
    }
}

fn parse<T: serde::de::DeserializeOwned>(body: &str, url: &str) -> Result<T, ResolutionError> {
    serde_json::from_str(body).map_err(|e| {
        ResolutionError::FormatDrift(format!("Unexpected release listing from {url}: {e}"))
    })
}

/// `MiniDexed*.zip`, first match wins
pub fn select_firmware_asset(assets: &[ReleaseAsset]) -> Option<&ReleaseAsset> {
    assets
        .iter()
        .find(|a| a.name.starts_with(ASSET_PREFIX) && a.name.ends_with(ASSET_SUFFIX))
}

pub async fn find_release_asset(
    client: &reqwest::Client,
    config: &UpdaterConfig,
    kind: ReleaseKind,
) -> Result<ReleaseAsset, ResolutionError> {
    let token = config.github_token.as_deref();
    let release = match kind {
        ReleaseKind::Latest => {
            let url = format!("{}/repos/{}/releases/latest", config.api_base_url, config.repo);
            let body = fetch_text(client, Fetch::new(&url).accept(GITHUB_JSON).bearer(token)).await?;
            parse::<GithubRelease>(&body, &url)?
        }
        ReleaseKind::Continuous => {
            let url = format!("{}/repos/{}/releases", config.api_base_url, config.repo);
            let body = fetch_text(client, Fetch::new(&url).accept(GITHUB_JSON).bearer(token)).await?;
            parse::<Vec<GithubRelease>>(&body, &url)?
                .into_iter()
                .find(GithubRelease::is_continuous)
                .ok_or_else(|| {
                    ResolutionError::NoRelease("No continuous release found.".to_string())
                })?
        }
    };

    tracing::info!(
        "Release {} published {}",
        release.tag_name,
        release
            .published_at
            .map_or_else(|| "at an unknown time".to_string(), |t| t.to_rfc3339())
    );

    select_firmware_asset(&release.assets)
        .cloned()
        .ok_or_else(|| {
            ResolutionError::NoMatchingAsset(format!(
                "No {ASSET_PREFIX}*{ASSET_SUFFIX} asset found in release {}",
                release.tag_name
            ))
        })
}
