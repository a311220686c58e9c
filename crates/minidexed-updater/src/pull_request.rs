// SPDX-License-Identifier: GPL-3.0-or-later

//! Pull request builds, found in the "Build for testing" bot comment

use crate::bundle::CleanupScope;
use crate::config::UpdaterConfig;
use crate::downloader::{Fetch, download_to_file, fetch_text};
use crate::error::ResolutionError;
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;
use tracing::{info, warn};

static BUILD_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<p dir="auto">Build for testing:(.*?)Use at your own risk\."#)
        .expect("static regex")
});
static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<a href="([^"]+)">([^<]+)</a>"#).expect("static regex"));
static ARTIFACT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/artifacts/(\d+)").expect("static regex"));

const GITHUB_JSON: &str = "application/vnd.github.v3+json";
const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLink {
    pub url: String,
    pub name: String,
}

impl ArtifactLink {
    pub fn artifact_id(&self) -> Option<u64> {
        ARTIFACT_ID
            .captures(&self.url)
            .and_then(|c| c[1].parse().ok())
    }
}

/// `&amp;` goes last so an escaped entity decodes exactly once
fn decode_entities(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Links from the last "Build for testing" block on the page. Later comments
/// supersede earlier ones.
pub fn extract_artifact_links(html: &str) -> Result<Vec<ArtifactLink>, ResolutionError> {
    let last_block = BUILD_BLOCK
        .captures_iter(html)
        .last()
        .and_then(|c| c.get(1))
        .ok_or_else(|| {
            ResolutionError::FormatDrift("No build artifact links found in PR comment.".to_string())
        })?;

    let links: Vec<ArtifactLink> = LINK
        .captures_iter(last_block.as_str())
        .map(|c| ArtifactLink {
            url: decode_entities(&c[1]),
            name: decode_entities(c[2].trim()),
        })
        .collect();

    if links.is_empty() {
        return Err(ResolutionError::FormatDrift(
            "No artifact links found in PR comment block.".to_string(),
        ));
    }
    Ok(links)
}

pub fn pr_page_url(config: &UpdaterConfig, id: u64) -> String {
    format!("{}/{}/pull/{id}", config.web_base_url, config.repo)
}

pub async fn fetch_artifact_links(
    client: &reqwest::Client,
    config: &UpdaterConfig,
    id: u64,
) -> Result<Vec<ArtifactLink>, ResolutionError> {
    let url = pr_page_url(config, id);
    info!("Fetching PR page: {url}");
    let html = fetch_text(client, Fetch::new(&url)).await?;
    extract_artifact_links(&html)
}

/// Download every linked artifact into the scope. Individual failures are
/// logged; it is only an error if nothing could be downloaded.
pub async fn download_artifacts(
    client: &reqwest::Client,
    config: &UpdaterConfig,
    links: &[ArtifactLink],
    scope: &CleanupScope,
) -> Result<Vec<PathBuf>, ResolutionError> {
    let token = config.github_token.as_deref();
    let mut paths = Vec::new();

    for (idx, link) in links.iter().enumerate() {
        info!("Downloading artifact: {} from {}", link.name, link.url);
        let mut dest = scope.archive_path(&format!("{}.zip", link.name));
        if dest.exists() {
            dest = scope.archive_path(&format!("{}-{idx}.zip", link.name));
        }

        if let (Some(token), Some(artifact_id)) = (token, link.artifact_id()) {
            let api_url = format!(
                "{}/repos/{}/actions/artifacts/{artifact_id}/zip",
                config.api_base_url, config.repo
            );
            let fetch = Fetch::new(&api_url).bearer(Some(token)).accept(GITHUB_JSON);
            match download_to_file(client, fetch, &dest).await {
                Ok(file) => {
                    paths.push(file.path);
                    continue;
                }
                Err(e) => warn!(
                    "Failed to download artifact {} via GitHub API: {e}; trying direct link",
                    link.name
                ),
            }
        }

        let fetch = Fetch::new(&link.url).bearer(token).accept(OCTET_STREAM);
        match download_to_file(client, fetch, &dest).await {
            Ok(file) => paths.push(file.path),
            Err(e) => {
                warn!("Failed to download artifact {}: {e}", link.name);
                if token.is_none() {
                    warn!(
                        "You may need to provide a GitHub personal access token using --github-token or the GITHUB_TOKEN environment variable."
                    );
                }
            }
        }
    }

    if paths.is_empty() {
        return Err(ResolutionError::NoArtifact("No artifacts downloaded.".to_string()));
    }
    Ok(paths)
}
