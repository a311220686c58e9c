// SPDX-License-Identifier: GPL-3.0-or-later

//! Streaming downloads to local files with SHA256 digests

use crate::error::ResolutionError;
use crate::progress::download_bar;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

pub const USER_AGENT: &str = concat!("minidexed-updater/", env!("CARGO_PKG_VERSION"));

/// Below this many remaining GitHub API calls a warning is logged
const RATE_LIMIT_FLOOR: u32 = 10;

/// Value of `x-ratelimit-remaining`, if present and numeric
fn rate_limit_remaining(headers: &HeaderMap) -> Option<u32> {
    headers
        .get("x-ratelimit-remaining")?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

pub fn http_client() -> Result<reqwest::Client, ResolutionError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| ResolutionError::Request {
            url: String::new(),
            message: format!("Failed to build HTTP client: {e}"),
        })
}

/// One GET to perform
#[derive(Debug, Clone, Copy)]
pub struct Fetch<'a> {
    pub url: &'a str,
    pub bearer: Option<&'a str>,
    pub accept: Option<&'static str>,
}

impl<'a> Fetch<'a> {
    pub fn new(url: &'a str) -> Self {
        Self {
            url,
            bearer: None,
            accept: None,
        }
    }

    pub fn bearer(mut self, token: Option<&'a str>) -> Self {
        self.bearer = token;
        self
    }

    pub fn accept(mut self, accept: &'static str) -> Self {
        self.accept = Some(accept);
        self
    }

    async fn send(&self, client: &reqwest::Client) -> Result<reqwest::Response, ResolutionError> {
        let mut request = client.get(self.url);
        if let Some(accept) = self.accept {
            request = request.header(ACCEPT, HeaderValue::from_static(accept));
        }
        if let Some(token) = self.bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| ResolutionError::Request {
            url: self.url.to_string(),
            message: e.to_string(),
        })?;

        // Checked before the status: an exhausted limit comes back as 403
        if let Some(remaining) = rate_limit_remaining(response.headers())
            && remaining < RATE_LIMIT_FLOOR
        {
            tracing::warn!("GitHub rate limit low: {remaining} remaining");
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(
                "Response from {} (first 500 chars): {}",
                self.url,
                body.chars().take(500).collect::<String>()
            );
            return Err(ResolutionError::Http {
                status: status.as_u16(),
                url: self.url.to_string(),
            });
        }
        Ok(response)
    }
}

/// Fetch a body as text (JSON listings, HTML pages)
pub async fn fetch_text(client: &reqwest::Client, fetch: Fetch<'_>) -> Result<String, ResolutionError> {
    let response = fetch.send(client).await?;
    response.text().await.map_err(|e| ResolutionError::Request {
        url: fetch.url.to_string(),
        message: format!("Failed to read response: {e}"),
    })
}

#[derive(Debug, Clone)]
pub struct DownloadedFile {
    pub path: PathBuf,
    pub bytes: u64,
    /// Lowercase hex
    pub sha256: String,
}

/// Stream a body chunk by chunk into `dest`
pub async fn download_to_file(
    client: &reqwest::Client,
    fetch: Fetch<'_>,
    dest: &Path,
) -> Result<DownloadedFile, ResolutionError> {
    let response = fetch.send(client).await?;
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let bar = download_bar(&name, response.content_length());

    let mut file = tokio::fs::File::create(dest).await?;
    let mut hasher = Sha256::new();
    let mut bytes = 0_u64;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ResolutionError::Request {
            url: fetch.url.to_string(),
            message: format!("Failed to read body: {e}"),
        })?;
        hasher.update(&chunk);
        file.write_all(&chunk).await?;
        bytes += chunk.len() as u64;
        bar.set_position(bytes);
    }
    file.flush().await?;
    bar.finish_and_clear();

    tracing::debug!("Downloaded {bytes} bytes to {}", dest.display());
    Ok(DownloadedFile {
        path: dest.to_path_buf(),
        bytes,
        sha256: format!("{:x}", hasher.finalize()),
    })
}

/// Compare against the size the release listing announced. Zero means the
/// listing did not say.
pub fn verify_size(name: &str, expected: u64, file: &DownloadedFile) -> Result<(), ResolutionError> {
    if expected == 0 || expected == file.bytes {
        return Ok(());
    }
    Err(ResolutionError::SizeMismatch {
        name: name.to_string(),
        expected,
        actual: file.bytes,
    })
}

/// Compare against a GitHub asset digest of the form `sha256:<hex>`. Digests
/// in other algorithms cannot be checked and are accepted.
pub fn verify_digest(name: &str, expected: &str, file: &DownloadedFile) -> Result<(), ResolutionError> {
    let Some(expected_hex) = expected.strip_prefix("sha256:") else {
        tracing::debug!("Unsupported digest for {name}: {expected}");
        return Ok(());
    };

    if !expected_hex.eq_ignore_ascii_case(&file.sha256) {
        return Err(ResolutionError::DigestMismatch {
            name: name.to_string(),
            expected: expected_hex.to_lowercase(),
            actual: file.sha256.clone(),
        });
    }
    Ok(())
}
