// SPDX-License-Identifier: GPL-3.0-or-later

//! Turns a release channel into a local bundle of deployable files

use crate::bundle::{Bundle, CleanupScope, extract_archive, local_firmware_images};
use crate::channel::ReleaseChannel;
use crate::config::UpdaterConfig;
use crate::downloader::{Fetch, download_to_file, http_client, verify_digest, verify_size};
use crate::error::ResolutionError;
use crate::pull_request::{download_artifacts, fetch_artifact_links};
use crate::release_checker::{ReleaseKind, find_release_asset};
use std::path::{Path, PathBuf};
use tracing::info;

pub fn has_local_build(config: &UpdaterConfig) -> bool {
    !local_firmware_images(&config.local_build_dir).is_empty()
}

/// Exactly one strategy runs per channel. Only the local build stays off the
/// network.
pub async fn resolve(
    config: &UpdaterConfig,
    channel: ReleaseChannel,
) -> Result<Bundle, ResolutionError> {
    match channel {
        ReleaseChannel::LocalBuild => resolve_local(&config.local_build_dir),
        ReleaseChannel::LatestOfficial => resolve_release(config, ReleaseKind::Latest).await,
        ReleaseChannel::Continuous => resolve_release(config, ReleaseKind::Continuous).await,
        ReleaseChannel::PullRequest(id) => resolve_pull_request(config, id).await,
    }
}

fn resolve_local(dir: &Path) -> Result<Bundle, ResolutionError> {
    let images = local_firmware_images(dir);
    if images.is_empty() {
        return Err(ResolutionError::NoArtifact(format!(
            "No kernel*.img files in {}",
            dir.display()
        )));
    }
    info!(
        "Using local build: {} image(s) from {} will be uploaded",
        images.len(),
        dir.display()
    );
    Ok(Bundle::local(dir.to_path_buf()))
}

async fn extract(archive: PathBuf, dest: PathBuf) -> Result<PathBuf, ResolutionError> {
    let extracted = dest.clone();
    tokio::task::spawn_blocking(move || extract_archive(&archive, &dest))
        .await
        .map_err(|e| ResolutionError::Io(std::io::Error::other(e)))??;
    Ok(extracted)
}

async fn resolve_release(
    config: &UpdaterConfig,
    kind: ReleaseKind,
) -> Result<Bundle, ResolutionError> {
    let client = http_client()?;
    let asset = find_release_asset(&client, config, kind).await?;

    let scope = CleanupScope::new(&config.temp_root())?;
    info!("Downloading asset: {} from {}", asset.name, asset.browser_download_url);
    let file = download_to_file(
        &client,
        Fetch::new(&asset.browser_download_url),
        &scope.archive_path(&asset.name),
    )
    .await?;
    verify_size(&asset.name, asset.size, &file)?;
    if let Some(ref digest) = asset.digest {
        verify_digest(&asset.name, digest, &file)?;
    }
    info!("Downloaded to: {}", file.path.display());

    let dir = extract(file.path, scope.extraction_dir(0)).await?;
    info!("Extracted to: {}", dir.display());
    Ok(Bundle::extracted(vec![dir], scope))
}

async fn resolve_pull_request(config: &UpdaterConfig, id: u64) -> Result<Bundle, ResolutionError> {
    let client = http_client()?;
    let links = fetch_artifact_links(&client, config, id).await?;

    let scope = CleanupScope::new(&config.temp_root())?;
    let archives = download_artifacts(&client, config, &links, &scope).await?;

    let mut dirs = Vec::with_capacity(archives.len());
    for (idx, archive) in archives.into_iter().enumerate() {
        let shown = archive.display().to_string();
        let dir = extract(archive, scope.extraction_dir(idx)).await?;
        info!("Extracted {shown} to {}", dir.display());
        dirs.push(dir);
    }
    Ok(Bundle::extracted(dirs, scope))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::tests::zip_bytes;
    use mockito::{Matcher, Server};
    use serde_json::json;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_build_stays_offline() {
        let mut server = Server::new_async().await;
        let any = server
            .mock("GET", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let src = TempDir::new().unwrap();
        std::fs::write(src.path().join("kernel8.img"), b"img").unwrap();
        let config = UpdaterConfig {
            api_base_url: server.url(),
            web_base_url: server.url(),
            local_build_dir: src.path().to_path_buf(),
            ..Default::default()
        };

        let bundle = resolve(&config, ReleaseChannel::LocalBuild).await.unwrap();
        assert!(bundle.is_local());
        assert!(bundle.cleanup_scope().is_none());
        assert_eq!(bundle.root(), src.path());

        any.assert_async().await;
    }

    #[tokio::test]
    async fn test_local_build_without_images() {
        let src = TempDir::new().unwrap();
        let config = UpdaterConfig {
            local_build_dir: src.path().to_path_buf(),
            ..Default::default()
        };
        assert!(!has_local_build(&config));
        let result = resolve(&config, ReleaseChannel::LocalBuild).await;
        assert!(matches!(result, Err(ResolutionError::NoArtifact(_))));
    }

    #[tokio::test]
    async fn test_latest_release_is_downloaded_and_extracted() {
        let mut server = Server::new_async().await;
        let archive = zip_bytes(&[("kernel8.img", b"v8"), ("performance.ini", b"[x]")]);
        let listing = server
            .mock("GET", "/repos/probonopd/MiniDexed/releases/latest")
            .with_status(200)
            .with_body(
                json!({"tag_name": "v1", "assets": [{
                    "name": "MiniDexed_v1.zip",
                    "browser_download_url": format!("{}/dl/MiniDexed_v1.zip", server.url())
                }]})
                .to_string(),
            )
            .create_async()
            .await;
        let download = server
            .mock("GET", "/dl/MiniDexed_v1.zip")
            .with_status(200)
            .with_body(&archive)
            .create_async()
            .await;

        let temp = TempDir::new().unwrap();
        let config = UpdaterConfig {
            api_base_url: server.url(),
            temp_root: Some(temp.path().to_path_buf()),
            ..Default::default()
        };

        let bundle = resolve(&config, ReleaseChannel::LatestOfficial).await.unwrap();
        assert!(!bundle.is_local());
        assert_eq!(bundle.firmware_images().len(), 1);
        assert!(bundle.performance_index().is_some());

        let scope_path = bundle.cleanup_scope().unwrap().path().to_path_buf();
        assert!(scope_path.join("MiniDexed_v1.zip").is_file());
        drop(bundle);
        assert!(!scope_path.exists());

        listing.assert_async().await;
        download.assert_async().await;
    }

    #[tokio::test]
    async fn test_digest_mismatch_cleans_up() {
        let mut server = Server::new_async().await;
        let _listing = server
            .mock("GET", "/repos/probonopd/MiniDexed/releases/latest")
            .with_status(200)
            .with_body(
                json!({"tag_name": "v1", "assets": [{
                    "name": "MiniDexed_v1.zip",
                    "browser_download_url": format!("{}/dl/MiniDexed_v1.zip", server.url()),
                    "digest": "sha256:0000"
                }]})
                .to_string(),
            )
            .create_async()
            .await;
        let _download = server
            .mock("GET", "/dl/MiniDexed_v1.zip")
            .with_status(200)
            .with_body(zip_bytes(&[("kernel8.img", b"v8")]))
            .create_async()
            .await;

        let temp = TempDir::new().unwrap();
        let config = UpdaterConfig {
            api_base_url: server.url(),
            temp_root: Some(temp.path().to_path_buf()),
            ..Default::default()
        };

        let result = resolve(&config, ReleaseChannel::LatestOfficial).await;
        assert!(matches!(result, Err(ResolutionError::DigestMismatch { .. })));
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_truncated_download_cleans_up() {
        let mut server = Server::new_async().await;
        let _listing = server
            .mock("GET", "/repos/probonopd/MiniDexed/releases/latest")
            .with_status(200)
            .with_body(
                json!({"tag_name": "v1", "assets": [{
                    "name": "MiniDexed_v1.zip",
                    "browser_download_url": format!("{}/dl/MiniDexed_v1.zip", server.url()),
                    "size": 1_000_000
                }]})
                .to_string(),
            )
            .create_async()
            .await;
        let _download = server
            .mock("GET", "/dl/MiniDexed_v1.zip")
            .with_status(200)
            .with_body(zip_bytes(&[("kernel8.img", b"v8")]))
            .create_async()
            .await;

        let temp = TempDir::new().unwrap();
        let config = UpdaterConfig {
            api_base_url: server.url(),
            temp_root: Some(temp.path().to_path_buf()),
            ..Default::default()
        };

        let result = resolve(&config, ReleaseChannel::LatestOfficial).await;
        assert!(matches!(
            result,
            Err(ResolutionError::SizeMismatch {
                expected: 1_000_000,
                ..
            })
        ));
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_download_cleans_up() {
        let mut server = Server::new_async().await;
        let _listing = server
            .mock("GET", "/repos/probonopd/MiniDexed/releases/latest")
            .with_status(200)
            .with_body(
                json!({"tag_name": "v1", "assets": [{
                    "name": "MiniDexed_v1.zip",
                    "browser_download_url": format!("{}/dl/MiniDexed_v1.zip", server.url())
                }]})
                .to_string(),
            )
            .create_async()
            .await;
        let _download = server
            .mock("GET", "/dl/MiniDexed_v1.zip")
            .with_status(200)
            .with_chunked_body(|w| {
                w.write_all(b"PK\x03\x04partial")?;
                w.flush()?;
                std::thread::sleep(Duration::from_secs(2));
                w.write_all(b"rest")
            })
            .create_async()
            .await;

        let temp = TempDir::new().unwrap();
        let config = UpdaterConfig {
            api_base_url: server.url(),
            temp_root: Some(temp.path().to_path_buf()),
            ..Default::default()
        };

        let entries = |dir: &Path| std::fs::read_dir(dir).unwrap().count();
        let task = tokio::spawn(async move { resolve(&config, ReleaseChannel::LatestOfficial).await });

        let mut waited = Duration::ZERO;
        while entries(temp.path()) == 0 {
            assert!(waited < Duration::from_secs(1), "download never started");
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += Duration::from_millis(10);
        }

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert_eq!(entries(temp.path()), 0);
    }

    #[tokio::test]
    async fn test_corrupt_release_archive() {
        let mut server = Server::new_async().await;
        let _listing = server
            .mock("GET", "/repos/probonopd/MiniDexed/releases/latest")
            .with_status(200)
            .with_body(
                json!({"tag_name": "v1", "assets": [{
                    "name": "MiniDexed_v1.zip",
                    "browser_download_url": format!("{}/dl/MiniDexed_v1.zip", server.url())
                }]})
                .to_string(),
            )
            .create_async()
            .await;
        let _download = server
            .mock("GET", "/dl/MiniDexed_v1.zip")
            .with_status(200)
            .with_body("garbage")
            .create_async()
            .await;

        let temp = TempDir::new().unwrap();
        let config = UpdaterConfig {
            api_base_url: server.url(),
            temp_root: Some(temp.path().to_path_buf()),
            ..Default::default()
        };

        let result = resolve(&config, ReleaseChannel::LatestOfficial).await;
        assert!(matches!(result, Err(ResolutionError::CorruptArchive { .. })));
    }
}
