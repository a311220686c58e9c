// SPDX-License-Identifier: GPL-3.0-or-later

//! Local bundles of deployable files and the temporary space they live in

use crate::error::ResolutionError;
use std::fs::File;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{info, warn};
use walkdir::WalkDir;

const FIRMWARE_PREFIX: &str = "kernel";
const FIRMWARE_SUFFIX: &str = ".img";
const PERFORMANCE_DIR: &str = "performance";
const PERFORMANCE_INDEX: &str = "performance.ini";

/// `kernel*.img`
pub fn is_firmware_image(name: &str) -> bool {
    name.starts_with(FIRMWARE_PREFIX) && name.ends_with(FIRMWARE_SUFFIX)
}

/// Firmware images directly inside `dir`, sorted by name. A missing or
/// unreadable directory has none.
pub fn local_firmware_images(dir: &Path) -> Vec<PathBuf> {
    collect_images(dir, Some(1))
}

fn collect_images(root: &Path, max_depth: Option<usize>) -> Vec<PathBuf> {
    let mut walker = WalkDir::new(root).min_depth(1).sort_by_file_name();
    if let Some(depth) = max_depth {
        walker = walker.max_depth(depth);
    }
    walker
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.file_name().to_str().is_some_and(is_firmware_image))
        .map(walkdir::DirEntry::into_path)
        .collect()
}

/// Temporary directory holding downloads and extractions. Everything in it is
/// removed when the scope is dropped, on every exit path.
#[derive(Debug)]
pub struct CleanupScope {
    dir: Option<TempDir>,
}

impl CleanupScope {
    pub fn new(root: &Path) -> std::io::Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("minidexed-updater-")
            .tempdir_in(root)?;
        Ok(Self { dir: Some(dir) })
    }

    pub fn path(&self) -> &Path {
        self.dir.as_ref().map_or_else(|| Path::new(""), TempDir::path)
    }

    pub fn archive_path(&self, file_name: &str) -> PathBuf {
        self.path().join(sanitize_file_name(file_name))
    }

    pub fn extraction_dir(&self, index: usize) -> PathBuf {
        self.path().join(format!("extract-{index}"))
    }
}

impl Drop for CleanupScope {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => info!("Cleaned up temporary files."),
                Err(e) => warn!("Failed to remove {}: {e}", path.display()),
            }
        }
    }
}

fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "artifact.zip".to_string()
    } else {
        cleaned
    }
}

/// Unpack a zip archive into `dest`
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<(), ResolutionError> {
    let corrupt = |message: String| ResolutionError::CorruptArchive {
        path: archive.display().to_string(),
        message,
    };

    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| corrupt(e.to_string()))?;
    std::fs::create_dir_all(dest)?;
    zip.extract(dest).map_err(|e| corrupt(e.to_string()))?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BundleSource {
    Extracted,
    LocalBuild,
}

/// A directory tree of files ready to deploy
#[derive(Debug)]
pub struct Bundle {
    roots: Vec<PathBuf>,
    source: BundleSource,
    scope: Option<CleanupScope>,
}

impl Bundle {
    /// Local builds are used in place; nothing is registered for cleanup
    pub fn local(dir: PathBuf) -> Self {
        Self {
            roots: vec![dir],
            source: BundleSource::LocalBuild,
            scope: None,
        }
    }

    /// `roots` must be non-empty; the first one is primary
    pub fn extracted(roots: Vec<PathBuf>, scope: CleanupScope) -> Self {
        debug_assert!(!roots.is_empty());
        Self {
            roots,
            source: BundleSource::Extracted,
            scope: Some(scope),
        }
    }

    pub fn root(&self) -> &Path {
        &self.roots[0]
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn is_local(&self) -> bool {
        self.source == BundleSource::LocalBuild
    }

    pub fn cleanup_scope(&self) -> Option<&CleanupScope> {
        self.scope.as_ref()
    }

    /// Extracted bundles are searched recursively, local builds only at the top
    pub fn firmware_images(&self) -> Vec<PathBuf> {
        match self.source {
            BundleSource::Extracted => collect_images(self.root(), None),
            BundleSource::LocalBuild => collect_images(self.root(), Some(1)),
        }
    }

    pub fn performance_dir(&self) -> Option<PathBuf> {
        let dir = self.root().join(PERFORMANCE_DIR);
        dir.is_dir().then_some(dir)
    }

    pub fn performance_index(&self) -> Option<PathBuf> {
        let file = self.root().join(PERFORMANCE_INDEX);
        file.is_file().then_some(file)
    }
}
