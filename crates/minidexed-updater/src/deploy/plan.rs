// SPDX-License-Identifier: GPL-3.0-or-later

//! Which firmware images get written where

use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadItem {
    pub local: PathBuf,
    pub remote: String,
    pub file_name: String,
}

/// Images to overwrite, in order, plus the ones skipped because the device
/// has no file of that name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadPlan {
    pub items: Vec<UploadItem>,
    pub skipped: Vec<String>,
}

/// Reduce a listing to bare file names
pub fn remote_names(listing: &[String]) -> HashSet<String> {
    listing
        .iter()
        .filter_map(|entry| entry.trim_end_matches('/').rsplit('/').next())
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .map(str::to_string)
        .collect()
}

pub fn build_plan(images: &[PathBuf], remote_dir: &str, existing: &HashSet<String>) -> UploadPlan {
    let mut plan = UploadPlan::default();
    let mut planned = HashSet::new();

    for local in images {
        let Some(file_name) = local.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        // The same image name can sit in more than one subdirectory; the first wins
        if !planned.insert(file_name.to_string()) {
            continue;
        }
        if !existing.contains(file_name) {
            plan.skipped.push(file_name.to_string());
            continue;
        }
        plan.items.push(UploadItem {
            local: local.clone(),
            remote: remote_path(remote_dir, file_name),
            file_name: file_name.to_string(),
        });
    }
    plan
}

pub fn remote_path(dir: &str, name: &str) -> String {
    format!("{}/{name}", dir.trim_end_matches('/'))
}

/// `local_rel` joined onto `remote_dir` with forward slashes
pub fn remote_path_for(remote_dir: &str, local_rel: &Path) -> String {
    local_rel
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .fold(remote_dir.trim_end_matches('/').to_string(), |acc, part| {
            format!("{acc}/{part}")
        })
}
