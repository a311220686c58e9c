// SPDX-License-Identifier: GPL-3.0-or-later

//! Best-effort replacement of the performance tree on the device

use super::plan::remote_path_for;
use super::remote::{RemoteError, RemoteFs};
use crate::error::TransferWarning;
use std::fs::File;
use std::path::Path;
use tracing::{info, warn};
use walkdir::WalkDir;

const MAX_DEPTH: usize = 16;

fn child_path(parent: &str, item: &str) -> String {
    if item.starts_with(parent) {
        item.to_string()
    } else {
        format!("{parent}/{item}")
    }
}

/// Delete everything below `path`. Each entry is tried as a file first and as
/// a directory second. Nothing here is fatal.
pub fn remove_tree(remote: &mut dyn RemoteFs, path: &str, warnings: &mut Vec<TransferWarning>) {
    remove_tree_at(remote, path, warnings, 0);
}

fn remove_tree_at(
    remote: &mut dyn RemoteFs,
    path: &str,
    warnings: &mut Vec<TransferWarning>,
    depth: usize,
) {
    if depth > MAX_DEPTH {
        warnings.push(TransferWarning::PerformanceCleanup {
            path: path.to_string(),
            message: "directory nesting too deep".to_string(),
        });
        return;
    }

    let items = match remote.list(path) {
        Ok(items) => items,
        Err(e) => {
            warn!("Could not list {path}: {e}");
            warnings.push(TransferWarning::PerformanceCleanup {
                path: path.to_string(),
                message: format!("could not list: {e}"),
            });
            return;
        }
    };

    for item in items {
        if item == "." || item == ".." || item == path {
            continue;
        }
        let full_path = child_path(path, &item);
        if remote.delete_file(&full_path).is_ok() {
            info!("Deleted file: {full_path}");
            continue;
        }

        remove_tree_at(remote, &full_path, warnings, depth + 1);
        match remote.remove_dir(&full_path) {
            Ok(()) => info!("Deleted directory: {full_path}"),
            Err(e) => {
                warn!("Could not delete {full_path}: {e}");
                warnings.push(TransferWarning::PerformanceCleanup {
                    path: full_path,
                    message: e.to_string(),
                });
            }
        }
    }
}

/// Remove the tree and the directory itself
pub fn remove_performance_dir(
    remote: &mut dyn RemoteFs,
    path: &str,
    warnings: &mut Vec<TransferWarning>,
) {
    remove_tree(remote, path, warnings);
    match remote.remove_dir(path) {
        Ok(()) => info!("Deleted {path} on device."),
        Err(e) => {
            warn!("Could not delete {path} directory itself: {e}");
            warnings.push(TransferWarning::PerformanceCleanup {
                path: path.to_string(),
                message: e.to_string(),
            });
        }
    }
}

/// Store a single file. Only a lost connection is returned as an error.
pub fn upload_file(
    remote: &mut dyn RemoteFs,
    local: &Path,
    remote_path: &str,
    warnings: &mut Vec<TransferWarning>,
) -> Result<(), RemoteError> {
    let result = File::open(local)
        .map_err(RemoteError::from)
        .and_then(|mut file| remote.put(remote_path, &mut file, &mut |_| {}));
    match result {
        Ok(_) => {
            info!("Uploaded {remote_path}");
            Ok(())
        }
        Err(e) if e.is_disconnect() => Err(e),
        Err(e) => {
            warn!("Could not upload {remote_path}: {e}");
            warnings.push(TransferWarning::PerformanceUpload {
                path: remote_path.to_string(),
                message: e.to_string(),
            });
            Ok(())
        }
    }
}

/// Mirror `local_dir` into `remote_dir`, creating directories as needed.
/// Directory creation failures are ignored; the directory may already exist.
pub fn upload_tree(
    remote: &mut dyn RemoteFs,
    local_dir: &Path,
    remote_dir: &str,
    warnings: &mut Vec<TransferWarning>,
) -> Result<(), RemoteError> {
    let _ = remote.make_dir(remote_dir);

    for entry in WalkDir::new(local_dir).min_depth(1).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Could not read {}: {e}", local_dir.display());
                continue;
            }
        };
        let Ok(relative) = entry.path().strip_prefix(local_dir) else {
            continue;
        };
        let target = remote_path_for(remote_dir, relative);

        if entry.file_type().is_dir() {
            let _ = remote.make_dir(&target);
        } else if entry.file_type().is_file() {
            upload_file(remote, entry.path(), &target, warnings)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::remote::memory::MemoryRemote;
    use tempfile::TempDir;

    #[test]
    fn test_remove_tree_deletes_files_and_dirs() {
        let mut remote = MemoryRemote::with_files(&[
            "/SD/performance/000001_Piano.ini",
            "/SD/performance/bank2/000002_Organ.ini",
            "/SD/kernel8.img",
        ]);
        let mut warnings = Vec::new();

        remove_performance_dir(&mut remote, "/SD/performance", &mut warnings);

        assert!(warnings.is_empty(), "{warnings:?}");
        assert_eq!(remote.files.keys().collect::<Vec<_>>(), ["/SD/kernel8.img"]);
        assert!(!remote.dirs.contains("/SD/performance"));
        assert!(remote.commands.contains(&"DELE /SD/performance/000001_Piano.ini".to_string()));
        assert!(remote.commands.contains(&"RMD /SD/performance/bank2".to_string()));
    }

    #[test]
    fn test_missing_directory_is_only_a_warning() {
        let mut remote = MemoryRemote::with_files(&["/SD/kernel8.img"]);
        let mut warnings = Vec::new();

        remove_performance_dir(&mut remote, "/SD/performance", &mut warnings);

        assert_eq!(warnings.len(), 2);
        assert!(matches!(
            warnings[0],
            TransferWarning::PerformanceCleanup { .. }
        ));
        assert_eq!(remote.files.len(), 1);
    }

    #[test]
    fn test_unlistable_subdirectory_does_not_stop_cleanup() {
        let mut remote = MemoryRemote::with_files(&[
            "/SD/performance/a/1.ini",
            "/SD/performance/b.ini",
        ]);
        remote.fail_list.insert("/SD/performance/a".to_string());
        let mut warnings = Vec::new();

        remove_tree(&mut remote, "/SD/performance", &mut warnings);

        assert!(!remote.files.contains_key("/SD/performance/b.ini"));
        assert!(remote.files.contains_key("/SD/performance/a/1.ini"));
        // listing failure plus the non-empty RMD
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn test_upload_tree_mirrors_local_dir() {
        let local = TempDir::new().unwrap();
        std::fs::write(local.path().join("000001_Piano.ini"), b"piano").unwrap();
        std::fs::create_dir(local.path().join("bank2")).unwrap();
        std::fs::write(local.path().join("bank2/000002_Organ.ini"), b"organ").unwrap();

        let mut remote = MemoryRemote::with_files(&["/SD/kernel8.img"]);
        let mut warnings = Vec::new();
        upload_tree(&mut remote, local.path(), "/SD/performance", &mut warnings).unwrap();

        assert!(warnings.is_empty());
        assert_eq!(
            remote.files.get("/SD/performance/000001_Piano.ini").unwrap(),
            b"piano"
        );
        assert_eq!(
            remote.files.get("/SD/performance/bank2/000002_Organ.ini").unwrap(),
            b"organ"
        );
        assert!(remote.commands.contains(&"MKD /SD/performance".to_string()));
        assert!(remote.commands.contains(&"MKD /SD/performance/bank2".to_string()));
    }

    #[test]
    fn test_upload_tree_tolerates_existing_directories() {
        let local = TempDir::new().unwrap();
        std::fs::write(local.path().join("a.ini"), b"a").unwrap();

        let mut remote = MemoryRemote::with_files(&["/SD/performance/old.ini"]);
        let mut warnings = Vec::new();
        upload_tree(&mut remote, local.path(), "/SD/performance", &mut warnings).unwrap();

        assert!(warnings.is_empty());
        assert!(remote.files.contains_key("/SD/performance/a.ini"));
    }
}
