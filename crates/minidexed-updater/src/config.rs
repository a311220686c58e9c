// SPDX-License-Identifier: GPL-3.0-or-later

//! Configuration module for the updater

use crate::error::{Result, UpdaterError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_repo() -> String {
    "probonopd/MiniDexed".to_string()
}

fn default_api_base_url() -> String {
    "https://api.github.com".to_string()
}

fn default_web_base_url() -> String {
    "https://github.com".to_string()
}

fn default_local_build_dir() -> PathBuf {
    PathBuf::from("src")
}

fn default_10() -> u64 {
    10
}

fn default_21() -> u16 {
    21
}

fn default_admin() -> String {
    "admin".to_string()
}

fn default_remote_root() -> String {
    "/SD".to_string()
}

fn default_8192() -> usize {
    8192
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// GitHub repository hosting releases and pull requests ("owner/name")
    #[serde(default = "default_repo")]
    pub repo: String,

    /// GitHub REST API base URL
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// GitHub web base URL, used for pull request pages
    #[serde(default = "default_web_base_url")]
    pub web_base_url: String,

    /// Token for the artifact API (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_token: Option<String>,

    /// Directory scanned for a local `kernel*.img` build
    #[serde(default = "default_local_build_dir")]
    pub local_build_dir: PathBuf,

    /// Where temporary downloads are placed (OS temp dir if unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_root: Option<PathBuf>,

    /// How long to browse for devices (seconds)
    #[serde(default = "default_10")]
    pub discovery_window_secs: u64,

    #[serde(default = "default_21")]
    pub ftp_port: u16,

    #[serde(default = "default_admin")]
    pub ftp_user: String,

    #[serde(default = "default_admin")]
    pub ftp_password: String,

    /// Control connection timeout (seconds)
    #[serde(default = "default_10")]
    pub connect_timeout_secs: u64,

    /// Remote directory holding the firmware images
    #[serde(default = "default_remote_root")]
    pub remote_root: String,

    /// Bytes per upload chunk
    #[serde(default = "default_8192")]
    pub upload_chunk_size: usize,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            repo: default_repo(),
            api_base_url: default_api_base_url(),
            web_base_url: default_web_base_url(),
            github_token: None,
            local_build_dir: default_local_build_dir(),
            temp_root: None,
            discovery_window_secs: 10,
            ftp_port: 21,
            ftp_user: default_admin(),
            ftp_password: default_admin(),
            connect_timeout_secs: 10,
            remote_root: default_remote_root(),
            upload_chunk_size: 8192,
        }
    }
}

impl UpdaterConfig {
    pub fn discovery_window(&self) -> Duration {
        Duration::from_secs(self.discovery_window_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn remote_performance_dir(&self) -> String {
        format!("{}/performance", self.remote_root)
    }

    pub fn remote_performance_index(&self) -> String {
        format!("{}/performance.ini", self.remote_root)
    }

    pub fn temp_root(&self) -> PathBuf {
        self.temp_root.clone().unwrap_or_else(std::env::temp_dir)
    }
}

pub fn load_config(path: Option<&Path>) -> Result<UpdaterConfig> {
    let Some(path) = path else {
        return Ok(UpdaterConfig::default());
    };

    let content = std::fs::read_to_string(path).map_err(|e| {
        UpdaterError::Config(format!("Failed to read {}: {e}", path.display()))
    })?;
    serde_json::from_str(&content)
        .map_err(|e| UpdaterError::Config(format!("Failed to parse config: {e}")))
}
