// SPDX-License-Identifier: GPL-3.0-or-later

//! MiniDexed Updater - deploys firmware builds to MiniDexed devices
//!
//! A run picks a release channel (latest release, continuous build, pull
//! request build or a local build), resolves it to a bundle of files on disk,
//! finds a device on the local network via mDNS and overwrites the firmware
//! images on its SD card over FTP.

pub mod bundle;
pub mod channel;
pub mod config;
pub mod deploy;
pub mod discovery;
pub mod downloader;
pub mod error;
pub mod progress;
pub mod pull_request;
pub mod release_checker;
pub mod resolver;
pub mod selector;

pub use bundle::{Bundle, CleanupScope};
pub use channel::{ChannelMenu, ReleaseChannel, channel_from_flags, parse_pr_id};
pub use config::{UpdaterConfig, load_config};
pub use discovery::{DiscoveredDevice, discover_devices};
pub use error::{ResolutionError, Result, TransferWarning, UpdaterError};
pub use resolver::{has_local_build, resolve};
