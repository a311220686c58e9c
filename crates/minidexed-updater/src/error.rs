// SPDX-License-Identifier: GPL-3.0-or-later

//! Error types for the updater crate

use std::fmt;
use thiserror::Error;

/// Fatal errors. Any of these stops the run with a non-zero exit code.
#[derive(Debug, Error)]
pub enum UpdaterError {
    #[error("{0}")]
    Usage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("No devices found.")]
    NoDevices,

    #[error("discovery failed: {0}")]
    Discovery(String),

    #[error("connection to {address} failed: {message}")]
    Connection { address: String, message: String },

    #[error("interrupted")]
    Interrupted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UpdaterError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Interrupted => 130,
            Self::Config(_)
            | Self::Resolution(_)
            | Self::NoDevices
            | Self::Discovery(_)
            | Self::Connection { .. }
            | Self::Io(_) => 1,
        }
    }
}

/// Failures while turning a release channel into a local bundle of files.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("no release found: {0}")]
    NoRelease(String),

    #[error("no matching asset: {0}")]
    NoMatchingAsset(String),

    #[error("no artifact found: {0}")]
    NoArtifact(String),

    /// The scraped page no longer has the markup we look for.
    #[error("page format changed: {0}")]
    FormatDrift(String),

    #[error("corrupt archive {path}: {message}")]
    CorruptArchive { path: String, message: String },

    #[error("digest mismatch for {name}: expected {expected}, got {actual}")]
    DigestMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("size mismatch for {name}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        name: String,
        expected: u64,
        actual: u64,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Non-fatal conditions reported during deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferWarning {
    /// The image has no counterpart on the device and was not written.
    RemoteMissing { file: String },
    QuitFailed { message: String },
    PerformanceCleanup { path: String, message: String },
    PerformanceUpload { path: String, message: String },
}

impl fmt::Display for TransferWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RemoteMissing { file } => write!(f, "Skipping {file}: does not exist on device"),
            Self::QuitFailed { message } => write!(f, "FTP error after BYE: {message}"),
            Self::PerformanceCleanup { path, message } => {
                write!(f, "Could not delete {path}: {message}")
            }
            Self::PerformanceUpload { path, message } => {
                write!(f, "Could not upload {path}: {message}")
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, UpdaterError>;
