// SPDX-License-Identifier: GPL-3.0-or-later

//! Writing a bundle onto a device over FTP

pub mod ftp;
pub mod performance;
pub mod plan;
pub mod remote;
pub mod session;

pub use ftp::FtpSession;
pub use plan::{UploadItem, UploadPlan, build_plan};
pub use remote::{RemoteError, RemoteFs};
pub use session::{
    DeploymentInput, DeploymentReport, DeploymentSession, DisconnectOutcome, SessionState,
    UploadEvent, UploadFailure, run_deployment,
};
