// SPDX-License-Identifier: GPL-3.0-or-later

//! Deployment session against a single device
//!
//! The session walks `Disconnected -> Connected -> Authenticated ->
//! (PerformanceReplace) -> ImageUpload -> Closing -> Closed`. Only opening the
//! session can fail the run; everything after that is collected into a
//! [`DeploymentReport`].

use super::performance::{remove_performance_dir, upload_file, upload_tree};
use super::plan::{build_plan, remote_names};
use super::remote::{RemoteError, RemoteFs};
use crate::bundle::Bundle;
use crate::config::UpdaterConfig;
use crate::discovery::DiscoveredDevice;
use crate::error::{Result, TransferWarning, UpdaterError};
use crate::progress::percent_complete;
use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Login was refused or the link dropped mid-session
    Disconnected,
    Connected,
    Authenticated,
    PerformanceReplace,
    ImageUpload,
    Closing,
    Closed,
}

/// How the session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectOutcome {
    /// The device acknowledged the quit command
    Polite,
    /// The link was already gone at quit time, usually because the new
    /// firmware rebooted the device
    DeviceRestarted,
    /// Some other protocol error on quit
    Failed(String),
    /// The connection was lost before closing; no quit was sent
    AlreadyClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFailure {
    pub file: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct DeploymentReport {
    pub uploaded: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<UploadFailure>,
    pub warnings: Vec<TransferWarning>,
    pub performances_replaced: bool,
    pub disconnect: Option<DisconnectOutcome>,
}

impl DeploymentReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Progress of a single firmware upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadEvent<'a> {
    Started {
        file_name: &'a str,
        total: u64,
    },
    Progress {
        file_name: &'a str,
        sent: u64,
        total: u64,
        percent: u8,
    },
    Finished {
        file_name: &'a str,
        bytes: u64,
    },
    Failed {
        file_name: &'a str,
        message: &'a str,
    },
}

/// Paths a deployment reads, detached from the bundle that owns them so the
/// bundle's cleanup scope stays with the caller
#[derive(Debug, Clone, Default)]
pub struct DeploymentInput {
    pub images: Vec<PathBuf>,
    pub performance_dir: Option<PathBuf>,
    pub performance_index: Option<PathBuf>,
    pub local_build: bool,
}

impl From<&Bundle> for DeploymentInput {
    fn from(bundle: &Bundle) -> Self {
        Self {
            images: bundle.firmware_images(),
            performance_dir: bundle.performance_dir(),
            performance_index: bundle.performance_index(),
            local_build: bundle.is_local(),
        }
    }
}

#[derive(Debug)]
pub struct DeploymentSession<R: RemoteFs> {
    remote: R,
    target: DiscoveredDevice,
    state: SessionState,
    firmware_dir: String,
    performance_dir: String,
    performance_index: String,
    report: DeploymentReport,
}

fn connection_error(target: &DiscoveredDevice, err: &RemoteError) -> UpdaterError {
    UpdaterError::Connection {
        address: target.address.clone(),
        message: err.to_string(),
    }
}

impl<R: RemoteFs> DeploymentSession<R> {
    /// Open the control connection; the session starts out `Connected`
    pub fn connect<F>(connect: F, target: &DiscoveredDevice, config: &UpdaterConfig) -> Result<Self>
    where
        F: FnOnce(&str) -> std::result::Result<R, RemoteError>,
    {
        info!("Connecting to {} ({})...", target.name, target.address);
        let remote = connect(&target.address).map_err(|e| connection_error(target, &e))?;
        debug!("Control connection established");

        Ok(Self {
            remote,
            target: target.clone(),
            state: SessionState::Connected,
            firmware_dir: config.remote_root.clone(),
            performance_dir: config.remote_performance_dir(),
            performance_index: config.remote_performance_index(),
            report: DeploymentReport::default(),
        })
    }

    /// A refused login leaves the session `Disconnected`
    pub fn login(&mut self, user: &str, password: &str) -> Result<()> {
        match self.remote.login(user, password) {
            Ok(()) => {
                self.state = SessionState::Authenticated;
                info!("Connected to {} (passive mode).", self.target.address);
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Disconnected;
                Err(connection_error(&self.target, &e))
            }
        }
    }

    /// Connect and log in. Either step failing is fatal for the run.
    pub fn open<F>(connect: F, target: &DiscoveredDevice, config: &UpdaterConfig) -> Result<Self>
    where
        F: FnOnce(&str) -> std::result::Result<R, RemoteError>,
    {
        let mut session = Self::connect(connect, target, config)?;
        session.login(&config.ftp_user, &config.ftp_password)?;
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    fn connection_lost(&self) -> bool {
        self.state == SessionState::Disconnected
    }

    fn lose_connection(&mut self, err: &RemoteError) {
        error!("FTP error: {err}");
        self.state = SessionState::Disconnected;
    }

    /// Wipe the remote performance directory and upload the bundle's copy.
    /// Best-effort: failures end up as warnings in the report.
    pub fn replace_performances(&mut self, input: &DeploymentInput) {
        if self.connection_lost() {
            return;
        }
        self.state = SessionState::PerformanceReplace;
        info!(
            "Updating Performance: recursively deleting and uploading {} directory...",
            self.performance_dir
        );

        let mut warnings = Vec::new();
        remove_performance_dir(&mut self.remote, &self.performance_dir, &mut warnings);

        let uploaded = match &input.performance_dir {
            Some(local) => {
                upload_tree(&mut self.remote, local, &self.performance_dir, &mut warnings)
                    .map(|()| info!("Uploaded new {} directory.", self.performance_dir))
            }
            None => {
                info!("No extracted performance/ directory found, skipping upload.");
                Ok(())
            }
        };
        let uploaded = uploaded.and_then(|()| match &input.performance_index {
            Some(local) => {
                upload_file(&mut self.remote, local, &self.performance_index, &mut warnings)
            }
            None => {
                info!("No extracted performance.ini found, skipping upload.");
                Ok(())
            }
        });

        self.report.warnings.append(&mut warnings);
        match uploaded {
            Ok(()) => self.report.performances_replaced = true,
            Err(e) => self.lose_connection(&e),
        }
    }

    /// Names in the firmware directory, listed from inside it
    fn existing_images(&mut self) -> HashSet<String> {
        let listing = self
            .remote
            .change_dir(&self.firmware_dir)
            .and_then(|()| self.remote.list_working_dir());
        match listing {
            Ok(listing) => remote_names(&listing),
            Err(e) => {
                warn!("Error checking for images on {}: {e}", self.firmware_dir);
                if e.is_disconnect() {
                    self.lose_connection(&e);
                }
                HashSet::new()
            }
        }
    }

    /// Overwrite every image that already exists on the device. Images with
    /// no remote counterpart are skipped and reported. The first failed
    /// upload ends the transfer phase.
    pub fn upload_images(
        &mut self,
        images: &[PathBuf],
        on_event: &mut dyn FnMut(UploadEvent<'_>),
    ) {
        if self.connection_lost() {
            warn!("Connection lost, {} image(s) not uploaded", images.len());
            return;
        }
        self.state = SessionState::ImageUpload;

        let existing = self.existing_images();
        let plan = build_plan(images, &self.firmware_dir, &existing);

        for file in plan.skipped {
            let warning = TransferWarning::RemoteMissing { file: file.clone() };
            info!("{warning}.");
            self.report.warnings.push(warning);
            self.report.skipped.push(file);
        }

        for item in &plan.items {
            if self.connection_lost() {
                break;
            }
            match self.upload_image(&item.local, &item.remote, &item.file_name, on_event) {
                Ok(bytes) => {
                    on_event(UploadEvent::Finished {
                        file_name: &item.file_name,
                        bytes,
                    });
                    info!("Uploaded {} to {}.", item.file_name, self.target.address);
                    self.report.uploaded.push(item.file_name.clone());
                }
                Err(e) => {
                    let message = e.to_string();
                    on_event(UploadEvent::Failed {
                        file_name: &item.file_name,
                        message: &message,
                    });
                    self.report.failed.push(UploadFailure {
                        file: item.file_name.clone(),
                        message,
                    });
                    self.lose_connection(&e);
                }
            }
        }
    }

    fn upload_image(
        &mut self,
        local: &Path,
        remote_path: &str,
        file_name: &str,
        on_event: &mut dyn FnMut(UploadEvent<'_>),
    ) -> std::result::Result<u64, RemoteError> {
        let mut file = File::open(local)?;
        let total = file.metadata()?.len();
        on_event(UploadEvent::Started { file_name, total });

        let mut sent = 0_u64;
        self.remote.put(remote_path, &mut file, &mut |chunk| {
            sent += chunk;
            on_event(UploadEvent::Progress {
                file_name,
                sent,
                total,
                percent: percent_complete(sent, total),
            });
        })
    }

    /// Say goodbye and hand back the report. A link severed by a rebooting
    /// device counts as a normal disconnect.
    pub fn close(&mut self) -> DeploymentReport {
        if self.state == SessionState::Closed {
            return std::mem::take(&mut self.report);
        }

        let outcome = if self.connection_lost() {
            DisconnectOutcome::AlreadyClosed
        } else {
            self.state = SessionState::Closing;
            match self.remote.quit() {
                Ok(()) => {
                    info!("Sent BYE, device acknowledged.");
                    DisconnectOutcome::Polite
                }
                Err(e) if e.is_disconnect() => {
                    info!("Disconnected from device (device restarted or connection closed).");
                    DisconnectOutcome::DeviceRestarted
                }
                Err(e) => {
                    let warning = TransferWarning::QuitFailed {
                        message: e.to_string(),
                    };
                    warn!("{warning}");
                    self.report.warnings.push(warning);
                    DisconnectOutcome::Failed(e.to_string())
                }
            }
        };

        self.state = SessionState::Closed;
        self.report.disconnect = Some(outcome);
        std::mem::take(&mut self.report)
    }
}

/// Everything after a successful open. Performances are only replaced when
/// requested and the bundle is not a local build.
pub fn run_deployment<R: RemoteFs>(
    session: &mut DeploymentSession<R>,
    input: &DeploymentInput,
    update_performances: bool,
    on_event: &mut dyn FnMut(UploadEvent<'_>),
) -> DeploymentReport {
    if update_performances && !input.local_build {
        session.replace_performances(input);
    }
    session.upload_images(&input.images, on_event);
    session.close()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::CleanupScope;
    use crate::deploy::remote::memory::MemoryRemote;
    use tempfile::TempDir;

    fn target() -> DiscoveredDevice {
        DiscoveredDevice::explicit("192.168.1.50")
    }

    fn open(remote: MemoryRemote) -> DeploymentSession<MemoryRemote> {
        DeploymentSession::open(|_| Ok(remote), &target(), &UpdaterConfig::default()).unwrap()
    }

    fn local_bundle(files: &[(&str, &[u8])]) -> (TempDir, Bundle) {
        let dir = TempDir::new().unwrap();
        for (name, data) in files {
            std::fs::write(dir.path().join(name), data).unwrap();
        }
        let bundle = Bundle::local(dir.path().to_path_buf());
        (dir, bundle)
    }

    fn ignore(_: UploadEvent<'_>) {}

    fn input(bundle: &Bundle) -> DeploymentInput {
        DeploymentInput::from(bundle)
    }

    #[test]
    fn test_open_reaches_authenticated() {
        let session = open(MemoryRemote::with_files(&["/SD/kernel8.img"]));
        assert_eq!(session.state(), SessionState::Authenticated);
        assert_eq!(session.remote().commands, ["USER admin"]);
    }

    #[test]
    fn test_connect_then_login_walks_states() {
        let config = UpdaterConfig::default();
        let mut session = DeploymentSession::connect(
            |_| Ok(MemoryRemote::with_files(&[])),
            &target(),
            &config,
        )
        .unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        assert!(session.remote().commands.is_empty());

        session.login("admin", "admin").unwrap();
        assert_eq!(session.state(), SessionState::Authenticated);
    }

    #[test]
    fn test_refused_login_leaves_session_disconnected() {
        let mut remote = MemoryRemote::with_files(&[]);
        remote.fail_login = true;
        let mut session =
            DeploymentSession::connect(|_| Ok(remote), &target(), &UpdaterConfig::default())
                .unwrap();

        let err = session.login("admin", "wrong").unwrap_err();
        assert!(matches!(err, UpdaterError::Connection { .. }));
        assert_eq!(session.state(), SessionState::Disconnected);

        let report = session.close();
        assert_eq!(report.disconnect, Some(DisconnectOutcome::AlreadyClosed));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.remote().commands.contains(&"BYE".to_string()));
    }

    #[test]
    fn test_connect_failure_is_fatal() {
        let result = DeploymentSession::<MemoryRemote>::open(
            |_| Err(RemoteError::Disconnected("refused".to_string())),
            &target(),
            &UpdaterConfig::default(),
        );
        let err = result.unwrap_err();
        assert!(matches!(err, UpdaterError::Connection { .. }));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_login_failure_is_fatal() {
        let mut remote = MemoryRemote::with_files(&[]);
        remote.fail_login = true;
        let result = DeploymentSession::open(|_| Ok(remote), &target(), &UpdaterConfig::default());
        assert!(matches!(result, Err(UpdaterError::Connection { .. })));
    }

    #[test]
    fn test_existing_image_is_overwritten() {
        let (_dir, bundle) = local_bundle(&[("kernel8.img", b"new firmware")]);
        let mut session = open(MemoryRemote::with_files(&["/SD/kernel8.img"]));

        let report = run_deployment(&mut session, &input(&bundle), false, &mut ignore);

        assert_eq!(report.uploaded, ["kernel8.img"]);
        assert_eq!(report.disconnect, Some(DisconnectOutcome::Polite));
        assert_eq!(session.remote().stores(), ["/SD/kernel8.img"]);
        assert_eq!(
            session.remote().files.get("/SD/kernel8.img").unwrap(),
            b"new firmware"
        );
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_existence_check_lists_from_inside_firmware_dir() {
        let (_dir, bundle) = local_bundle(&[("kernel8.img", b"fw")]);
        let mut session = open(MemoryRemote::with_files(&["/SD/kernel8.img"]));

        run_deployment(&mut session, &input(&bundle), false, &mut ignore);

        assert_eq!(
            session.remote().commands,
            ["USER admin", "CWD /SD", "NLST", "STOR /SD/kernel8.img", "BYE"]
        );
    }

    #[test]
    fn test_missing_remote_image_is_never_created() {
        let (_dir, bundle) = local_bundle(&[("kernel8.img", b"a"), ("kernel8-rpi4.img", b"b")]);
        let mut session = open(MemoryRemote::with_files(&["/SD/kernel8.img"]));

        let report = run_deployment(&mut session, &input(&bundle), false, &mut ignore);

        assert_eq!(report.skipped, ["kernel8-rpi4.img"]);
        assert!(report.is_success());
        assert!(report.warnings.contains(&TransferWarning::RemoteMissing {
            file: "kernel8-rpi4.img".to_string()
        }));
        assert_eq!(session.remote().stores(), ["/SD/kernel8.img"]);
        assert!(!session.remote().files.contains_key("/SD/kernel8-rpi4.img"));
    }

    #[test]
    fn test_unlistable_firmware_dir_skips_everything() {
        let (_dir, bundle) = local_bundle(&[("kernel8.img", b"a")]);
        let mut remote = MemoryRemote::with_files(&["/SD/kernel8.img"]);
        remote.fail_list.insert("/SD".to_string());
        let mut session = open(remote);

        let report = run_deployment(&mut session, &input(&bundle), false, &mut ignore);

        assert_eq!(report.skipped, ["kernel8.img"]);
        assert!(session.remote().stores().is_empty());
    }

    #[test]
    fn test_severed_quit_is_a_normal_disconnect() {
        let (_dir, bundle) = local_bundle(&[("kernel8.img", b"a")]);
        let mut remote = MemoryRemote::with_files(&["/SD/kernel8.img"]);
        remote.quit_result = Some(|| RemoteError::Disconnected("connection reset".to_string()));
        let mut session = open(remote);

        let report = run_deployment(&mut session, &input(&bundle), false, &mut ignore);

        assert_eq!(report.disconnect, Some(DisconnectOutcome::DeviceRestarted));
        assert!(report.warnings.is_empty());
        assert!(report.is_success());
    }

    #[test]
    fn test_quit_protocol_error_is_a_warning() {
        let (_dir, bundle) = local_bundle(&[("kernel8.img", b"a")]);
        let mut remote = MemoryRemote::with_files(&["/SD/kernel8.img"]);
        remote.quit_result = Some(|| RemoteError::Protocol("500 unknown command".to_string()));
        let mut session = open(remote);

        let report = run_deployment(&mut session, &input(&bundle), false, &mut ignore);

        assert_eq!(
            report.disconnect,
            Some(DisconnectOutcome::Failed("500 unknown command".to_string()))
        );
        assert_eq!(
            report.warnings,
            [TransferWarning::QuitFailed {
                message: "500 unknown command".to_string()
            }]
        );
    }

    #[test]
    fn test_failed_upload_stops_transfers_and_skips_quit() {
        let (_dir, bundle) = local_bundle(&[("kernel7l.img", b"a"), ("kernel8.img", b"b")]);
        let mut remote = MemoryRemote::with_files(&["/SD/kernel7l.img", "/SD/kernel8.img"]);
        remote.fail_put = Some(|| RemoteError::Disconnected("broken pipe".to_string()));
        let mut session = open(remote);

        let report = run_deployment(&mut session, &input(&bundle), false, &mut ignore);

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].file, "kernel7l.img");
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(report.disconnect, Some(DisconnectOutcome::AlreadyClosed));
        assert_eq!(session.remote().stores(), ["/SD/kernel7l.img"]);
        assert!(!session.remote().commands.contains(&"BYE".to_string()));
    }

    #[test]
    fn test_lost_connection_marks_session_disconnected() {
        let (_dir, bundle) = local_bundle(&[("kernel8.img", b"fw")]);
        let mut remote = MemoryRemote::with_files(&["/SD/kernel8.img"]);
        remote.fail_put = Some(|| RemoteError::Disconnected("timed out".to_string()));
        let mut session = open(remote);

        session.upload_images(&input(&bundle).images, &mut ignore);
        assert_eq!(session.state(), SessionState::Disconnected);

        let sent = session.remote().commands.len();
        session.replace_performances(&input(&bundle));
        assert_eq!(session.remote().commands.len(), sent);
    }

    #[test]
    fn test_progress_events() {
        let data = vec![7_u8; 20_000];
        let (_dir, bundle) = local_bundle(&[("kernel8.img", &data)]);
        let mut session = open(MemoryRemote::with_files(&["/SD/kernel8.img"]));

        let mut percents = Vec::new();
        let mut started = None;
        let mut finished = None;
        run_deployment(&mut session, &input(&bundle), false, &mut |event| match event {
            UploadEvent::Started { total, .. } => started = Some(total),
            UploadEvent::Progress { percent, .. } => percents.push(percent),
            UploadEvent::Finished { bytes, .. } => finished = Some(bytes),
            UploadEvent::Failed { .. } => panic!("unexpected failure"),
        });

        assert_eq!(started, Some(20_000));
        assert_eq!(finished, Some(20_000));
        // 8192-byte chunks
        assert_eq!(percents, [40, 81, 100]);
    }

    #[test]
    fn test_performances_replaced_for_extracted_bundle() {
        let root = TempDir::new().unwrap();
        let scope = CleanupScope::new(root.path()).unwrap();
        let extracted = scope.extraction_dir(0);
        std::fs::create_dir_all(extracted.join("performance")).unwrap();
        std::fs::write(extracted.join("performance/000001_New.ini"), b"new").unwrap();
        std::fs::write(extracted.join("performance.ini"), b"[index]").unwrap();
        std::fs::write(extracted.join("kernel8.img"), b"fw").unwrap();
        let bundle = Bundle::extracted(vec![extracted], scope);

        let mut session = open(MemoryRemote::with_files(&[
            "/SD/kernel8.img",
            "/SD/performance.ini",
            "/SD/performance/000001_Old.ini",
        ]));
        let report = run_deployment(&mut session, &input(&bundle), true, &mut ignore);

        assert!(report.performances_replaced);
        let files = &session.remote().files;
        assert!(!files.contains_key("/SD/performance/000001_Old.ini"));
        assert_eq!(files.get("/SD/performance/000001_New.ini").unwrap(), b"new");
        assert_eq!(files.get("/SD/performance.ini").unwrap(), b"[index]");
        assert_eq!(report.uploaded, ["kernel8.img"]);
    }

    #[test]
    fn test_first_of_duplicate_images_is_uploaded() {
        let root = TempDir::new().unwrap();
        let scope = CleanupScope::new(root.path()).unwrap();
        let extracted = scope.extraction_dir(0);
        for (sub, data) in [("a", b"from a"), ("b", b"from b")] {
            std::fs::create_dir_all(extracted.join(sub)).unwrap();
            std::fs::write(extracted.join(sub).join("kernel8.img"), data).unwrap();
        }
        let bundle = Bundle::extracted(vec![extracted], scope);

        let mut session = open(MemoryRemote::with_files(&["/SD/kernel8.img"]));
        let report = run_deployment(&mut session, &input(&bundle), false, &mut ignore);

        assert_eq!(report.uploaded, ["kernel8.img"]);
        assert_eq!(session.remote().stores(), ["/SD/kernel8.img"]);
        assert_eq!(session.remote().files.get("/SD/kernel8.img").unwrap(), b"from a");
    }

    #[test]
    fn test_local_build_never_touches_performances() {
        let (dir, bundle) = local_bundle(&[("kernel8.img", b"fw")]);
        std::fs::create_dir(dir.path().join("performance")).unwrap();
        let mut session = open(MemoryRemote::with_files(&[
            "/SD/kernel8.img",
            "/SD/performance/000001_Old.ini",
        ]));

        let report = run_deployment(&mut session, &input(&bundle), true, &mut ignore);

        assert!(!report.performances_replaced);
        assert!(
            session
                .remote()
                .files
                .contains_key("/SD/performance/000001_Old.ini")
        );
    }

    #[test]
    fn test_close_twice() {
        let mut session = open(MemoryRemote::with_files(&[]));
        let report = session.close();
        assert_eq!(report.disconnect, Some(DisconnectOutcome::Polite));
        let again = session.close();
        assert!(again.disconnect.is_none());
        assert_eq!(
            session.remote().commands.iter().filter(|c| *c == "BYE").count(),
            1
        );
    }
}
