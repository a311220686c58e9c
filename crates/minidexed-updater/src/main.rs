// SPDX-License-Identifier: GPL-3.0-or-later

//! MiniDexed Updater - Entry point for the updater binary

use anyhow::Context;
use clap::Parser;
use indicatif::ProgressBar;
use minidexed_updater::deploy::{
    DeploymentInput, DeploymentReport, DeploymentSession, DisconnectOutcome, FtpSession,
    UploadEvent, run_deployment,
};
use minidexed_updater::discovery::{DiscoveredDevice, discover_devices};
use minidexed_updater::progress::upload_bar;
use minidexed_updater::selector::{
    StdioPrompter, confirm_performance_update, select_channel, select_device,
};
use minidexed_updater::{
    ChannelMenu, Result, UpdaterConfig, UpdaterError, channel_from_flags, has_local_build,
    load_config, resolve,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "minidexed-updater")]
#[command(about = "Update MiniDexed devices on the local network over FTP", long_about = None)]
struct Cli {
    /// Verbose FTP debug output
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// IP address of the device to upload to (skips mDNS discovery)
    #[arg(long)]
    ip: Option<String>,

    /// Release to deploy: 1 = latest official, 2 = continuous, 3 = local build
    #[arg(long)]
    version: Option<u8>,

    /// Pull request number, #number or URL to deploy the build of
    #[arg(long, conflicts_with = "version")]
    pr: Option<String>,

    /// GitHub token for downloading pull request artifacts
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    /// Replace the performances on the device without asking
    #[arg(long)]
    update_performances: bool,

    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,
}

fn init_tracing(verbose: bool) {
    let default_directives = if verbose {
        "minidexed_updater=debug,suppaftp=trace"
    } else {
        "minidexed_updater=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .init();
}

fn build_runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let runtime = match build_runtime() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    // Dropping `run` on interrupt drops the bundle and with it the temp files
    let result = runtime.block_on(async {
        tokio::select! {
            result = run(cli) => result,
            () = shutdown_signal() => {
                warn!("Interrupted");
                Err(UpdaterError::Interrupted)
            }
        }
    });
    // Blocking prompts and FTP transfers cannot be cancelled; don't wait on them
    runtime.shutdown_timeout(Duration::from_secs(1));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

/// Run blocking work (stdin prompts, FTP) off the async workers
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| UpdaterError::Io(std::io::Error::other(e)))?
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(token) = cli.github_token.filter(|t| !t.is_empty()) {
        config.github_token = Some(token);
    }

    let menu = ChannelMenu::new(has_local_build(&config));
    let channel = match channel_from_flags(&menu, cli.version, cli.pr.as_deref())? {
        Some(channel) => channel,
        None => blocking(move || select_channel(&menu, &mut StdioPrompter)).await?,
    };
    info!("Selected: {channel}");

    let bundle = resolve(&config, channel).await?;

    let update_performances = if bundle.is_local() {
        false
    } else if cli.update_performances {
        true
    } else {
        blocking(|| confirm_performance_update(&mut StdioPrompter)).await?
    };

    let target = match cli.ip {
        Some(ip) => DiscoveredDevice::explicit(&ip),
        None => {
            let devices = discover_devices(config.discovery_window()).await?;
            blocking(move || select_device(&devices, &mut StdioPrompter)).await?
        }
    };

    let input = DeploymentInput::from(&bundle);
    let report =
        blocking(move || deploy(&config, &target, &input, update_performances)).await?;
    print_report(&report);

    drop(bundle);
    Ok(())
}

fn deploy(
    config: &UpdaterConfig,
    target: &DiscoveredDevice,
    input: &DeploymentInput,
    update_performances: bool,
) -> Result<DeploymentReport> {
    let mut session = DeploymentSession::open(
        |address| {
            FtpSession::connect(
                address,
                config.ftp_port,
                config.connect_timeout(),
                config.upload_chunk_size,
            )
        },
        target,
        config,
    )?;

    let mut bar: Option<ProgressBar> = None;
    let report = run_deployment(&mut session, input, update_performances, &mut |event| {
        match event {
            UploadEvent::Started { file_name, total } => bar = Some(upload_bar(file_name, total)),
            UploadEvent::Progress { sent, .. } => {
                if let Some(bar) = &bar {
                    bar.set_position(sent);
                }
            }
            UploadEvent::Finished { .. } => {
                if let Some(bar) = bar.take() {
                    bar.finish();
                }
            }
            UploadEvent::Failed { message, .. } => {
                if let Some(bar) = bar.take() {
                    bar.abandon_with_message(message.to_string());
                }
            }
        }
    });
    Ok(report)
}

fn print_report(report: &DeploymentReport) {
    for failure in &report.failed {
        error!("Upload of {} failed: {}", failure.file, failure.message);
    }
    if report.performances_replaced {
        info!("Performances replaced.");
    }
    info!(
        "Uploaded {} image(s), skipped {}, {} warning(s).",
        report.uploaded.len(),
        report.skipped.len(),
        report.warnings.len()
    );
    match &report.disconnect {
        Some(DisconnectOutcome::Polite | DisconnectOutcome::DeviceRestarted) => {
            info!("Done. The device will restart with the new firmware.");
        }
        Some(DisconnectOutcome::Failed(message)) => warn!("Session ended with an error: {message}"),
        Some(DisconnectOutcome::AlreadyClosed) | None => {
            warn!("Connection to the device was lost during the update.");
        }
    }
}
