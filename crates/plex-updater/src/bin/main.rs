//! Command-line entry point for the Plex Media Server updater.
//!
//! Intended to be run from cron or a systemd timer: it performs one check,
//! optionally downloads and installs, and exits with a status that tells the
//! scheduler what happened.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use plex_updater::{
    HostProbe, Pipeline, ReqwestTransport, RunConfiguration, RunMode, SystemCommandRunner,
    UpdaterError,
};
use tracing_subscriber::{fmt, EnvFilter};

/// Checks for a new Plex Media Server version, then downloads and installs it.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Only check for a newer version; do not download or install it
    #[arg(short, long, alias = "check_only", default_value_t = false)]
    check_only: bool,

    /// Only download the new version; do not install it
    #[arg(short = 's', long, aliases = ["skip-install", "skip_install"], default_value_t = false)]
    download_only: bool,

    /// Download again even if a verified package is already present
    #[arg(short, long, default_value_t = false)]
    force_download: bool,

    /// Enable debug logging
    #[arg(short, long, default_value_t = false)]
    debug: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if args.debug {
            EnvFilter::new("info,plex_updater=debug")
        } else {
            EnvFilter::new("info")
        }
    });
    fmt().with_env_filter(filter).with_target(false).init();

    match run(args).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

async fn run(args: Args) -> anyhow::Result<u8> {
    let config_path = args.config.clone().unwrap_or_else(RunConfiguration::default_path);
    let config = RunConfiguration::load(&config_path)?;
    let mode = config.mode(RunMode {
        check_only: args.check_only,
        download_only: args.download_only,
        force_download: args.force_download,
    })?;

    #[cfg(unix)]
    let _lock = {
        let lock = plex_updater::RunLock::acquire(&config.download_dir)?;
        tracing::debug!(path = %lock.path().display(), "run lock acquired");
        lock
    };

    let transport = ReqwestTransport::builder()
        .metadata_timeout(config.metadata_timeout())
        .download_timeout(config.download_timeout())
        .build()
        .context("failed to build HTTP client")?;

    let pipeline = Pipeline::detect(
        config,
        mode,
        &HostProbe::default(),
        Arc::new(transport),
        Arc::new(SystemCommandRunner),
    )?;

    let outcome = pipeline.run().await?;
    println!("{outcome}");
    Ok(outcome.exit_code())
}

/// Exit status for an error that escaped the run.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(err) = err.downcast_ref::<plex_updater::PipelineError>() {
        return err.exit_code();
    }
    if let Some(err) = err.downcast_ref::<UpdaterError>() {
        return err.exit_code();
    }
    1
}
