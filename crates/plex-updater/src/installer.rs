use std::path::PathBuf;
use std::sync::Arc;

use crate::acquirer::ReleaseArtifact;
use crate::command::{CommandLine, CommandRunner};
use crate::error::{Result, UpdaterError};
use crate::host::PackageFormat;

const DPKG: &str = "dpkg";
const RPM: &str = "rpm";
const SYSTEMCTL: &str = "systemctl";

/// Result of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallResult {
    /// Package file that was installed.
    pub package: PathBuf,
    /// Command that performed the install.
    pub command: CommandLine,
    /// Installer output, kept for the log.
    pub output: String,
}

/// What happened to the service after installing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartOutcome {
    /// No restart was configured.
    NotRequested,
    /// The service restarted.
    Restarted,
    /// The restart failed; the install itself still succeeded.
    Failed(String),
}

/// Invokes the host's package manager.
#[derive(Clone)]
pub struct Installer {
    runner: Arc<dyn CommandRunner>,
}

impl Installer {
    /// Installer running commands through `runner`.
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Command that installs `artifact` for `format`.
    pub fn install_command(artifact: &ReleaseArtifact, format: PackageFormat) -> CommandLine {
        let package = artifact.path.to_string_lossy().into_owned();
        match format {
            // Upgrade mode replaces an existing installation instead of adding a second one.
            PackageFormat::Rpm => CommandLine::new(RPM, ["-Uvh".to_string(), package]),
            PackageFormat::Deb => CommandLine::new(DPKG, ["-i".to_string(), package]),
        }
    }

    /// Install `artifact` with the native tool for `format`.
    pub async fn install(&self, artifact: &ReleaseArtifact, format: PackageFormat) -> Result<InstallResult> {
        let command = Self::install_command(artifact, format);
        tracing::info!(%command, "installing");

        let output = self
            .runner
            .run(&command)
            .await
            .map_err(|err| UpdaterError::InstallFailed {
                status: format!("could not start `{command}`"),
                output: err.to_string(),
            })?;

        if !output.success() {
            tracing::error!(%command, status = %output.status(), "installer failed:\n{}", output.combined());
            return Err(UpdaterError::InstallFailed {
                status: output.status(),
                output: output.combined(),
            });
        }

        tracing::debug!("installer output:\n{}", output.combined());
        Ok(InstallResult {
            package: artifact.path.clone(),
            command,
            output: output.combined(),
        })
    }

    /// Restart `service` through systemd.
    pub async fn restart_service(&self, service: &str) -> Result<()> {
        let command = CommandLine::new(SYSTEMCTL, ["restart", service]);
        tracing::info!(%command, "restarting service");

        let output = self
            .runner
            .run(&command)
            .await
            .map_err(|err| UpdaterError::RestartFailed(format!("could not start `{command}`: {err}")))?;

        if output.success() {
            Ok(())
        } else {
            Err(UpdaterError::RestartFailed(format!(
                "`{command}` failed ({}): {}",
                output.status(),
                output.combined().trim()
            )))
        }
    }

    /// Restart `service` when requested, reporting failures without propagating them.
    pub async fn restart_if_requested(&self, requested: bool, service: &str) -> RestartOutcome {
        if !requested {
            return RestartOutcome::NotRequested;
        }
        match self.restart_service(service).await {
            Ok(()) => RestartOutcome::Restarted,
            Err(err) => {
                tracing::warn!(%err, "install succeeded but the service did not restart");
                RestartOutcome::Failed(err.to_string())
            }
        }
    }
}
