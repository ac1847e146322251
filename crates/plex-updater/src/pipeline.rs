use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::account::AccountClient;
use crate::acquirer::{Acquirer, ReleaseArtifact};
use crate::command::CommandRunner;
use crate::config::{RunConfiguration, RunMode};
use crate::error::UpdaterError;
use crate::fetcher::HttpTransport;
use crate::host::{HostContext, HostProbe};
use crate::installer::{Installer, RestartOutcome};
use crate::source::{FeedClient, PackageDatabase};
use crate::version::{compare, InstalledVersion, UpdateDecision, VersionIdentifier};

/// Pipeline stage, used to attribute failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Detecting the host and reading both versions.
    Discovering,
    /// Deciding whether to update.
    Comparing,
    /// Downloading the artifact.
    Acquiring,
    /// Running the native installer.
    Installing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Discovering => "discovery",
            Stage::Comparing => "comparison",
            Stage::Acquiring => "download",
            Stage::Installing => "installation",
        };
        f.write_str(name)
    }
}

/// A failed run: the stage it stopped in and the original error.
#[derive(thiserror::Error, Debug)]
#[error("{stage} failed: {source}")]
pub struct PipelineError {
    /// Stage that failed.
    pub stage: Stage,
    /// The underlying error, unchanged.
    #[source]
    pub source: UpdaterError,
}

impl PipelineError {
    fn at(stage: Stage) -> impl FnOnce(UpdaterError) -> PipelineError {
        move |source| PipelineError { stage, source }
    }

    /// Process exit status for this failure.
    pub fn exit_code(&self) -> u8 {
        self.source.exit_code()
    }
}

/// Terminal state of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Nothing to do.
    UpToDate {
        /// Installed version.
        installed: VersionIdentifier,
        /// Latest version in the feed.
        latest: VersionIdentifier,
    },
    /// Check-only run found a newer version.
    UpdateAvailable {
        /// Installed version.
        installed: InstalledVersion,
        /// Version that would be installed.
        latest: VersionIdentifier,
    },
    /// Download-only run fetched the artifact.
    Downloaded {
        /// Installed version.
        installed: InstalledVersion,
        /// The verified artifact.
        artifact: ReleaseArtifact,
    },
    /// The new version was installed.
    Installed {
        /// Version before the run.
        previous: InstalledVersion,
        /// Version now installed.
        current: VersionIdentifier,
        /// Post-install restart result.
        restart: RestartOutcome,
        /// Artifact that was installed.
        artifact_path: PathBuf,
        /// Whether the artifact was removed afterwards.
        cleaned_up: bool,
    },
}

impl RunOutcome {
    /// Process exit status; every successful outcome exits zero.
    pub fn exit_code(&self) -> u8 {
        0
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::UpToDate { installed, latest } => {
                write!(f, "Plex Media Server is up to date (installed {installed}, latest {latest})")
            }
            RunOutcome::UpdateAvailable { installed, latest } => {
                write!(f, "New version available: {latest} (installed {installed})")
            }
            RunOutcome::Downloaded { artifact, .. } => write!(
                f,
                "Version {} downloaded to {}",
                artifact.version,
                artifact.path.display()
            ),
            RunOutcome::Installed {
                previous,
                current,
                restart,
                ..
            } => {
                write!(f, "Plex Media Server updated from {previous} to {current}")?;
                match restart {
                    RestartOutcome::NotRequested => Ok(()),
                    RestartOutcome::Restarted => f.write_str("; service restarted"),
                    RestartOutcome::Failed(reason) => write!(f, "; service restart failed: {reason}"),
                }
            }
        }
    }
}

/// One configured update run.
pub struct Pipeline {
    config: RunConfiguration,
    mode: RunMode,
    ctx: HostContext,
    database: PackageDatabase,
    account: AccountClient,
    feed: FeedClient,
    acquirer: Acquirer,
    installer: Installer,
}

impl Pipeline {
    /// Assemble a pipeline for an already detected host.
    pub fn new(
        config: RunConfiguration,
        mode: RunMode,
        ctx: HostContext,
        transport: Arc<dyn HttpTransport>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let account = AccountClient::new(transport.clone(), config.plex_api_url.clone());
        let feed = FeedClient::new(transport.clone(), config.remote_endpoint.clone());
        let acquirer = Acquirer::new(transport, config.download_dir.clone()).force(mode.force_download);
        Self {
            database: PackageDatabase::new(runner.clone()),
            installer: Installer::new(runner),
            account,
            feed,
            acquirer,
            config,
            mode,
            ctx,
        }
    }

    /// Detect the host with `probe`, then assemble the pipeline.
    pub fn detect(
        config: RunConfiguration,
        mode: RunMode,
        probe: &HostProbe,
        transport: Arc<dyn HttpTransport>,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, PipelineError> {
        let ctx = probe
            .detect(config.package_format, config.architecture)
            .map_err(PipelineError::at(Stage::Discovering))?;
        Ok(Self::new(config, mode, ctx, transport, runner))
    }

    /// Execute the run. Every failure stops the run at its stage.
    pub async fn run(&self) -> Result<RunOutcome, PipelineError> {
        tracing::info!(stage = %Stage::Discovering, "checking for Plex Media Server updates");
        let installed = self
            .database
            .installed_version(&self.config.package_name, self.ctx.format)
            .await
            .map_err(PipelineError::at(Stage::Discovering))?;
        let credentials = self.config.credentials();
        let access = self
            .account
            .resolve(
                self.config.release_channel,
                credentials.as_ref(),
                self.config.plex_token.as_deref(),
            )
            .await
            .map_err(PipelineError::at(Stage::Discovering))?;
        let descriptor = self
            .feed
            .latest(&access, &self.ctx)
            .await
            .map_err(PipelineError::at(Stage::Discovering))?;

        tracing::debug!(stage = %Stage::Comparing, %installed, latest = %descriptor.version);
        let latest = match compare(&installed, &descriptor.version) {
            UpdateDecision::UpToDate => {
                let installed = installed.version().cloned().unwrap_or_else(|| descriptor.version.clone());
                tracing::info!(version = %installed, "already up to date");
                return Ok(RunOutcome::UpToDate {
                    installed,
                    latest: descriptor.version,
                });
            }
            UpdateDecision::UpdateAvailable { latest } => latest,
        };
        tracing::info!(%installed, %latest, "new version available");

        if self.mode.check_only {
            return Ok(RunOutcome::UpdateAvailable { installed, latest });
        }

        tracing::debug!(stage = %Stage::Acquiring);
        let artifact = self
            .acquirer
            .download(&descriptor)
            .await
            .map_err(PipelineError::at(Stage::Acquiring))?;

        if self.mode.download_only {
            return Ok(RunOutcome::Downloaded {
                installed,
                artifact,
            });
        }

        tracing::debug!(stage = %Stage::Installing);
        let result = self
            .installer
            .install(&artifact, self.ctx.format)
            .await
            .map_err(PipelineError::at(Stage::Installing))?;

        let restart = self
            .installer
            .restart_if_requested(
                self.config.restart_service_after_install,
                &self.config.service_name,
            )
            .await;

        let cleaned_up = self.config.cleanup_after_install && remove_artifact(&artifact).await;

        Ok(RunOutcome::Installed {
            previous: installed,
            current: latest,
            restart,
            artifact_path: result.package,
            cleaned_up,
        })
    }
}

async fn remove_artifact(artifact: &ReleaseArtifact) -> bool {
    match tokio::fs::remove_file(&artifact.path).await {
        Ok(()) => {
            tracing::info!(path = %artifact.path.display(), "removed installed artifact");
            true
        }
        Err(err) => {
            tracing::warn!(path = %artifact.path.display(), %err, "could not remove installed artifact");
            false
        }
    }
}
