//! Unattended updater for Plex Media Server on RPM and DEB hosts.
//!
//! One run detects the host's package format, reads the installed version
//! from the native package database, signs in to plex.tv when an account is
//! configured, looks up the latest release for this architecture in the Plex
//! downloads feed (the Plex Pass beta feed when the account has it), and
//! when the feed is newer downloads the package (verifying its checksum
//! before it is moved into place) and installs it with `rpm -Uvh` or
//! `dpkg -i`. Failures stop the run
//! at the stage where they happen and map to distinct exit codes so a
//! scheduler can alert on them; there are no in-run retries.
//!
//! ```ignore
//! use std::sync::Arc;
//! use plex_updater::{
//!     HostProbe, Pipeline, ReqwestTransport, RunConfiguration, RunMode, SystemCommandRunner,
//! };
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RunConfiguration::load(&RunConfiguration::default_path())?;
//! let transport = ReqwestTransport::builder()
//!     .metadata_timeout(config.metadata_timeout())
//!     .download_timeout(config.download_timeout())
//!     .build()?;
//! let mode = config.mode(RunMode::default())?;
//! let pipeline = Pipeline::detect(
//!     config,
//!     mode,
//!     &HostProbe::default(),
//!     Arc::new(transport),
//!     Arc::new(SystemCommandRunner),
//! )?;
//! println!("{}", pipeline.run().await?);
//! # Ok(())
//! # }
//! ```

mod account;
mod acquirer;
mod command;
mod config;
mod error;
mod fetcher;
mod host;
mod installer;
#[cfg(unix)]
mod lock;
mod manifest;
mod pipeline;
mod source;
mod version;

pub use account::{AccountClient, Credentials, FeedAccess, PlexAccount};
pub use acquirer::{Acquirer, ReleaseArtifact};
pub use command::{CommandLine, CommandOutput, CommandRunner, SystemCommandRunner};
pub use config::{RunConfiguration, RunMode};
pub use error::{Result, UpdaterError};
pub use fetcher::{
    DownloadSink, FetchError, HttpTransport, ReqwestTransport, ReqwestTransportBuilder,
};
pub use host::{Architecture, HostContext, HostProbe, PackageFormat};
pub use installer::{InstallResult, Installer, RestartOutcome};
#[cfg(unix)]
pub use lock::RunLock;
pub use manifest::{ArtifactDescriptor, BuildEntry, Checksum, PlatformRelease, ReleaseFeed};
pub use pipeline::{Pipeline, PipelineError, RunOutcome, Stage};
pub use source::{FeedClient, PackageDatabase, ReleaseChannel};
pub use version::{compare, InstalledVersion, UpdateDecision, VersionIdentifier};
