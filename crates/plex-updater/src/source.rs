use std::fmt;
use std::sync::Arc;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::account::FeedAccess;
use crate::command::{CommandLine, CommandRunner};
use crate::error::{Result, UpdaterError};
use crate::fetcher::HttpTransport;
use crate::host::{HostContext, PackageFormat};
use crate::manifest::{ArtifactDescriptor, ReleaseFeed};
use crate::version::{InstalledVersion, VersionIdentifier};

const DPKG_QUERY: &str = "dpkg-query";
const RPM: &str = "rpm";
const DPKG_INSTALLED: &str = "install ok installed";

/// Release track to follow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseChannel {
    /// Public releases.
    #[default]
    Public,
    /// Plex Pass beta releases; requires a Plex Pass account.
    Beta,
}

impl fmt::Display for ReleaseChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseChannel::Public => f.write_str("public"),
            ReleaseChannel::Beta => f.write_str("beta"),
        }
    }
}

/// Reads the installed version from the native package database.
#[derive(Clone)]
pub struct PackageDatabase {
    runner: Arc<dyn CommandRunner>,
}

impl PackageDatabase {
    /// Query through `runner`.
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Installed version of `package`, or [`InstalledVersion::NotInstalled`].
    pub async fn installed_version(
        &self,
        package: &str,
        format: PackageFormat,
    ) -> Result<InstalledVersion> {
        let command = match format {
            PackageFormat::Deb => CommandLine::new(
                DPKG_QUERY,
                ["-W", "--showformat=${Status}\\t${Version}", package],
            ),
            PackageFormat::Rpm => CommandLine::new(
                RPM,
                ["-q", "--queryformat=%{VERSION}-%{RELEASE}\\n", package],
            ),
        };

        let output = self.runner.run(&command).await.map_err(|err| {
            UpdaterError::PackageQueryFailed(format!("cannot run `{command}`: {err}"))
        })?;

        let installed = match format {
            PackageFormat::Deb => parse_dpkg_query(package, output.code, &output.stdout, &output.stderr),
            PackageFormat::Rpm => parse_rpm_query(package, output.code, &output.stdout),
        }
        .ok_or_else(|| {
            UpdaterError::PackageQueryFailed(format!(
                "`{command}` failed ({}): {}",
                output.status(),
                output.combined().trim()
            ))
        })?;

        tracing::info!(package, installed = %installed, "installed version");
        Ok(installed)
    }
}

fn parse_dpkg_query(
    package: &str,
    code: Option<i32>,
    stdout: &str,
    stderr: &str,
) -> Option<InstalledVersion> {
    match code {
        Some(0) => {
            let (status, version) = stdout.trim_end().split_once('\t')?;
            if status.trim() == DPKG_INSTALLED && !version.trim().is_empty() {
                Some(InstalledVersion::Installed(VersionIdentifier::parse(version)))
            } else {
                // Removed packages linger as `deinstall ok config-files`.
                Some(InstalledVersion::NotInstalled)
            }
        }
        Some(1) if stderr.contains("no packages found") && stderr.contains(package) => {
            Some(InstalledVersion::NotInstalled)
        }
        _ => None,
    }
}

fn parse_rpm_query(package: &str, code: Option<i32>, stdout: &str) -> Option<InstalledVersion> {
    match code {
        // Several installed versions print one line each; track the newest.
        Some(0) => stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(VersionIdentifier::parse)
            .max()
            .map(InstalledVersion::Installed),
        Some(1) if stdout.contains(&format!("package {package} is not installed")) => {
            Some(InstalledVersion::NotInstalled)
        }
        _ => None,
    }
}

/// Looks up the latest release in the remote feed.
#[derive(Clone)]
pub struct FeedClient {
    transport: Arc<dyn HttpTransport>,
    endpoint: Url,
}

impl FeedClient {
    /// Client for the feed at `endpoint`.
    pub fn new(transport: Arc<dyn HttpTransport>, endpoint: Url) -> Self {
        Self {
            transport,
            endpoint,
        }
    }

    /// Feed URL for `access`, and the channel actually used.
    fn channel_url(&self, access: &FeedAccess) -> (Url, ReleaseChannel) {
        let mut url = self.endpoint.clone();
        match access.channel {
            ReleaseChannel::Beta if access.token.is_some() => {
                url.query_pairs_mut().append_pair("channel", "plexpass");
                (url, ReleaseChannel::Beta)
            }
            ReleaseChannel::Beta => {
                tracing::warn!(
                    "beta channel requires a Plex Pass token; using the public release feed"
                );
                (url, ReleaseChannel::Public)
            }
            ReleaseChannel::Public => (url, ReleaseChannel::Public),
        }
    }

    /// The newest release for this host on the channel in `access`.
    pub async fn latest(&self, access: &FeedAccess, ctx: &HostContext) -> Result<ArtifactDescriptor> {
        let (url, effective) = self.channel_url(access);
        tracing::debug!(%url, channel = %effective, "fetching release feed");

        let bytes = self
            .transport
            .fetch_bytes(&url, access.token.as_deref())
            .await
            .map_err(UpdaterError::remote)?;
        let feed = ReleaseFeed::from_slice(&bytes)?;
        let artifact = feed.select(ctx)?;

        tracing::info!(
            latest = %artifact.version,
            build = %artifact.build,
            channel = %effective,
            "latest release"
        );
        Ok(artifact)
    }
}
