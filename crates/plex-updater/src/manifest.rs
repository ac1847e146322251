use std::fmt;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{Result, UpdaterError};
use crate::host::HostContext;
use crate::version::VersionIdentifier;

/// Top level of the Plex downloads feed (`/api/downloads/5.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseFeed {
    /// Desktop/server platforms keyed by operating system.
    pub computer: FeedPlatforms,
}

/// Platforms the updater cares about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedPlatforms {
    /// Linux server releases.
    #[serde(rename = "Linux")]
    pub linux: PlatformRelease,
}

/// Release information for one platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformRelease {
    /// Version shared by every build of this release.
    pub version: String,
    /// Unix timestamp (seconds) of the release.
    #[serde(default)]
    pub release_date: Option<u64>,
    /// Changelog: features added.
    #[serde(default)]
    pub items_added: Option<String>,
    /// Changelog: issues fixed.
    #[serde(default)]
    pub items_fixed: Option<String>,
    /// Per architecture/distribution builds.
    #[serde(default)]
    pub releases: Vec<BuildEntry>,
}

/// A single downloadable build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildEntry {
    /// Human readable description.
    #[serde(default)]
    pub label: String,
    /// Architecture identifier, e.g. `linux-x86_64`.
    pub build: String,
    /// Distribution family, `debian` or `redhat`.
    pub distro: String,
    /// Download URL of the package.
    pub url: String,
    /// Hex digest of the package, when published.
    #[serde(default)]
    pub checksum: Option<String>,
    /// Build-specific version, overriding the platform version.
    #[serde(default)]
    pub version: Option<String>,
}

impl ReleaseFeed {
    /// Decode a feed document.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|err| UpdaterError::RemoteUnavailable(format!("malformed release feed: {err}")))
    }

    /// Select the build matching the host architecture and package format.
    pub fn select(&self, ctx: &HostContext) -> Result<ArtifactDescriptor> {
        let linux = &self.computer.linux;
        let build = ctx.architecture.feed_build();
        let distro = ctx.format.feed_distro();

        let entry = linux
            .releases
            .iter()
            .find(|entry| entry.build == build && entry.distro == distro)
            .ok_or_else(|| UpdaterError::NoMatchingBuild {
                architecture: build.to_string(),
                format: ctx.format.to_string(),
            })?;

        let url = Url::parse(&entry.url).map_err(|err| {
            UpdaterError::RemoteUnavailable(format!("invalid download URL `{}`: {err}", entry.url))
        })?;
        let version = VersionIdentifier::parse(entry.version.as_deref().unwrap_or(&linux.version));
        let checksum = match entry.checksum.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => Some(Checksum::parse(raw)?),
            _ => None,
        };
        let file_name = artifact_file_name(&url, &version, ctx);

        Ok(ArtifactDescriptor {
            version,
            url,
            build: entry.build.clone(),
            format: ctx.format,
            checksum,
            file_name,
            release_date: linux.release_date,
        })
    }
}

/// File name for the artifact: the last URL path segment when it looks like a
/// package, otherwise a name derived from the version.
fn artifact_file_name(url: &Url, version: &VersionIdentifier, ctx: &HostContext) -> String {
    let extension = ctx.format.extension();
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| {
            name.ends_with(&format!(".{extension}"))
                && !name.starts_with('.')
                && name.chars().all(is_file_name_char)
        })
        .map(str::to_string)
        .unwrap_or_else(|| {
            let version: String = version
                .as_str()
                .chars()
                .map(|c| if is_file_name_char(c) { c } else { '_' })
                .collect();
            format!("plexmediaserver_{version}_{}.{extension}", ctx.architecture)
        })
}

fn is_file_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '+')
}

/// Integrity value published for an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checksum {
    /// SHA-1 digest, lowercase hex (what the Plex feed publishes).
    Sha1(String),
    /// SHA-256 digest, lowercase hex.
    Sha256(String),
}

impl Checksum {
    /// Parse a hex digest, picking the algorithm from its length.
    pub fn parse(raw: &str) -> Result<Self> {
        let hex = raw.trim().to_ascii_lowercase();
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(UpdaterError::RemoteUnavailable(format!(
                "checksum `{raw}` is not hexadecimal"
            )));
        }
        match hex.len() {
            40 => Ok(Checksum::Sha1(hex)),
            64 => Ok(Checksum::Sha256(hex)),
            len => Err(UpdaterError::RemoteUnavailable(format!(
                "checksum of {len} hex digits is neither SHA-1 nor SHA-256"
            ))),
        }
    }

    /// Expected digest in lowercase hex.
    pub fn hex(&self) -> &str {
        match self {
            Checksum::Sha1(hex) | Checksum::Sha256(hex) => hex,
        }
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Checksum::Sha1(hex) => write!(f, "sha1:{hex}"),
            Checksum::Sha256(hex) => write!(f, "sha256:{hex}"),
        }
    }
}

/// The release artifact selected for this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    /// Version the artifact installs.
    pub version: VersionIdentifier,
    /// Download location.
    pub url: Url,
    /// Feed build identifier.
    pub build: String,
    /// Package format of the artifact.
    pub format: crate::host::PackageFormat,
    /// Declared integrity value, if any.
    pub checksum: Option<Checksum>,
    /// Local file name inside the download directory.
    pub file_name: String,
    /// Release timestamp from the feed.
    pub release_date: Option<u64>,
}
