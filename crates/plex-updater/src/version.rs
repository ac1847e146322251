use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const DELIMITERS: &[char] = &['.', '-', '_', '+'];

/// One component of a version string.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// Empty or containing characters outside `[0-9A-Za-z]`.
    Invalid(String),
    /// ASCII letters and digits, at least one letter.
    Alpha(String),
    /// ASCII digits with leading zeros stripped.
    Numeric(String),
}

impl Segment {
    fn parse(raw: &str) -> Self {
        if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_alphanumeric()) {
            Segment::Invalid(raw.to_string())
        } else if raw.chars().all(|c| c.is_ascii_digit()) {
            let trimmed = raw.trim_start_matches('0');
            Segment::Numeric(if trimmed.is_empty() { "0" } else { trimmed }.to_string())
        } else {
            Segment::Alpha(raw.to_string())
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Segment::Invalid(_) => 0,
            Segment::Alpha(_) => 1,
            Segment::Numeric(_) => 2,
        }
    }
}

impl Ord for Segment {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            // Normalised digits: a longer run is a larger number.
            (Segment::Numeric(a), Segment::Numeric(b)) => {
                a.len().cmp(&b.len()).then_with(|| a.cmp(b))
            }
            (Segment::Alpha(a), Segment::Alpha(b)) => a.cmp(b),
            (Segment::Invalid(a), Segment::Invalid(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Segment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A parsed, totally ordered version string.
///
/// Plex versions look like `1.32.5.7349-8f4248874`. Identifiers are split on
/// `.`, `-`, `_` and `+` and compared segment by segment, so when one is a
/// prefix of the other the longer one is newer. Segments that are neither
/// numeric nor alphanumeric sort lowest: a mangled installed version compares
/// below a well-formed release and the run installs rather than skipping.
#[derive(Debug, Clone)]
pub struct VersionIdentifier {
    raw: String,
    segments: Vec<Segment>,
}

impl VersionIdentifier {
    /// Parse a version string. Never fails.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let segments = if raw.is_empty() {
            Vec::new()
        } else {
            raw.split(DELIMITERS).map(Segment::parse).collect()
        };
        Self {
            raw: raw.to_string(),
            segments,
        }
    }

    /// The string this identifier was parsed from (whitespace trimmed).
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether any segment failed to parse cleanly.
    pub fn has_invalid_segments(&self) -> bool {
        self.segments
            .iter()
            .any(|segment| matches!(segment, Segment::Invalid(_)))
    }
}

impl PartialEq for VersionIdentifier {
    fn eq(&self, other: &Self) -> bool {
        self.segments == other.segments
    }
}

impl Eq for VersionIdentifier {}

impl Ord for VersionIdentifier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.segments.cmp(&other.segments)
    }
}

impl PartialOrd for VersionIdentifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for VersionIdentifier {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for VersionIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for VersionIdentifier {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for VersionIdentifier {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// State of the tracked package in the local package database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstalledVersion {
    /// The package is not installed.
    NotInstalled,
    /// The package is installed at this version.
    Installed(VersionIdentifier),
}

impl InstalledVersion {
    /// The installed version, if any.
    pub fn version(&self) -> Option<&VersionIdentifier> {
        match self {
            InstalledVersion::NotInstalled => None,
            InstalledVersion::Installed(version) => Some(version),
        }
    }
}

impl fmt::Display for InstalledVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstalledVersion::NotInstalled => f.write_str("not installed"),
            InstalledVersion::Installed(version) => version.fmt(f),
        }
    }
}

/// Result of comparing the installed version against the latest release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateDecision {
    /// The installed version is current (or newer than the feed).
    UpToDate,
    /// The feed offers a strictly newer version.
    UpdateAvailable {
        /// Version that should be installed.
        latest: VersionIdentifier,
    },
}

/// Decide whether `latest` should replace `installed`.
pub fn compare(installed: &InstalledVersion, latest: &VersionIdentifier) -> UpdateDecision {
    let current = match installed {
        InstalledVersion::NotInstalled => {
            return UpdateDecision::UpdateAvailable {
                latest: latest.clone(),
            }
        }
        InstalledVersion::Installed(current) => current,
    };

    match latest.cmp(current) {
        Ordering::Greater => UpdateDecision::UpdateAvailable {
            latest: latest.clone(),
        },
        Ordering::Equal => UpdateDecision::UpToDate,
        Ordering::Less => {
            tracing::warn!(
                installed = %current,
                latest = %latest,
                "installed version is newer than the release feed"
            );
            UpdateDecision::UpToDate
        }
    }
}
