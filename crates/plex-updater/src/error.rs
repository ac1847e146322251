use std::path::PathBuf;

use crate::fetcher::FetchError;

/// Convenient result alias for updater operations.
pub type Result<T> = std::result::Result<T, UpdaterError>;

/// Errors that can occur while checking for, downloading or installing an update.
#[derive(thiserror::Error, Debug)]
pub enum UpdaterError {
    /// The configuration file is missing, malformed or fails validation.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Neither a DEB nor an RPM package database could be identified.
    #[error("cannot determine host package format: {0}")]
    FormatUndetected(String),
    /// Querying the native package database failed for a reason other than
    /// the package being absent.
    #[error("package database query failed: {0}")]
    PackageQueryFailed(String),
    /// plex.tv rejected the configured credentials or token.
    #[error("plex.tv authentication failed: {0}")]
    AuthenticationFailed(String),
    /// The release feed could not be fetched or decoded.
    #[error("release feed unavailable: {0}")]
    RemoteUnavailable(String),
    /// The release feed has no build for this architecture and format.
    #[error("no {format} build for {architecture} in the release feed")]
    NoMatchingBuild {
        /// Build identifier that was searched for.
        architecture: String,
        /// Package format that was searched for.
        format: String,
    },
    /// Transferring the release artifact failed.
    #[error("download failed: {0}")]
    DownloadFailed(String),
    /// The downloaded artifact hash did not match the feed.
    #[error("artifact integrity check failed (expected {expected}, got {actual})")]
    ChecksumMismatch {
        /// Declared digest, lowercase hex.
        expected: String,
        /// Computed digest, lowercase hex.
        actual: String,
    },
    /// The download directory cannot hold the artifact.
    #[error("insufficient space in {}: {detail}", dir.display())]
    InsufficientSpace {
        /// Directory the artifact was being written to.
        dir: PathBuf,
        /// Required/available figures when known.
        detail: String,
    },
    /// The native installer exited unsuccessfully or could not be started.
    #[error("installation failed ({status}):\n{output}")]
    InstallFailed {
        /// Exit status description.
        status: String,
        /// Captured stdout and stderr of the installer, verbatim.
        output: String,
    },
    /// Restarting the service after a successful install failed.
    #[error("service restart failed: {0}")]
    RestartFailed(String),
    /// Another run already holds the updater lock.
    #[error("another update run holds {}", .0.display())]
    AlreadyRunning(PathBuf),
    /// Failed to perform an I/O operation.
    #[error("filesystem operation failed: {0}")]
    Io(#[from] std::io::Error),
}

impl UpdaterError {
    /// Helper for wrapping validation failures.
    pub fn config(msg: impl Into<String>) -> Self {
        UpdaterError::Config(msg.into())
    }

    /// Map a transport failure into the feed stage's error kind.
    pub(crate) fn remote(err: FetchError) -> Self {
        UpdaterError::RemoteUnavailable(err.to_string())
    }

    /// Map a transport failure during sign-in or the account check.
    pub(crate) fn account(err: FetchError) -> Self {
        match err {
            FetchError::Status {
                status: 401 | 403 | 422,
                ..
            } => UpdaterError::AuthenticationFailed(err.to_string()),
            other => UpdaterError::RemoteUnavailable(other.to_string()),
        }
    }

    /// Map a transport failure into the download stage's error kind.
    pub(crate) fn download(err: FetchError, dir: &std::path::Path) -> Self {
        match err {
            FetchError::InsufficientSpace(detail) => UpdaterError::InsufficientSpace {
                dir: dir.to_path_buf(),
                detail,
            },
            other => UpdaterError::DownloadFailed(other.to_string()),
        }
    }

    /// Process exit status reported for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            UpdaterError::Io(_) => 1,
            UpdaterError::Config(_) => 2,
            UpdaterError::RemoteUnavailable(_) => 3,
            UpdaterError::NoMatchingBuild { .. } => 4,
            UpdaterError::DownloadFailed(_) => 5,
            UpdaterError::ChecksumMismatch { .. } => 6,
            UpdaterError::InsufficientSpace { .. } => 7,
            UpdaterError::InstallFailed { .. } => 8,
            UpdaterError::FormatUndetected(_) => 9,
            UpdaterError::PackageQueryFailed(_) => 10,
            UpdaterError::AlreadyRunning(_) => 11,
            // Never fatal on its own; only reachable if a caller escalates it.
            UpdaterError::RestartFailed(_) => 12,
            UpdaterError::AuthenticationFailed(_) => 13,
        }
    }
}
