use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tempfile::{NamedTempFile, PersistError};
use tokio::io::AsyncWriteExt;
use tokio::task;

use crate::error::{Result, UpdaterError};
use crate::fetcher::{DownloadSink, FetchError, HttpTransport};
use crate::host::PackageFormat;
use crate::manifest::{ArtifactDescriptor, Checksum};
use crate::version::VersionIdentifier;

const TEMP_PREFIX: &str = ".plexmediaserver-";
const TEMP_SUFFIX: &str = ".part";

/// A verified package file ready for the installer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseArtifact {
    /// Final location of the package.
    pub path: PathBuf,
    /// Version the package installs.
    pub version: VersionIdentifier,
    /// Package format.
    pub format: PackageFormat,
    /// Integrity value the file was verified against.
    pub checksum: Option<Checksum>,
    /// Bytes fetched over the network in this run.
    pub bytes_transferred: u64,
    /// Whether a previously downloaded file was reused.
    pub reused: bool,
}

/// Downloads release artifacts into a directory, never exposing an
/// unverified file at the final path.
#[derive(Clone)]
pub struct Acquirer {
    transport: Arc<dyn HttpTransport>,
    download_dir: PathBuf,
    force: bool,
}

impl Acquirer {
    /// Acquirer storing artifacts in `download_dir`.
    pub fn new(transport: Arc<dyn HttpTransport>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            transport,
            download_dir: download_dir.into(),
            force: false,
        }
    }

    /// Always download, even if a verified artifact is already present.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Download `descriptor` and return the verified artifact.
    pub async fn download(&self, descriptor: &ArtifactDescriptor) -> Result<ReleaseArtifact> {
        let dir = self.download_dir.as_path();
        tokio::fs::create_dir_all(dir).await?;
        let target = dir.join(&descriptor.file_name);

        if !self.force && target.exists() {
            if verify_existing(&target, descriptor.checksum.clone()).await? {
                tracing::info!(path = %target.display(), "reusing verified artifact");
                return Ok(self.artifact(descriptor, target, 0, true));
            }
            tracing::warn!(path = %target.display(), "existing artifact failed verification; replacing");
            tokio::fs::remove_file(&target).await?;
        }

        tracing::info!(url = %descriptor.url, path = %target.display(), "downloading artifact");
        let temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(TEMP_SUFFIX)
            .tempfile_in(dir)?;
        let file = tokio::fs::File::from_std(temp.reopen()?);
        let mut writer = ArtifactWriter::new(file, descriptor.checksum.as_ref(), dir);

        let transferred = self
            .transport
            .download(&descriptor.url, &mut writer)
            .await
            .map_err(|err| UpdaterError::download(err, dir))?;
        let actual = writer.finish().await.map_err(|err| UpdaterError::download(err, dir))?;

        if let (Some(expected), Some(actual)) = (&descriptor.checksum, actual) {
            if expected.hex() != actual {
                // Dropping `temp` deletes the partial file.
                return Err(UpdaterError::ChecksumMismatch {
                    expected: expected.hex().to_string(),
                    actual,
                });
            }
        }

        persist(temp, &target)?;
        tracing::info!(bytes = transferred, path = %target.display(), "artifact downloaded");
        Ok(self.artifact(descriptor, target, transferred, false))
    }

    fn artifact(
        &self,
        descriptor: &ArtifactDescriptor,
        path: PathBuf,
        bytes_transferred: u64,
        reused: bool,
    ) -> ReleaseArtifact {
        ReleaseArtifact {
            path,
            version: descriptor.version.clone(),
            format: descriptor.format,
            checksum: descriptor.checksum.clone(),
            bytes_transferred,
            reused,
        }
    }
}

fn persist(temp: NamedTempFile, target: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o644))?;
    }
    temp.persist(target).map_err(map_persist_error)?;
    Ok(())
}

fn map_persist_error(err: PersistError) -> UpdaterError {
    UpdaterError::Io(err.error)
}

/// Whether the file at `path` matches `checksum`. Without a declared
/// checksum any non-empty file counts, since only verified downloads are
/// ever renamed into place.
async fn verify_existing(path: &Path, checksum: Option<Checksum>) -> Result<bool> {
    let path = path.to_path_buf();
    task::spawn_blocking(move || -> Result<bool> {
        let Some(checksum) = checksum else {
            return Ok(fs::metadata(&path)?.len() > 0);
        };
        let mut file = fs::File::open(&path)?;
        let mut hasher = Hasher::for_checksum(&checksum);
        io::copy(&mut file, &mut hasher)?;
        Ok(hasher.finalize_hex() == checksum.hex())
    })
    .await
    .map_err(|err| UpdaterError::Io(io::Error::other(format!("task join error: {err}"))))?
}

enum Hasher {
    Sha1(Sha1),
    Sha256(Sha256),
}

impl Hasher {
    fn for_checksum(checksum: &Checksum) -> Self {
        match checksum {
            Checksum::Sha1(_) => Hasher::Sha1(Sha1::new()),
            Checksum::Sha256(_) => Hasher::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, bytes: &[u8]) {
        match self {
            Hasher::Sha1(hasher) => hasher.update(bytes),
            Hasher::Sha256(hasher) => hasher.update(bytes),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Hasher::Sha1(hasher) => hex::encode(hasher.finalize()),
            Hasher::Sha256(hasher) => hex::encode(hasher.finalize()),
        }
    }
}

impl io::Write for Hasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Streams a download into the temporary file while hashing it.
struct ArtifactWriter<'a> {
    file: tokio::fs::File,
    hasher: Option<Hasher>,
    dir: &'a Path,
}

impl<'a> ArtifactWriter<'a> {
    fn new(file: tokio::fs::File, checksum: Option<&Checksum>, dir: &'a Path) -> Self {
        Self {
            file,
            hasher: checksum.map(Hasher::for_checksum),
            dir,
        }
    }

    /// Flush to disk and return the hex digest, if one was computed.
    async fn finish(mut self) -> std::result::Result<Option<String>, FetchError> {
        self.file.flush().await.map_err(storage_error)?;
        self.file.sync_all().await.map_err(storage_error)?;
        Ok(self.hasher.map(Hasher::finalize_hex))
    }
}

#[async_trait]
impl DownloadSink for ArtifactWriter<'_> {
    fn begin(&mut self, content_length: Option<u64>) -> std::result::Result<(), FetchError> {
        let (Some(required), Some(available)) = (content_length, available_space(self.dir)) else {
            return Ok(());
        };
        if required > available {
            return Err(FetchError::InsufficientSpace(format!(
                "artifact needs {required} bytes, {available} available"
            )));
        }
        Ok(())
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> std::result::Result<(), FetchError> {
        self.file.write_all(chunk).await.map_err(storage_error)?;
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(chunk);
        }
        Ok(())
    }
}

fn storage_error(err: io::Error) -> FetchError {
    if is_storage_full(&err) {
        FetchError::InsufficientSpace(err.to_string())
    } else {
        FetchError::Io(err)
    }
}

#[cfg(unix)]
fn is_storage_full(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(code) if code == nix::libc::ENOSPC || code == nix::libc::EDQUOT)
}

#[cfg(not(unix))]
fn is_storage_full(_err: &io::Error) -> bool {
    false
}

/// Free bytes available to unprivileged writers in `dir`.
#[cfg(unix)]
fn available_space(dir: &Path) -> Option<u64> {
    match nix::sys::statvfs::statvfs(dir) {
        Ok(stat) => Some((stat.blocks_available() as u64).saturating_mul(stat.fragment_size() as u64)),
        Err(err) => {
            tracing::debug!(dir = %dir.display(), %err, "statvfs failed; skipping space check");
            None
        }
    }
}

#[cfg(not(unix))]
fn available_space(_dir: &Path) -> Option<u64> {
    None
}
