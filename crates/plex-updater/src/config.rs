use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::account::Credentials;
use crate::error::{Result, UpdaterError};
use crate::host::{Architecture, PackageFormat};
use crate::source::ReleaseChannel;

const DEFAULT_ENDPOINT: &str = "https://plex.tv/api/downloads/5.json";
const DEFAULT_API_URL: &str = "https://plex.tv/";
const DEFAULT_PACKAGE: &str = "plexmediaserver";
const DEFAULT_CLIENT_IDENTIFIER: &str = "plex-updater";
const CONFIG_DIR: &str = "plex-updater";
const CONFIG_FILE: &str = "config.yml";
const SYSTEM_CONFIG: &str = "/etc/plex-updater/config.yml";

fn default_endpoint() -> Url {
    Url::parse(DEFAULT_ENDPOINT).expect("default release feed URL")
}

fn default_api_url() -> Url {
    Url::parse(DEFAULT_API_URL).expect("default plex.tv URL")
}

fn default_package() -> String {
    DEFAULT_PACKAGE.to_string()
}

fn default_client_identifier() -> String {
    DEFAULT_CLIENT_IDENTIFIER.to_string()
}

fn default_metadata_timeout() -> u64 {
    30
}

fn default_download_timeout() -> u64 {
    900
}

/// Validated settings for one run. Read-only once loaded.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(try_from = "RawConfiguration")]
pub struct RunConfiguration {
    /// Release feed location.
    pub remote_endpoint: Url,
    /// Release track to follow.
    pub release_channel: ReleaseChannel,
    /// Plex account token, used when no credentials are configured.
    pub plex_token: Option<String>,
    /// plex.tv API root for sign-in and account checks.
    pub plex_api_url: Url,
    /// plex.tv account name.
    pub username: Option<String>,
    /// plex.tv account password.
    pub password: Option<String>,
    /// `X-Plex-Client-Identifier` sent when signing in.
    pub client_identifier: String,
    /// Where artifacts are downloaded.
    pub download_dir: PathBuf,
    /// Delete the artifact after a successful install.
    pub cleanup_after_install: bool,
    /// Restart the service after a successful install.
    pub restart_service_after_install: bool,
    /// systemd unit restarted after install.
    pub service_name: String,
    /// Package tracked in the package database.
    pub package_name: String,
    /// Stop after comparing versions.
    pub check_only: bool,
    /// Stop after downloading.
    pub download_only: bool,
    /// Force a package format instead of probing the host.
    pub package_format: Option<PackageFormat>,
    /// Force an architecture instead of using the compiled target.
    pub architecture: Option<Architecture>,
    /// Timeout for release feed requests, in seconds.
    pub metadata_timeout_secs: u64,
    /// Timeout for an artifact download, in seconds.
    pub download_timeout_secs: u64,
}

/// Distribution names accepted by `linux_system`.
#[derive(Debug, Clone, Copy, Deserialize)]
enum LinuxSystem {
    Ubuntu,
    Fedora,
    CentOS,
}

impl LinuxSystem {
    fn package_format(self) -> PackageFormat {
        match self {
            LinuxSystem::Ubuntu => PackageFormat::Deb,
            LinuxSystem::Fedora | LinuxSystem::CentOS => PackageFormat::Rpm,
        }
    }
}

/// The file as written, including the older `plex_pass`, `linux_system`
/// and `linux_version` keys.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfiguration {
    #[serde(default = "default_endpoint")]
    remote_endpoint: Url,
    #[serde(default)]
    release_channel: Option<ReleaseChannel>,
    #[serde(default)]
    plex_pass: Option<bool>,
    #[serde(default)]
    plex_token: Option<String>,
    #[serde(default = "default_api_url")]
    plex_api_url: Url,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default = "default_client_identifier", alias = "client")]
    client_identifier: String,
    #[serde(alias = "folder")]
    download_dir: PathBuf,
    #[serde(default, alias = "remove_completed")]
    cleanup_after_install: bool,
    #[serde(default)]
    restart_service_after_install: bool,
    #[serde(default = "default_package")]
    service_name: String,
    #[serde(default = "default_package")]
    package_name: String,
    #[serde(default)]
    check_only: bool,
    #[serde(default)]
    download_only: bool,
    #[serde(default)]
    package_format: Option<PackageFormat>,
    #[serde(default)]
    linux_system: Option<LinuxSystem>,
    #[serde(default)]
    architecture: Option<Architecture>,
    #[serde(default)]
    linux_version: Option<u16>,
    #[serde(default = "default_metadata_timeout")]
    metadata_timeout_secs: u64,
    #[serde(default = "default_download_timeout")]
    download_timeout_secs: u64,
}

impl TryFrom<RawConfiguration> for RunConfiguration {
    type Error = String;

    fn try_from(raw: RawConfiguration) -> std::result::Result<Self, Self::Error> {
        let release_channel = raw
            .release_channel
            .or(raw.plex_pass.map(|pass| {
                if pass {
                    ReleaseChannel::Beta
                } else {
                    ReleaseChannel::Public
                }
            }))
            .unwrap_or_default();
        let architecture = match (raw.architecture, raw.linux_version) {
            (Some(architecture), _) => Some(architecture),
            (None, Some(32)) => Some(Architecture::X86),
            (None, Some(64)) => Some(Architecture::X86_64),
            (None, Some(other)) => {
                return Err(format!("linux_version must be 32 or 64, got {other}"))
            }
            (None, None) => None,
        };

        Ok(Self {
            remote_endpoint: raw.remote_endpoint,
            release_channel,
            plex_token: raw.plex_token,
            plex_api_url: raw.plex_api_url,
            username: raw.username,
            password: raw.password,
            client_identifier: raw.client_identifier,
            download_dir: raw.download_dir,
            cleanup_after_install: raw.cleanup_after_install,
            restart_service_after_install: raw.restart_service_after_install,
            service_name: raw.service_name,
            package_name: raw.package_name,
            check_only: raw.check_only,
            download_only: raw.download_only,
            package_format: raw
                .package_format
                .or(raw.linux_system.map(LinuxSystem::package_format)),
            architecture,
            metadata_timeout_secs: raw.metadata_timeout_secs,
            download_timeout_secs: raw.download_timeout_secs,
        })
    }
}

impl RunConfiguration {
    /// Configuration with defaults for everything but the download directory.
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            remote_endpoint: default_endpoint(),
            release_channel: ReleaseChannel::default(),
            plex_token: None,
            plex_api_url: default_api_url(),
            username: None,
            password: None,
            client_identifier: default_client_identifier(),
            download_dir: download_dir.into(),
            cleanup_after_install: false,
            restart_service_after_install: false,
            service_name: default_package(),
            package_name: default_package(),
            check_only: false,
            download_only: false,
            package_format: None,
            architecture: None,
            metadata_timeout_secs: default_metadata_timeout(),
            download_timeout_secs: default_download_timeout(),
        }
    }

    /// Per-user config location, falling back to the system-wide file.
    pub fn default_path() -> PathBuf {
        let user = dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE));
        match user {
            Some(path) if path.exists() => path,
            _ => PathBuf::from(SYSTEM_CONFIG),
        }
    }

    /// Load and validate the configuration file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|err| {
            UpdaterError::config(format!("cannot read {}: {err}", path.display()))
        })?;
        let config = Self::from_yaml(&raw).map_err(|err| match err {
            UpdaterError::Config(msg) => UpdaterError::config(format!("{}: {msg}", path.display())),
            other => other,
        })?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(raw).map_err(|err| UpdaterError::config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants serde cannot express.
    pub fn validate(&self) -> Result<()> {
        for (key, url) in [
            ("remote_endpoint", &self.remote_endpoint),
            ("plex_api_url", &self.plex_api_url),
        ] {
            if !matches!(url.scheme(), "http" | "https") {
                return Err(UpdaterError::config(format!(
                    "{key} must be http or https, got `{url}`"
                )));
            }
        }
        if self.download_dir.as_os_str().is_empty() {
            return Err(UpdaterError::config("download_dir must not be empty"));
        }
        if self.package_name.trim().is_empty() || self.service_name.trim().is_empty() {
            return Err(UpdaterError::config(
                "package_name and service_name must not be empty",
            ));
        }
        if self.metadata_timeout_secs == 0 || self.download_timeout_secs == 0 {
            return Err(UpdaterError::config("timeouts must be greater than zero"));
        }
        if self.check_only && self.download_only {
            return Err(UpdaterError::config(
                "check_only and download_only are mutually exclusive",
            ));
        }
        if self.plex_token.as_deref().is_some_and(|token| token.trim().is_empty()) {
            return Err(UpdaterError::config("plex_token must not be blank"));
        }
        if self.username.is_some() != self.password.is_some() {
            return Err(UpdaterError::config(
                "username and password must be set together",
            ));
        }
        if self.client_identifier.trim().is_empty() {
            return Err(UpdaterError::config("client_identifier must not be empty"));
        }
        Ok(())
    }

    /// Sign-in credentials, when an account is configured.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
                client_identifier: self.client_identifier.clone(),
            }),
            _ => None,
        }
    }

    /// Timeout for release feed requests.
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }

    /// Timeout for artifact downloads.
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    /// Combine the configured modes with command-line flags.
    pub fn mode(&self, flags: RunMode) -> Result<RunMode> {
        let mode = RunMode {
            check_only: self.check_only || flags.check_only,
            download_only: self.download_only || flags.download_only,
            force_download: flags.force_download,
        };
        if mode.check_only && mode.download_only {
            return Err(UpdaterError::config(
                "--check-only and --download-only are mutually exclusive",
            ));
        }
        Ok(mode)
    }
}

/// Boolean mode flags for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunMode {
    /// Stop after comparing versions.
    pub check_only: bool,
    /// Stop after downloading.
    pub download_only: bool,
    /// Ignore a previously downloaded artifact.
    pub force_download: bool,
}
