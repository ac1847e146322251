use std::fmt;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, UpdaterError};

const DPKG_DATABASE: &str = "var/lib/dpkg/status";
const RPM_DATABASES: &[&str] = &["var/lib/rpm", "usr/lib/sysimage/rpm"];
const OS_RELEASE: &str = "etc/os-release";

const DEB_FAMILY: &[&str] = &["debian", "ubuntu"];
const RPM_FAMILY: &[&str] = &["rhel", "fedora", "centos", "suse", "opensuse"];

/// Native packaging family of the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageFormat {
    /// RPM-based distributions (Fedora, CentOS, RHEL, SUSE).
    Rpm,
    /// DPKG-based distributions (Debian, Ubuntu).
    Deb,
}

impl PackageFormat {
    /// The `distro` value used by the Plex release feed for this format.
    pub fn feed_distro(self) -> &'static str {
        match self {
            PackageFormat::Rpm => "redhat",
            PackageFormat::Deb => "debian",
        }
    }

    /// File extension of artifacts for this format.
    pub fn extension(self) -> &'static str {
        match self {
            PackageFormat::Rpm => "rpm",
            PackageFormat::Deb => "deb",
        }
    }
}

impl fmt::Display for PackageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// CPU architecture of the Plex build to install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    /// 32-bit Intel/AMD.
    X86,
    /// 64-bit Intel/AMD.
    X86_64,
    /// 64-bit ARM.
    Aarch64,
    /// 32-bit ARMv7 with hard float and NEON.
    Armv7,
}

impl Architecture {
    /// Architecture the running binary was compiled for.
    pub fn current() -> Option<Self> {
        Self::from_target(std::env::consts::ARCH)
    }

    fn from_target(arch: &str) -> Option<Self> {
        match arch {
            "x86" => Some(Architecture::X86),
            "x86_64" => Some(Architecture::X86_64),
            "aarch64" => Some(Architecture::Aarch64),
            "arm" => Some(Architecture::Armv7),
            _ => None,
        }
    }

    /// The `build` value used by the Plex release feed.
    pub fn feed_build(self) -> &'static str {
        match self {
            Architecture::X86 => "linux-x86",
            Architecture::X86_64 => "linux-x86_64",
            Architecture::Aarch64 => "linux-aarch64",
            Architecture::Armv7 => "linux-armv7hf_neon",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.feed_build())
    }
}

/// Facts about the host, determined once per run and passed to every stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostContext {
    /// Active package format.
    pub format: PackageFormat,
    /// Build architecture.
    pub architecture: Architecture,
}

/// Probes a filesystem root for package databases.
#[derive(Debug, Clone)]
pub struct HostProbe {
    root: PathBuf,
}

impl Default for HostProbe {
    fn default() -> Self {
        Self::new("/")
    }
}

impl HostProbe {
    /// Probe the filesystem rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Build the run's [`HostContext`], honouring any configured overrides.
    pub fn detect(
        &self,
        format: Option<PackageFormat>,
        architecture: Option<Architecture>,
    ) -> Result<HostContext> {
        let format = match format {
            Some(format) => {
                tracing::debug!(%format, "package format forced by configuration");
                format
            }
            None => self.detect_format()?,
        };
        let architecture = match architecture.or_else(Architecture::current) {
            Some(architecture) => architecture,
            None => {
                return Err(UpdaterError::FormatUndetected(format!(
                    "no Plex build for target architecture {}",
                    std::env::consts::ARCH
                )))
            }
        };

        tracing::info!(%format, %architecture, "host detected");
        Ok(HostContext {
            format,
            architecture,
        })
    }

    /// Determine the package format from the package databases present.
    pub fn detect_format(&self) -> Result<PackageFormat> {
        let has_dpkg = self.exists(DPKG_DATABASE);
        let has_rpm = RPM_DATABASES.iter().any(|path| self.exists(path));

        match (has_dpkg, has_rpm) {
            (true, false) => Ok(PackageFormat::Deb),
            (false, true) => Ok(PackageFormat::Rpm),
            (true, true) => self.format_from_os_release().ok_or_else(|| {
                UpdaterError::FormatUndetected(
                    "both dpkg and rpm databases exist; set `package_format`".into(),
                )
            }),
            (false, false) => Err(UpdaterError::FormatUndetected(format!(
                "no dpkg or rpm database under {}",
                self.root.display()
            ))),
        }
    }

    fn exists(&self, relative: &str) -> bool {
        self.root.join(relative).exists()
    }

    fn format_from_os_release(&self) -> Option<PackageFormat> {
        let contents = fs::read_to_string(self.root.join(OS_RELEASE)).ok()?;
        let ids = os_release_ids(&contents);
        if ids.iter().any(|id| DEB_FAMILY.contains(&id.as_str())) {
            Some(PackageFormat::Deb)
        } else if ids.iter().any(|id| RPM_FAMILY.contains(&id.as_str())) {
            Some(PackageFormat::Rpm)
        } else {
            None
        }
    }
}

/// `ID` followed by the entries of `ID_LIKE`, lowercased and unquoted.
fn os_release_ids(contents: &str) -> Vec<String> {
    let mut ids = Vec::new();
    let mut like = Vec::new();
    for line in contents.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
        match key.trim() {
            "ID" => ids.push(value.to_ascii_lowercase()),
            "ID_LIKE" => like.extend(value.split_whitespace().map(str::to_ascii_lowercase)),
            _ => {}
        }
    }
    ids.extend(like);
    ids
}
