//! Host platform naming as used by published release artifacts.
//!
//! Release archives are named `{os}-{arch}` with `amd64`/`arm64`
//! architecture names, which differ from Rust's `x86_64`/`aarch64`.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Platform {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// The running host. Unknown architectures pass through unchanged.
    pub fn current() -> Self {
        let os = match std::env::consts::OS {
            "macos" => "darwin",
            other => other,
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            other => other,
        };
        Self::new(os, arch)
    }

    /// Parse an `os-arch` override such as `linux-arm64`.
    pub fn parse(value: &str) -> Option<Self> {
        let (os, arch) = value.trim().split_once('-')?;
        if os.is_empty() || arch.is_empty() {
            return None;
        }
        Some(Self::new(os, arch))
    }

    /// `{component}_{version}_{os}-{arch}.tar.gz`
    pub fn archive_name(&self, component: &str, version: &str) -> String {
        format!("{}_{}_{}.tar.gz", component, version, self)
    }

    /// Platform of the container images used for model conversion.
    /// macOS runs them in a Linux VM, so it maps to `linux-amd64`.
    pub fn container_platform(&self) -> Option<&'static str> {
        match (self.os.as_str(), self.arch.as_str()) {
            ("linux", "amd64") => Some("linux-amd64"),
            ("linux", "arm64") => Some("linux-arm64"),
            ("darwin", _) => Some("linux-amd64"),
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os, self.arch)
    }
}
