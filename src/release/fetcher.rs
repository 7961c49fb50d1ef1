//! Release download, extraction and binary normalization.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;

use super::discovery::{find_server_binary, DiscoveredBinary};
use super::download::{download_release_asset, http_client, sha256_file};
use super::layout::{extract_tar_gz, ArchiveLayout};
use super::platform::Platform;
use crate::process::{CommandSpec, ProcessRunner};

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Download of {archive} failed: {reason}")]
    Download { archive: String, reason: String },

    #[error("Extraction of {} failed: {source}", .archive.display())]
    Extract {
        archive: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Server binary not found under {}", .searched_root.display())]
    BinaryNotFound { searched_root: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// `owner/name` of the release repository.
    pub repo: String,
    /// Archive name prefix.
    pub component: String,
    /// Basenames the server binary may have inside an archive.
    pub binary_names: Vec<String>,
    /// Name the binary is normalized to under `build/`.
    pub canonical_name: String,
    pub platform: Platform,
    pub download_tool: PathBuf,
    /// Enables the REST API download path before the CLI.
    pub github_token: Option<String>,
    /// Extra copy destination for the normalized binary.
    pub install_dir: Option<PathBuf>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            repo: "mlOS-foundation/core".to_string(),
            component: "mlos-core".to_string(),
            binary_names: vec!["mlos-server".to_string(), "mlos_core".to_string()],
            canonical_name: "mlos-server".to_string(),
            platform: Platform::current(),
            download_tool: PathBuf::from("gh"),
            github_token: None,
            install_dir: None,
        }
    }
}

/// A release unpacked and ready to run.
#[derive(Debug, Clone, Serialize)]
pub struct FetchedRelease {
    pub version: String,
    pub layout: ArchiveLayout,
    /// Directory the server runs from.
    pub root: PathBuf,
    /// `{root}/build/{canonical_name}`
    pub binary_path: PathBuf,
    pub discovered: Option<DiscoveredBinary>,
    pub sha256: String,
    pub duration_ms: u64,
}

pub struct ReleaseFetcher {
    runner: Arc<dyn ProcessRunner>,
    config: FetchConfig,
}

impl ReleaseFetcher {
    pub fn new(runner: Arc<dyn ProcessRunner>, config: FetchConfig) -> Self {
        Self { runner, config }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub fn archive_name(&self, version: &str) -> String {
        self.config
            .platform
            .archive_name(&self.config.component, version)
    }

    fn download_dir(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(&self.config.component)
    }

    fn extract_dir(&self, output_dir: &Path, version: &str) -> PathBuf {
        self.download_dir(output_dir).join(version)
    }

    /// Download, extract, locate and normalize the server binary.
    pub async fn fetch(&self, version: &str, output_dir: &Path) -> Result<FetchedRelease, FetchError> {
        let started = Instant::now();
        let archive_name = self.archive_name(version);
        let download_dir = self.download_dir(output_dir);
        fs::create_dir_all(&download_dir)?;

        tracing::info!(version, archive = %archive_name, "downloading release");
        let archive_path = self.download(version, &archive_name, &download_dir).await?;

        let extract_dir = self.extract_dir(output_dir, version);
        if extract_dir.exists() {
            fs::remove_dir_all(&extract_dir)?;
        }
        let entries = {
            let archive = archive_path.clone();
            let dest = extract_dir.clone();
            tokio::task::spawn_blocking(move || extract_tar_gz(&archive, &dest))
                .await
                .map_err(|e| FetchError::Extract {
                    archive: archive_path.clone(),
                    source: io::Error::other(e.to_string()),
                })?
                .map_err(|source| FetchError::Extract {
                    archive: archive_path.clone(),
                    source,
                })?
        };
        tracing::debug!(entries, dir = %extract_dir.display(), "archive extracted");

        let layout = ArchiveLayout::resolve(&extract_dir)?;
        let root = layout.root();
        let discovered = find_server_binary(&root, &self.config.binary_names)
            .ok_or_else(|| FetchError::BinaryNotFound {
                searched_root: root.clone(),
            })?;
        tracing::info!(
            path = %discovered.path.display(),
            method = ?discovered.method,
            "server binary located"
        );

        let binary_path = self.normalize(&root, &discovered.path)?;
        let sha256 = sha256_file(&binary_path)?;
        let duration_ms = started.elapsed().as_millis() as u64;
        metrics::histogram!("release_fetch_ms").record(duration_ms as f64);

        Ok(FetchedRelease {
            version: version.to_string(),
            layout,
            root,
            binary_path,
            discovered: Some(discovered),
            sha256,
            duration_ms,
        })
    }

    /// Re-open a release fetched by an earlier run.
    pub fn locate(&self, version: &str, output_dir: &Path) -> Result<FetchedRelease, FetchError> {
        let extract_dir = self.extract_dir(output_dir, version);
        let layout = ArchiveLayout::resolve(&extract_dir).map_err(|_| FetchError::BinaryNotFound {
            searched_root: extract_dir.clone(),
        })?;
        let root = layout.root();
        let binary_path = root.join("build").join(&self.config.canonical_name);
        if !binary_path.is_file() {
            return Err(FetchError::BinaryNotFound { searched_root: root });
        }
        let sha256 = sha256_file(&binary_path)?;
        Ok(FetchedRelease {
            version: version.to_string(),
            layout,
            root,
            binary_path,
            discovered: None,
            sha256,
            duration_ms: 0,
        })
    }

    async fn download(&self, version: &str, archive_name: &str, dir: &Path) -> Result<PathBuf, FetchError> {
        let archive_path = dir.join(archive_name);
        remove_stale(&archive_path)?;

        if let Some(token) = self.config.github_token.as_deref() {
            let api = match http_client() {
                Ok(client) => {
                    download_release_asset(&client, &self.config.repo, version, archive_name, token, &archive_path)
                        .await
                }
                Err(e) => Err(e),
            };
            match api {
                Ok(bytes) => {
                    tracing::info!(bytes, "downloaded via release API");
                    return Ok(archive_path);
                }
                Err(e) => tracing::warn!(error = %e, "release API download failed, falling back to CLI"),
            }
        }

        let cmd = CommandSpec::new(&self.config.download_tool)
            .args(["release", "download", version])
            .args(["--repo", self.config.repo.as_str()])
            .args(["--pattern", archive_name])
            .arg("--dir")
            .arg(dir.to_string_lossy())
            .arg("--clobber");
        let output = self.runner.run(&cmd).await.map_err(|e| FetchError::Download {
            archive: archive_name.to_string(),
            reason: e.to_string(),
        })?;
        if !output.success() {
            return Err(FetchError::Download {
                archive: archive_name.to_string(),
                reason: format!("{}: {}", output.exit, output.stderr.trim()),
            });
        }
        if !archive_path.is_file() {
            return Err(FetchError::Download {
                archive: archive_name.to_string(),
                reason: format!("{} missing after download", archive_path.display()),
            });
        }
        Ok(archive_path)
    }

    /// Copy the discovered binary to `{root}/build/{canonical_name}`.
    fn normalize(&self, root: &Path, found: &Path) -> Result<PathBuf, FetchError> {
        let build_dir = root.join("build");
        let canonical = build_dir.join(&self.config.canonical_name);
        if found != canonical {
            fs::create_dir_all(&build_dir)?;
            fs::copy(found, &canonical)?;
        }
        make_executable(&canonical)?;

        if let Some(install_dir) = &self.config.install_dir {
            fs::create_dir_all(install_dir)?;
            let target = install_dir.join(&self.config.canonical_name);
            fs::copy(&canonical, &target)?;
            make_executable(&target)?;
            tracing::debug!(path = %target.display(), "installed server binary");
        }
        Ok(canonical)
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o755);
    fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// An archive left by an earlier run or an interrupted API download.
fn remove_stale(archive: &Path) -> Result<(), FetchError> {
    match fs::remove_file(archive) {
        Ok(()) => {
            tracing::debug!(archive = %archive.display(), "removed stale archive");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
