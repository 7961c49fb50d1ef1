//! ONNX Runtime shared library provisioning next to the server binary.
//!
//! The server loads `build/onnxruntime/lib/libonnxruntime.*` relative to its
//! working directory. Release archives do not ship it, so it is fetched from
//! the upstream release on first start.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::download::{download_to_file, http_client, DownloadError};
use super::layout::extract_tar_gz;
use super::platform::Platform;

pub const ONNX_RUNTIME_VERSION: &str = "1.18.0";

#[derive(Error, Debug)]
pub enum OnnxRuntimeError {
    #[error("ONNX Runtime is not published for {0}")]
    Unsupported(String),

    #[error("ONNX Runtime download failed: {0}")]
    Download(#[from] DownloadError),

    #[error("ONNX Runtime archive did not contain {}", .0.display())]
    LayoutMismatch(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Upstream artifact coordinates for one platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnnxRuntimeArtifact {
    /// e.g. `onnxruntime-linux-x64-1.18.0`
    pub stem: String,
    pub url: String,
    pub library: String,
}

impl OnnxRuntimeArtifact {
    pub fn for_platform(platform: &Platform) -> Result<Self, OnnxRuntimeError> {
        let arch = match platform.arch.as_str() {
            "amd64" => "x64",
            "arm64" => "arm64",
            _ => return Err(OnnxRuntimeError::Unsupported(platform.to_string())),
        };
        let (os, library) = match platform.os.as_str() {
            "darwin" => ("osx", format!("libonnxruntime.{}.dylib", ONNX_RUNTIME_VERSION)),
            "linux" => ("linux", format!("libonnxruntime.so.{}", ONNX_RUNTIME_VERSION)),
            _ => return Err(OnnxRuntimeError::Unsupported(platform.to_string())),
        };
        let stem = format!("onnxruntime-{}-{}-{}", os, arch, ONNX_RUNTIME_VERSION);
        let url = format!(
            "https://github.com/microsoft/onnxruntime/releases/download/v{}/{}.tgz",
            ONNX_RUNTIME_VERSION, stem
        );
        Ok(Self { stem, url, library })
    }
}

/// `{root}/build/onnxruntime`
pub fn runtime_dir(root: &Path) -> PathBuf {
    root.join("build").join("onnxruntime")
}

/// Make sure the runtime library is present under `root`. Returns the
/// library path; downloads only when missing.
pub async fn ensure_onnx_runtime(root: &Path, platform: &Platform) -> Result<PathBuf, OnnxRuntimeError> {
    let artifact = OnnxRuntimeArtifact::for_platform(platform)?;
    let target = runtime_dir(root);
    let library = target.join("lib").join(&artifact.library);
    if library.is_file() {
        return Ok(library);
    }

    tracing::info!(url = %artifact.url, "ONNX Runtime missing, downloading");
    let staging = tempfile::tempdir()?;
    let archive = staging.path().join(format!("{}.tgz", artifact.stem));
    let client = http_client()?;
    download_to_file(&client, &artifact.url, &archive, None, None).await?;

    let unpack_dir = staging.path().join("unpacked");
    {
        let archive = archive.clone();
        let unpack_dir = unpack_dir.clone();
        tokio::task::spawn_blocking(move || extract_tar_gz(&archive, &unpack_dir))
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))??;
    }

    let extracted = unpack_dir.join(&artifact.stem);
    if !extracted.is_dir() {
        return Err(OnnxRuntimeError::LayoutMismatch(extracted));
    }
    if target.exists() {
        fs::remove_dir_all(&target)?;
    }
    fs::create_dir_all(root.join("build"))?;
    copy_tree(&extracted, &target)?;

    if !library.is_file() {
        return Err(OnnxRuntimeError::LayoutMismatch(library));
    }
    tracing::info!(path = %library.display(), "ONNX Runtime installed");
    Ok(library)
}

/// Recursive copy; staging lives on a different filesystem than the release.
fn copy_tree(from: &Path, to: &Path) -> std::io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let dest = to.join(entry.file_name());
        if file_type.is_dir() {
            copy_tree(&entry.path(), &dest)?;
        } else if file_type.is_symlink() {
            #[cfg(unix)]
            std::os::unix::fs::symlink(fs::read_link(entry.path())?, &dest)?;
            #[cfg(not(unix))]
            fs::copy(entry.path(), &dest).map(|_| ())?;
        } else {
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}
