//! HTTP downloads and file digests.

use std::path::Path;

use futures::StreamExt;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

const USER_AGENT: &str = concat!("mlos-system-test/", env!("CARGO_PKG_VERSION"));

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP client setup failed: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Asset {asset} not present in release {tag}")]
    AssetMissing { tag: String, asset: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub fn http_client() -> Result<reqwest::Client, DownloadError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .map_err(DownloadError::Client)
}

/// Stream `url` into `dest`. Returns bytes written.
pub async fn download_to_file(
    client: &reqwest::Client,
    url: &str,
    dest: &Path,
    bearer: Option<&str>,
    accept: Option<&str>,
) -> Result<u64, DownloadError> {
    let http_err = |source: reqwest::Error| DownloadError::Http {
        url: url.to_string(),
        source,
    };
    let mut request = client.get(url);
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }
    if let Some(accept) = accept {
        request = request.header(reqwest::header::ACCEPT, accept);
    }
    let response = request
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(http_err)?;

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(dest).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(http_err)?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

#[derive(Debug, Deserialize)]
struct ReleaseAsset {
    name: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct Release {
    assets: Vec<ReleaseAsset>,
}

/// Download a named asset of a tagged GitHub release through the REST API.
pub async fn download_release_asset(
    client: &reqwest::Client,
    repo: &str,
    tag: &str,
    asset: &str,
    token: &str,
    dest: &Path,
) -> Result<u64, DownloadError> {
    let url = format!("https://api.github.com/repos/{}/releases/tags/{}", repo, tag);
    let http_err = |source: reqwest::Error| DownloadError::Http {
        url: url.clone(),
        source,
    };
    let release: Release = client
        .get(&url)
        .bearer_auth(token)
        .header(reqwest::header::ACCEPT, "application/vnd.github+json")
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(http_err)?
        .json()
        .await
        .map_err(http_err)?;

    let found = release
        .assets
        .into_iter()
        .find(|a| a.name == asset)
        .ok_or_else(|| DownloadError::AssetMissing {
            tag: tag.to_string(),
            asset: asset.to_string(),
        })?;

    download_to_file(client, &found.url, dest, Some(token), Some("application/octet-stream")).await
}

/// Hex SHA-256 of a file.
pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}
