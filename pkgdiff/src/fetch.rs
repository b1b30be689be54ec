//! Artifact acquisition
//!
//! Downloads release files into the shared cache directory, keyed by
//! registry filename. Files already present are never fetched again;
//! identical filenames are assumed to carry identical content, so the
//! cache is shared across packages and across runs.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::CONTENT_LENGTH;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::{Error, Result};

const USER_AGENT: &str = concat!("pkgdiff/", env!("CARGO_PKG_VERSION"));

/// Network side of artifact acquisition, separated out so the pipeline
/// can run against a fake in tests.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Metadata-only size probe, in bytes.
    async fn probe(&self, url: &str) -> Result<u64>;
    /// Full download to `dest`.
    async fn download(&self, url: &str, dest: &Path) -> Result<()>;
}

/// Cache filename for a registry-reported filename.
///
/// Wheels get a `.zip` suffix appended; the bytes are unchanged, but
/// the extension lets the diff tool treat the file as an inspectable
/// archive and keeps the cache key distinct per packaging format.
pub fn cache_filename(filename: &str) -> String {
    if filename.ends_with(".whl") {
        format!("{}.zip", filename)
    } else {
        filename.to_string()
    }
}

/// Ensure one artifact is present in the cache, returning its path.
///
/// Cache hits skip the network entirely. Otherwise the size probe runs
/// first and the download only proceeds below `size_limit` (exclusive);
/// a probed size at or above the limit fails without transferring.
pub async fn fetch_artifact(
    downloader: &dyn Downloader,
    url: &str,
    filename: &str,
    tmpdir: &Path,
    size_limit: u64,
) -> Result<PathBuf> {
    let target = tmpdir.join(cache_filename(filename));
    if target.exists() {
        debug!("cache hit: [{}]", target.display());
        return Ok(target);
    }

    info!("Downloading {}", url);
    let size = downloader.probe(url).await?;
    if size >= size_limit {
        warn!("Skipping package: exceeds size limit {}>={}", size, size_limit);
        return Err(Error::SizeLimit {
            size,
            limit: size_limit,
        });
    }

    downloader.download(url, &target).await?;
    Ok(target)
}

/// Production downloader over HTTP.
#[derive(Clone)]
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent(USER_AGENT)
                .build()
                .expect("Failed to create HTTP client"),
        }
    }
}

impl Default for HttpDownloader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn probe(&self, url: &str) -> Result<u64> {
        let response = self.client.head(url).send().await?;
        if !response.status().is_success() {
            return Err(Error::Fetch(format!(
                "size probe for {} returned {}",
                url,
                response.status()
            )));
        }

        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| Error::Fetch(format!("no content length for {}", url)))
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(Error::Fetch(format!(
                "download of {} returned {}",
                url,
                response.status()
            )));
        }

        let dir = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        // Stream into a temp file and rename, so a concurrent task that
        // loses the race only replaces the file with identical bytes.
        let mut tmp = NamedTempFile::new_in(dir)?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            tmp.write_all(&chunk?)?;
        }
        tmp.persist(dest).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}
