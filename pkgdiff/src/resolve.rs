//! Version resolution
//!
//! Turns a package task into the pair of versions to diff and picks a
//! downloadable file for each. The changelog event is only a trigger;
//! the release list is re-queried here and may disagree with it.

use tracing::{info, warn};

use crate::registry::{PackageIndex, ReleaseFile};
use crate::{Error, Result};

/// The two versions a diff report covers: the last two releases in
/// registry-reported order. No semantic sorting is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleasePair {
    pub old: String,
    pub new: String,
}

/// Take the last two entries of a release list.
pub fn last_pair(name: &str, versions: &[&str]) -> Result<ReleasePair> {
    if versions.len() < 2 {
        return Err(Error::IndeterminatePair(format!(
            "[{}]: unable to determine old version",
            name
        )));
    }

    let old = versions[versions.len() - 2];
    let new = versions[versions.len() - 1];
    if old == new {
        return Err(Error::IndeterminatePair(format!(
            "[{}]: versions are the same",
            name
        )));
    }

    Ok(ReleasePair {
        old: old.to_string(),
        new: new.to_string(),
    })
}

/// Resolve the version pair for a package from live metadata.
pub async fn resolve_pair(index: &dyn PackageIndex, name: &str) -> Result<ReleasePair> {
    let metadata = index.project(name).await?;
    let versions: Vec<&str> = metadata.releases.keys().map(|v| v.as_str()).collect();
    let pair = last_pair(name, &versions)?;
    info!("New version: [{}] Old Version: [{}]", pair.new, pair.old);
    Ok(pair)
}

/// Pick the file to download for one release.
///
/// Precedence: the last entry of the URL list, falling back to the
/// first, failing with the full list dumped for diagnostics when the
/// registry reports no files at all.
pub fn pick_artifact<'a>(
    name: &str,
    version: &str,
    files: &'a [ReleaseFile],
) -> Result<&'a ReleaseFile> {
    match files.last() {
        Some(file) => Ok(file),
        None => {
            warn!("fallback to get urls: [{}]", version);
            warn!("raw url metadata: {:?}", files);
            files.first().ok_or_else(|| {
                warn!("unable to get url for version [{}]: {:?}", version, files);
                Error::NoArtifact(format!("[{}] {}", name, version))
            })
        }
    }
}
