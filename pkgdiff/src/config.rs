//! Run configuration
//!
//! Assembled by the CLI and shared read-only across the worker pool.

use std::path::PathBuf;
use std::time::Duration;

use crate::Result;

/// Default diffoscope container image.
pub const DIFFOSCOPE_IMAGE: &str = "registry.salsa.debian.org/reproducible-builds/diffoscope";

/// Default artifact size ceiling in bytes (exclusive).
pub const DEFAULT_SIZE_LIMIT: u64 = 10_485_760;

#[derive(Debug, Clone)]
pub struct Config {
    /// Worker pool size.
    pub worker: usize,
    /// Optional package allow-list; `None` processes every package.
    pub packages: Option<Vec<String>>,
    /// Shared artifact cache directory.
    pub tmpdir: PathBuf,
    /// Report tree root.
    pub output: PathBuf,
    /// Artifact byte ceiling; downloads happen only below it.
    pub size_limit: u64,
    /// Checkpoint file holding the last processed changelog serial.
    pub serial_file: PathBuf,
    /// Generate diffoscope HTML output alongside markdown.
    pub with_html: bool,
    /// Generate diffoscope text output alongside markdown.
    pub with_txt: bool,
    /// Path glob passed to diffoscope as `--exclude`, if any.
    pub exclude: Option<String>,
    /// Wall-clock limit for one diff invocation.
    pub timeout: Duration,
    /// Diffoscope container image reference.
    pub image: String,
}

impl Config {
    /// Reject configurations the run could not honour.
    pub fn validate(&self) -> Result<()> {
        if let Some(pattern) = &self.exclude {
            glob::Pattern::new(pattern)?;
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker: 5,
            packages: None,
            tmpdir: PathBuf::from("tmp"),
            output: PathBuf::from("output"),
            size_limit: DEFAULT_SIZE_LIMIT,
            serial_file: PathBuf::from("serial"),
            with_html: false,
            with_txt: false,
            exclude: Some("*.pyd".to_string()),
            timeout: Duration::from_secs(120),
            image: DIFFOSCOPE_IMAGE.to_string(),
        }
    }
}
