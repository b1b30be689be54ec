//! pkgdiff: diffoscope reports for new PyPI releases
//!
//! This crate provides the pieces of the release-watching pipeline:
//! - Serial checkpointing against the PyPI changelog
//! - Changelog classification into per-package tasks
//! - Version-pair resolution and artifact selection
//! - Size-guarded, cached artifact downloads
//! - Sandboxed diffoscope execution with timeout
//! - Bounded-concurrency task dispatch

pub mod changes;
pub mod config;
pub mod diff;
pub mod error;
pub mod fetch;
pub mod registry;
pub mod resolve;
pub mod runner;
pub mod serial;

pub use config::Config;
pub use error::{Error, Result};
pub use fetch::HttpDownloader;
pub use registry::PypiClient;
pub use runner::{run, Pipeline, RunOutcome, TaskResult};
