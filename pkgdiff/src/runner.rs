//! Task dispatch and run coordination
//!
//! One task per changed package runs on a bounded worker pool. Tasks
//! share nothing but the filesystem: the artifact cache is append-only
//! and the report tree is partitioned per (package, old, new), so no
//! cross-task locking is needed. The checkpoint is written strictly
//! after every task has finished, whatever their outcomes.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{error, info, info_span, warn, Instrument};

use crate::changes::{self, PackageTask};
use crate::config::Config;
use crate::diff::{self, DiffTool};
use crate::fetch::{self, Downloader};
use crate::registry::{ChangeFeed, PackageIndex};
use crate::resolve;
use crate::serial;
use crate::Result;

/// Pause honoured before each of the two initial changelog queries;
/// the API rate window may reset shortly after a previous run.
pub const RATE_RESET_PAUSE: Duration = Duration::from_secs(2);

/// Outcome of one package task. A task either fully succeeds (report
/// produced, or it already existed) or fails; there is no partial
/// success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult {
    pub pkg: String,
    pub state: bool,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Clean run, but the changelog window held no qualifying changes.
    NoChanges,
    /// Dispatch completed; per-task tallies.
    Completed { success: usize, failed: usize },
}

/// The pipeline's collaborators plus shared configuration, cloned into
/// every worker.
#[derive(Clone)]
pub struct Pipeline {
    pub index: Arc<dyn PackageIndex>,
    pub downloader: Arc<dyn Downloader>,
    pub diff: Arc<dyn DiffTool>,
    pub config: Arc<Config>,
}

async fn try_process(pipeline: &Pipeline, name: &str) -> Result<()> {
    let config = &pipeline.config;

    let pair = resolve::resolve_pair(pipeline.index.as_ref(), name).await?;
    let report_dir = diff::report_path(&config.output, name, &pair.old, &pair.new);
    if diff::report_marker(&report_dir).exists() {
        info!("report already exists");
        return Ok(());
    }

    let mut artifacts = Vec::with_capacity(2);
    for version in [&pair.old, &pair.new] {
        let release = pipeline.index.release(name, version).await?;
        let file = resolve::pick_artifact(name, version, &release.urls)?.clone();
        let path = fetch::fetch_artifact(
            pipeline.downloader.as_ref(),
            &file.url,
            &file.filename,
            &config.tmpdir,
            config.size_limit,
        )
        .await?;
        artifacts.push(path);
    }

    pipeline
        .diff
        .run(&artifacts[0], &artifacts[1], &report_dir)
        .await
}

/// Process one changed package to completion, converting every
/// task-scoped error into a failed result. Nothing here can abort the
/// dispatcher or a sibling task.
pub async fn process_package(pipeline: Pipeline, name: String) -> TaskResult {
    info!("Start processing: {}", name);
    match try_process(&pipeline, &name).await {
        Ok(()) => TaskResult {
            pkg: name,
            state: true,
        },
        Err(e) if e.is_expected_skip() => {
            warn!("Skipping, {}", e);
            TaskResult {
                pkg: name,
                state: false,
            }
        }
        Err(e) => {
            error!("{}", e);
            TaskResult {
                pkg: name,
                state: false,
            }
        }
    }
}

/// Run every task on a worker pool of `config.worker` permits and wait
/// for all of them; a failure never cancels the others.
pub async fn dispatch(pipeline: &Pipeline, tasks: Vec<PackageTask>) -> Vec<TaskResult> {
    let semaphore = Arc::new(Semaphore::new(pipeline.config.worker.max(1)));
    let mut handles = Vec::with_capacity(tasks.len());

    for task in tasks {
        let semaphore = Arc::clone(&semaphore);
        let pipeline = pipeline.clone();
        let name = task.name;
        let span = info_span!("task", pkg = %name);
        let label = name.clone();
        let handle = tokio::spawn(
            async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return TaskResult {
                        pkg: name,
                        state: false,
                    };
                };
                process_package(pipeline, name).await
            }
            .instrument(span),
        );
        handles.push((label, handle));
    }

    let mut results = Vec::with_capacity(handles.len());
    for (label, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => {
                error!("Processing [{}] died: {}", label, e);
                TaskResult {
                    pkg: label,
                    state: false,
                }
            }
        };
        if result.state {
            info!("End processing [{}]: success", result.pkg);
        } else {
            info!("End processing [{}]: error", result.pkg);
        }
        results.push(result);
    }
    results
}

/// One full run: checkpoint in, changelog window, dispatch, checkpoint
/// out.
///
/// The serial persisted at the end is the one observed as current at
/// the start; anything the feed gained during the run is deliberately
/// left for the next one.
pub async fn run(feed: &dyn ChangeFeed, pipeline: &Pipeline) -> Result<RunOutcome> {
    let config = Arc::clone(&pipeline.config);

    let last_serial = match serial::read(&config.serial_file) {
        Some(serial) => serial,
        None => {
            info!("No serial file found, fetching last serial via API");
            feed.last_serial().await?
        }
    };
    info!("Get Changelog since Serial: [{}]", last_serial);

    sleep(RATE_RESET_PAUSE).await;
    let current_serial = feed.last_serial().await?;
    sleep(RATE_RESET_PAUSE).await;
    let changelog = feed.changes_since(last_serial).await?;

    let tasks = changes::classify(changelog, config.packages.as_deref());
    if tasks.is_empty() {
        info!("No changed packages found");
        serial::write(&config.serial_file, current_serial)?;
        return Ok(RunOutcome::NoChanges);
    }
    info!("Found {} changed packages", tasks.len());

    fs::create_dir_all(&config.output)?;
    fs::create_dir_all(&config.tmpdir)?;

    let results = dispatch(pipeline, tasks).await;
    let success = results.iter().filter(|r| r.state).count();
    let failed = results.len() - success;

    info!("Store serial: [{}]", current_serial);
    serial::write(&config.serial_file, current_serial)?;

    Ok(RunOutcome::Completed { success, failed })
}
