//! Diff orchestration
//!
//! Runs diffoscope on two cached artifacts inside a podman container:
//! the artifact cache is bind-mounted read-only, the report tree
//! read-write, and the invocation is bounded by a wall-clock timeout.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{error, info};

use crate::config::Config;
use crate::{Error, Result};

/// Report directory for one (package, old, new) pair:
/// `<output>/<first char>/<name>/<old>-<new>/`.
pub fn report_path(output: &Path, name: &str, old: &str, new: &str) -> PathBuf {
    let initial = name.chars().next().map(String::from).unwrap_or_default();
    output.join(initial).join(name).join(format!("{}-{}", old, new))
}

/// Primary report file; its presence marks the pair as processed.
pub fn report_marker(report_dir: &Path) -> PathBuf {
    report_dir.join("diff.md")
}

/// Structural diff execution, separated out so the pipeline can run
/// against a fake in tests.
#[async_trait]
pub trait DiffTool: Send + Sync {
    /// Produce reports for `old` vs `new` under `report_dir`.
    async fn run(&self, old: &Path, new: &Path, report_dir: &Path) -> Result<()>;
}

/// Diffoscope in a podman container.
pub struct ContainerDiff {
    program: String,
    image: String,
    timeout: Duration,
    with_html: bool,
    with_txt: bool,
    exclude: Option<String>,
    tmpdir: PathBuf,
    output: PathBuf,
}

impl ContainerDiff {
    pub fn new(config: &Config) -> Self {
        Self {
            program: "podman".to_string(),
            image: config.image.clone(),
            timeout: config.timeout,
            with_html: config.with_html,
            with_txt: config.with_txt,
            exclude: config.exclude.clone(),
            tmpdir: config.tmpdir.clone(),
            output: config.output.clone(),
        }
    }

    /// Use a different container runtime binary (e.g. docker).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn command_args(
        &self,
        cwd: &Path,
        tmpdir: &Path,
        output: &Path,
        old: &Path,
        new: &Path,
        report_dir: &Path,
    ) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--user".to_string(),
            "0:0".to_string(),
            "--rm".to_string(),
            "-w".to_string(),
            cwd.display().to_string(),
            "-v".to_string(),
            format!("{}:{}:ro", tmpdir.display(), tmpdir.display()),
            "-v".to_string(),
            format!("{}:{}:rw", output.display(), output.display()),
            self.image.clone(),
            "--no-progress".to_string(),
            old.display().to_string(),
            new.display().to_string(),
            "--markdown".to_string(),
            report_marker(report_dir).display().to_string(),
        ];
        if self.with_html {
            args.push("--html".to_string());
            args.push(report_dir.join("diff.html").display().to_string());
        }
        if self.with_txt {
            args.push("--text".to_string());
            args.push(report_dir.join("diff.txt").display().to_string());
        }
        if let Some(pattern) = &self.exclude {
            args.push("--exclude".to_string());
            args.push(pattern.clone());
        }
        args
    }
}

#[async_trait]
impl DiffTool for ContainerDiff {
    async fn run(&self, old: &Path, new: &Path, report_dir: &Path) -> Result<()> {
        fs::create_dir_all(report_dir)?;

        let cwd = std::env::current_dir()?;
        let tmpdir = fs::canonicalize(&self.tmpdir)?;
        let output = fs::canonicalize(&self.output)?;
        let old = fs::canonicalize(old)?;
        let new = fs::canonicalize(new)?;
        let report_dir = fs::canonicalize(report_dir)?;

        let args = self.command_args(&cwd, &tmpdir, &output, &old, &new, &report_dir);
        info!("executing diffoscope: {} {}", self.program, args.join(" "));

        let result = timeout(
            self.timeout,
            Command::new(&self.program)
                .args(&args)
                .kill_on_drop(true)
                .output(),
        )
        .await;

        let exe = match result {
            Ok(spawned) => spawned?,
            Err(_) => {
                error!("Timeout during execution of diffoscope");
                // Partial reports must not satisfy the idempotency
                // check on the next run.
                let _ = fs::remove_dir_all(&report_dir);
                return Err(Error::DiffTimeout);
            }
        };

        // Exit 1 means differences were found, which is the point.
        match exe.status.code() {
            Some(0) | Some(1) => Ok(()),
            Some(_) => {
                let stderr = String::from_utf8_lossy(&exe.stderr).to_string();
                error!("Diffoscope failed: {}", stderr);
                Err(Error::DiffTool(stderr))
            }
            None => Err(Error::DiffTool("terminated by signal".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn fake_tool(dir: &Path, body: &str) -> PathBuf {
        let script = dir.join("fake-podman");
        fs::write(&script, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    fn diff_in(dir: &Path, timeout: Duration) -> (ContainerDiff, PathBuf) {
        let tmpdir = dir.join("tmp");
        let output = dir.join("output");
        fs::create_dir_all(&tmpdir).unwrap();
        fs::create_dir_all(&output).unwrap();
        let config = Config {
            tmpdir: tmpdir.clone(),
            output: output.clone(),
            timeout,
            ..Config::default()
        };
        (ContainerDiff::new(&config), tmpdir)
    }

    fn artifacts(tmpdir: &Path) -> (PathBuf, PathBuf) {
        let old = tmpdir.join("a-1.0.tar.gz");
        let new = tmpdir.join("a-1.1.tar.gz");
        fs::write(&old, b"old").unwrap();
        fs::write(&new, b"new").unwrap();
        (old, new)
    }

    #[test]
    fn test_report_path_layout() {
        let path = report_path(Path::new("output"), "alpha", "1.0", "1.1");
        assert_eq!(path, Path::new("output/a/alpha/1.0-1.1"));
    }

    #[test]
    fn test_command_args_shape() {
        let config = Config {
            with_html: true,
            with_txt: true,
            exclude: Some("*.pyd".to_string()),
            ..Config::default()
        };
        let diff = ContainerDiff::new(&config);
        let args = diff.command_args(
            Path::new("/work"),
            Path::new("/work/tmp"),
            Path::new("/work/output"),
            Path::new("/work/tmp/a-1.0.tar.gz"),
            Path::new("/work/tmp/a-1.1.tar.gz"),
            Path::new("/work/output/a/alpha/1.0-1.1"),
        );

        assert_eq!(args[0], "run");
        assert!(args.contains(&"/work/tmp:/work/tmp:ro".to_string()));
        assert!(args.contains(&"/work/output:/work/output:rw".to_string()));
        let image = args.iter().position(|a| a == &config.image).unwrap();
        assert_eq!(args[image + 1], "--no-progress");
        assert!(args.contains(&"--markdown".to_string()));
        assert!(args.contains(&"/work/output/a/alpha/1.0-1.1/diff.md".to_string()));
        assert!(args.contains(&"/work/output/a/alpha/1.0-1.1/diff.html".to_string()));
        assert!(args.contains(&"/work/output/a/alpha/1.0-1.1/diff.txt".to_string()));
        let exclude = args.iter().position(|a| a == "--exclude").unwrap();
        assert_eq!(args[exclude + 1], "*.pyd");
    }

    #[test]
    fn test_command_args_without_extras() {
        let config = Config {
            exclude: None,
            ..Config::default()
        };
        let diff = ContainerDiff::new(&config);
        let args = diff.command_args(
            Path::new("/w"),
            Path::new("/w/tmp"),
            Path::new("/w/output"),
            Path::new("/w/tmp/old"),
            Path::new("/w/tmp/new"),
            Path::new("/w/output/a/alpha/1.0-1.1"),
        );
        assert!(!args.contains(&"--html".to_string()));
        assert!(!args.contains(&"--text".to_string()));
        assert!(!args.contains(&"--exclude".to_string()));
    }

    #[tokio::test]
    async fn test_differences_found_is_success() {
        let dir = tempfile::tempdir().unwrap();
        let (diff, tmpdir) = diff_in(dir.path(), Duration::from_secs(5));
        let diff = diff.with_program(fake_tool(dir.path(), "exit 1").display().to_string());
        let (old, new) = artifacts(&tmpdir);

        let report_dir = dir.path().join("output/a/alpha/1.0-1.1");
        diff.run(&old, &new, &report_dir).await.unwrap();
        assert!(report_dir.exists());
    }

    #[tokio::test]
    async fn test_tool_failure_captures_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let (diff, tmpdir) = diff_in(dir.path(), Duration::from_secs(5));
        let diff =
            diff.with_program(fake_tool(dir.path(), "echo boom >&2; exit 2").display().to_string());
        let (old, new) = artifacts(&tmpdir);

        let report_dir = dir.path().join("output/a/alpha/1.0-1.1");
        let err = diff.run(&old, &new, &report_dir).await.unwrap_err();
        assert!(matches!(err, Error::DiffTool(msg) if msg.contains("boom")));
    }

    #[tokio::test]
    async fn test_timeout_removes_partial_report() {
        let dir = tempfile::tempdir().unwrap();
        let (diff, tmpdir) = diff_in(dir.path(), Duration::from_millis(100));
        let diff = diff.with_program(fake_tool(dir.path(), "sleep 5").display().to_string());
        let (old, new) = artifacts(&tmpdir);

        let report_dir = dir.path().join("output/a/alpha/1.0-1.1");
        let err = diff.run(&old, &new, &report_dir).await.unwrap_err();
        assert!(matches!(err, Error::DiffTimeout));
        assert!(!report_dir.exists());
    }
}
