//! pkgdiff CLI
//!
//! Watches the PyPI changelog for new releases and produces diffoscope
//! reports between each changed package's previous and newest
//! artifacts.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::exit;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::{Duration, Instant};

use clap::Parser;
use colored::Colorize;
use tracing::{error, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pkgdiff::config::{Config, DEFAULT_SIZE_LIMIT, DIFFOSCOPE_IMAGE};
use pkgdiff::diff::ContainerDiff;
use pkgdiff::runner;
use pkgdiff::{HttpDownloader, Pipeline, PypiClient, RunOutcome};

/// Exit status for a clean run that found nothing to do, so schedulers
/// can tell an idle window apart from a failure.
const EXIT_NO_CHANGES: i32 = 2;

static CHECK_MARK: LazyLock<colored::ColoredString> = LazyLock::new(|| "✔".bright_green().bold());
static CROSS_MARK: LazyLock<colored::ColoredString> = LazyLock::new(|| "〤".bright_red().bold());

#[derive(Parser)]
#[command(name = "pkgdiff")]
#[command(about = "Diffoscope reports for new PyPI releases", long_about = None)]
#[command(version)]
struct Cli {
    /// Amount of workers to use
    #[arg(short, long, default_value_t = 5)]
    worker: usize,

    /// Process only specific packages, separated by ','
    #[arg(short, long, value_delimiter = ',')]
    packages: Option<Vec<String>>,

    /// Directory for storing downloaded artifacts
    #[arg(short, long, default_value = "tmp")]
    tmpdir: PathBuf,

    /// Output directory for diff reports
    #[arg(short, long, default_value = "output")]
    output: PathBuf,

    /// Skip packages whose artifacts reach this size in bytes
    #[arg(short = 'l', long, default_value_t = DEFAULT_SIZE_LIMIT)]
    size_limit: u64,

    /// Don't log to stderr
    #[arg(short, long)]
    silent: bool,

    /// File holding the last processed changelog serial
    #[arg(short = 'S', long)]
    serial_file: PathBuf,

    /// Log to file (default: one file per day)
    #[arg(short = 'L', long)]
    logfile: Option<PathBuf>,

    /// Generate diffoscope HTML output
    #[arg(long)]
    with_html: bool,

    /// Generate diffoscope text output
    #[arg(long)]
    with_txt: bool,

    /// Exclude option passed to diffoscope; empty disables it
    #[arg(short = 'x', long, default_value = "*.pyd")]
    exclude: String,

    /// Timeout for one diffoscope invocation, in seconds
    #[arg(long, default_value_t = 120)]
    timeout: u64,

    /// Diffoscope container image
    #[arg(long, default_value = DIFFOSCOPE_IMAGE)]
    image: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn setup_logging(level: &str, logfile: &Path, silent: bool) -> std::io::Result<()> {
    let level = match level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "info" => Level::INFO,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let file = OpenOptions::new().create(true).append(true).open(logfile)?;
    let file_layer = fmt::layer().with_ansi(false).with_writer(Mutex::new(file));

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    if silent {
        registry.init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let logfile = cli.logfile.clone().unwrap_or_else(|| {
        PathBuf::from(format!("{}.log", chrono::Local::now().format("%Y%d%m")))
    });
    if let Err(e) = setup_logging(&cli.log_level, &logfile, cli.silent) {
        eprintln!("Unable to open logfile {}: {}", logfile.display(), e);
        exit(1);
    }

    let config = Config {
        worker: cli.worker,
        packages: cli.packages,
        tmpdir: cli.tmpdir,
        output: cli.output,
        size_limit: cli.size_limit,
        serial_file: cli.serial_file,
        with_html: cli.with_html,
        with_txt: cli.with_txt,
        exclude: Some(cli.exclude).filter(|pattern| !pattern.is_empty()),
        timeout: Duration::from_secs(cli.timeout),
        image: cli.image,
    };
    if let Err(e) = config.validate() {
        eprintln!("{}", e);
        exit(1);
    }

    if which::which("podman").is_err() {
        eprintln!("podman is unavailable. Please install podman to continue.");
        exit(1);
    }

    println!("pkgdiff v{}", env!("CARGO_PKG_VERSION"));

    let client = Arc::new(PypiClient::new());
    let pipeline = Pipeline {
        index: client.clone(),
        downloader: Arc::new(HttpDownloader::new()),
        diff: Arc::new(ContainerDiff::new(&config)),
        config: Arc::new(config),
    };

    let now = Instant::now();
    match runner::run(client.as_ref(), &pipeline).await {
        Ok(RunOutcome::NoChanges) => {
            println!("[{}] No changed packages found", &*CHECK_MARK);
            exit(EXIT_NO_CHANGES);
        }
        Ok(RunOutcome::Completed { success, failed }) => {
            println!();
            println!("[{}] {} packages diffed successfully", &*CHECK_MARK, success);
            println!("[{}] {} packages failed", &*CROSS_MARK, failed);
            println!(
                "[{}] Processed {} package(s) in {:#?}",
                "+".bright_blue().bold(),
                success + failed,
                now.elapsed()
            );
        }
        Err(e) => {
            error!("{}", e);
            eprintln!("[{}] Run failed: {}", &*CROSS_MARK, e);
            exit(1);
        }
    }
}
