use anyhow::Result;
use bookdl::cli::{DuplicateHandling, Schedule};
use bookdl::config::{self, RetryPolicy, RunConfig};
use bookdl::fetcher::SessionContext;
use bookdl::providers::FilterOptions;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "warn,hyper=warn,reqwest=warn";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON manifest listing the items to download
    #[arg(short = 'm', long = "manifest", default_value = "items.json")]
    manifest: PathBuf,

    /// Directory to save downloaded files (defaults to ./downloads)
    #[arg(short = 'd', long = "download-dir")]
    download_dir: Option<PathBuf>,

    /// Maximum number of items downloaded at the same time
    #[arg(short = 'c', long, default_value_t = config::DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Skip this many items from the start of the list
    #[arg(short = 'o', long = "start-offset", default_value_t = 0)]
    start_offset: usize,

    /// Process at most this many items after the offset
    #[arg(short = 'n', long = "total-limit")]
    total_limit: Option<usize>,

    /// What to do when a complete file already exists
    #[arg(long, value_enum, default_value_t = DuplicateHandling::Skip)]
    duplicates: DuplicateHandling,

    /// batches: wait for each group to finish; pool: keep every slot busy
    #[arg(long, value_enum, default_value_t = Schedule::Batches)]
    schedule: Schedule,

    /// Attempts per request, including the first one
    #[arg(long = "max-attempts", default_value_t = 3)]
    max_attempts: u32,

    /// Delay before the first retry, in milliseconds
    #[arg(long = "initial-backoff-ms", default_value_t = 2000)]
    initial_backoff_ms: u64,

    /// Factor applied to the delay after every retry
    #[arg(long = "backoff-multiplier", default_value_t = 2.0)]
    backoff_multiplier: f64,

    /// Extension used when the server does not name the file
    #[arg(long = "default-extension", default_value = config::DEFAULT_EXTENSION)]
    default_extension: String,

    /// Where to write the failure report (defaults to <download-dir>/failed_downloads.txt)
    #[arg(long)]
    report: Option<PathBuf>,

    /// Only download items whose title contains this phrase
    #[arg(short = 's', long)]
    search: Option<String>,

    /// Put downloads for a search into their own sub-directory
    #[arg(long = "search-dirs")]
    search_dirs: bool,

    /// Skip an item by id or title (repeatable)
    #[arg(short = 'x', long = "exclude")]
    exclude: Vec<String>,

    /// Session cookie sent with every request
    #[arg(long, env = "BOOKDL_COOKIE", hide_env_values = true)]
    cookie: Option<String>,

    /// CSRF token sent with every request
    #[arg(long, env = "BOOKDL_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Log debug output for bookdl
    #[arg(short = 'v', long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut directives = DEFAULT_LOG_FILTER.to_string();
        if verbose {
            directives.push_str(",bookdl=debug");
        }
        EnvFilter::new(directives)
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn build_config(args: &Args) -> Result<RunConfig> {
    let cwd = std::env::current_dir()?;
    let destination = config::resolve_download_dir(
        &cwd,
        args.download_dir.as_deref(),
        args.search.as_deref(),
        args.search_dirs,
    );

    let mut run = RunConfig::new(destination);
    run.concurrency = args.concurrency;
    run.start_offset = args.start_offset;
    run.total_limit = args.total_limit;
    run.duplicate_handling = args.duplicates;
    run.schedule = args.schedule;
    run.retry = RetryPolicy {
        max_attempts: args.max_attempts,
        initial_backoff: Duration::from_millis(args.initial_backoff_ms),
        backoff_multiplier: args.backoff_multiplier,
    };
    run.default_extension = args.default_extension.trim_start_matches('.').to_string();
    if let Some(report) = &args.report {
        run.report_path = report.clone();
    }

    Ok(run.validate()?)
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_logging(args.verbose);

    let run = build_config(&args)?;
    tracing::debug!(?run, "run configuration");

    let filter = FilterOptions {
        search: args.search.clone(),
        exclude: args.exclude.clone(),
    };
    let session = SessionContext {
        cookie: args.cookie.clone(),
        token: args.token.clone(),
    };

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(async {
        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nInterrupted, stopping in-flight downloads...");
                on_signal.cancel();
            }
        });

        bookdl::commands::run_downloads(args.manifest, filter, run, session, cancel).await
    })?;

    if result.has_failures() {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
