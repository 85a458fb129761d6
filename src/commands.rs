use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::RunConfig;
use crate::downloader::Downloader;
use crate::fetcher::{RetryingFetcher, SessionContext};
use crate::providers::{FilterOptions, ItemSource, ManifestSource, RedirectResolver};
use crate::scheduler::{BatchResult, BatchScheduler};

/// Load the manifest, download everything selected by `config` and write the
/// failure report if anything failed.
pub async fn run_downloads(
    manifest: PathBuf,
    filter: FilterOptions,
    config: RunConfig,
    session: SessionContext,
    cancel: CancellationToken,
) -> Result<BatchResult> {
    let source = ManifestSource::new(manifest);
    let items = source
        .list_items(&filter)
        .await
        .with_context(|| format!("Failed to load items from {:?}", source.path()))?;

    println!("Found {} items", items.len());
    if items.is_empty() {
        println!("Nothing to download.");
        return Ok(BatchResult::default());
    }

    let fetcher = RetryingFetcher::new(session);
    let resolver = RedirectResolver::new(fetcher.clone(), config.retry.clone()).with_cancel(cancel.clone());
    let downloader = Downloader::new(
        fetcher,
        Arc::new(resolver),
        config.retry.clone(),
        config.default_extension.clone(),
    );

    let scheduler = BatchScheduler::new(downloader);
    let result = scheduler.run(&items, &config, &cancel).await;

    if result.has_failures() {
        result
            .write_report(&config.report_path)
            .await
            .context("Failed to write failure report")?;
    }
    print_summary(&result, &config.report_path);

    Ok(result)
}

fn print_summary(result: &BatchResult, report_path: &Path) {
    println!();
    println!(
        "Summary: Downloaded: {} | Skipped: {} | Failed: {}",
        result.downloaded,
        result.skipped,
        result.failures.len()
    );

    if result.has_failures() {
        println!("\nThe following items failed to download:");
        for failure in &result.failures {
            println!("- {}: {}", failure.item.title, failure.error);
        }
        println!("\nTotal failed downloads: {}", result.failures.len());
        println!("Failure report written to {:?}", report_path);
    }
}
