use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::path::Path;
use tokio::fs;
use tokio_util::sync::CancellationToken;

use crate::cli::Schedule;
use crate::config::RunConfig;
use crate::downloader::{DownloadContext, ItemDownloader, Outcome};
use crate::error::{FilesystemError, ItemError};
use crate::progress::ProgressReporter;
use crate::providers::DownloadItem;
use crate::utils::{item_stem, sanitize_filename};

#[derive(Debug)]
pub struct Failure {
    pub item: DownloadItem,
    pub error: ItemError,
}

#[derive(Debug, Default)]
pub struct BatchResult {
    pub downloaded: usize,
    pub skipped: usize,
    pub failures: Vec<Failure>,
}

impl BatchResult {
    pub fn processed(&self) -> usize {
        self.downloaded + self.skipped + self.failures.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    fn record(&mut self, item: &DownloadItem, result: Result<Outcome, ItemError>) {
        match result {
            Ok(Outcome::Downloaded { path, bytes }) => {
                tracing::info!(item = %item.title, path = %path.display(), bytes, "downloaded");
                self.downloaded += 1;
            }
            Ok(Outcome::Skipped { path }) => {
                tracing::info!(item = %item.title, path = %path.display(), "skipped");
                self.skipped += 1;
            }
            Err(error) => {
                tracing::warn!(item = %item.title, kind = error.kind(), error = %error, "failed to download");
                self.failures.push(Failure {
                    item: item.clone(),
                    error,
                });
            }
        }
    }

    /// One `<title> : <error message>` line per failure.
    pub fn report(&self) -> String {
        self.failures
            .iter()
            .map(|f| format!("{} : {}\n", f.item.title, f.error))
            .collect()
    }

    /// Write [`report`](Self::report) to `path`, creating its directory.
    pub async fn write_report(&self, path: &Path) -> Result<(), FilesystemError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| FilesystemError::new(parent, e))?;
        }
        fs::write(path, self.report())
            .await
            .map_err(|e| FilesystemError::new(path, e))?;
        tracing::info!(path = %path.display(), failures = self.failures.len(), "wrote failure report");
        Ok(())
    }
}

/// Indices of `len` items left after skipping `offset` and keeping at most
/// `limit`.
pub fn select_range(len: usize, offset: usize, limit: Option<usize>) -> Range<usize> {
    let start = offset.min(len);
    let end = match limit {
        Some(limit) => start.saturating_add(limit).min(len),
        None => len,
    };
    start..end
}

/// Lowercased stems shared by more than one item in `items`.
fn colliding_stems(items: &[DownloadItem]) -> HashSet<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for item in items {
        *counts.entry(stem_key(item)).or_default() += 1;
    }
    counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(stem, _)| stem)
        .collect()
}

fn stem_key(item: &DownloadItem) -> String {
    sanitize_filename(&item.title).to_lowercase()
}

/// Filename stem for every item of `items`, unique ignoring case.
///
/// Titles shared by several items get their id appended. A stem that is
/// still taken (a title that looks like another item's disambiguated stem,
/// or a repeated id) gets a ` (n)` counter. Depends only on `items`, so a
/// rerun over the same list maps every item to the same path.
pub fn assign_stems(items: &[DownloadItem]) -> Vec<String> {
    let collisions = colliding_stems(items);
    let mut taken: HashSet<String> = HashSet::new();

    items
        .iter()
        .map(|item| {
            let shared = collisions.contains(&stem_key(item));
            let mut base = item_stem(&item.title, &item.id, shared);
            if !shared && taken.contains(&base.to_lowercase()) {
                base = item_stem(&item.title, &item.id, true);
            }

            let mut stem = base.clone();
            let mut n = 2;
            while !taken.insert(stem.to_lowercase()) {
                stem = format!("{} ({})", base, n);
                n += 1;
            }
            stem
        })
        .collect()
}

pub struct BatchScheduler<D> {
    downloader: D,
    new_reporter: fn() -> ProgressReporter,
}

impl<D: ItemDownloader> BatchScheduler<D> {
    pub fn new(downloader: D) -> Self {
        Self {
            downloader,
            new_reporter: ProgressReporter::new,
        }
    }

    /// Replace how each progress scope is created (e.g. a hidden one).
    pub fn with_reporter(mut self, new_reporter: fn() -> ProgressReporter) -> Self {
        self.new_reporter = new_reporter;
        self
    }

    /// Process `items` according to `config`. Every selected item ends up
    /// counted exactly once in the returned result.
    pub async fn run(&self, items: &[DownloadItem], config: &RunConfig, cancel: &CancellationToken) -> BatchResult {
        let range = select_range(items.len(), config.start_offset, config.total_limit);
        let stems = assign_stems(items);
        let selected: Vec<(&DownloadItem, &str)> = items[range.clone()]
            .iter()
            .zip(stems[range.clone()].iter().map(String::as_str))
            .collect();
        let limit = config.concurrency.max(1);

        tracing::info!(
            total = items.len(),
            start = range.start,
            end = range.end,
            concurrency = limit,
            schedule = ?config.schedule,
            "starting run"
        );

        let mut result = BatchResult::default();
        match config.schedule {
            Schedule::Batches => {
                self.run_batches(&selected, range.start, limit, config, cancel, &mut result)
                    .await
            }
            Schedule::Pool => {
                self.run_pool(selected, limit, config, cancel, &mut result)
                    .await
            }
        }

        tracing::info!(
            downloaded = result.downloaded,
            skipped = result.skipped,
            failed = result.failures.len(),
            "run finished"
        );
        result
    }

    async fn run_batches(
        &self,
        selected: &[(&DownloadItem, &str)],
        first_index: usize,
        limit: usize,
        config: &RunConfig,
        cancel: &CancellationToken,
        result: &mut BatchResult,
    ) {
        let total_batches = selected.len().div_ceil(limit);

        for (batch_index, batch) in selected.chunks(limit).enumerate() {
            if cancel.is_cancelled() {
                for (item, _) in batch {
                    result.record(item, Err(ItemError::Cancelled));
                }
                continue;
            }

            let start = first_index + batch_index * limit;
            let progress = (self.new_reporter)();
            progress.println(format!(
                "Processing batch {}/{} (items {}-{})",
                batch_index + 1,
                total_batches,
                start + 1,
                start + batch.len()
            ));
            tracing::info!(batch = batch_index + 1, total_batches, size = batch.len(), "starting batch");

            let outcomes = join_all(
                batch
                    .iter()
                    .map(|(item, stem)| self.download_one(item, stem, config, &progress, cancel)),
            )
            .await;
            progress.complete();

            for ((item, _), outcome) in batch.iter().zip(outcomes) {
                result.record(item, outcome);
            }
        }
    }

    async fn run_pool(
        &self,
        selected: Vec<(&DownloadItem, &str)>,
        limit: usize,
        config: &RunConfig,
        cancel: &CancellationToken,
        result: &mut BatchResult,
    ) {
        let reporter = (self.new_reporter)().clear_finished();
        let progress = &reporter;
        let outcomes: Vec<_> = stream::iter(selected)
            .map(|(item, stem)| async move {
                let outcome = if cancel.is_cancelled() {
                    Err(ItemError::Cancelled)
                } else {
                    self.download_one(item, stem, config, progress, cancel).await
                };
                (item, outcome)
            })
            .buffer_unordered(limit)
            .collect()
            .await;
        reporter.complete();

        for (item, outcome) in outcomes {
            result.record(item, outcome);
        }
    }

    async fn download_one(
        &self,
        item: &DownloadItem,
        stem: &str,
        config: &RunConfig,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<Outcome, ItemError> {
        let ctx = DownloadContext {
            destination_dir: &config.destination_dir,
            duplicate_handling: config.duplicate_handling,
            progress,
            stem,
            cancel: cancel.clone(),
        };
        self.downloader.download(item, &ctx).await
    }
}
