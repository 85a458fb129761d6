use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::Response;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::cli::DuplicateHandling;
use crate::config::RetryPolicy;
use crate::duplicates;
use crate::error::{DownloadError, FilesystemError, ItemError, NetworkCause, NetworkError, ResolutionError};
use crate::fetcher::{FetchRequest, RetryingFetcher};
use crate::progress::{ProgressHandle, ProgressReporter};
use crate::providers::{DownloadItem, UrlResolver};
use crate::utils::parse_content_disposition;

/// Terminal state of an item that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Downloaded { path: PathBuf, bytes: u64 },
    /// A complete copy was already on disk
    Skipped { path: PathBuf },
}

impl Outcome {
    pub fn path(&self) -> &Path {
        match self {
            Outcome::Downloaded { path, .. } | Outcome::Skipped { path } => path,
        }
    }
}

/// Per-item settings shared by every item of a run.
pub struct DownloadContext<'a> {
    pub destination_dir: &'a Path,
    pub duplicate_handling: DuplicateHandling,
    pub progress: &'a ProgressReporter,
    /// Filename stem, unique within the run
    pub stem: &'a str,
    pub cancel: CancellationToken,
}

#[async_trait]
pub trait ItemDownloader: Send + Sync {
    async fn download(&self, item: &DownloadItem, ctx: &DownloadContext<'_>) -> Result<Outcome, ItemError>;
}

pub struct Downloader {
    fetcher: RetryingFetcher,
    resolver: Arc<dyn UrlResolver>,
    retry: RetryPolicy,
    default_extension: String,
}

impl Downloader {
    pub fn new(
        fetcher: RetryingFetcher,
        resolver: Arc<dyn UrlResolver>,
        retry: RetryPolicy,
        default_extension: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            resolver,
            retry,
            default_extension: default_extension.into(),
        }
    }

    async fn transfer(
        &self,
        item: &DownloadItem,
        stem: &str,
        pb: &ProgressHandle,
        ctx: &DownloadContext<'_>,
    ) -> Result<Outcome, ItemError> {
        if ctx.cancel.is_cancelled() {
            return Err(ItemError::Cancelled);
        }

        let url = match self.resolver.resolve_download_url(item).await {
            Ok(url) => url,
            Err(_) if ctx.cancel.is_cancelled() => return Err(ItemError::Cancelled),
            Err(e) => return Err(e.into()),
        };

        let item_cancel = ctx.cancel.child_token();
        let request = FetchRequest::get(url.as_str()).with_cancel(item_cancel.clone());
        let response = self
            .fetcher
            .fetch(&request, &self.retry, |attempt| {
                pb.set_label(format!("{} (retry {})", stem, attempt))
            })
            .await
            .map_err(|e| transfer_error(&item.title, e))?;
        pb.set_label(stem);

        if is_error_page(&response) {
            return Err(ResolutionError::new(&item.title, "download URL led to an error page").into());
        }

        let total = response.content_length();
        let disposition = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok());
        let name = parse_content_disposition(disposition, &self.default_extension);
        let filepath = ctx.destination_dir.join(format!("{}.{}", stem, name.extension));

        if ctx.duplicate_handling == DuplicateHandling::Skip {
            if let Some(total) = total {
                if duplicates::is_complete(&filepath, total).await {
                    pb.update(total.max(1), total.max(1) as i64);
                    item_cancel.cancel();
                    drop(response);
                    tracing::info!(item = %item.title, path = %filepath.display(), "already downloaded, skipping");
                    return Ok(Outcome::Skipped { path: filepath });
                }
            }
        }

        fs::create_dir_all(ctx.destination_dir)
            .await
            .map_err(|e| FilesystemError::new(ctx.destination_dir, e))?;

        let part_filepath = part_path(&filepath);
        let result = stream_to_file(response, &part_filepath, total, pb, &item_cancel, &item.title).await;
        let bytes = match result {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = fs::remove_file(&part_filepath).await;
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&part_filepath, &filepath).await {
            let _ = fs::remove_file(&part_filepath).await;
            return Err(FilesystemError::new(&filepath, e).into());
        }

        tracing::debug!(item = %item.title, path = %filepath.display(), bytes, "download complete");
        Ok(Outcome::Downloaded { path: filepath, bytes })
    }
}

#[async_trait]
impl ItemDownloader for Downloader {
    /// Resolve, fetch and store one item. Never leaves a partial file at the
    /// target path.
    async fn download(&self, item: &DownloadItem, ctx: &DownloadContext<'_>) -> Result<Outcome, ItemError> {
        let stem = ctx.stem;
        let pb = ctx.progress.create(stem);

        let result = self.transfer(item, stem, &pb, ctx).await;
        match &result {
            Ok(Outcome::Downloaded { .. }) => {}
            Ok(Outcome::Skipped { path }) => {
                let label = match duplicates::modified_at(path).await {
                    Some(at) => format!("{} (skipped, {})", stem, at.format("%Y-%m-%d %H:%M")),
                    None => format!("{} (skipped)", stem),
                };
                pb.set_label(label);
            }
            Err(e) => pb.set_label(format!("{} (failed: {})", stem, e.kind())),
        }
        pb.finish();
        result
    }
}

/// Write the body to `part_filepath`, updating `pb` after every chunk.
async fn stream_to_file(
    response: Response,
    part_filepath: &Path,
    total: Option<u64>,
    pb: &ProgressHandle,
    cancel: &CancellationToken,
    title: &str,
) -> Result<u64, ItemError> {
    let mut file = File::create(part_filepath)
        .await
        .map_err(|e| FilesystemError::new(part_filepath, e))?;

    let report = |received: u64| match total {
        Some(total) => pb.update(total, received as i64),
        None => pb.update_unknown_total(received),
    };
    report(0);

    let mut stream = response.bytes_stream();
    let mut received: u64 = 0;

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(ItemError::Cancelled),
            next = stream.next() => next,
        };
        let Some(chunk) = next else { break };
        let chunk = chunk.map_err(|e| DownloadError::new(title, format!("error while reading body: {}", e)))?;

        file.write_all(&chunk)
            .await
            .map_err(|e| FilesystemError::new(part_filepath, e))?;
        received += chunk.len() as u64;
        report(received);
    }

    file.flush()
        .await
        .map_err(|e| FilesystemError::new(part_filepath, e))?;
    drop(file);

    if let Some(total) = total {
        if received != total {
            return Err(DownloadError::new(
                title,
                format!("body ended after {} of {} bytes", received, total),
            )
            .into());
        }
    }
    // An empty body shows as 1/1
    let done = received.max(1);
    pb.update(done, done as i64);
    Ok(received)
}

fn transfer_error(title: &str, err: NetworkError) -> ItemError {
    match err.cause {
        NetworkCause::Cancelled => ItemError::Cancelled,
        NetworkCause::Status { .. } => DownloadError::new(title, err.to_string()).into(),
        NetworkCause::Transport(_) => err.into(),
    }
}

fn is_error_page(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_ascii_lowercase().starts_with("text/html"))
        .unwrap_or(false)
}

/// `book.azw3` -> `book.azw3.part`
fn part_path(filepath: &Path) -> PathBuf {
    let mut part = filepath.as_os_str().to_os_string();
    part.push(".part");
    PathBuf::from(part)
}
