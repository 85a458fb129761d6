pub mod cli;
pub mod commands;
pub mod config;
pub mod downloader;
pub mod duplicates;
pub mod error;
pub mod fetcher;
pub mod progress;
pub mod providers;
pub mod scheduler;
pub mod utils;

pub use cli::{DuplicateHandling, Schedule};
pub use config::{RetryPolicy, RunConfig};
pub use downloader::{DownloadContext, Downloader, ItemDownloader, Outcome};
pub use error::{DownloadError, FilesystemError, ItemError, NetworkError, ResolutionError};
pub use fetcher::{FetchRequest, RetryingFetcher, SessionContext};
pub use progress::{ProgressHandle, ProgressReporter};
pub use providers::{DownloadItem, FilterOptions, ItemSource, UrlResolver};
pub use scheduler::{BatchResult, BatchScheduler};
