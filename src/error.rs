use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkCause {
    /// The server answered with a non-success status
    Status { code: u16, reason: String },
    /// The request never produced a response (DNS, connect, reset, timeout)
    Transport(String),
    /// The request's cancellation token fired
    Cancelled,
}

impl std::fmt::Display for NetworkCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkCause::Status { code, reason } if reason.is_empty() => write!(f, "HTTP {}", code),
            NetworkCause::Status { code, reason } => write!(f, "HTTP {} {}", code, reason),
            NetworkCause::Transport(msg) => write!(f, "transport error: {}", msg),
            NetworkCause::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A request failed after the retry policy was exhausted.
#[derive(Debug, Clone, Error)]
#[error("request to {url} failed after {attempts} attempt(s): {cause}")]
pub struct NetworkError {
    pub url: String,
    pub cause: NetworkCause,
    pub attempts: u32,
}

impl NetworkError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.cause, NetworkCause::Cancelled)
    }
}

/// The vendor could not produce a usable download URL for an item.
#[derive(Debug, Clone, Error)]
#[error("could not resolve download URL for \"{item}\": {reason}")]
pub struct ResolutionError {
    pub item: String,
    pub reason: String,
}

impl ResolutionError {
    pub fn new(item: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            reason: reason.into(),
        }
    }
}

/// The transfer response or its body stream failed.
#[derive(Debug, Clone, Error)]
#[error("download of \"{item}\" failed: {reason}")]
pub struct DownloadError {
    pub item: String,
    pub reason: String,
}

impl DownloadError {
    pub fn new(item: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            reason: reason.into(),
        }
    }
}

/// Directory creation or file write failure.
#[derive(Debug, Error)]
#[error("filesystem error at {}: {source}", path.display())]
pub struct FilesystemError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

impl FilesystemError {
    pub fn new(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self {
            path: path.into(),
            source,
        }
    }
}

/// Terminal failure of a single item.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Filesystem(#[from] FilesystemError),

    /// The run was interrupted before this item finished
    #[error("cancelled")]
    Cancelled,
}

impl ItemError {
    /// Short label used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            ItemError::Network(_) => "network",
            ItemError::Resolution(_) => "resolution",
            ItemError::Download(_) => "download",
            ItemError::Filesystem(_) => "filesystem",
            ItemError::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("retry policy needs at least 1 attempt")]
    ZeroAttempts,

    #[error("backoff multiplier must be a finite number >= 1.0, got {0}")]
    InvalidMultiplier(f64),

    #[error("default extension must not be empty")]
    EmptyExtension,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read item list from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid item list: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("item at position {index} is missing \"{field}\"")]
    MissingField { index: usize, field: &'static str },

    #[error("item at position {index} repeats id \"{id}\"")]
    DuplicateId { index: usize, id: String },
}
