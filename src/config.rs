use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::{DuplicateHandling, Schedule};
use crate::error::ConfigError;

pub const DEFAULT_CONCURRENCY: usize = 25;
pub const DEFAULT_EXTENSION: &str = "azw3";
pub const REPORT_FILE_NAME: &str = "failed_downloads.txt";
/// Upper bound for a single backoff sleep.
pub const MAX_BACKOFF: Duration = Duration::from_secs(3600);

/// Exponential backoff settings for a single fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(2000),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to sleep before the given 1-based attempt. The first attempt is
    /// never delayed; no delay exceeds [`MAX_BACKOFF`].
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 2).unwrap_or(i32::MAX);
        let secs = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .map(|delay| delay.min(MAX_BACKOFF))
            .unwrap_or(MAX_BACKOFF)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidMultiplier(self.backoff_multiplier));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub destination_dir: PathBuf,
    pub concurrency: usize,
    pub start_offset: usize,
    pub total_limit: Option<usize>,
    pub duplicate_handling: DuplicateHandling,
    pub schedule: Schedule,
    pub retry: RetryPolicy,
    pub default_extension: String,
    pub report_path: PathBuf,
}

impl RunConfig {
    pub fn new(destination_dir: impl Into<PathBuf>) -> Self {
        let destination_dir = destination_dir.into();
        let report_path = destination_dir.join(REPORT_FILE_NAME);
        Self {
            destination_dir,
            concurrency: DEFAULT_CONCURRENCY,
            start_offset: 0,
            total_limit: None,
            duplicate_handling: DuplicateHandling::default(),
            schedule: Schedule::default(),
            retry: RetryPolicy::default(),
            default_extension: DEFAULT_EXTENSION.to_string(),
            report_path,
        }
    }

    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        self.retry.validate()?;
        if self.default_extension.trim_start_matches('.').is_empty() {
            return Err(ConfigError::EmptyExtension);
        }
        Ok(self)
    }
}

/// Work out where downloads land.
///
/// Falls back to `downloads/` under `base` when no directory was given. With
/// `search_dirs` set, a non-empty search phrase becomes a sub-directory.
pub fn resolve_download_dir(
    base: &Path,
    download_dir: Option<&Path>,
    search: Option<&str>,
    search_dirs: bool,
) -> PathBuf {
    let mut dir = match download_dir {
        Some(dir) => dir.to_path_buf(),
        None => base.join("downloads"),
    };

    if search_dirs {
        if let Some(phrase) = search.map(str::trim).filter(|p| !p.is_empty()) {
            dir = dir.join(crate::utils::sanitize_filename(phrase));
        }
    }

    dir
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_delays_grow_exponentially() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(2000),
            backoff_multiplier: 2.0,
        };
        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_before(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_before(4), Duration::from_millis(8000));
    }

    #[test]
    fn backoff_is_capped_instead_of_overflowing() {
        let steep = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(2000),
            backoff_multiplier: 1e300,
        };
        assert!(steep.validate().is_ok());
        assert_eq!(steep.delay_before(2), Duration::from_millis(2000));
        assert_eq!(steep.delay_before(3), MAX_BACKOFF);
        assert_eq!(steep.delay_before(5), MAX_BACKOFF);

        let many = RetryPolicy {
            max_attempts: 200,
            ..RetryPolicy::default()
        };
        assert!(many.validate().is_ok());
        assert_eq!(many.delay_before(100), MAX_BACKOFF);
        assert_eq!(many.delay_before(u32::MAX), MAX_BACKOFF);

        let flat = RetryPolicy {
            backoff_multiplier: 1.0,
            ..RetryPolicy::default()
        };
        assert_eq!(flat.delay_before(u32::MAX), Duration::from_millis(2000));
    }

    #[test]
    fn retry_policy_rejects_bad_values() {
        let zero = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert_eq!(zero.validate(), Err(ConfigError::ZeroAttempts));

        let shrinking = RetryPolicy {
            backoff_multiplier: 0.5,
            ..RetryPolicy::default()
        };
        assert_eq!(shrinking.validate(), Err(ConfigError::InvalidMultiplier(0.5)));

        let nan = RetryPolicy {
            backoff_multiplier: f64::NAN,
            ..RetryPolicy::default()
        };
        assert!(nan.validate().is_err());
    }

    #[test]
    fn run_config_defaults() {
        let config = RunConfig::new("/data/books").validate().unwrap();
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.start_offset, 0);
        assert_eq!(config.total_limit, None);
        assert_eq!(config.duplicate_handling, DuplicateHandling::Skip);
        assert_eq!(config.schedule, Schedule::Batches);
        assert_eq!(config.default_extension, "azw3");
        assert_eq!(
            config.report_path,
            PathBuf::from("/data/books").join(REPORT_FILE_NAME)
        );
    }

    #[test]
    fn run_config_rejects_zero_concurrency_and_empty_extension() {
        let mut config = RunConfig::new("out");
        config.concurrency = 0;
        assert_eq!(config.validate().unwrap_err(), ConfigError::ZeroConcurrency);

        let mut config = RunConfig::new("out");
        config.default_extension = ".".into();
        assert_eq!(config.validate().unwrap_err(), ConfigError::EmptyExtension);
    }

    #[test]
    fn download_dir_defaults_under_base() {
        let dir = resolve_download_dir(Path::new("/work"), None, None, false);
        assert_eq!(dir, PathBuf::from("/work/downloads"));
    }

    #[test]
    fn download_dir_uses_override() {
        let dir = resolve_download_dir(
            Path::new("/work"),
            Some(Path::new("/custom/downloads")),
            None,
            false,
        );
        assert_eq!(dir, PathBuf::from("/custom/downloads"));
    }

    #[test]
    fn search_phrase_appended_only_when_enabled() {
        let base = Path::new("/work");
        assert_eq!(
            resolve_download_dir(base, None, Some("test-phrase"), true),
            PathBuf::from("/work/downloads/test-phrase")
        );
        assert_eq!(
            resolve_download_dir(
                base,
                Some(Path::new("/custom/downloads")),
                Some("test-phrase"),
                true
            ),
            PathBuf::from("/custom/downloads/test-phrase")
        );
        assert_eq!(
            resolve_download_dir(base, None, Some("test-phrase"), false),
            PathBuf::from("/work/downloads")
        );
        assert_eq!(
            resolve_download_dir(base, Some(Path::new("/custom/downloads")), None, true),
            PathBuf::from("/custom/downloads")
        );
    }
}
