use async_trait::async_trait;
use reqwest::header::LOCATION;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{DownloadItem, UrlResolver};
use crate::config::RetryPolicy;
use crate::error::ResolutionError;
use crate::fetcher::{FetchRequest, RetryingFetcher};

/// Metadata key holding the URL to request.
pub const URL_KEY: &str = "url";

/// Resolves an item by requesting its `url` metadata without following
/// redirects. A 3xx `Location` is the real download URL; a 2xx answer means
/// the URL was already direct.
pub struct RedirectResolver {
    fetcher: RetryingFetcher,
    policy: RetryPolicy,
    cancel: Option<CancellationToken>,
}

impl RedirectResolver {
    pub fn new(fetcher: RetryingFetcher, policy: RetryPolicy) -> Self {
        Self {
            fetcher,
            policy,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

#[async_trait]
impl UrlResolver for RedirectResolver {
    async fn resolve_download_url(&self, item: &DownloadItem) -> Result<Url, ResolutionError> {
        let raw = item
            .metadata_str(URL_KEY)
            .ok_or_else(|| ResolutionError::new(&item.title, "item has no url"))?;
        let start = Url::parse(raw)
            .map_err(|e| ResolutionError::new(&item.title, format!("invalid url {:?}: {}", raw, e)))?;

        let mut request = FetchRequest::get(start.as_str()).accept_redirect();
        if let Some(token) = &self.cancel {
            request = request.with_cancel(token.clone());
        }

        let response = self
            .fetcher
            .fetch(&request, &self.policy, |_| {})
            .await
            .map_err(|e| ResolutionError::new(&item.title, e.to_string()))?;

        if !response.status().is_redirection() {
            return Ok(start);
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ResolutionError::new(&item.title, "did not get a file download URL"))?;

        let resolved = start.join(location.trim()).map_err(|e| {
            ResolutionError::new(&item.title, format!("invalid redirect target {:?}: {}", location, e))
        })?;
        tracing::debug!(item = %item.title, url = %resolved, "resolved download url");
        Ok(resolved)
    }
}
