pub mod manifest;
pub mod redirect;

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use url::Url;

use crate::error::{ResolutionError, SourceError};

pub use manifest::ManifestSource;
pub use redirect::RedirectResolver;

/// One downloadable unit from the catalog.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct DownloadItem {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    /// Catalog-specific fields needed to request the item's URL
    #[serde(flatten)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl DownloadItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

/// Narrows what a source returns.
#[derive(Clone, Debug, Default)]
pub struct FilterOptions {
    /// Case-insensitive substring of the title
    pub search: Option<String>,
    /// Identifiers or titles (case-insensitive) to leave out
    pub exclude: Vec<String>,
}

impl FilterOptions {
    pub fn matches(&self, item: &DownloadItem) -> bool {
        if let Some(search) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            if !item.title.to_lowercase().contains(&search.to_lowercase()) {
                return false;
            }
        }
        !self
            .exclude
            .iter()
            .any(|e| e == &item.id || e.eq_ignore_ascii_case(&item.title))
    }
}

#[async_trait]
pub trait ItemSource: Send + Sync {
    /// Every item matching `filter`, in catalog order.
    async fn list_items(&self, filter: &FilterOptions) -> Result<Vec<DownloadItem>, SourceError>;
}

#[async_trait]
pub trait UrlResolver: Send + Sync {
    /// Ask the vendor for the item's transient download URL.
    async fn resolve_download_url(&self, item: &DownloadItem) -> Result<Url, ResolutionError>;
}
