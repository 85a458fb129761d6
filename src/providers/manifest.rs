use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::{DownloadItem, FilterOptions, ItemSource};
use crate::error::SourceError;

/// Items listed in a JSON file, either a bare array or `{ "items": [...] }`.
///
/// ```json
/// [{ "id": "B00ABC", "title": "Dune", "url": "https://vendor/dl?asin=B00ABC" }]
/// ```
pub struct ManifestSource {
    path: PathBuf,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Manifest {
    List(Vec<DownloadItem>),
    Wrapped { items: Vec<DownloadItem> },
}

impl ManifestSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Parse manifest text, checking every item has a unique id and a title.
pub fn parse_manifest(content: &str) -> Result<Vec<DownloadItem>, SourceError> {
    let items = match serde_json::from_str::<Manifest>(content)? {
        Manifest::List(items) => items,
        Manifest::Wrapped { items } => items,
    };

    let mut seen = HashSet::new();
    for (index, item) in items.iter().enumerate() {
        if item.id.trim().is_empty() {
            return Err(SourceError::MissingField { index, field: "id" });
        }
        if !seen.insert(item.id.as_str()) {
            return Err(SourceError::DuplicateId {
                index,
                id: item.id.clone(),
            });
        }
        if item.title.trim().is_empty() {
            return Err(SourceError::MissingField { index, field: "title" });
        }
    }
    Ok(items)
}

#[async_trait]
impl ItemSource for ManifestSource {
    async fn list_items(&self, filter: &FilterOptions) -> Result<Vec<DownloadItem>, SourceError> {
        let content = fs::read_to_string(&self.path)
            .await
            .map_err(|source| SourceError::Read {
                path: self.path.clone(),
                source,
            })?;
        let items = parse_manifest(&content)?;
        let total = items.len();
        let items: Vec<_> = items.into_iter().filter(|i| filter.matches(i)).collect();
        tracing::info!(path = %self.path.display(), total, selected = items.len(), "loaded item manifest");
        Ok(items)
    }
}
