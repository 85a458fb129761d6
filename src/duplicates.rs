//! Detect downloads that already finished in an earlier run.
//!
//! A file counts as complete when it exists and its length matches the size
//! the server declares. Equal size does not prove equal content: a corrupted
//! file of the right length is reported complete. Content verification is
//! not attempted.

use chrono::{DateTime, Local};
use std::path::Path;
use tokio::fs;

/// True only if `path` is a regular file of exactly `expected_size` bytes.
/// Any error reading metadata means "not complete".
pub async fn is_complete(path: &Path, expected_size: u64) -> bool {
    match fs::metadata(path).await {
        Ok(metadata) => metadata.is_file() && metadata.len() == expected_size,
        Err(_) => false,
    }
}

/// Last-modified time of an existing file, for display next to skipped items.
pub async fn modified_at(path: &Path) -> Option<DateTime<Local>> {
    let metadata = fs::metadata(path).await.ok()?;
    metadata.modified().ok().map(DateTime::<Local>::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn exact_size_is_complete() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("book.azw3");
        std::fs::write(&path, b"0123456789").unwrap();

        assert!(is_complete(&path, 10).await);
    }

    #[tokio::test]
    async fn size_mismatch_is_not_complete() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("book.azw3");
        std::fs::write(&path, b"0123456789").unwrap();

        assert!(!is_complete(&path, 9).await);
        assert!(!is_complete(&path, 11).await);
    }

    #[tokio::test]
    async fn empty_file_is_not_complete_for_nonzero_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.azw3");
        std::fs::write(&path, b"").unwrap();

        assert!(!is_complete(&path, 1).await);
        assert!(is_complete(&path, 0).await);
    }

    #[tokio::test]
    async fn missing_file_is_not_complete() {
        let dir = TempDir::new().unwrap();
        assert!(!is_complete(&dir.path().join("missing.azw3"), 0).await);
    }

    #[tokio::test]
    async fn directory_is_not_complete() {
        let dir = TempDir::new().unwrap();
        let meta_len = std::fs::metadata(dir.path()).unwrap().len();
        assert!(!is_complete(dir.path(), meta_len).await);
    }

    #[tokio::test]
    async fn modified_at_reads_existing_files_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("book.azw3");
        assert!(modified_at(&path).await.is_none());
        std::fs::write(&path, b"x").unwrap();
        assert!(modified_at(&path).await.is_some());
    }
}
