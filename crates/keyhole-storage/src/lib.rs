//! Storage backends for the Keyhole URL shortener.
//!
//! Three interchangeable implementations of the repository contract —
//! in-memory, append-only file, and Postgres — plus the config-driven
//! factory selecting one of them at startup.

pub mod file;
pub mod memory;
pub mod postgres;

pub use file::FileRepository;
pub use memory::InMemoryRepository;
pub use postgres::PgRepository;

pub use keyhole_core::{Repository, Result, SoftDelete, StorageError};

use std::path::PathBuf;
use std::sync::Arc;

/// Backend selection knobs, supplied by the process configuration layer.
///
/// A non-empty database DSN wins over a file path; with neither set the
/// volatile in-memory backend is used.
#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    /// Database connection string; non-empty selects the Postgres backend.
    pub database_dsn: Option<String>,
    /// Path of the JSON-lines log; non-empty (and no DSN) selects the file
    /// backend.
    pub file_path: Option<PathBuf>,
}

/// Constructs the repository selected by `config`.
///
/// Called once at startup; the returned instance is passed by reference to
/// every consumer, there is no ambient global store.
pub async fn from_config(config: &StorageConfig) -> Result<Arc<dyn Repository>> {
    if let Some(dsn) = config.database_dsn.as_deref().filter(|d| !d.is_empty()) {
        return Ok(Arc::new(PgRepository::connect(dsn).await?));
    }

    if let Some(path) = config
        .file_path
        .as_deref()
        .filter(|p| !p.as_os_str().is_empty())
    {
        return Ok(Arc::new(FileRepository::open(path).await?));
    }

    Ok(Arc::new(InMemoryRepository::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn defaults_to_the_memory_backend() {
        let repo = from_config(&StorageConfig::default()).await.unwrap();

        repo.add_url("aaa111", "https://example.com", 1).await.unwrap();
        let resolved = repo.get_url("aaa111").await.unwrap().unwrap();
        assert_eq!(resolved.original_url, "https://example.com");
        repo.ping().await.unwrap();
    }

    #[tokio::test]
    async fn empty_strings_count_as_unset() {
        let config = StorageConfig {
            database_dsn: Some(String::new()),
            file_path: Some(PathBuf::new()),
        };

        let repo = from_config(&config).await.unwrap();
        repo.ping().await.unwrap();
    }

    #[tokio::test]
    async fn file_path_selects_the_file_backend() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short-url-db.json");
        let config = StorageConfig {
            database_dsn: None,
            file_path: Some(path.clone()),
        };

        let repo = from_config(&config).await.unwrap();
        repo.add_url("aaa111", "https://example.com", 1).await.unwrap();

        // The backing file exists and received the record.
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 1);
    }
}
