use crate::memory::{batch_records, check_batch_conflicts};
use async_trait::async_trait;
use keyhole_core::record::join_short_url;
use keyhole_core::{
    BatchRequest, BatchResponse, Repository, ResolvedUrl, Result, ServiceStats, SoftDelete,
    StorageError, UrlRecord, UserUrl,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

/// On-disk shape of one record: one JSON object per line, append-only
/// during normal operation.
#[derive(Debug, Serialize, Deserialize)]
struct FileRecord {
    short_url: String,
    original_url: String,
    is_deleted: bool,
    user_id: i64,
}

impl From<&UrlRecord> for FileRecord {
    fn from(record: &UrlRecord) -> Self {
        Self {
            short_url: record.short_code.clone(),
            original_url: record.original_url.clone(),
            is_deleted: record.deleted,
            user_id: record.user_id,
        }
    }
}

impl From<FileRecord> for UrlRecord {
    fn from(record: FileRecord) -> Self {
        Self {
            short_code: record.short_url,
            original_url: record.original_url,
            user_id: record.user_id,
            deleted: record.is_deleted,
        }
    }
}

#[derive(Debug)]
struct FileInner {
    file: File,
    records: Vec<UrlRecord>,
}

/// File-backed implementation of the repository contract.
///
/// Keeps the same in-memory slice as the memory backend, mirrored to an
/// append-only JSON-lines file that is replayed on startup. Appends happen
/// under the write lock before the in-memory mutation, so memory never gets
/// ahead of the log within one process. Deletion flags are applied in
/// memory and persisted by the [`close`](Repository::close) compaction.
#[derive(Debug, Clone)]
pub struct FileRepository {
    path: Arc<PathBuf>,
    inner: Arc<RwLock<FileInner>>,
}

fn encode_line(record: &UrlRecord) -> Result<String> {
    let mut line = serde_json::to_string(&FileRecord::from(record))
        .map_err(|e| StorageError::InvalidData(e.to_string()))?;
    line.push('\n');
    Ok(line)
}

impl FileRepository {
    /// Opens (creating if absent) the backing file and replays it into
    /// memory.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = replay(&path).await?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self {
            path: Arc::new(path),
            inner: Arc::new(RwLock::new(FileInner { file, records })),
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn replay(path: &Path) -> Result<Vec<UrlRecord>> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut records = Vec::new();
    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let record: FileRecord = serde_json::from_str(line).map_err(|e| {
            StorageError::InvalidData(format!("corrupt record in {}: {e}", path.display()))
        })?;
        records.push(record.into());
    }
    Ok(records)
}

#[async_trait]
impl SoftDelete for FileRepository {
    async fn mark_deleted(&self, code: &str, user_id: i64) -> Result<u64> {
        let mut inner = self.inner.write().await;
        match inner
            .records
            .iter_mut()
            .find(|r| r.short_code == code && r.user_id == user_id)
        {
            Some(record) => {
                record.deleted = true;
                Ok(1)
            }
            None => Ok(0),
        }
    }
}

#[async_trait]
impl Repository for FileRepository {
    async fn get_url(&self, code: &str) -> Result<Option<ResolvedUrl>> {
        let inner = self.inner.read().await;
        Ok(inner
            .records
            .iter()
            .find(|r| r.short_code == code)
            .map(|r| ResolvedUrl {
                original_url: r.original_url.clone(),
                deleted: r.deleted,
            }))
    }

    async fn add_url(&self, code: &str, original_url: &str, user_id: i64) -> Result<()> {
        let record = UrlRecord {
            short_code: code.to_string(),
            original_url: original_url.to_string(),
            user_id,
            deleted: false,
        };

        let mut inner = self.inner.write().await;

        if let Some(existing) = inner
            .records
            .iter()
            .find(|r| r.user_id == user_id && r.original_url == original_url)
        {
            return Err(StorageError::Conflict {
                existing_code: existing.short_code.clone(),
            });
        }

        let line = encode_line(&record)?;
        inner.file.write_all(line.as_bytes()).await?;
        inner.file.flush().await?;

        inner.records.push(record);
        Ok(())
    }

    async fn add_batch(
        &self,
        codes: &[BatchResponse],
        urls: &[BatchRequest],
        user_id: i64,
    ) -> Result<()> {
        let batch = batch_records(codes, urls, user_id)?;

        let mut inner = self.inner.write().await;
        check_batch_conflicts(&inner.records, &batch)?;

        let mut data = String::new();
        for record in &batch {
            data.push_str(&encode_line(record)?);
        }

        // One write under one held lock keeps the batch atomic for readers
        // and contiguous in the log.
        inner.file.write_all(data.as_bytes()).await?;
        inner.file.flush().await?;

        inner.records.extend(batch);
        Ok(())
    }

    async fn user_urls(&self, base_url: &str, user_id: i64) -> Result<Vec<UserUrl>> {
        let inner = self.inner.read().await;
        Ok(inner
            .records
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| UserUrl {
                short_url: join_short_url(base_url, &r.short_code),
                original_url: r.original_url.clone(),
            })
            .collect())
    }

    async fn delete_user_urls(&self, codes: Vec<String>, user_id: i64) -> Result<()> {
        let requests = codes
            .into_iter()
            .map(|short_code| keyhole_deleter::DeleteRequest {
                short_code,
                user_id,
            })
            .collect();

        let (_cancel_tx, cancel_rx) = keyhole_deleter::cancel_pair();
        keyhole_deleter::run(self.clone(), requests, cancel_rx).await;
        Ok(())
    }

    async fn stats(&self) -> Result<ServiceStats> {
        let inner = self.inner.read().await;
        let users = inner
            .records
            .iter()
            .map(|r| r.user_id)
            .collect::<HashSet<_>>()
            .len() as u64;
        Ok(ServiceStats {
            urls: inner.records.len() as u64,
            users,
        })
    }

    async fn ping(&self) -> Result<()> {
        match tokio::fs::metadata(self.path.as_ref()).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(StorageError::Unavailable(
                format!("storage file does not exist: {}", self.path.display()),
            )),
            Err(err) => Err(err.into()),
        }
    }

    /// Rewrites the whole in-memory record set back to the file, compacting
    /// the log and persisting deletion flags.
    async fn close(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.file.flush().await?;

        let mut data = String::new();
        for record in &inner.records {
            data.push_str(&encode_line(record)?);
        }

        tokio::fs::write(self.path.as_ref(), data).await?;
        Ok(())
    }
}
