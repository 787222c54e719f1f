use async_trait::async_trait;
use keyhole_core::record::join_short_url;
use keyhole_core::{
    BatchRequest, BatchResponse, Repository, ResolvedUrl, Result, ServiceStats, SoftDelete,
    StorageError, UrlRecord, UserUrl,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory implementation of the repository contract.
///
/// Records live in an append-only slice behind a read-write lock: reads
/// take the read lock, writes take the write lock, and a batch appends
/// under one held write lock so a reader never observes part of it.
/// Fastest backend, volatile.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRepository {
    records: Arc<RwLock<Vec<UrlRecord>>>,
}

impl InMemoryRepository {
    /// Creates an empty in-memory repository.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Scans for an existing `(user_id, original_url)` pair and returns its
/// short code. Realizes the idempotent duplicate-insert policy shared by
/// all backends.
fn find_existing(records: &[UrlRecord], original_url: &str, user_id: i64) -> Option<String> {
    records
        .iter()
        .find(|r| r.user_id == user_id && r.original_url == original_url)
        .map(|r| r.short_code.clone())
}

pub(crate) fn batch_records(
    codes: &[BatchResponse],
    urls: &[BatchRequest],
    user_id: i64,
) -> Result<Vec<UrlRecord>> {
    if codes.len() != urls.len() {
        return Err(StorageError::InvalidData(format!(
            "batch length mismatch: {} codes for {} urls",
            codes.len(),
            urls.len()
        )));
    }

    Ok(codes
        .iter()
        .zip(urls)
        .map(|(code, url)| UrlRecord {
            short_code: code.short_code.clone(),
            original_url: url.original_url.clone(),
            user_id,
            deleted: false,
        })
        .collect())
}

/// Rejects a batch containing a `(user_id, original_url)` pair that
/// already exists, either in the store or earlier in the same batch.
pub(crate) fn check_batch_conflicts(
    existing: &[UrlRecord],
    batch: &[UrlRecord],
) -> Result<()> {
    for (idx, record) in batch.iter().enumerate() {
        let earlier = &batch[..idx];
        let found = find_existing(existing, &record.original_url, record.user_id)
            .or_else(|| find_existing(earlier, &record.original_url, record.user_id));
        if let Some(existing_code) = found {
            return Err(StorageError::Conflict { existing_code });
        }
    }
    Ok(())
}

#[async_trait]
impl SoftDelete for InMemoryRepository {
    async fn mark_deleted(&self, code: &str, user_id: i64) -> Result<u64> {
        let mut records = self.records.write().await;
        match records
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
impl Repository for InMemoryRepository {
    async fn get_url(&self, code: &str) -> Result<Option<ResolvedUrl>> {
        let records = self.records.read().await;
        Ok(records.iter().find(|r| r.short_code == code).map(|r| {
            ResolvedUrl {
                original_url: r.original_url.clone(),
                deleted: r.deleted,
            }
        }))
    }

    async fn add_url(&self, code: &str, original_url: &str, user_id: i64) -> Result<()> {
        let mut records = self.records.write().await;

        if let Some(existing_code) = find_existing(&records, original_url, user_id) {
            return Err(StorageError::Conflict { existing_code });
        }

        records.push(UrlRecord {
            short_code: code.to_string(),
            original_url: original_url.to_string(),
            user_id,
            deleted: false,
        });
        Ok(())
    }

    async fn add_batch(
        &self,
        codes: &[BatchResponse],
        urls: &[BatchRequest],
        user_id: i64,
    ) -> Result<()> {
        let batch = batch_records(codes, urls, user_id)?;

        let mut records = self.records.write().await;
        check_batch_conflicts(&records, &batch)?;
        records.extend(batch);
        Ok(())
    }

    async fn user_urls(&self, base_url: &str, user_id: i64) -> Result<Vec<UserUrl>> {
        let records = self.records.read().await;
        Ok(records
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
        let records = self.records.read().await;
        let users = records
            .iter()
            .map(|r| r.user_id)
            .collect::<HashSet<_>>()
            .len() as u64;
        Ok(ServiceStats {
            urls: records.len() as u64,
            users,
        })
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyhole_generator::{Generator, RandomGenerator};

    fn batch_response(correlation_id: &str, code: &str) -> BatchResponse {
        BatchResponse {
            correlation_id: correlation_id.to_string(),
            short_url: join_short_url("http://localhost:8080", code),
            short_code: code.to_string(),
        }
    }

    fn batch_request(correlation_id: &str, url: &str) -> BatchRequest {
        BatchRequest {
            correlation_id: correlation_id.to_string(),
            original_url: url.to_string(),
        }
    }

    #[tokio::test]
    async fn round_trip() {
        let repo = InMemoryRepository::new();
        let code = RandomGenerator::new().generate();

        repo.add_url(&code, "https://example.com", 1).await.unwrap();

        let resolved = repo.get_url(&code).await.unwrap().unwrap();
        assert_eq!(resolved.original_url, "https://example.com");
        assert!(!resolved.deleted);
    }

    #[tokio::test]
    async fn get_nonexistent() {
        let repo = InMemoryRepository::new();
        assert!(repo.get_url("nope42").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_insert_returns_existing_code() {
        let repo = InMemoryRepository::new();

        repo.add_url("first1", "https://example.com", 1)
            .await
            .unwrap();

        let err = repo
            .add_url("second", "https://example.com", 1)
            .await
            .unwrap_err();

        match err {
            StorageError::Conflict { existing_code } => assert_eq!(existing_code, "first1"),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn same_url_different_owner_is_not_a_conflict() {
        let repo = InMemoryRepository::new();

        repo.add_url("aaa111", "https://example.com", 1)
            .await
            .unwrap();
        repo.add_url("bbb222", "https://example.com", 2)
            .await
            .unwrap();

        assert_eq!(repo.stats().await.unwrap().urls, 2);
    }

    #[tokio::test]
    async fn listing_is_owner_scoped() {
        let repo = InMemoryRepository::new();

        repo.add_url("aaa111", "https://a.example", 1).await.unwrap();
        repo.add_url("bbb222", "https://b.example", 2).await.unwrap();

        let urls = repo.user_urls("http://localhost:8080", 1).await.unwrap();
        assert_eq!(urls.len(), 1);
        assert_eq!(urls[0].short_url, "http://localhost:8080/aaa111");
        assert_eq!(urls[0].original_url, "https://a.example");
    }

    #[tokio::test]
    async fn listing_includes_deleted_records() {
        let repo = InMemoryRepository::new();

        repo.add_url("aaa111", "https://a.example", 1).await.unwrap();
        repo.delete_user_urls(vec!["aaa111".to_string()], 1)
            .await
            .unwrap();

        let urls = repo.user_urls("http://localhost:8080", 1).await.unwrap();
        assert_eq!(urls.len(), 1);
    }

    #[tokio::test]
    async fn delete_is_scoped_to_the_owner() {
        let repo = InMemoryRepository::new();

        repo.add_url("shared", "https://a.example", 1).await.unwrap();
        repo.add_url("other9", "https://b.example", 2).await.unwrap();

        // User 2 naming user 1's code must be a no-op.
        repo.delete_user_urls(vec!["shared".to_string()], 2)
            .await
            .unwrap();
        assert!(!repo.get_url("shared").await.unwrap().unwrap().deleted);

        repo.delete_user_urls(vec!["shared".to_string()], 1)
            .await
            .unwrap();
        assert!(repo.get_url("shared").await.unwrap().unwrap().deleted);
    }

    #[tokio::test]
    async fn bulk_delete_flags_every_matching_record() {
        let repo = InMemoryRepository::new();
        let codes: Vec<String> = (0..25).map(|i| format!("code{i:02}")).collect();

        for (i, code) in codes.iter().enumerate() {
            repo.add_url(code, &format!("https://example.com/{i}"), 7)
                .await
                .unwrap();
        }

        repo.delete_user_urls(codes.clone(), 7).await.unwrap();

        for code in &codes {
            assert!(repo.get_url(code).await.unwrap().unwrap().deleted);
        }
    }

    #[tokio::test]
    async fn stats_count_urls_and_distinct_users() {
        let repo = InMemoryRepository::new();

        repo.add_url("aaa111", "https://a.example", 1).await.unwrap();
        repo.add_url("bbb222", "https://b.example", 1).await.unwrap();
        repo.add_url("ccc333", "https://c.example", 2).await.unwrap();

        let stats = repo.stats().await.unwrap();
        assert_eq!(stats.urls, 3);
        assert_eq!(stats.users, 2);
    }

    #[tokio::test]
    async fn stats_include_deleted_records() {
        let repo = InMemoryRepository::new();

        repo.add_url("aaa111", "https://a.example", 1).await.unwrap();
        repo.delete_user_urls(vec!["aaa111".to_string()], 1)
            .await
            .unwrap();

        let stats = repo.stats().await.unwrap();
        assert_eq!(stats.urls, 1);
        assert_eq!(stats.users, 1);
    }

    #[tokio::test]
    async fn batch_insert_preserves_order_and_pairing() {
        let repo = InMemoryRepository::new();

        let codes = vec![batch_response("1", "aaa111"), batch_response("2", "bbb222")];
        let urls = vec![
            batch_request("1", "https://a.example"),
            batch_request("2", "https://b.example"),
        ];

        repo.add_batch(&codes, &urls, 5).await.unwrap();

        let resolved = repo.get_url("bbb222").await.unwrap().unwrap();
        assert_eq!(resolved.original_url, "https://b.example");

        let listed = repo.user_urls("http://localhost:8080", 5).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].original_url, "https://a.example");
        assert_eq!(listed[1].original_url, "https://b.example");
    }

    #[tokio::test]
    async fn conflicting_batch_is_not_applied_at_all() {
        let repo = InMemoryRepository::new();
        repo.add_url("aaa111", "https://a.example", 5).await.unwrap();

        let codes = vec![batch_response("1", "bbb222"), batch_response("2", "ccc333")];
        let urls = vec![
            batch_request("1", "https://new.example"),
            batch_request("2", "https://a.example"),
        ];

        let err = repo.add_batch(&codes, &urls, 5).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict { .. }));

        // Nothing from the failed batch is visible.
        assert!(repo.get_url("bbb222").await.unwrap().is_none());
        assert_eq!(repo.stats().await.unwrap().urls, 1);
    }

    #[tokio::test]
    async fn mismatched_batch_lengths_are_rejected() {
        let repo = InMemoryRepository::new();

        let codes = vec![batch_response("1", "aaa111")];
        let urls = vec![
            batch_request("1", "https://a.example"),
            batch_request("2", "https://b.example"),
        ];

        let err = repo.add_batch(&codes, &urls, 5).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidData(_)));
    }

    #[tokio::test]
    async fn concurrent_writers_lose_no_updates() {
        let repo = InMemoryRepository::new();
        let mut handles = Vec::new();

        for i in 0..32i64 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.add_url(
                    &format!("code{i:03}"),
                    &format!("https://example.com/{i}"),
                    i,
                )
                .await
                .unwrap();
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        let stats = repo.stats().await.unwrap();
        assert_eq!(stats.urls, 32);
        assert_eq!(stats.users, 32);
    }

    #[tokio::test]
    async fn ping_and_close() {
        let repo = InMemoryRepository::new();
        repo.ping().await.unwrap();
        repo.close().await.unwrap();
    }
}
