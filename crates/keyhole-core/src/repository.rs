use crate::error::Result;
use crate::record::{BatchRequest, BatchResponse, ResolvedUrl, ServiceStats, UserUrl};
use async_trait::async_trait;

/// The per-item soft-delete operation the deletion pipeline fans out over.
///
/// Split from [`Repository`] so the pipeline can be driven by anything that
/// knows how to flag one `(code, user)` pair, including test doubles.
#[async_trait]
pub trait SoftDelete: Send + Sync + 'static {
    /// Flags the record matching both `code` and `user_id` as deleted.
    /// Returns the number of affected records (0 when nothing matched --
    /// a code owned by another user is silently a no-op).
    async fn mark_deleted(&self, code: &str, user_id: i64) -> Result<u64>;
}

/// The storage contract every backend satisfies.
///
/// All methods are async and deadline-friendly; backends that talk to the
/// database bind their own per-operation timeout so a slow query is
/// abandoned rather than hung.
#[async_trait]
pub trait Repository: SoftDelete {
    /// Resolves a short code, regardless of who owns it. Returns `None`
    /// when no record matches; the caller distinguishes that from a
    /// soft-deleted record via [`ResolvedUrl::deleted`].
    async fn get_url(&self, code: &str) -> Result<Option<ResolvedUrl>>;

    /// Inserts a new record with a caller-supplied code. On a
    /// `(user_id, original_url)` uniqueness conflict returns
    /// [`StorageError::Conflict`] carrying the pre-existing code, so
    /// shortening the same URL twice yields the same short code.
    ///
    /// [`StorageError::Conflict`]: crate::StorageError::Conflict
    async fn add_url(&self, code: &str, original_url: &str, user_id: i64) -> Result<()>;

    /// Inserts a batch of records correlated by position, all or nothing.
    /// A reader never observes a subset of one batch.
    async fn add_batch(
        &self,
        codes: &[BatchResponse],
        urls: &[BatchRequest],
        user_id: i64,
    ) -> Result<()>;

    /// Lists every record owned by `user_id`, deleted ones included.
    /// Deletion affects resolution, not listing.
    async fn user_urls(&self, base_url: &str, user_id: i64) -> Result<Vec<UserUrl>>;

    /// Runs the deletion pipeline over `codes` for `user_id` and returns
    /// once the pipeline has drained. Individual item failures are logged
    /// and counted, never propagated; callers wanting fire-and-forget
    /// semantics wrap this in their own spawned task.
    async fn delete_user_urls(&self, codes: Vec<String>, user_id: i64) -> Result<()>;

    /// Computes aggregate statistics over all records.
    async fn stats(&self) -> Result<ServiceStats>;

    /// Probes backend liveness.
    async fn ping(&self) -> Result<()>;

    /// Flushes and releases backend resources.
    async fn close(&self) -> Result<()>;
}
