use async_trait::async_trait;
use keyhole_core::record::join_short_url;
use keyhole_core::{
    BatchRequest, BatchResponse, Repository, ResolvedUrl, Result, ServiceStats, SoftDelete,
    StorageError, UserUrl,
};
use sqlx::postgres::PgPool;
use sqlx::Row;
use std::future::Future;
use std::time::Duration;

/// Deadline bound to every query so a slow statement is abandoned rather
/// than hung.
const OP_TIMEOUT: Duration = Duration::from_secs(3);

const CREATE_TABLE: &str = "\
CREATE TABLE IF NOT EXISTS urls (
    user_id bigint NOT NULL,
    short_url text NOT NULL,
    original_url text NOT NULL,
    deleted_flag boolean NOT NULL DEFAULT false,
    PRIMARY KEY (user_id, original_url)
)";

const CREATE_LOOKUP_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS urls_short_url_idx ON urls (short_url)";

/// Postgres implementation of the repository contract.
///
/// Uniqueness is keyed on `(user_id, original_url)` via the primary key;
/// an insert hitting it is answered with the short code handed out the
/// first time. Multi-statement operations run inside one transaction, so a
/// reader never observes a partially applied batch. sqlx caches prepared
/// statements per connection, which covers the deletion pipeline's
/// repeated single-row UPDATE.
#[derive(Debug, Clone)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    /// Creates a repository from an existing connection pool, ensuring the
    /// schema exists.
    pub async fn new(pool: PgPool) -> Result<Self> {
        with_timeout("create table", sqlx::query(CREATE_TABLE).execute(&pool)).await?;
        with_timeout(
            "create index",
            sqlx::query(CREATE_LOOKUP_INDEX).execute(&pool),
        )
        .await?;
        Ok(Self { pool })
    }

    /// Creates a repository by opening a new connection pool.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPool::connect(dsn).await.map_err(map_sqlx_error)?;
        Self::new(pool).await
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn existing_code(&self, original_url: &str, user_id: i64) -> Result<String> {
        let row = with_timeout(
            "lookup existing code",
            sqlx::query("SELECT short_url FROM urls WHERE original_url = $1 AND user_id = $2")
                .bind(original_url)
                .bind(user_id)
                .fetch_one(&self.pool),
        )
        .await?;

        row.try_get("short_url").map_err(map_sqlx_error)
    }
}

async fn with_timeout<T>(
    op: &str,
    fut: impl Future<Output = sqlx::Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(OP_TIMEOUT, fut).await {
        Ok(result) => result.map_err(map_sqlx_error),
        Err(_) => Err(StorageError::Timeout(format!(
            "{op} exceeded {}s",
            OP_TIMEOUT.as_secs()
        ))),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(sqlx::error::DatabaseError::is_unique_violation)
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    let message = err.to_string();

    match err {
        sqlx::Error::PoolTimedOut => StorageError::Timeout(message),
        sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StorageError::Unavailable(message),
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => StorageError::InvalidData(message),
        _ => StorageError::Query(message),
    }
}

#[async_trait]
impl SoftDelete for PgRepository {
    async fn mark_deleted(&self, code: &str, user_id: i64) -> Result<u64> {
        let result = with_timeout(
            "mark deleted",
            sqlx::query("UPDATE urls SET deleted_flag = true WHERE user_id = $1 AND short_url = $2")
                .bind(user_id)
                .bind(code)
                .execute(&self.pool),
        )
        .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn get_url(&self, code: &str) -> Result<Option<ResolvedUrl>> {
        let row = with_timeout(
            "get url",
            sqlx::query(
                "SELECT original_url, deleted_flag FROM urls WHERE short_url = $1 LIMIT 1",
            )
            .bind(code)
            .fetch_optional(&self.pool),
        )
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let original_url: String = row.try_get("original_url").map_err(map_sqlx_error)?;
        let deleted: bool = row.try_get("deleted_flag").map_err(map_sqlx_error)?;

        Ok(Some(ResolvedUrl {
            original_url,
            deleted,
        }))
    }

    async fn add_url(&self, code: &str, original_url: &str, user_id: i64) -> Result<()> {
        let result = tokio::time::timeout(
            OP_TIMEOUT,
            sqlx::query("INSERT INTO urls (user_id, short_url, original_url) VALUES ($1, $2, $3)")
                .bind(user_id)
                .bind(code)
                .bind(original_url)
                .execute(&self.pool),
        )
        .await
        .map_err(|_| {
            StorageError::Timeout(format!("add url exceeded {}s", OP_TIMEOUT.as_secs()))
        })?;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                let existing_code = self.existing_code(original_url, user_id).await?;
                Err(StorageError::Conflict { existing_code })
            }
            Err(err) => Err(map_sqlx_error(err)),
        }
    }

    async fn add_batch(
        &self,
        codes: &[BatchResponse],
        urls: &[BatchRequest],
        user_id: i64,
    ) -> Result<()> {
        if codes.len() != urls.len() {
            return Err(StorageError::InvalidData(format!(
                "batch length mismatch: {} codes for {} urls",
                codes.len(),
                urls.len()
            )));
        }

        // The transaction rolls back on drop if any insert fails, so no
        // row from a failed batch is ever visible.
        let work = async {
            let mut tx = self.pool.begin().await?;
            for (code, url) in codes.iter().zip(urls) {
                sqlx::query(
                    "INSERT INTO urls (user_id, short_url, original_url) VALUES ($1, $2, $3)",
                )
                .bind(user_id)
                .bind(&code.short_code)
                .bind(&url.original_url)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await
        };

        with_timeout("add batch", work).await
    }

    async fn user_urls(&self, base_url: &str, user_id: i64) -> Result<Vec<UserUrl>> {
        let rows = with_timeout(
            "list user urls",
            sqlx::query("SELECT short_url, original_url FROM urls WHERE user_id = $1")
                .bind(user_id)
                .fetch_all(&self.pool),
        )
        .await?;

        rows.into_iter()
            .map(|row| {
                let code: String = row.try_get("short_url").map_err(map_sqlx_error)?;
                let original_url: String =
                    row.try_get("original_url").map_err(map_sqlx_error)?;
                Ok(UserUrl {
                    short_url: join_short_url(base_url, &code),
                    original_url,
                })
            })
            .collect()
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
        let row = with_timeout(
            "stats",
            sqlx::query("SELECT COUNT(*) AS urls, COUNT(DISTINCT user_id) AS users FROM urls")
                .fetch_one(&self.pool),
        )
        .await?;

        let urls: i64 = row.try_get("urls").map_err(map_sqlx_error)?;
        let users: i64 = row.try_get("users").map_err(map_sqlx_error)?;

        Ok(ServiceStats {
            urls: urls as u64,
            users: users as u64,
        })
    }

    async fn ping(&self) -> Result<()> {
        with_timeout("ping", sqlx::query("SELECT 1").execute(&self.pool)).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_timeout_maps_to_timeout() {
        assert!(matches!(
            map_sqlx_error(sqlx::Error::PoolTimedOut),
            StorageError::Timeout(_)
        ));
    }

    #[test]
    fn pool_closed_maps_to_unavailable() {
        assert!(matches!(
            map_sqlx_error(sqlx::Error::PoolClosed),
            StorageError::Unavailable(_)
        ));
    }

    #[test]
    fn decode_failures_map_to_invalid_data() {
        assert!(matches!(
            map_sqlx_error(sqlx::Error::ColumnNotFound("deleted_flag".to_string())),
            StorageError::InvalidData(_)
        ));
        assert!(matches!(
            map_sqlx_error(sqlx::Error::RowNotFound),
            StorageError::InvalidData(_)
        ));
    }
}
