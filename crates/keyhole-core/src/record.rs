use serde::{Deserialize, Serialize};

/// A stored short-URL record.
///
/// Records are append-only: they are created through the insert path and
/// never physically removed, only flagged via `deleted`. The flag is
/// monotonic; once set it never reverts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlRecord {
    /// The short code resolving to the original URL.
    pub short_code: String,
    /// The original URL exactly as supplied by the caller. The storage
    /// layer never validates or normalizes it.
    pub original_url: String,
    /// The anonymous session that created the record. Not a foreign key;
    /// users exist only as this integer.
    pub user_id: i64,
    /// Soft-deletion flag.
    pub deleted: bool,
}

/// The result of resolving a short code.
///
/// `Option<ResolvedUrl>` distinguishes a missing code (`None`) from a
/// soft-deleted one (`deleted == true`), so transport layers can map them
/// to 404 and 410 respectively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUrl {
    pub original_url: String,
    pub deleted: bool,
}

/// One entry of a bulk-shorten request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    /// Caller-chosen ID correlating this entry with its response.
    pub correlation_id: String,
    /// URL to shorten.
    pub original_url: String,
}

/// One entry of a bulk-shorten response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResponse {
    /// Caller-chosen ID correlating this entry with its request.
    pub correlation_id: String,
    /// Full short URL for the response body.
    pub short_url: String,
    /// Bare short code for storage, not part of the response body.
    #[serde(skip)]
    pub short_code: String,
}

/// A short/original URL pair from an owner's listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUrl {
    pub short_url: String,
    pub original_url: String,
}

/// Aggregate service statistics, computed on demand and never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Amount of records, deleted ones included.
    pub urls: u64,
    /// Amount of distinct user IDs across all records.
    pub users: u64,
}

/// Joins a base URL and a short code into a full short URL.
pub fn join_short_url(base_url: &str, code: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), code)
}
