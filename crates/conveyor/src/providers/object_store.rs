//! Object store capability
//!
//! Listing is paginated the way real stores paginate; callers that need a
//! complete snapshot drive the continuation token (see [`list_all`]).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;

/// One listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}

/// One page of a listing.
#[derive(Debug, Clone)]
pub struct ObjectPage {
    pub objects: Vec<ObjectMeta>,
    /// Token for the next page; None when the listing is exhausted.
    pub next_page_token: Option<String>,
}

/// Opaque object storage: list/get/put/delete by bucket and key.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List objects under a prefix, one page at a time. Keys are returned in
    /// lexicographic order; `page_token` continues after the named key.
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        page_token: Option<&str>,
    ) -> Result<ObjectPage>;

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>) -> Result<ObjectMeta>;

    async fn delete(&self, bucket: &str, key: &str) -> Result<()>;
}

/// Drive pagination until the listing is exhausted, yielding a complete,
/// internally consistent snapshot.
pub async fn list_all(
    store: &dyn ObjectStore,
    bucket: &str,
    prefix: &str,
) -> Result<Vec<ObjectMeta>> {
    let mut objects = Vec::new();
    let mut token: Option<String> = None;
    loop {
        let page = store.list_page(bucket, prefix, token.as_deref()).await?;
        objects.extend(page.objects);
        match page.next_page_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }
    Ok(objects)
}

/// Content etag shared by the shipped backends: hex SHA-256 of the bytes.
pub(crate) fn content_etag(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
