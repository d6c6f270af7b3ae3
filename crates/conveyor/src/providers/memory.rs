//! In-memory object store

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use crate::error::{Error, Result};

use super::object_store::{content_etag, ObjectMeta, ObjectPage, ObjectStore};

const DEFAULT_PAGE_SIZE: usize = 1000;

struct StoredObject {
    data: Vec<u8>,
    meta: ObjectMeta,
}

/// In-memory object store keyed by (bucket, key). Pagination is real (the
/// page size is configurable) so listing code paths behave as they do
/// against remote storage.
pub struct MemoryObjectStore {
    objects: DashMap<(String, String), StoredObject>,
    page_size: usize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            objects: DashMap::new(),
            page_size: page_size.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        page_token: Option<&str>,
    ) -> Result<ObjectPage> {
        let mut matching: Vec<ObjectMeta> = self
            .objects
            .iter()
            .filter(|entry| {
                let (b, k) = entry.key();
                b == bucket && k.starts_with(prefix)
            })
            .map(|entry| entry.value().meta.clone())
            .collect();
        matching.sort_by(|a, b| a.key.cmp(&b.key));

        let start = match page_token {
            Some(after) => matching.partition_point(|m| m.key.as_str() <= after),
            None => 0,
        };
        let page: Vec<ObjectMeta> = matching
            .into_iter()
            .skip(start)
            .take(self.page_size)
            .collect();
        let next_page_token = if page.len() == self.page_size {
            page.last().map(|m| m.key.clone())
        } else {
            None
        };

        Ok(ObjectPage {
            objects: page,
            next_page_token,
        })
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|entry| entry.data.clone())
            .ok_or_else(|| Error::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>) -> Result<ObjectMeta> {
        let meta = ObjectMeta {
            key: key.to_string(),
            size: data.len() as u64,
            etag: content_etag(&data),
            last_modified: Utc::now(),
        };
        self.objects.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data,
                meta: meta.clone(),
            },
        );
        Ok(meta)
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        self.objects
            .remove(&(bucket.to_string(), key.to_string()))
            .map(|_| ())
            .ok_or_else(|| Error::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }
}
