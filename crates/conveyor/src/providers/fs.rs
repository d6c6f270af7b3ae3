//! Filesystem-backed object store
//!
//! Buckets are directories under a root; keys are relative paths. Etags are
//! content hashes so change detection sees through timestamp-only touches.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{Error, Result};

use super::object_store::{content_etag, ObjectMeta, ObjectPage, ObjectStore};

const DEFAULT_PAGE_SIZE: usize = 1000;

pub struct FsObjectStore {
    root: PathBuf,
    page_size: usize,
}

impl FsObjectStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        // keys come from listings and API callers; refuse path escapes
        if bucket.contains("..") || key.split('/').any(|part| part == "..") {
            return Err(Error::storage(format!(
                "invalid object path: {}/{}",
                bucket, key
            )));
        }
        Ok(self.root.join(bucket).join(key))
    }

    fn meta_for(&self, bucket_dir: &Path, path: &Path) -> Result<ObjectMeta> {
        let data = fs::read(path)?;
        let stat = fs::metadata(path)?;
        let modified: DateTime<Utc> = stat.modified().map(DateTime::from).unwrap_or_else(|_| Utc::now());
        let key = path
            .strip_prefix(bucket_dir)
            .map_err(|e| Error::storage(e.to_string()))?
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        Ok(ObjectMeta {
            key,
            size: data.len() as u64,
            etag: content_etag(&data),
            last_modified: modified,
        })
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        page_token: Option<&str>,
    ) -> Result<ObjectPage> {
        let bucket_dir = self.root.join(bucket);
        if !bucket_dir.is_dir() {
            return Ok(ObjectPage {
                objects: Vec::new(),
                next_page_token: None,
            });
        }

        let mut matching = Vec::new();
        for entry in WalkDir::new(&bucket_dir).into_iter() {
            let entry = entry.map_err(|e| Error::storage(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let meta = self.meta_for(&bucket_dir, entry.path())?;
            if meta.key.starts_with(prefix) {
                matching.push(meta);
            }
        }
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
        let path = self.object_path(bucket, key)?;
        if !path.is_file() {
            return Err(Error::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        Ok(fs::read(path)?)
    }

    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>) -> Result<ObjectMeta> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, &data)?;
        Ok(ObjectMeta {
            key: key.to_string(),
            size: data.len() as u64,
            etag: content_etag(&data),
            last_modified: Utc::now(),
        })
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        let path = self.object_path(bucket, key)?;
        if !path.is_file() {
            return Err(Error::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        Ok(fs::remove_file(path)?)
    }
}
