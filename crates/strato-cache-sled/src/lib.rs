#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **strato-cache-sled** – Sled-based persistent entity-cache driver for the Strato sync core.
//!
//! This crate provides a durable, embedded implementation of the
//! [`EntityCache`] contract using the sled database engine. Three trees hold
//! the data: `entries` (key → value), `tags` (key → JSON tag list), and
//! `tag_index` (composite `tag\0key` → ()) which serves as the secondary
//! index behind tag iteration. The contract is identical to the in-memory
//! reference driver; a production deployment may instead inject any document
//! store with secondary indexes.

use std::path::Path;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use sled::{Db, Tree};

use strato_cache_core::{CacheError, EntityCache, EntityLookup};

/// Separator between the tag and the key in `tag_index` composite keys.
/// NUL cannot occur in tags, which keeps prefix scans exact.
const INDEX_SEPARATOR: u8 = 0;

/// A persistent entity cache backed by the sled embedded database.
#[derive(Debug, Clone)]
pub struct SledCache {
    _db: Db, // Keep reference to prevent premature database closure
    entries: Tree,
    tags: Tree,
    tag_index: Tree,
}

impl SledCache {
    /// Opens or creates a sled-backed cache at the specified path.
    ///
    /// The database will be created if it doesn't exist. This operation may
    /// perform recovery if the database was not properly closed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CacheError> {
        Self::open_with_config(path, sled::Config::default())
    }

    /// Opens a sled-backed cache with custom sled configuration.
    pub fn open_with_config<P: AsRef<Path>>(
        path: P,
        config: sled::Config,
    ) -> Result<Self, CacheError> {
        let db = config.path(path).open().map_err(backend)?;
        Self::from_db(db)
    }

    /// Creates a cache from an existing sled database instance.
    ///
    /// Useful when the database is shared with other components or opened
    /// with a custom configuration.
    pub fn from_db(db: Db) -> Result<Self, CacheError> {
        let entries = db.open_tree("entries").map_err(backend)?;
        let tags = db.open_tree("tags").map_err(backend)?;
        let tag_index = db.open_tree("tag_index").map_err(backend)?;
        Ok(Self {
            _db: db,
            entries,
            tags,
            tag_index,
        })
    }

    /// Creates a temporary cache for testing purposes.
    ///
    /// The database lives in a temporary directory and is cleaned up when
    /// the cache is dropped.
    #[cfg(test)]
    pub fn temporary() -> Result<Self, CacheError> {
        let config = sled::Config::new().temporary(true);
        let db = config.open().map_err(backend)?;
        Self::from_db(db)
    }

    /// Flush all pending writes to disk.
    pub async fn flush(&self) -> Result<(), CacheError> {
        self.entries.flush_async().await.map_err(backend)?;
        self.tags.flush_async().await.map_err(backend)?;
        self.tag_index.flush_async().await.map_err(backend)?;
        Ok(())
    }

    /// Current number of stored entities.
    pub fn entity_count(&self) -> usize {
        self.entries.len()
    }

    fn index_key(tag: &str, key: &str) -> Vec<u8> {
        let mut composite = Vec::with_capacity(tag.len() + 1 + key.len());
        composite.extend_from_slice(tag.as_bytes());
        composite.push(INDEX_SEPARATOR);
        composite.extend_from_slice(key.as_bytes());
        composite
    }

    fn stored_tags(&self, key: &str) -> Result<Vec<String>, CacheError> {
        match self.tags.get(key).map_err(backend)? {
            Some(raw) => serde_json::from_slice(&raw)
                .map_err(|e| CacheError::Backend(format!("tag row for {key:?} unreadable: {e}"))),
            None => Ok(Vec::new()),
        }
    }

    fn unindex(&self, key: &str) -> Result<(), CacheError> {
        for tag in self.stored_tags(key)? {
            self.tag_index
                .remove(Self::index_key(&tag, key))
                .map_err(backend)?;
        }
        self.tags.remove(key).map_err(backend)?;
        Ok(())
    }
}

fn backend(error: impl std::fmt::Display) -> CacheError {
    CacheError::Backend(error.to_string())
}

#[async_trait]
impl EntityCache for SledCache {
    async fn clear(&self) -> Result<(), CacheError> {
        self.entries.clear().map_err(backend)?;
        self.tags.clear().map_err(backend)?;
        self.tag_index.clear().map_err(backend)?;
        Ok(())
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        tags: Option<Vec<String>>,
    ) -> Result<(), CacheError> {
        self.entries
            .insert(key, value.as_bytes())
            .map_err(backend)?;
        if let Some(tags) = tags {
            self.unindex(key)?;
            for tag in &tags {
                self.tag_index
                    .insert(Self::index_key(tag, key), &[])
                    .map_err(backend)?;
            }
            let raw = serde_json::to_vec(&tags).map_err(backend)?;
            self.tags.insert(key, raw).map_err(backend)?;
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<String, CacheError> {
        match self.entries.get(key).map_err(backend)? {
            Some(raw) => String::from_utf8(raw.to_vec())
                .map_err(|e| CacheError::Backend(format!("entry {key:?} is not UTF-8: {e}"))),
            None => Err(CacheError::NotFound(key.to_string())),
        }
    }

    async fn remove(&self, keys: &[String]) -> Result<(), CacheError> {
        for key in keys {
            self.entries.remove(key).map_err(backend)?;
            self.unindex(key)?;
        }
        Ok(())
    }

    async fn iterate(
        &self,
        keys: &[String],
    ) -> Result<BoxStream<'static, EntityLookup>, CacheError> {
        let entries = self.entries.clone();
        let keys = keys.to_vec();
        let stream = stream::iter(keys).map(move |key| {
            let result = match entries.get(&key) {
                Ok(Some(raw)) => String::from_utf8(raw.to_vec())
                    .map_err(|e| CacheError::Backend(format!("entry {key:?} is not UTF-8: {e}"))),
                Ok(None) => Err(CacheError::NotFound(key.clone())),
                Err(e) => Err(backend(e)),
            };
            EntityLookup { key, result }
        });
        Ok(stream.boxed())
    }

    async fn iterate_by_tag(&self, tag: &str) -> Result<BoxStream<'static, String>, CacheError> {
        // Snapshot the key set before the first yield.
        let mut prefix = tag.as_bytes().to_vec();
        prefix.push(INDEX_SEPARATOR);
        let mut keys = Vec::new();
        for entry in self.tag_index.scan_prefix(&prefix) {
            let (composite, _) = entry.map_err(backend)?;
            let key = composite[prefix.len()..].to_vec();
            keys.push(String::from_utf8(key).map_err(|e| {
                CacheError::Backend(format!("index row under {tag:?} is not UTF-8: {e}"))
            })?);
        }
        Ok(stream::iter(keys).boxed())
    }
}
