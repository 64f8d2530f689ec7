#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **strato-cache-memory** – In-memory entity-cache driver for the Strato sync core.
//!
//! This crate provides the reference implementation of the [`EntityCache`]
//! contract: a process-local map plus a `tag → keys` index. It is suitable
//! for testing, development, and sessions where cache persistence across
//! restarts is not required. All data is lost when the process terminates.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::RwLock;

use strato_cache_core::{CacheError, EntityCache, EntityLookup};

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, String>,
    tags_by_key: HashMap<String, Vec<String>>,
    // Insertion-ordered so tag iteration is deterministic.
    keys_by_tag: HashMap<String, Vec<String>>,
}

impl Inner {
    fn unindex(&mut self, key: &str) {
        if let Some(tags) = self.tags_by_key.remove(key) {
            for tag in tags {
                if let Some(keys) = self.keys_by_tag.get_mut(&tag) {
                    keys.retain(|k| k != key);
                    if keys.is_empty() {
                        self.keys_by_tag.remove(&tag);
                    }
                }
            }
        }
    }

    fn index(&mut self, key: &str, tags: Vec<String>) {
        for tag in &tags {
            let keys = self.keys_by_tag.entry(tag.clone()).or_default();
            if !keys.iter().any(|k| k == key) {
                keys.push(key.to_string());
            }
        }
        self.tags_by_key.insert(key.to_string(), tags);
    }
}

/// An in-memory, non-persistent entity cache.
///
/// Rows live in a `HashMap` behind an async `RwLock`; the tag index keeps
/// keys in insertion order. Cloning the cache clones a handle to the same
/// underlying storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryCache {
    /// Creates a new, empty in-memory cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current number of stored entities.
    pub async fn entity_count(&self) -> usize {
        self.inner.read().await.entries.len()
    }
}

#[async_trait]
impl EntityCache for MemoryCache {
    async fn clear(&self) -> Result<(), CacheError> {
        let mut inner = self.inner.write().await;
        inner.entries.clear();
        inner.tags_by_key.clear();
        inner.keys_by_tag.clear();
        Ok(())
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        tags: Option<Vec<String>>,
    ) -> Result<(), CacheError> {
        let mut inner = self.inner.write().await;
        inner.entries.insert(key.to_string(), value.to_string());
        if let Some(mut tags) = tags {
            tags.dedup();
            inner.unindex(key);
            inner.index(key, tags);
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<String, CacheError> {
        self.inner
            .read()
            .await
            .entries
            .get(key)
            .cloned()
            .ok_or_else(|| CacheError::NotFound(key.to_string()))
    }

    async fn remove(&self, keys: &[String]) -> Result<(), CacheError> {
        let mut inner = self.inner.write().await;
        for key in keys {
            inner.entries.remove(key);
            inner.unindex(key);
        }
        Ok(())
    }

    async fn iterate(
        &self,
        keys: &[String],
    ) -> Result<BoxStream<'static, EntityLookup>, CacheError> {
        let inner = self.inner.clone();
        let keys = keys.to_vec();
        let stream = stream::iter(keys).then(move |key| {
            let inner = inner.clone();
            async move {
                let result = inner
                    .read()
                    .await
                    .entries
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| CacheError::NotFound(key.clone()));
                EntityLookup { key, result }
            }
        });
        Ok(stream.boxed())
    }

    async fn iterate_by_tag(&self, tag: &str) -> Result<BoxStream<'static, String>, CacheError> {
        // Snapshot the key set before the first yield.
        let keys = self
            .inner
            .read()
            .await
            .keys_by_tag
            .get(tag)
            .cloned()
            .unwrap_or_default();
        Ok(stream::iter(keys).boxed())
    }
}
