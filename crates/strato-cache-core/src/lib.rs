#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **strato-cache-core** – Core entity-cache abstraction for the Strato sync core.
//!
//! This crate defines the contract for the tag-indexed key/value store that
//! memoizes decrypted metadata across the SDK. It sits at the core layer and
//! contains no concrete implementation: drivers (in-memory, sled, or a
//! caller-supplied document store with secondary indexes) implement the
//! [`EntityCache`] trait in separate crates.
//!
//! Keys and values are flat strings; secondary lookup goes through opaque
//! string tags encoded `category:value`. Iteration is lazy but the key set
//! of a tag iteration is snapshotted when the iteration starts, so
//! concurrent mutation never alters an in-progress sequence.

use async_trait::async_trait;
use futures::stream::BoxStream;

//─────────────────────────────
//  Errors
//─────────────────────────────

/// Errors surfaced by entity-cache operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// No entity is stored under the requested key.
    #[error("entity not found: {0}")]
    NotFound(String),
    /// The backing store failed.
    #[error("cache backend failure: {0}")]
    Backend(String),
}

impl From<CacheError> for strato_types::Error {
    fn from(error: CacheError) -> Self {
        match error {
            CacheError::NotFound(key) => strato_types::Error::NotFound(key),
            CacheError::Backend(message) => strato_types::Error::CacheBackend(message),
        }
    }
}

//─────────────────────────────
//  Lookup results
//─────────────────────────────

/// Per-key outcome of a multi-key iteration.
///
/// [`EntityCache::iterate`] yields exactly one of these per input key, in
/// input order, so callers can correlate failures without losing position.
#[derive(Debug, Clone)]
pub struct EntityLookup {
    /// The key this result belongs to.
    pub key: String,
    /// The stored value, or why it could not be produced.
    pub result: Result<String, CacheError>,
}

//─────────────────────────────
//  Tag helpers
//─────────────────────────────

/// Encode a multi-part tag as `category:value`.
pub fn tag(category: &str, value: &str) -> String {
    format!("{category}:{value}")
}

//─────────────────────────────
//  Entity cache trait
//─────────────────────────────

/// A tag-indexed, string-keyed entity store.
///
/// `set` is an upsert; passing `None` for `tags` preserves whatever tags the
/// key already carries, while `Some(vec![])` clears them. Tag indices are
/// updated atomically with the row. All operations must be safe under
/// concurrent use.
#[async_trait]
pub trait EntityCache: Send + Sync {
    /// Drop every entity and every tag index entry.
    async fn clear(&self) -> Result<(), CacheError>;

    /// Insert or replace the value stored under `key`.
    async fn set(
        &self,
        key: &str,
        value: &str,
        tags: Option<Vec<String>>,
    ) -> Result<(), CacheError>;

    /// Fetch the value stored under `key`.
    ///
    /// Fails with [`CacheError::NotFound`] when the key is absent.
    async fn get(&self, key: &str) -> Result<String, CacheError>;

    /// Remove the given keys and their tag index entries.
    ///
    /// Absent keys are ignored.
    async fn remove(&self, keys: &[String]) -> Result<(), CacheError>;

    /// Iterate the given keys, yielding one [`EntityLookup`] per input key
    /// in input order.
    async fn iterate(
        &self,
        keys: &[String],
    ) -> Result<BoxStream<'static, EntityLookup>, CacheError>;

    /// Iterate the keys bearing exactly `tag`.
    ///
    /// The backing key set is snapshotted before the first yield; mutations
    /// made while the iteration is in progress do not alter the sequence.
    async fn iterate_by_tag(&self, tag: &str) -> Result<BoxStream<'static, String>, CacheError>;
}

//─────────────────────────────
//  Convenience re-exports
//─────────────────────────────

/// Convenient prelude for importing the most common types.
pub mod prelude {
    pub use super::{tag, CacheError, EntityCache, EntityLookup};
}
