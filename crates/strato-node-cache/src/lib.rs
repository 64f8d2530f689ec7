#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **strato-node-cache** – Domain caches of the Strato sync core.
//!
//! Two stores layered over the generic entity cache:
//!
//! - [`NodeCache`] memoizes decrypted node metadata, records parent/child
//!   adjacency through the tag index, tracks per-folder listing
//!   completeness, and supports recursive (leaf-to-root) eviction.
//! - [`CryptoCache`] holds per-node key material under a distinct key
//!   prefix in its *own* backing store, so an implementer may put keys in a
//!   secure keychain while node metadata lives in plain storage.
//!
//! Records are stable JSON text. A record that fails schema validation is
//! evicted on sight: direct reads surface `CorruptedEntity`/`CorruptedKeys`,
//! iterations log and skip.

mod crypto_cache;
mod node_cache;

pub use crypto_cache::CryptoCache;
pub use node_cache::{NodeCache, NodeLookup};

use strato_types::NodeUid;

/// Cache key of a node record.
pub fn node_key(uid: &NodeUid) -> String {
    format!("node-{uid}")
}

/// Cache key of a folder's listing-complete marker.
pub fn children_key(uid: &NodeUid) -> String {
    format!("node-children-{uid}")
}

/// Cache key of a node's key material (crypto cache only).
pub fn node_keys_key(uid: &NodeUid) -> String {
    format!("nodeKeys-{uid}")
}

pub(crate) fn uid_from_node_key(key: &str) -> Option<NodeUid> {
    key.strip_prefix("node-")
        .filter(|rest| !rest.starts_with("children-"))
        .and_then(|rest| rest.parse().ok())
}
