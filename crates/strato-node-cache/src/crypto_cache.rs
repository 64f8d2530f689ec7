//! Per-node key material cache.

use std::sync::Arc;

use tracing::warn;

use strato_cache_core::EntityCache;
use strato_types::{Error, NodeKeys, NodeUid, Result};

use crate::node_keys_key;

/// Store of decrypted per-node key material.
///
/// Mirrors the node cache with a distinct key prefix and a *separate*
/// backing store, so key material never sits next to plain metadata.
/// Records are validated on read: a missing passphrase means the entry is
/// unusable, so it is evicted and surfaced as `CorruptedKeys`.
#[derive(Clone)]
pub struct CryptoCache {
    cache: Arc<dyn EntityCache>,
}

impl CryptoCache {
    /// Wrap the dedicated key-material entity cache.
    pub fn new(cache: Arc<dyn EntityCache>) -> Self {
        Self { cache }
    }

    /// Serialize and store a node's key material.
    pub async fn set_node_keys(&self, uid: &NodeUid, keys: &NodeKeys) -> Result<()> {
        let record = serde_json::to_string(keys)
            .map_err(|e| Error::CacheBackend(format!("key record not serializable: {e}")))?;
        self.cache
            .set(&node_keys_key(uid), &record, None)
            .await?;
        Ok(())
    }

    /// Fetch a node's key material.
    pub async fn get_node_keys(&self, uid: &NodeUid) -> Result<NodeKeys> {
        let key = node_keys_key(uid);
        let raw = self.cache.get(&key).await?;
        let reason = match serde_json::from_str::<NodeKeys>(&raw) {
            Ok(keys) if !keys.passphrase.is_empty() => return Ok(keys),
            Ok(_) => "missing passphrase".to_string(),
            Err(error) => error.to_string(),
        };
        if let Err(remove_error) = self.cache.remove(&[key.clone()]).await {
            warn!(key, %remove_error, "failed to evict corrupted key record");
        }
        Err(Error::CorruptedKeys(format!(
            "key record {key:?} failed validation: {reason}"
        )))
    }

    /// Drop key material for the given nodes.
    pub async fn remove_node_keys(&self, uids: &[NodeUid]) -> Result<()> {
        let keys: Vec<String> = uids.iter().map(node_keys_key).collect();
        self.cache.remove(&keys).await?;
        Ok(())
    }

    /// Drop every record from the backing store.
    pub async fn clear(&self) -> Result<()> {
        self.cache.clear().await?;
        Ok(())
    }
}
