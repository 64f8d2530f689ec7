//! Decrypted node metadata cache.

use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};
use tracing::warn;

use strato_cache_core::{tag, CacheError, EntityCache};
use strato_types::{Error, Node, NodeUid, Result};

use crate::{children_key, node_key, uid_from_node_key};

/// Tag borne by every trashed node.
const TRASHED_TAG: &str = "nodeTrashed";

fn volume_tag(volume_id: &str) -> String {
    tag("volume", volume_id)
}

fn parent_tag(parent_uid: &NodeUid) -> String {
    tag("nodeParentUid", &parent_uid.to_string())
}

fn root_tag(volume_id: &str) -> String {
    tag("nodeRoot", volume_id)
}

fn children_volume_tag(volume_id: &str) -> String {
    tag("children-volume", volume_id)
}

/// Per-uid outcome of a multi-node cache iteration.
#[derive(Debug)]
pub struct NodeLookup {
    /// The uid this result belongs to.
    pub uid: NodeUid,
    /// The cached node, or why it could not be produced. `NotFound` and
    /// `CorruptedEntity` both mean the row must be refetched.
    pub node: Result<Node>,
}

/// Tag-indexed store of decrypted node records.
///
/// Every write re-derives the node's tags from its state, so the tag index
/// is always consistent with the row: `volume:<id>` on every node,
/// `nodeParentUid:<uid>` or `nodeRoot:<volume>` for adjacency, and
/// `nodeTrashed` exactly when `trash_time` is set.
#[derive(Clone)]
pub struct NodeCache {
    cache: Arc<dyn EntityCache>,
}

impl NodeCache {
    /// Wrap an entity cache.
    pub fn new(cache: Arc<dyn EntityCache>) -> Self {
        Self { cache }
    }

    fn tags_for(node: &Node) -> Vec<String> {
        let mut tags = vec![volume_tag(node.volume_id())];
        match &node.parent_uid {
            Some(parent) => tags.push(parent_tag(parent)),
            None => tags.push(root_tag(node.volume_id())),
        }
        if node.is_trashed() {
            tags.push(TRASHED_TAG.to_string());
        }
        tags
    }

    /// Serialize and store a node, replacing its tags.
    pub async fn set_node(&self, node: &Node) -> Result<()> {
        let record = serde_json::to_string(node)
            .map_err(|e| Error::CacheBackend(format!("node record not serializable: {e}")))?;
        self.cache
            .set(&node_key(&node.uid), &record, Some(Self::tags_for(node)))
            .await?;
        Ok(())
    }

    /// Fetch a node by uid.
    ///
    /// A record that fails schema validation is removed and surfaced as
    /// `CorruptedEntity`; the removal itself never fails the call.
    pub async fn get_node(&self, uid: &NodeUid) -> Result<Node> {
        let key = node_key(uid);
        let raw = self.cache.get(&key).await?;
        self.decode_or_evict(&key, &raw).await
    }

    async fn decode_or_evict(&self, key: &str, raw: &str) -> Result<Node> {
        match serde_json::from_str::<Node>(raw) {
            Ok(node) => Ok(node),
            Err(error) => {
                if let Err(remove_error) = self.cache.remove(&[key.to_string()]).await {
                    warn!(key, %remove_error, "failed to evict corrupted node record");
                }
                Err(Error::CorruptedEntity(format!(
                    "node record {key:?} failed validation: {error}"
                )))
            }
        }
    }

    /// Remove nodes and every cached descendant, leaf to root.
    ///
    /// The targets go first; descendants are then discovered through the
    /// parent tag index level by level and deleted in reverse discovery
    /// order, so a partial failure can orphan at most already-targeted rows,
    /// never leave a child without its subtree entry.
    pub async fn remove_nodes(&self, uids: &[NodeUid]) -> Result<()> {
        let mut target_keys = Vec::with_capacity(uids.len() * 2);
        for uid in uids {
            target_keys.push(node_key(uid));
            target_keys.push(children_key(uid));
        }
        self.cache.remove(&target_keys).await?;

        for uid in uids {
            let descendants = self.collect_descendants(uid).await?;
            let mut keys = Vec::with_capacity(descendants.len() * 2);
            for uid in descendants.iter().rev() {
                keys.push(node_key(uid));
                keys.push(children_key(uid));
            }
            self.cache.remove(&keys).await?;
        }
        Ok(())
    }

    /// Breadth-first discovery of cached descendants via the parent tag.
    async fn collect_descendants(&self, uid: &NodeUid) -> Result<Vec<NodeUid>> {
        let mut discovered: Vec<NodeUid> = Vec::new();
        let mut cursor = 0;
        let mut frontier = vec![uid.clone()];
        while let Some(current) = frontier.get(cursor).cloned() {
            cursor += 1;
            let mut children = self.cache.iterate_by_tag(&parent_tag(&current)).await?;
            while let Some(key) = children.next().await {
                match uid_from_node_key(&key) {
                    Some(child) => {
                        discovered.push(child.clone());
                        frontier.push(child);
                    }
                    None => warn!(key, "unparsable key in parent tag index, skipping"),
                }
            }
        }
        Ok(discovered)
    }

    /// Mark every cached node of a volume stale and drop every listing
    /// marker of that volume.
    pub async fn set_nodes_stale_from_volume(&self, volume_id: &str) -> Result<()> {
        let keys: Vec<String> = self
            .cache
            .iterate_by_tag(&volume_tag(volume_id))
            .await?
            .collect()
            .await;
        let mut lookups = self.cache.iterate(&keys).await?;
        while let Some(lookup) = lookups.next().await {
            match lookup.result {
                Ok(raw) => match self.decode_or_evict(&lookup.key, &raw).await {
                    Ok(mut node) => {
                        node.is_stale = true;
                        self.set_node(&node).await?;
                    }
                    // Already evicted; the next read refetches it anyway.
                    Err(Error::CorruptedEntity(_)) => {}
                    Err(error) => return Err(error),
                },
                // Removed between snapshot and fetch.
                Err(CacheError::NotFound(_)) => {}
                Err(error) => return Err(error.into()),
            }
        }

        let markers: Vec<String> = self
            .cache
            .iterate_by_tag(&children_volume_tag(volume_id))
            .await?
            .collect()
            .await;
        self.cache.remove(&markers).await?;
        Ok(())
    }

    /// Iterate the given uids, yielding one [`NodeLookup`] per uid in order.
    pub async fn iterate_nodes(
        &self,
        uids: &[NodeUid],
    ) -> Result<BoxStream<'static, NodeLookup>> {
        let keys: Vec<String> = uids.iter().map(node_key).collect();
        let lookups = self.cache.iterate(&keys).await?;
        let this = self.clone();
        let uids = uids.to_vec();
        let stream = lookups
            .zip(futures::stream::iter(uids))
            .then(move |(lookup, uid)| {
                let this = this.clone();
                async move {
                    let node = match lookup.result {
                        Ok(raw) => this.decode_or_evict(&lookup.key, &raw).await,
                        Err(error) => Err(error.into()),
                    };
                    NodeLookup { uid, node }
                }
            });
        Ok(stream.boxed())
    }

    /// Iterate the cached, non-trashed children of a folder.
    ///
    /// Corrupted rows are evicted and skipped.
    pub async fn iterate_children(
        &self,
        parent_uid: &NodeUid,
    ) -> Result<BoxStream<'static, Result<Node>>> {
        let keys: Vec<String> = self
            .cache
            .iterate_by_tag(&parent_tag(parent_uid))
            .await?
            .collect()
            .await;
        let stream = self
            .decoded_stream(keys)
            .await?
            .filter(|result| {
                let keep = match result {
                    Ok(node) => !node.is_trashed(),
                    Err(_) => true,
                };
                async move { keep }
            });
        Ok(stream.boxed())
    }

    /// Iterate every trashed node, across volumes.
    pub async fn iterate_trashed_nodes(&self) -> Result<BoxStream<'static, Result<Node>>> {
        let keys: Vec<String> = self
            .cache
            .iterate_by_tag(TRASHED_TAG)
            .await?
            .collect()
            .await;
        self.decoded_stream(keys).await
    }

    /// Uids of the cached roots of a volume.
    pub async fn root_node_uids(&self, volume_id: &str) -> Result<Vec<NodeUid>> {
        let keys: Vec<String> = self
            .cache
            .iterate_by_tag(&root_tag(volume_id))
            .await?
            .collect()
            .await;
        Ok(keys.iter().filter_map(|k| uid_from_node_key(k)).collect())
    }

    async fn decoded_stream(
        &self,
        keys: Vec<String>,
    ) -> Result<BoxStream<'static, Result<Node>>> {
        let lookups = self.cache.iterate(&keys).await?;
        let this = self.clone();
        let stream = lookups
            .then(move |lookup| {
                let this = this.clone();
                async move {
                    match lookup.result {
                        Ok(raw) => match this.decode_or_evict(&lookup.key, &raw).await {
                            Ok(node) => Some(Ok(node)),
                            // Evicted; skip in iteration context.
                            Err(Error::CorruptedEntity(_)) => None,
                            Err(error) => Some(Err(error)),
                        },
                        // Removed between snapshot and fetch.
                        Err(CacheError::NotFound(_)) => None,
                        Err(error) => Some(Err(error.into())),
                    }
                }
            })
            .filter_map(|item| async move { item });
        Ok(stream.boxed())
    }

    //─────────────────────────────
    //  Listing-complete markers
    //─────────────────────────────

    /// Record that every child of the folder has been fetched at least once.
    pub async fn set_folder_children_loaded(&self, uid: &NodeUid) -> Result<()> {
        self.cache
            .set(
                &children_key(uid),
                "1",
                Some(vec![children_volume_tag(uid.volume_id())]),
            )
            .await?;
        Ok(())
    }

    /// Drop the listing-complete marker so the next listing refetches.
    pub async fn reset_folder_children_loaded(&self, uid: &NodeUid) -> Result<()> {
        self.cache.remove(&[children_key(uid)]).await?;
        Ok(())
    }

    /// Whether the folder's listing is known complete.
    pub async fn is_folder_children_loaded(&self, uid: &NodeUid) -> Result<bool> {
        match self.cache.get(&children_key(uid)).await {
            Ok(_) => Ok(true),
            Err(CacheError::NotFound(_)) => Ok(false),
            Err(error) => Err(error.into()),
        }
    }

    /// Drop every entity from the backing store.
    pub async fn clear(&self) -> Result<()> {
        self.cache.clear().await?;
        Ok(())
    }
}
