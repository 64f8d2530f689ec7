//! Node mutations: rename, move, trash, restore, delete, create folder.
//!
//! Every mutation follows the same shape: fetch the node through the read
//! path, derive the encrypted payload with parent keys, call the API, and
//! only on success write the updated node back to the caches and notify the
//! node events handler. Batch mutations commit partial successes and
//! aggregate per-node failures.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use strato_api::dto::{
    CreateFolderRequest, MoveNodeRequest, NodeResultDto, RenameNodeRequest,
};
use strato_api::{CryptoProvider, DriveApi, SharesService, SigningKey, CODE_OK};
use strato_events::NodeEventsHandler;
use strato_node_cache::{CryptoCache, NodeCache};
use strato_tools::group_by;
use strato_types::{
    Error, FolderInfo, MemberRole, Node, NodeKeys, NodeType, NodeUid, Result,
};

use crate::access::NodeAccess;

/// The write path over the node tree.
pub struct NodeManagement {
    access: NodeAccess,
    api: DriveApi,
    cache: NodeCache,
    crypto_cache: CryptoCache,
    crypto: Arc<dyn CryptoProvider>,
    shares: Arc<dyn SharesService>,
    handler: Arc<NodeEventsHandler>,
}

impl NodeManagement {
    /// Assemble the write path from its collaborators.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        access: NodeAccess,
        api: DriveApi,
        cache: NodeCache,
        crypto_cache: CryptoCache,
        crypto: Arc<dyn CryptoProvider>,
        shares: Arc<dyn SharesService>,
        handler: Arc<NodeEventsHandler>,
    ) -> Self {
        Self {
            access,
            api,
            cache,
            crypto_cache,
            crypto,
            shares,
            handler,
        }
    }

    async fn signing_key_for(&self, node: &Node) -> Result<SigningKey> {
        match &node.share_id {
            Some(share_id) => self.shares.context_share_member_email_key(share_id).await,
            None => self.shares.my_files_member_email_key().await,
        }
    }

    /// Rename a node in place, recomputing its lookup hash.
    pub async fn rename_node(
        &self,
        uid: &NodeUid,
        new_name: &str,
        cancel: &CancellationToken,
    ) -> Result<Node> {
        let node = self.access.get_node(uid, cancel).await?;
        let original_hash = node
            .hash
            .clone()
            .ok_or_else(|| Error::validation("root nodes cannot be renamed"))?;
        let parent_keys = self.access.get_parent_keys(&node, cancel).await?;
        let hash_key = parent_keys
            .hash_key
            .clone()
            .ok_or_else(|| Error::validation("parent folder has no hash key"))?;
        let signing = self.signing_key_for(&node).await?;

        let encrypted = self
            .crypto
            .encrypt_name(new_name, &parent_keys, &signing.address_key)
            .await?;
        let hash = self.crypto.hash_name(new_name, &hash_key).await?;

        self.api
            .rename_node(
                uid,
                &RenameNodeRequest {
                    encrypted_name: encrypted.armored,
                    name_signature_email: signing.email.clone(),
                    hash: hash.clone(),
                    original_hash,
                },
                cancel,
            )
            .await?;

        let mut updated = node;
        updated.name = Ok(new_name.to_string());
        updated.name_author = Ok(signing.email);
        updated.hash = Some(hash);
        self.cache.set_node(&updated).await?;
        self.handler.notify_node_updated(&updated);
        Ok(updated)
    }

    /// Move a node under a new parent, re-wrapping its passphrase.
    pub async fn move_node(
        &self,
        uid: &NodeUid,
        new_parent_uid: &NodeUid,
        cancel: &CancellationToken,
    ) -> Result<Node> {
        let node = self.access.get_node(uid, cancel).await?;
        let original_hash = node
            .hash
            .clone()
            .ok_or_else(|| Error::validation("root nodes cannot be moved"))?;
        let name = node
            .name
            .clone()
            .map_err(|_| Error::validation("nodes with undecryptable names cannot be moved"))?;
        let new_parent_keys = self.access.get_node_keys(new_parent_uid, cancel).await?;
        let hash_key = new_parent_keys
            .hash_key
            .clone()
            .ok_or_else(|| Error::validation("move target has no hash key"))?;
        let keys = self.access.get_node_keys(uid, cancel).await?;
        let signing = self.signing_key_for(&node).await?;

        let reencrypted = self
            .crypto
            .reencrypt_passphrase(&keys, &new_parent_keys, &signing.address_key)
            .await?;
        let encrypted = self
            .crypto
            .encrypt_name(&name, &new_parent_keys, &signing.address_key)
            .await?;
        let hash = self.crypto.hash_name(&name, &hash_key).await?;

        self.api
            .move_node(
                uid,
                &MoveNodeRequest {
                    parent_id: new_parent_uid.node_id().to_string(),
                    encrypted_name: encrypted.armored,
                    hash: hash.clone(),
                    original_hash,
                    node_passphrase: reencrypted.encrypted_passphrase,
                    node_passphrase_signature: reencrypted.passphrase_signature,
                    signature_email: signing.email.clone(),
                    name_signature_email: signing.email.clone(),
                },
                cancel,
            )
            .await?;

        let mut updated = node;
        updated.parent_uid = Some(new_parent_uid.clone());
        updated.hash = Some(hash);
        updated.key_author = Ok(signing.email.clone());
        updated.name_author = Ok(signing.email);
        self.cache.set_node(&updated).await?;
        self.handler.notify_node_updated(&updated);
        Ok(updated)
    }

    /// Move nodes to the trash, grouped by parent.
    ///
    /// Partial success is committed to the cache; failures come back as one
    /// aggregate [`Error::NodeResults`].
    pub async fn trash_nodes(
        &self,
        uids: &[NodeUid],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut node_errors: HashMap<NodeUid, String> = HashMap::new();
        let mut nodes: Vec<Node> = Vec::new();
        for uid in uids {
            match self.access.get_node(uid, cancel).await {
                Ok(node) => nodes.push(node),
                Err(error) => {
                    node_errors.insert(uid.clone(), error.to_string());
                }
            }
        }

        for (_parent, group) in group_by(nodes, |node| node.parent_uid.clone()) {
            let volume_id = group[0].volume_id().to_string();
            let ids: Vec<String> = group
                .iter()
                .map(|node| node.uid.node_id().to_string())
                .collect();
            match self.api.trash_nodes(&volume_id, &ids, cancel).await {
                Ok(results) => {
                    let by_id = index_results(&results);
                    for node in group {
                        match outcome(&by_id, node.uid.node_id()) {
                            Ok(()) => {
                                let mut trashed = node;
                                trashed.trash_time = Some(Utc::now());
                                self.cache.set_node(&trashed).await?;
                                self.handler.notify_node_updated(&trashed);
                            }
                            Err(message) => {
                                node_errors.insert(node.uid.clone(), message);
                            }
                        }
                    }
                }
                Err(error) => {
                    let message = error.to_string();
                    for node in group {
                        node_errors.insert(node.uid.clone(), message.clone());
                    }
                }
            }
        }

        if node_errors.is_empty() {
            Ok(())
        } else {
            Err(Error::NodeResults { node_errors })
        }
    }

    /// Restore trashed nodes. All uids must share one volume; each restored
    /// node has its trash time cleared in the cache.
    pub async fn restore_nodes(
        &self,
        uids: &[NodeUid],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let volume_id = single_volume(uids)?;
        let ids: Vec<String> = uids.iter().map(|uid| uid.node_id().to_string()).collect();
        let results = self.api.restore_nodes(&volume_id, &ids, cancel).await?;
        let by_id = index_results(&results);

        let mut node_errors: HashMap<NodeUid, String> = HashMap::new();
        for uid in uids {
            match outcome(&by_id, uid.node_id()) {
                Ok(()) => {
                    if let Ok(mut node) = self.cache.get_node(uid).await {
                        node.trash_time = None;
                        self.cache.set_node(&node).await?;
                        self.handler.notify_node_updated(&node);
                    }
                }
                Err(message) => {
                    node_errors.insert(uid.clone(), message);
                }
            }
        }

        if node_errors.is_empty() {
            Ok(())
        } else {
            Err(Error::NodeResults { node_errors })
        }
    }

    /// Permanently delete nodes. All uids must share one volume; successful
    /// deletions drop the node and its descendants from both caches.
    pub async fn delete_nodes(
        &self,
        uids: &[NodeUid],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let volume_id = single_volume(uids)?;
        let ids: Vec<String> = uids.iter().map(|uid| uid.node_id().to_string()).collect();
        let results = self.api.delete_nodes(&volume_id, &ids, cancel).await?;
        let by_id = index_results(&results);

        let mut node_errors: HashMap<NodeUid, String> = HashMap::new();
        for uid in uids {
            match outcome(&by_id, uid.node_id()) {
                Ok(()) => {
                    self.cache.remove_nodes(std::slice::from_ref(uid)).await?;
                    self.crypto_cache
                        .remove_node_keys(std::slice::from_ref(uid))
                        .await?;
                }
                Err(message) => {
                    node_errors.insert(uid.clone(), message);
                }
            }
        }

        if node_errors.is_empty() {
            Ok(())
        } else {
            Err(Error::NodeResults { node_errors })
        }
    }

    /// Create a folder under a parent and cache it with its keys.
    pub async fn create_folder(
        &self,
        parent_uid: &NodeUid,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Node> {
        let parent = self.access.get_node(parent_uid, cancel).await?;
        let parent_keys = self.access.get_node_keys(parent_uid, cancel).await?;
        let parent_hash_key = parent_keys
            .hash_key
            .clone()
            .ok_or_else(|| Error::validation("parent is not a folder"))?;
        let signing = self.signing_key_for(&parent).await?;

        let generated = self
            .crypto
            .generate_node_key(&parent_keys, &signing.address_key)
            .await?;
        let hash_key = self.crypto.generate_hash_key(&generated.keys).await?;
        let encrypted = self
            .crypto
            .encrypt_name(name, &parent_keys, &signing.address_key)
            .await?;
        let hash = self.crypto.hash_name(name, &parent_hash_key).await?;

        let created = self
            .api
            .create_folder(
                parent_uid,
                &CreateFolderRequest {
                    encrypted_name: encrypted.armored,
                    hash: hash.clone(),
                    node_key: generated.keys.private_key.clone(),
                    node_passphrase: generated.encrypted_passphrase,
                    node_passphrase_signature: generated.passphrase_signature,
                    node_hash_key: hash_key.encrypted_hash_key,
                    signature_email: signing.email.clone(),
                    extended_attributes: None,
                },
                cancel,
            )
            .await?;

        let uid = NodeUid::new(parent_uid.volume_id(), &created.node_id)?;
        debug!(%uid, "created folder");
        let node = Node {
            uid: uid.clone(),
            parent_uid: Some(parent_uid.clone()),
            node_type: NodeType::Folder,
            name: Ok(name.to_string()),
            hash: Some(hash),
            key_author: Ok(signing.email.clone()),
            name_author: Ok(signing.email),
            member_role: MemberRole::Inherited,
            media_type: None,
            is_shared: false,
            share_id: None,
            creation_time: Utc::now(),
            trash_time: None,
            total_storage_size: None,
            active_revision: None,
            folder: Some(FolderInfo {
                claimed_modification_time: None,
            }),
            is_stale: false,
        };
        let keys = NodeKeys {
            hash_key: Some(hash_key.hash_key),
            ..generated.keys
        };

        self.cache.set_node(&node).await?;
        self.crypto_cache.set_node_keys(&uid, &keys).await?;
        self.handler.notify_node_created(&node).await?;
        Ok(node)
    }
}

fn single_volume(uids: &[NodeUid]) -> Result<String> {
    let mut volumes = uids.iter().map(NodeUid::volume_id);
    let first = volumes
        .next()
        .ok_or_else(|| Error::validation("no nodes given"))?;
    if volumes.all(|volume| volume == first) {
        Ok(first.to_string())
    } else {
        Err(Error::validation(
            "batch operations require nodes from a single volume",
        ))
    }
}

fn index_results(results: &[NodeResultDto]) -> HashMap<&str, &NodeResultDto> {
    results
        .iter()
        .map(|result| (result.node_id.as_str(), result))
        .collect()
}

fn outcome(
    by_id: &HashMap<&str, &NodeResultDto>,
    node_id: &str,
) -> std::result::Result<(), String> {
    match by_id.get(node_id) {
        Some(result) if result.code == CODE_OK => Ok(()),
        Some(result) => Err(result
            .error
            .clone()
            .unwrap_or_else(|| format!("server rejected the operation (code {})", result.code))),
        None => Err("server returned no result for this node".to_string()),
    }
}
