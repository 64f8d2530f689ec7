//! Draft node and draft revision lifecycle.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use strato_api::dto::{CreateDraftRequest, CreateRevisionDraftRequest, CommitRevisionRequest};
use strato_api::{
    BlockTransport, CryptoProvider, DraftOutcome, DriveApi, SharesService, SigningKey, Telemetry,
};
use strato_events::NodeEventsHandler;
use strato_node_cache::CryptoCache;
use strato_nodes::NodeAccess;
use strato_tools::PauseController;
use strato_types::{
    Error, Node, NodeKeys, NodeType, NodeUid, Result, RevisionState, RevisionUid,
};

/// Candidate names probed per round when looking for a free name.
const NAME_CANDIDATE_BATCH: usize = 10;

/// Options of a draft-node creation.
#[derive(Debug, Clone, Default)]
pub struct DraftOptions {
    /// Media type recorded on the file.
    pub media_type: Option<String>,
    /// Replace a conflicting draft even when it belongs to another client.
    pub override_existing_draft_by_other_client: bool,
}

/// Metadata committed alongside a finished upload.
#[derive(Debug, Clone, Default)]
pub struct CommitMetadata {
    /// Unix seconds of the client-side modification time.
    pub modification_time: Option<i64>,
    /// Plaintext size in bytes.
    pub size: Option<u64>,
    /// Hex SHA-1 of the plaintext content.
    pub sha1: Option<String>,
    /// Plaintext size of each uploaded block, in upload order.
    pub block_sizes: Vec<u64>,
}

/// An uncommitted upload target.
#[derive(Debug, Clone)]
pub struct Draft {
    /// The draft node.
    pub node_uid: NodeUid,
    /// The draft revision blocks are uploaded into.
    pub revision_uid: RevisionUid,
    /// Key material of the draft node.
    pub keys: NodeKeys,
    /// Session key encrypting the content blocks.
    pub content_session_key: String,
    /// Key the client signs blocks and manifests with.
    pub signing: SigningKey,
    /// True for a new-node draft, false for a revision draft on an
    /// existing file.
    pub new_node: bool,
}

pub(crate) struct UploaderInner {
    pub(crate) api: DriveApi,
    pub(crate) access: NodeAccess,
    pub(crate) crypto_cache: CryptoCache,
    pub(crate) crypto: Arc<dyn CryptoProvider>,
    pub(crate) shares: Arc<dyn SharesService>,
    pub(crate) handler: Arc<NodeEventsHandler>,
    pub(crate) block_transport: Arc<dyn BlockTransport>,
    pub(crate) telemetry: Arc<dyn Telemetry>,
    pub(crate) client_uid: Option<String>,
    pub(crate) pause: PauseController,
}

/// Entry point of the upload path.
#[derive(Clone)]
pub struct Uploader {
    pub(crate) inner: Arc<UploaderInner>,
}

impl Uploader {
    /// Assemble the upload path from its collaborators.
    ///
    /// `client_uid` is the stable client identifier used to recognize the
    /// caller's own drafts; without one a conflicting draft is never
    /// treated as own.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        api: DriveApi,
        access: NodeAccess,
        crypto_cache: CryptoCache,
        crypto: Arc<dyn CryptoProvider>,
        shares: Arc<dyn SharesService>,
        handler: Arc<NodeEventsHandler>,
        block_transport: Arc<dyn BlockTransport>,
        telemetry: Arc<dyn Telemetry>,
        client_uid: Option<String>,
    ) -> Self {
        Self {
            inner: Arc::new(UploaderInner {
                api,
                access,
                crypto_cache,
                crypto,
                shares,
                handler,
                block_transport,
                telemetry,
                client_uid,
                pause: PauseController::new(),
            }),
        }
    }

    /// Pause/resume gate of the block pipeline.
    pub fn pause_controller(&self) -> &PauseController {
        &self.inner.pause
    }

    async fn signing_key_for(&self, node: &Node) -> Result<SigningKey> {
        match &node.share_id {
            Some(share_id) => {
                self.inner
                    .shares
                    .context_share_member_email_key(share_id)
                    .await
            }
            None => self.inner.shares.my_files_member_email_key().await,
        }
    }

    /// Create a draft file node under a folder.
    ///
    /// A name conflict with the caller's own draft (or any draft, with the
    /// override option) deletes the occupant and retries once; any other
    /// conflict surfaces as [`Error::NodeAlreadyExists`].
    pub async fn create_draft_node(
        &self,
        parent_uid: &NodeUid,
        name: &str,
        options: &DraftOptions,
        cancel: &CancellationToken,
    ) -> Result<Draft> {
        let parent = self.inner.access.get_node(parent_uid, cancel).await?;
        let parent_keys = self.inner.access.get_node_keys(parent_uid, cancel).await?;
        let parent_hash_key = parent_keys
            .hash_key
            .clone()
            .ok_or_else(|| Error::validation("parent is not a folder"))?;
        let signing = self.signing_key_for(&parent).await?;

        let generated = self
            .inner
            .crypto
            .generate_node_key(&parent_keys, &signing.address_key)
            .await?;
        let content = self.inner.crypto.generate_content_key(&generated.keys).await?;
        let encrypted_name = self
            .inner
            .crypto
            .encrypt_name(name, &parent_keys, &signing.address_key)
            .await?;
        let hash = self.inner.crypto.hash_name(name, &parent_hash_key).await?;

        let request = CreateDraftRequest {
            encrypted_name: encrypted_name.armored,
            hash,
            node_key: generated.keys.private_key.clone(),
            node_passphrase: generated.encrypted_passphrase.clone(),
            node_passphrase_signature: generated.passphrase_signature.clone(),
            content_key_packet: content.content_key_packet.clone(),
            content_key_signature: content.content_key_signature.clone(),
            signature_email: signing.email.clone(),
            media_type: options.media_type.clone(),
            client_uid: self.inner.client_uid.clone(),
        };

        let created = match self
            .inner
            .api
            .create_draft(parent_uid, &request, cancel)
            .await?
        {
            DraftOutcome::Created(created) => created,
            DraftOutcome::Conflict {
                existing_node_uid,
                draft_client_uid,
                is_draft,
            } => {
                // A missing client uid never counts as an own draft.
                let own_draft = is_draft
                    && self.inner.client_uid.is_some()
                    && draft_client_uid == self.inner.client_uid;
                let may_replace =
                    is_draft && (own_draft || options.override_existing_draft_by_other_client);
                let existing = existing_node_uid.clone();
                if !may_replace {
                    return Err(Error::NodeAlreadyExists {
                        existing_node_uid,
                        has_draft_conflict: is_draft,
                    });
                }
                let Some(existing) = existing else {
                    return Err(Error::NodeAlreadyExists {
                        existing_node_uid: None,
                        has_draft_conflict: is_draft,
                    });
                };
                debug!(%existing, own_draft, "replacing conflicting draft");
                self.inner.api.delete_draft(&existing, cancel).await?;
                match self
                    .inner
                    .api
                    .create_draft(parent_uid, &request, cancel)
                    .await?
                {
                    DraftOutcome::Created(created) => created,
                    DraftOutcome::Conflict {
                        existing_node_uid,
                        is_draft,
                        ..
                    } => {
                        return Err(Error::NodeAlreadyExists {
                            existing_node_uid,
                            has_draft_conflict: is_draft,
                        })
                    }
                }
            }
        };

        let node_uid = NodeUid::new(parent_uid.volume_id(), &created.node_id)?;
        let revision_uid = RevisionUid::new(node_uid.clone(), &created.revision_id)?;
        let keys = NodeKeys {
            content_key_packet_session_key: Some(content.session_key.clone()),
            ..generated.keys
        };
        self.inner
            .crypto_cache
            .set_node_keys(&node_uid, &keys)
            .await?;

        Ok(Draft {
            node_uid,
            revision_uid,
            keys,
            content_session_key: content.session_key,
            signing,
            new_node: true,
        })
    }

    /// Find a free name near `name` in the folder, probing candidates
    /// `"name (i).ext"` in batches of ten until one is available.
    pub async fn find_available_name(
        &self,
        parent_uid: &NodeUid,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let parent_keys = self.inner.access.get_node_keys(parent_uid, cancel).await?;
        let hash_key = parent_keys
            .hash_key
            .clone()
            .ok_or_else(|| Error::validation("parent is not a folder"))?;
        let (stem, extension) = split_name(name);

        let mut index: u32 = 1;
        loop {
            let mut candidates = Vec::with_capacity(NAME_CANDIDATE_BATCH);
            for i in index..index + NAME_CANDIDATE_BATCH as u32 {
                let candidate = match extension {
                    Some(extension) => format!("{stem} ({i}).{extension}"),
                    None => format!("{stem} ({i})"),
                };
                let hash = self.inner.crypto.hash_name(&candidate, &hash_key).await?;
                candidates.push((candidate, hash));
            }
            let hashes: Vec<String> =
                candidates.iter().map(|(_, hash)| hash.clone()).collect();
            let available = self
                .inner
                .api
                .available_hashes(parent_uid, &hashes, cancel)
                .await?;
            if let Some((name, _)) = candidates
                .into_iter()
                .find(|(_, hash)| available.contains(hash))
            {
                return Ok(name);
            }
            index += NAME_CANDIDATE_BATCH as u32;
        }
    }

    /// Create a draft revision on an existing file with an active revision.
    pub async fn create_draft_revision(
        &self,
        uid: &NodeUid,
        cancel: &CancellationToken,
    ) -> Result<Draft> {
        let node = self.inner.access.get_node(uid, cancel).await?;
        if node.node_type != NodeType::File {
            return Err(Error::validation("only files take draft revisions"));
        }
        let active = match &node.active_revision {
            Some(Ok(revision)) if revision.state == RevisionState::Active => revision,
            _ => {
                return Err(Error::validation(
                    "file has no readable active revision to base a draft on",
                ))
            }
        };
        let keys = self.inner.access.get_node_keys(uid, cancel).await?;
        let content_session_key = keys
            .content_key_packet_session_key
            .clone()
            .ok_or_else(|| Error::validation("file has no content key"))?;
        let signing = self.signing_key_for(&node).await?;

        let created = self
            .inner
            .api
            .create_revision_draft(
                uid,
                &CreateRevisionDraftRequest {
                    current_revision_id: active.uid.revision_id().to_string(),
                    client_uid: self.inner.client_uid.clone(),
                },
                cancel,
            )
            .await?;

        Ok(Draft {
            node_uid: uid.clone(),
            revision_uid: RevisionUid::new(uid.clone(), &created.revision_id)?,
            keys,
            content_session_key,
            signing,
            new_node: false,
        })
    }

    /// Sign the manifest, encrypt the extended attributes, commit the
    /// draft, and notify the node events handler.
    pub async fn commit_draft(
        &self,
        draft: &Draft,
        manifest: &[u8],
        metadata: &CommitMetadata,
        cancel: &CancellationToken,
    ) -> Result<Node> {
        let manifest_signature = self
            .inner
            .crypto
            .sign_manifest(manifest, &draft.signing.address_key)
            .await?;

        let attributes = strato_api::dto::ExtendedAttributesDto {
            modification_time: metadata.modification_time,
            size: metadata.size,
            sha1: metadata.sha1.clone(),
            block_sizes: Some(metadata.block_sizes.clone()),
        };
        let attributes_json = serde_json::to_string(&attributes)
            .map_err(|e| Error::validation(format!("extended attributes not encodable: {e}")))?;
        let encrypted_attributes = self
            .inner
            .crypto
            .encrypt_extended_attributes(&attributes_json, &draft.keys, &draft.signing.address_key)
            .await?;

        self.inner
            .api
            .commit_revision(
                &draft.revision_uid,
                &CommitRevisionRequest {
                    manifest_signature,
                    signature_email: draft.signing.email.clone(),
                    extended_attributes: Some(encrypted_attributes),
                },
                cancel,
            )
            .await?;

        // Fetch the committed state so the cache and subscribers see the
        // node exactly as the server now reports it.
        let node = match self
            .inner
            .access
            .load_nodes(std::slice::from_ref(&draft.node_uid), cancel)
            .await
        {
            Ok(mut nodes) => nodes.pop(),
            Err(error) => {
                warn!(%error, uid = %draft.node_uid, "committed node could not be reloaded");
                None
            }
        };
        if let Some(node) = node {
            if draft.new_node {
                self.inner.handler.notify_node_created(&node).await?;
            } else {
                self.inner.handler.notify_node_updated(&node);
            }
            Ok(node)
        } else {
            Err(Error::NotFound(format!(
                "committed node {} not available",
                draft.node_uid
            )))
        }
    }

    pub(crate) async fn cleanup_draft(&self, draft: &Draft, cancel: &CancellationToken) {
        if !draft.new_node {
            return;
        }
        if let Err(error) = self.inner.api.delete_draft(&draft.node_uid, cancel).await {
            warn!(%error, uid = %draft.node_uid, "failed to clean up draft after aborted upload");
        }
        if let Err(error) = self
            .inner
            .crypto_cache
            .remove_node_keys(std::slice::from_ref(&draft.node_uid))
            .await
        {
            warn!(%error, uid = %draft.node_uid, "failed to drop draft keys");
        }
    }
}

/// Split `"report.pdf"` into `("report", Some("pdf"))`; names without an
/// extension (including dot-files) stay whole.
fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() && !extension.is_empty() => {
            (stem, Some(extension))
        }
        _ => (name, None),
    }
}
