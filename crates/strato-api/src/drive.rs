//! Typed adapter over the drive endpoints.
//!
//! One thin method per endpoint the core consumes; bodies and responses are
//! the wire DTOs of [`crate::dto`]. Paging is folded here so callers see
//! complete id lists, and the `ALREADY_EXISTS` draft conflict is lifted into
//! [`DraftOutcome`] so the upload manager can resolve it without re-parsing
//! validation details.

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use strato_types::{Error, NodeUid, Result, RevisionUid};

use crate::dto::*;
use crate::transport::{decode, Transport, CODE_ALREADY_EXISTS};

/// Outcome of a draft creation attempt.
#[derive(Debug, Clone)]
pub enum DraftOutcome {
    /// The draft was created.
    Created(CreatedDraftDto),
    /// The name is taken; details describe the occupant.
    Conflict {
        /// Uid of the conflicting node, when reported.
        existing_node_uid: Option<NodeUid>,
        /// Client uid owning the conflicting draft, when it is a draft.
        draft_client_uid: Option<String>,
        /// True when the occupant is an uncommitted draft.
        is_draft: bool,
    },
}

/// Typed access to the drive endpoints.
#[derive(Clone)]
pub struct DriveApi {
    transport: Arc<dyn Transport>,
}

impl DriveApi {
    /// Wrap a transport.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    //─────────────────────────────
    //  Node reads
    //─────────────────────────────

    /// Fetch a single encrypted node record.
    pub async fn node(&self, uid: &NodeUid, cancel: &CancellationToken) -> Result<NodeDto> {
        let path = format!(
            "drive/volumes/{}/nodes/{}",
            uid.volume_id(),
            uid.node_id()
        );
        decode(self.transport.get(&path, cancel).await?)
    }

    /// Fetch a batch of encrypted node records from one volume.
    pub async fn nodes(
        &self,
        volume_id: &str,
        node_ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<NodeDto>> {
        let path = format!("drive/volumes/{volume_id}/nodes/fetch");
        let body = json!({ "nodeIds": node_ids });
        let batch: NodeBatchDto = decode(self.transport.post(&path, body, cancel).await?)?;
        Ok(batch.nodes)
    }

    /// All child node ids of a folder, following pagination.
    pub async fn child_node_ids(
        &self,
        parent_uid: &NodeUid,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let base = format!(
            "drive/volumes/{}/folders/{}/children",
            parent_uid.volume_id(),
            parent_uid.node_id()
        );
        self.paged_node_ids(&base, cancel).await
    }

    /// All trashed node ids of a volume, following pagination.
    pub async fn trashed_node_ids(
        &self,
        volume_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let base = format!("drive/volumes/{volume_id}/trash");
        self.paged_node_ids(&base, cancel).await
    }

    async fn paged_node_ids(
        &self,
        base: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut anchor: Option<String> = None;
        loop {
            let path = match &anchor {
                Some(anchor) => format!("{base}?anchor={anchor}"),
                None => base.to_string(),
            };
            let page: NodeIdPageDto = decode(self.transport.get(&path, cancel).await?)?;
            ids.extend(page.node_ids);
            if !page.more {
                break;
            }
            anchor = page.anchor;
            if anchor.is_none() {
                debug!("server reported more without an anchor, stopping");
                break;
            }
        }
        Ok(ids)
    }

    //─────────────────────────────
    //  Node writes
    //─────────────────────────────

    /// Rename a node in place.
    pub async fn rename_node(
        &self,
        uid: &NodeUid,
        request: &RenameNodeRequest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let path = format!(
            "drive/volumes/{}/nodes/{}/rename",
            uid.volume_id(),
            uid.node_id()
        );
        self.transport
            .put(&path, serde_json::to_value(request).map_err(internal)?, cancel)
            .await?;
        Ok(())
    }

    /// Move a node to a new parent.
    pub async fn move_node(
        &self,
        uid: &NodeUid,
        request: &MoveNodeRequest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let path = format!(
            "drive/volumes/{}/nodes/{}/move",
            uid.volume_id(),
            uid.node_id()
        );
        self.transport
            .put(&path, serde_json::to_value(request).map_err(internal)?, cancel)
            .await?;
        Ok(())
    }

    /// Move a batch of same-volume nodes to the trash.
    pub async fn trash_nodes(
        &self,
        volume_id: &str,
        node_ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<NodeResultDto>> {
        let path = format!("drive/volumes/{volume_id}/trash_multiple");
        let body = json!({ "nodeIds": node_ids });
        let results: NodeResultsDto = decode(self.transport.post(&path, body, cancel).await?)?;
        Ok(results.results)
    }

    /// Restore a batch of same-volume nodes from the trash.
    pub async fn restore_nodes(
        &self,
        volume_id: &str,
        node_ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<NodeResultDto>> {
        let path = format!("drive/volumes/{volume_id}/trash/restore_multiple");
        let body = json!({ "nodeIds": node_ids });
        let results: NodeResultsDto = decode(self.transport.post(&path, body, cancel).await?)?;
        Ok(results.results)
    }

    /// Permanently delete a batch of same-volume nodes.
    pub async fn delete_nodes(
        &self,
        volume_id: &str,
        node_ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<NodeResultDto>> {
        let path = format!("drive/volumes/{volume_id}/trash/delete_multiple");
        let body = json!({ "nodeIds": node_ids });
        let results: NodeResultsDto = decode(self.transport.post(&path, body, cancel).await?)?;
        Ok(results.results)
    }

    /// Create a folder under a parent.
    pub async fn create_folder(
        &self,
        parent_uid: &NodeUid,
        request: &CreateFolderRequest,
        cancel: &CancellationToken,
    ) -> Result<CreatedFolderDto> {
        let path = format!(
            "drive/volumes/{}/folders/{}/children",
            parent_uid.volume_id(),
            parent_uid.node_id()
        );
        decode(
            self.transport
                .post(&path, serde_json::to_value(request).map_err(internal)?, cancel)
                .await?,
        )
    }

    //─────────────────────────────
    //  Drafts & uploads
    //─────────────────────────────

    /// Create a file draft under a parent, surfacing name conflicts as
    /// [`DraftOutcome::Conflict`].
    pub async fn create_draft(
        &self,
        parent_uid: &NodeUid,
        request: &CreateDraftRequest,
        cancel: &CancellationToken,
    ) -> Result<DraftOutcome> {
        let path = format!(
            "drive/volumes/{}/folders/{}/files",
            parent_uid.volume_id(),
            parent_uid.node_id()
        );
        let response = self
            .transport
            .post(&path, serde_json::to_value(request).map_err(internal)?, cancel)
            .await;
        match response {
            Ok(value) => Ok(DraftOutcome::Created(decode(value)?)),
            Err(Error::Validation {
                code: Some(CODE_ALREADY_EXISTS),
                details,
                ..
            }) => {
                let conflict: DraftConflictDto = details
                    .map(|d| decode(d))
                    .transpose()?
                    .unwrap_or_default();
                let existing_node_uid = conflict
                    .existing_node_id
                    .map(|id| NodeUid::new(parent_uid.volume_id(), id))
                    .transpose()?;
                Ok(DraftOutcome::Conflict {
                    existing_node_uid,
                    draft_client_uid: conflict.draft_client_uid,
                    is_draft: conflict.is_draft,
                })
            }
            Err(error) => Err(error),
        }
    }

    /// Delete an uncommitted draft node.
    pub async fn delete_draft(&self, uid: &NodeUid, cancel: &CancellationToken) -> Result<()> {
        let path = format!(
            "drive/volumes/{}/files/{}/draft",
            uid.volume_id(),
            uid.node_id()
        );
        self.transport.delete(&path, cancel).await?;
        Ok(())
    }

    /// Create a draft revision on an existing file.
    pub async fn create_revision_draft(
        &self,
        uid: &NodeUid,
        request: &CreateRevisionDraftRequest,
        cancel: &CancellationToken,
    ) -> Result<CreatedRevisionDraftDto> {
        let path = format!(
            "drive/volumes/{}/files/{}/revisions",
            uid.volume_id(),
            uid.node_id()
        );
        decode(
            self.transport
                .post(&path, serde_json::to_value(request).map_err(internal)?, cancel)
                .await?,
        )
    }

    /// Commit a draft revision.
    pub async fn commit_revision(
        &self,
        revision_uid: &RevisionUid,
        request: &CommitRevisionRequest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let path = format!(
            "drive/volumes/{}/files/{}/revisions/{}",
            revision_uid.node_uid().volume_id(),
            revision_uid.node_uid().node_id(),
            revision_uid.revision_id()
        );
        self.transport
            .put(&path, serde_json::to_value(request).map_err(internal)?, cancel)
            .await?;
        Ok(())
    }

    /// Ask which of the given name hashes are free under a folder.
    pub async fn available_hashes(
        &self,
        parent_uid: &NodeUid,
        hashes: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let path = format!(
            "drive/volumes/{}/folders/{}/available_hashes",
            parent_uid.volume_id(),
            parent_uid.node_id()
        );
        let body = json!({ "hashes": hashes });
        let response: AvailableHashesDto =
            decode(self.transport.post(&path, body, cancel).await?)?;
        Ok(response.available_hashes)
    }

    /// Request upload tokens for a revision's blocks and thumbnails in one
    /// round trip.
    pub async fn request_block_upload(
        &self,
        revision_uid: &RevisionUid,
        blocks: &[BlockMetadataDto],
        thumbnails: &[ThumbnailMetadataDto],
        cancel: &CancellationToken,
    ) -> Result<BlockTokensDto> {
        let path = format!(
            "drive/volumes/{}/files/{}/revisions/{}/blocks",
            revision_uid.node_uid().volume_id(),
            revision_uid.node_uid().node_id(),
            revision_uid.revision_id()
        );
        let body = json!({ "blocks": blocks, "thumbnails": thumbnails });
        decode(self.transport.post(&path, body, cancel).await?)
    }

    /// Fetch the per-revision block verification inputs.
    pub async fn verification_data(
        &self,
        revision_uid: &RevisionUid,
        cancel: &CancellationToken,
    ) -> Result<VerificationDataDto> {
        let path = format!(
            "drive/volumes/{}/files/{}/revisions/{}/verification",
            revision_uid.node_uid().volume_id(),
            revision_uid.node_uid().node_id(),
            revision_uid.revision_id()
        );
        decode(self.transport.get(&path, cancel).await?)
    }

    //─────────────────────────────
    //  Events
    //─────────────────────────────

    /// Latest event id of the core scope.
    pub async fn core_latest_event_id(&self, cancel: &CancellationToken) -> Result<String> {
        let latest: LatestEventIdDto =
            decode(self.transport.get("core/events/latest", cancel).await?)?;
        Ok(latest.event_id)
    }

    /// Poll the core scope for events after `since`.
    pub async fn core_events(
        &self,
        since: &str,
        cancel: &CancellationToken,
    ) -> Result<CoreEventsDto> {
        let path = format!("core/events/{since}");
        decode(self.transport.get(&path, cancel).await?)
    }

    /// Latest event id of a volume scope.
    pub async fn volume_latest_event_id(
        &self,
        volume_id: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let path = format!("drive/volumes/{volume_id}/events/latest");
        let latest: LatestEventIdDto = decode(self.transport.get(&path, cancel).await?)?;
        Ok(latest.event_id)
    }

    /// Poll a volume scope for one page of events after `since`.
    pub async fn volume_events(
        &self,
        volume_id: &str,
        since: &str,
        cancel: &CancellationToken,
    ) -> Result<VolumeEventsDto> {
        let path = format!("drive/volumes/{volume_id}/events/{since}");
        decode(self.transport.get(&path, cancel).await?)
    }
}

fn internal(error: serde_json::Error) -> Error {
    Error::validation(format!("request body could not be encoded: {error}"))
}
