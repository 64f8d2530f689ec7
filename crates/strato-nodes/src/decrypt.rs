//! Wire-to-domain decryption glue.
//!
//! Turns one encrypted [`NodeDto`] plus the parent's keys into a decrypted
//! [`Node`] and its [`NodeKeys`]. Hard failures (keys unusable) abort the
//! translation; soft failures (bad signatures, undecryptable names or
//! revision metadata) become `Result`-typed fields on the node and a
//! telemetry record, never a lost node.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use strato_api::dto::{ExtendedAttributesDto, NodeDto, RevisionDto, ThumbnailDto};
use strato_api::{AccountService, CryptoProvider, MetricName, MetricRecord, Telemetry};
use strato_types::{
    ClaimedDigests, Error, FolderInfo, MemberRole, Node, NodeKeys, NodeType, NodeUid, Result,
    Revision, RevisionError, RevisionState, RevisionUid, Thumbnail, ThumbnailKind,
};

pub(crate) struct NodeDecryptor {
    crypto: Arc<dyn CryptoProvider>,
    account: Arc<dyn AccountService>,
    telemetry: Arc<dyn Telemetry>,
}

impl NodeDecryptor {
    pub(crate) fn new(
        crypto: Arc<dyn CryptoProvider>,
        account: Arc<dyn AccountService>,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        Self {
            crypto,
            account,
            telemetry,
        }
    }

    pub(crate) async fn decrypt_node(
        &self,
        dto: &NodeDto,
        parent_keys: &NodeKeys,
    ) -> Result<(Node, NodeKeys)> {
        let uid = NodeUid::new(&dto.volume_id, &dto.node_id)?;
        let parent_uid = dto
            .parent_id
            .as_ref()
            .map(|parent_id| NodeUid::new(&dto.volume_id, parent_id))
            .transpose()?;

        let key_verification = self
            .verification_keys(dto.crypto.signature_email.as_deref())
            .await;
        let name_verification = self
            .verification_keys(dto.crypto.name_signature_email.as_deref())
            .await;

        let decrypted_keys = match self
            .crypto
            .decrypt_node_keys(&dto.crypto, parent_keys, &key_verification)
            .await
        {
            Ok(decrypted) => decrypted,
            Err(error) => {
                self.telemetry
                    .log_event(MetricRecord::new(MetricName::DecryptionError));
                return Err(error);
            }
        };
        if decrypted_keys.key_author.is_err() {
            self.telemetry
                .log_event(MetricRecord::new(MetricName::VerificationError));
        }

        let name = self
            .crypto
            .decrypt_name(
                &dto.encrypted_name,
                dto.crypto.name_signature_email.as_deref(),
                parent_keys,
                &name_verification,
            )
            .await?;
        if name.author.is_err() {
            self.telemetry
                .log_event(MetricRecord::new(MetricName::VerificationError));
        }

        let active_revision = match &dto.active_revision {
            Some(revision) => Some(
                self.decrypt_revision(&uid, revision, &decrypted_keys.keys)
                    .await,
            ),
            None => None,
        };

        let folder = if dto.node_type == 2 {
            Some(FolderInfo {
                claimed_modification_time: self
                    .decrypt_folder_modification_time(dto, &decrypted_keys.keys)
                    .await,
            })
        } else {
            None
        };

        let node = Node {
            uid,
            parent_uid,
            node_type: node_type(dto.node_type),
            name: name.name,
            hash: dto.hash.clone(),
            key_author: decrypted_keys.key_author,
            name_author: name.author,
            member_role: member_role(dto.member_role.as_deref()),
            media_type: dto.media_type.clone(),
            is_shared: dto.is_shared,
            share_id: dto.share_id.clone(),
            creation_time: timestamp(dto.creation_time),
            trash_time: dto.trash_time.map(timestamp),
            total_storage_size: dto.total_storage_size,
            active_revision,
            folder,
            is_stale: false,
        };
        Ok((node, decrypted_keys.keys))
    }

    async fn verification_keys(&self, email: Option<&str>) -> Vec<String> {
        let Some(email) = email else {
            return Vec::new();
        };
        match self.account.verification_keys(email).await {
            Ok(keys) => keys,
            Err(error) => {
                warn!(email, %error, "could not resolve verification keys");
                Vec::new()
            }
        }
    }

    async fn decrypt_revision(
        &self,
        node_uid: &NodeUid,
        dto: &RevisionDto,
        node_keys: &NodeKeys,
    ) -> std::result::Result<Revision, RevisionError> {
        let uid = RevisionUid::new(node_uid.clone(), &dto.revision_id).map_err(|error| {
            RevisionError {
                message: error.to_string(),
            }
        })?;

        let attributes = match &dto.extended_attributes {
            Some(encrypted) => match self.decrypt_attributes(encrypted, node_keys).await {
                Ok(attributes) => attributes,
                Err(error) => {
                    self.telemetry
                        .log_event(MetricRecord::new(MetricName::DecryptionError));
                    return Err(RevisionError {
                        message: format!("extended attributes unreadable: {error}"),
                    });
                }
            },
            None => ExtendedAttributesDto::default(),
        };

        Ok(Revision {
            uid,
            state: revision_state(dto.state),
            creation_time: timestamp(dto.creation_time),
            storage_size: dto.storage_size,
            claimed_size: attributes.size,
            claimed_modification_time: attributes.modification_time.map(timestamp),
            claimed_digests: attributes.sha1.map(|sha1| ClaimedDigests { sha1: Some(sha1) }),
            thumbnails: dto.thumbnails.iter().map(thumbnail).collect(),
        })
    }

    async fn decrypt_folder_modification_time(
        &self,
        dto: &NodeDto,
        node_keys: &NodeKeys,
    ) -> Option<DateTime<Utc>> {
        let encrypted = dto.folder_extended_attributes.as_ref()?;
        match self.decrypt_attributes(encrypted, node_keys).await {
            Ok(attributes) => attributes.modification_time.map(timestamp),
            Err(error) => {
                warn!(%error, "folder extended attributes unreadable");
                None
            }
        }
    }

    async fn decrypt_attributes(
        &self,
        encrypted: &str,
        node_keys: &NodeKeys,
    ) -> Result<ExtendedAttributesDto> {
        let json = self
            .crypto
            .decrypt_extended_attributes(encrypted, node_keys)
            .await?;
        serde_json::from_str(&json)
            .map_err(|e| Error::Decryption(format!("extended attributes malformed: {e}")))
    }
}

fn node_type(raw: u8) -> NodeType {
    match raw {
        1 => NodeType::File,
        2 => NodeType::Folder,
        3 => NodeType::Album,
        other => {
            warn!(node_type = other, "unknown node type, treating as file");
            NodeType::File
        }
    }
}

fn member_role(raw: Option<&str>) -> MemberRole {
    match raw {
        Some("viewer") => MemberRole::Viewer,
        Some("editor") => MemberRole::Editor,
        Some("admin") => MemberRole::Admin,
        _ => MemberRole::Inherited,
    }
}

fn revision_state(raw: u8) -> RevisionState {
    match raw {
        0 => RevisionState::Draft,
        1 => RevisionState::Active,
        _ => RevisionState::Obsolete,
    }
}

fn thumbnail(dto: &ThumbnailDto) -> Thumbnail {
    Thumbnail {
        id: dto.thumbnail_id.clone(),
        kind: match dto.kind {
            2 => ThumbnailKind::HdPreview,
            _ => ThumbnailKind::Preview,
        },
    }
}

fn timestamp(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(seconds, 0).unwrap_or(DateTime::UNIX_EPOCH)
}
