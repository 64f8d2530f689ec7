//! Wire shapes of the drive endpoints the core consumes.
//!
//! These mirror the server's JSON bodies one-to-one (camelCase fields,
//! integer enums, unix-second timestamps) and carry encrypted material
//! verbatim. Translation into decrypted domain entities happens in the node
//! access layer, never here.

use serde::{Deserialize, Serialize};

//─────────────────────────────
//  Nodes
//─────────────────────────────

/// Encrypted node record as returned by the node endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDto {
    pub volume_id: String,
    pub node_id: String,
    pub parent_id: Option<String>,
    /// 1 = file, 2 = folder, 3 = album.
    #[serde(rename = "type")]
    pub node_type: u8,
    /// Armored encrypted name.
    pub encrypted_name: String,
    pub hash: Option<String>,
    /// Unix seconds.
    pub creation_time: i64,
    /// Unix seconds; present exactly when the node is trashed.
    pub trash_time: Option<i64>,
    pub media_type: Option<String>,
    pub total_storage_size: Option<u64>,
    pub share_id: Option<String>,
    #[serde(default)]
    pub is_shared: bool,
    /// `viewer`, `editor`, `admin`, or absent for inherited membership.
    pub member_role: Option<String>,
    #[serde(flatten)]
    pub crypto: NodeCryptoDto,
    pub active_revision: Option<RevisionDto>,
    /// Encrypted extended attributes of the folder, when present.
    pub folder_extended_attributes: Option<String>,
}

/// Encrypted key material travelling with a node record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeCryptoDto {
    /// Armored node private key, locked by the passphrase.
    pub node_key: String,
    /// Node key passphrase, encrypted to the parent key.
    pub node_passphrase: String,
    pub node_passphrase_signature: Option<String>,
    /// Encrypted hash key; folders only.
    pub node_hash_key: Option<String>,
    /// Content key packet; files only.
    pub content_key_packet: Option<String>,
    /// Email that signed the node key.
    pub signature_email: Option<String>,
    /// Email that signed the name.
    pub name_signature_email: Option<String>,
}

/// Revision record attached to a node or returned by revision endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionDto {
    pub revision_id: String,
    /// 0 = draft, 1 = active, 2 = obsolete.
    pub state: u8,
    /// Unix seconds.
    pub creation_time: i64,
    pub storage_size: u64,
    /// Encrypted extended attributes (claimed size, modification time,
    /// digests, block sizes).
    pub extended_attributes: Option<String>,
    #[serde(default)]
    pub thumbnails: Vec<ThumbnailDto>,
}

/// Thumbnail descriptor attached to a revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailDto {
    pub thumbnail_id: String,
    /// 1 = preview, 2 = HD preview.
    #[serde(rename = "type")]
    pub kind: u8,
}

/// One page of child node ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeIdPageDto {
    pub node_ids: Vec<String>,
    #[serde(default)]
    pub more: bool,
    pub anchor: Option<String>,
}

/// Batch node fetch response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeBatchDto {
    pub nodes: Vec<NodeDto>,
}

/// Per-node outcome of a batch mutation (trash, restore, delete).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResultDto {
    pub node_id: String,
    pub code: u32,
    pub error: Option<String>,
}

/// Batch mutation response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResultsDto {
    pub results: Vec<NodeResultDto>,
}

/// Response of a folder creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedFolderDto {
    pub node_id: String,
}

//─────────────────────────────
//  Events
//─────────────────────────────

/// Latest event id of a scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestEventIdDto {
    pub event_id: String,
}

/// Core-scope event poll response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreEventsDto {
    pub latest_event_id: String,
    #[serde(default)]
    pub refresh: bool,
    #[serde(default)]
    pub shared_with_me_refresh: bool,
}

/// Volume-scope event poll response (one page).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeEventsDto {
    pub latest_event_id: String,
    #[serde(default)]
    pub more: bool,
    #[serde(default)]
    pub refresh: bool,
    #[serde(default)]
    pub events: Vec<VolumeEventDto>,
}

/// One raw volume event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeEventDto {
    pub event_id: String,
    /// 0 = delete, 1 = create, 2 = update metadata, 3 = update content.
    #[serde(rename = "type")]
    pub event_type: u8,
    pub node: VolumeEventNodeDto,
}

/// Node identifiers travelling with a raw volume event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeEventNodeDto {
    pub node_id: String,
    pub parent_id: Option<String>,
    #[serde(default)]
    pub is_trashed: bool,
    #[serde(default)]
    pub is_shared: bool,
}

//─────────────────────────────
//  Drafts & uploads
//─────────────────────────────

/// Response of a successful draft creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedDraftDto {
    pub node_id: String,
    pub revision_id: String,
}

/// Conflict details attached to an `ALREADY_EXISTS` rejection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DraftConflictDto {
    pub existing_node_id: Option<String>,
    /// Client uid that owns the conflicting draft, when the conflict is a
    /// draft at all.
    pub draft_client_uid: Option<String>,
    #[serde(default)]
    pub is_draft: bool,
}

/// Response of a draft revision creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedRevisionDraftDto {
    pub revision_id: String,
}

/// Which of the asked name hashes are free.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableHashesDto {
    pub available_hashes: Vec<String>,
}

/// Block metadata sent when requesting upload tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockMetadataDto {
    pub index: u32,
    pub size: u64,
    /// Base64 digest of the encrypted block.
    pub hash: String,
    /// Base64 verification token for the block.
    pub verification_token: String,
}

/// Thumbnail metadata sent when requesting upload tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailMetadataDto {
    /// 1 = preview, 2 = HD preview.
    #[serde(rename = "type")]
    pub kind: u8,
    pub size: u64,
    pub hash: String,
}

/// One issued upload token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockTokenDto {
    pub index: u32,
    pub token: String,
    pub upload_url: String,
}

/// Issued thumbnail upload token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailTokenDto {
    #[serde(rename = "type")]
    pub kind: u8,
    pub token: String,
    pub upload_url: String,
}

/// Response of a block-token request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockTokensDto {
    pub blocks: Vec<BlockTokenDto>,
    #[serde(default)]
    pub thumbnails: Vec<ThumbnailTokenDto>,
}

/// Per-revision block verification inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationDataDto {
    /// Base64 verification code to combine with each encrypted block.
    pub verification_code: String,
    /// Base64 content key packet of the revision.
    pub content_key_packet: String,
}

/// Decrypted extended attributes of a revision or folder.
///
/// This is the JSON that travels *inside* the encrypted
/// `extendedAttributes` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExtendedAttributesDto {
    /// Unix seconds of the client-side modification time.
    pub modification_time: Option<i64>,
    /// Plaintext size in bytes.
    pub size: Option<u64>,
    /// Hex SHA-1 of the plaintext content.
    pub sha1: Option<String>,
    /// Plaintext size of each uploaded block, in upload order.
    pub block_sizes: Option<Vec<u64>>,
}

//─────────────────────────────
//  Write-path request bodies
//─────────────────────────────

/// Body of a rename call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameNodeRequest {
    pub encrypted_name: String,
    pub name_signature_email: String,
    pub hash: String,
    pub original_hash: String,
}

/// Body of a move call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveNodeRequest {
    pub parent_id: String,
    pub encrypted_name: String,
    pub hash: String,
    pub original_hash: String,
    pub node_passphrase: String,
    pub node_passphrase_signature: String,
    pub signature_email: String,
    pub name_signature_email: String,
}

/// Body of a folder creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFolderRequest {
    pub encrypted_name: String,
    pub hash: String,
    pub node_key: String,
    pub node_passphrase: String,
    pub node_passphrase_signature: String,
    pub node_hash_key: String,
    pub signature_email: String,
    pub extended_attributes: Option<String>,
}

/// Body of a file draft creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDraftRequest {
    pub encrypted_name: String,
    pub hash: String,
    pub node_key: String,
    pub node_passphrase: String,
    pub node_passphrase_signature: String,
    pub content_key_packet: String,
    pub content_key_signature: String,
    pub signature_email: String,
    pub media_type: Option<String>,
    /// Stable client identifier used to recognize the caller's own drafts.
    pub client_uid: Option<String>,
}

/// Body of a draft revision creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRevisionDraftRequest {
    /// Revision the draft is based on.
    pub current_revision_id: String,
    pub client_uid: Option<String>,
}

/// Body of a revision commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRevisionRequest {
    pub manifest_signature: String,
    pub signature_email: String,
    pub extended_attributes: Option<String>,
}
