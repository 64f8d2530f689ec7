#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **strato-types** – Shared primitive data structures for the Strato sync core.
//!
//! The crate is dependency-light and sits at the very bottom of the crate
//! graph so that *every* other crate can depend on it without causing cycles.
//! It intentionally makes no assumptions about I/O, cryptography, or storage:
//! identifiers are opaque strings with a canonical joined form, entities are
//! plain serde-friendly values, and verification outcomes are carried as
//! `Result`-typed fields so they round-trip through the cache without losing
//! the claimed value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

//─────────────────────────────
//  Submodules
//─────────────────────────────

/// Caller-visible error taxonomy and telemetry categorization.
pub mod errors;
/// Server event stream types shared by the event engine and its consumers.
pub mod events;

pub use errors::{Error, ErrorCategory, InvalidNameError, Result, VerificationError};
pub use events::{DriveEvent, EventScope};

/// Separator joining the components of a canonical uid string.
pub const UID_SEPARATOR: char = '~';

//─────────────────────────────
//  Identifiers
//─────────────────────────────

/// Globally unique node identifier: a volume id plus a node id.
///
/// The canonical textual form is `volumeId~nodeId`; the mapping between the
/// pair and the string is bijective because neither component may contain
/// the separator. Use [`NodeUid::new`] to construct a validated uid and the
/// `FromStr`/`Display` impls to convert to and from the canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeUid {
    volume_id: String,
    node_id: String,
}

impl NodeUid {
    /// Build a uid from its components, validating both parts.
    pub fn new(volume_id: impl Into<String>, node_id: impl Into<String>) -> Result<Self> {
        let volume_id = volume_id.into();
        let node_id = node_id.into();
        validate_uid_part("volume id", &volume_id)?;
        validate_uid_part("node id", &node_id)?;
        Ok(Self { volume_id, node_id })
    }

    /// The volume this node belongs to.
    pub fn volume_id(&self) -> &str {
        &self.volume_id
    }

    /// The node component of the uid.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }
}

impl std::fmt::Display for NodeUid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.volume_id, UID_SEPARATOR, self.node_id)
    }
}

impl std::str::FromStr for NodeUid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split(UID_SEPARATOR);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(volume), Some(node), None) if !volume.is_empty() && !node.is_empty() => {
                Ok(Self {
                    volume_id: volume.to_string(),
                    node_id: node.to_string(),
                })
            }
            _ => Err(Error::validation(format!("malformed node uid: {s:?}"))),
        }
    }
}

impl TryFrom<String> for NodeUid {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<NodeUid> for String {
    fn from(uid: NodeUid) -> Self {
        uid.to_string()
    }
}

/// Globally unique revision identifier: `volumeId~nodeId~revisionId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RevisionUid {
    node_uid: NodeUid,
    revision_id: String,
}

impl RevisionUid {
    /// Build a revision uid from a node uid and a revision id.
    pub fn new(node_uid: NodeUid, revision_id: impl Into<String>) -> Result<Self> {
        let revision_id = revision_id.into();
        validate_uid_part("revision id", &revision_id)?;
        Ok(Self {
            node_uid,
            revision_id,
        })
    }

    /// The node this revision belongs to.
    pub fn node_uid(&self) -> &NodeUid {
        &self.node_uid
    }

    /// The revision component of the uid.
    pub fn revision_id(&self) -> &str {
        &self.revision_id
    }
}

impl std::fmt::Display for RevisionUid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.node_uid, UID_SEPARATOR, self.revision_id)
    }
}

impl std::str::FromStr for RevisionUid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split(UID_SEPARATOR);
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(volume), Some(node), Some(revision), None)
                if !volume.is_empty() && !node.is_empty() && !revision.is_empty() =>
            {
                Ok(Self {
                    node_uid: NodeUid {
                        volume_id: volume.to_string(),
                        node_id: node.to_string(),
                    },
                    revision_id: revision.to_string(),
                })
            }
            _ => Err(Error::validation(format!("malformed revision uid: {s:?}"))),
        }
    }
}

impl TryFrom<String> for RevisionUid {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<RevisionUid> for String {
    fn from(uid: RevisionUid) -> Self {
        uid.to_string()
    }
}

fn validate_uid_part(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::validation(format!("{what} must not be empty")));
    }
    if value.contains(UID_SEPARATOR) {
        return Err(Error::validation(format!("{what} must not contain {UID_SEPARATOR:?}")));
    }
    Ok(())
}

//─────────────────────────────
//  Node entity
//─────────────────────────────

/// Kind of entry a node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    /// Regular file with content revisions.
    File,
    /// Folder containing child nodes.
    Folder,
    /// Photo album (folder-like, volume-scoped).
    Album,
}

/// Role of the current member on a shared node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberRole {
    /// Read-only access.
    Viewer,
    /// Read-write access.
    Editor,
    /// Full control including membership management.
    Admin,
    /// Role inherited from an ancestor share.
    Inherited,
}

/// Folder-specific decrypted metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderInfo {
    /// Modification time claimed by the client that last wrote the folder.
    pub claimed_modification_time: Option<DateTime<Utc>>,
}

/// A decrypted file, folder, or album as cached by the sync core.
///
/// `name`, `key_author`, and `name_author` are `Result`-typed: a decryption
/// or signature-verification failure is part of the node's state and must be
/// presented to callers rather than dropped. Adjacency is stored as uids
/// only; children are discovered through the cache's tag index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier of the node.
    pub uid: NodeUid,
    /// Parent folder uid; absent exactly when the node is a volume root.
    pub parent_uid: Option<NodeUid>,
    /// What kind of entry this is.
    pub node_type: NodeType,
    /// Decrypted name, or the failure that prevented decrypting it.
    pub name: std::result::Result<String, InvalidNameError>,
    /// Lookup hash derived from the name and the parent's hash key.
    /// Absent for volume roots.
    pub hash: Option<String>,
    /// Signature verification outcome for the node key.
    pub key_author: std::result::Result<String, VerificationError>,
    /// Signature verification outcome for the node name.
    pub name_author: std::result::Result<String, VerificationError>,
    /// The caller's direct membership role on this node.
    pub member_role: MemberRole,
    /// Media type of the file content, when known.
    pub media_type: Option<String>,
    /// Whether the node is shared with other members.
    pub is_shared: bool,
    /// Identifier of the share standing up this node, if any.
    pub share_id: Option<String>,
    /// Server-side creation time.
    pub creation_time: DateTime<Utc>,
    /// Set exactly when the node is in the trash.
    pub trash_time: Option<DateTime<Utc>>,
    /// Total storage consumed by the node and its revisions.
    pub total_storage_size: Option<u64>,
    /// The active content revision of a file, or the failure that prevented
    /// decrypting its metadata.
    pub active_revision: Option<std::result::Result<Revision, RevisionError>>,
    /// Folder-specific extras; present only for folders.
    pub folder: Option<FolderInfo>,
    /// True when events indicate the cached copy is out of date and must be
    /// refetched before use.
    pub is_stale: bool,
}

impl Node {
    /// The volume this node belongs to.
    pub fn volume_id(&self) -> &str {
        self.uid.volume_id()
    }

    /// True when the node is in the trash.
    pub fn is_trashed(&self) -> bool {
        self.trash_time.is_some()
    }
}

//─────────────────────────────
//  Revisions
//─────────────────────────────

/// Lifecycle state of a content revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevisionState {
    /// Mutable revision being written by a client.
    Draft,
    /// The immutable, authoritative content version.
    Active,
    /// Superseded revision retained for history.
    Obsolete,
}

/// Digests claimed by the uploading client for a revision's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimedDigests {
    /// Hex-encoded SHA-1 of the plaintext content.
    pub sha1: Option<String>,
}

/// Kind of thumbnail attached to a revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThumbnailKind {
    /// Small preview used in listings.
    Preview,
    /// High-resolution preview.
    HdPreview,
}

/// A thumbnail block attached to a revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thumbnail {
    /// Server-assigned thumbnail identifier.
    pub id: String,
    /// Which rendition this thumbnail is.
    pub kind: ThumbnailKind,
}

/// A content version of a file node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Revision {
    /// Unique identifier of the revision.
    pub uid: RevisionUid,
    /// Lifecycle state.
    pub state: RevisionState,
    /// Server-side creation time.
    pub creation_time: DateTime<Utc>,
    /// Encrypted size on the server.
    pub storage_size: u64,
    /// Plaintext size claimed by the uploading client.
    pub claimed_size: Option<u64>,
    /// Modification time claimed by the uploading client.
    pub claimed_modification_time: Option<DateTime<Utc>>,
    /// Content digests claimed by the uploading client.
    pub claimed_digests: Option<ClaimedDigests>,
    /// Thumbnails attached to this revision.
    pub thumbnails: Vec<Thumbnail>,
}

/// Failure that prevented decrypting a revision's metadata.
///
/// Serializable so a degraded revision survives a cache round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("revision metadata could not be decrypted: {message}")]
pub struct RevisionError {
    /// Human-readable failure description.
    pub message: String,
}

//─────────────────────────────
//  Node key material
//─────────────────────────────

/// Per-node cryptographic material.
///
/// Stored only in the crypto-material cache, never alongside node metadata,
/// so an implementer may back it with a secure keychain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeKeys {
    /// Decrypted node key passphrase.
    pub passphrase: String,
    /// Armored node private key.
    pub private_key: String,
    /// Session key the passphrase was encrypted with, base64-encoded.
    pub passphrase_session_key: String,
    /// Session key of the content key packet, base64-encoded; files only.
    pub content_key_packet_session_key: Option<String>,
    /// Hash key used to derive child name hashes; folders only.
    pub hash_key: Option<String>,
}
