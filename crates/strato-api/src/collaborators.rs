//! Shares, account, and event-id resumption contracts.

use async_trait::async_trait;

use strato_types::{EventScope, NodeKeys, Result};

/// Location of the caller's own files tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MyFilesIds {
    /// The caller's own volume.
    pub volume_id: String,
    /// Root folder of the own volume.
    pub root_node_id: String,
}

/// An address key the caller signs with, bound to its email.
#[derive(Debug, Clone)]
pub struct SigningKey {
    /// Email the key belongs to.
    pub email: String,
    /// Armored private address key.
    pub address_key: String,
}

/// Share membership and share-key resolution.
#[async_trait]
pub trait SharesService: Send + Sync {
    /// Volume and root node of the caller's own files.
    async fn my_files_ids(&self) -> Result<MyFilesIds>;

    /// Key material of a share root, used in place of parent keys.
    async fn share_private_key(&self, share_id: &str) -> Result<NodeKeys>;

    /// Telemetry context label of a volume (`own_volume`, `shared`, ...).
    async fn volume_metric_context(&self, volume_id: &str) -> Result<String>;

    /// Whether the volume belongs to the caller. Drives the polling
    /// interval of the volume's event stream.
    async fn is_own_volume(&self, volume_id: &str) -> Result<bool>;

    /// Signing key for operations in the caller's own files tree.
    async fn my_files_member_email_key(&self) -> Result<SigningKey>;

    /// Signing key for operations inside the given share.
    async fn context_share_member_email_key(&self, share_id: &str) -> Result<SigningKey>;
}

/// Email to verification-key resolution.
#[async_trait]
pub trait AccountService: Send + Sync {
    /// Armored public keys usable to verify signatures by `email`.
    async fn verification_keys(&self, email: &str) -> Result<Vec<String>>;
}

/// Optional caller hook to resume event polling across process restarts.
///
/// Returning `None` makes the scope manager resolve the latest event id
/// lazily from the server on first start.
#[async_trait]
pub trait LatestEventIdProvider: Send + Sync {
    /// Last event id the caller persisted for the scope, if any.
    async fn latest_event_id(&self, scope: &EventScope) -> Result<Option<String>>;
}
