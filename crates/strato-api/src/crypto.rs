//! Cryptography collaborator contract.
//!
//! The core never touches primitives directly; it asks the injected
//! [`CryptoProvider`] for key generation, name and attribute encryption,
//! block encryption, manifest signing, and signature verification.
//! Verification outcomes are *data*: a failed signature check is returned
//! inside the result structs rather than as an error, so degraded nodes
//! still reach the cache with their claimed authors attached.

use async_trait::async_trait;

use strato_types::{InvalidNameError, NodeKeys, Result, VerificationError};

use crate::dto::NodeCryptoDto;

/// Outcome of verifying a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStatus {
    /// Signature present and valid against the claimed author's keys.
    SignedAndValid,
    /// Signature present but invalid.
    SignedAndInvalid,
    /// No signature was attached.
    NotSigned,
}

impl VerificationStatus {
    /// Fold a status into the `Result`-typed author field of a node.
    pub fn into_author(
        self,
        claimed_author: Option<String>,
    ) -> std::result::Result<String, VerificationError> {
        match self {
            VerificationStatus::SignedAndValid => {
                claimed_author.ok_or_else(|| VerificationError {
                    claimed_author: None,
                    reason: "valid signature without an author".to_string(),
                })
            }
            VerificationStatus::SignedAndInvalid => Err(VerificationError {
                claimed_author,
                reason: "signature did not verify".to_string(),
            }),
            VerificationStatus::NotSigned => Err(VerificationError {
                claimed_author,
                reason: "not signed".to_string(),
            }),
        }
    }
}

/// A freshly generated node key pair, ready for the create endpoints.
#[derive(Debug, Clone)]
pub struct GeneratedNodeKey {
    /// Decrypted key material to cache after the API call succeeds.
    pub keys: NodeKeys,
    /// Passphrase encrypted to the parent key, for the wire.
    pub encrypted_passphrase: String,
    /// Armored signature over the passphrase.
    pub passphrase_signature: String,
}

/// A freshly generated folder hash key.
#[derive(Debug, Clone)]
pub struct GeneratedHashKey {
    /// Decrypted hash key to cache.
    pub hash_key: String,
    /// Hash key encrypted to the node key, for the wire.
    pub encrypted_hash_key: String,
}

/// A freshly generated file content key.
#[derive(Debug, Clone)]
pub struct GeneratedContentKey {
    /// Base64 session key used to encrypt content blocks.
    pub session_key: String,
    /// Content key packet for the wire.
    pub content_key_packet: String,
    /// Signature over the content key packet.
    pub content_key_signature: String,
}

/// An encrypted node name ready for the wire.
#[derive(Debug, Clone)]
pub struct EncryptedName {
    /// Armored encrypted name.
    pub armored: String,
}

/// Outcome of decrypting a node name.
#[derive(Debug, Clone)]
pub struct DecryptedName {
    /// The name, or why it is unusable.
    pub name: std::result::Result<String, InvalidNameError>,
    /// Verified or claimed author of the name signature.
    pub author: std::result::Result<String, VerificationError>,
}

/// Outcome of decrypting a node's key material.
#[derive(Debug, Clone)]
pub struct DecryptedNodeKeys {
    /// The decrypted keys.
    pub keys: NodeKeys,
    /// Verified or claimed author of the key signature.
    pub key_author: std::result::Result<String, VerificationError>,
}

/// A node passphrase re-encrypted to a new parent, for moves.
#[derive(Debug, Clone)]
pub struct ReencryptedPassphrase {
    /// Passphrase encrypted to the new parent key.
    pub encrypted_passphrase: String,
    /// Fresh signature over the passphrase.
    pub passphrase_signature: String,
}

/// An encrypted content block with its digest and signature.
#[derive(Debug, Clone)]
pub struct EncryptedBlock {
    /// The ciphertext.
    pub data: Vec<u8>,
    /// Base64 digest of the ciphertext, for the token request.
    pub hash: String,
    /// Armored signature over the plaintext, encrypted.
    pub encrypted_signature: String,
}

/// Cryptography operations the sync core consumes.
///
/// Hard failures (the material cannot be processed at all) surface as
/// `Error::Decryption`; verification failures travel inside the returned
/// structs.
#[async_trait]
pub trait CryptoProvider: Send + Sync {
    /// Generate a node key pair locked to the parent key.
    async fn generate_node_key(
        &self,
        parent_keys: &NodeKeys,
        signing_key: &str,
    ) -> Result<GeneratedNodeKey>;

    /// Generate a folder hash key locked to the node key.
    async fn generate_hash_key(&self, node_keys: &NodeKeys) -> Result<GeneratedHashKey>;

    /// Generate a file content session key and packet.
    async fn generate_content_key(&self, node_keys: &NodeKeys) -> Result<GeneratedContentKey>;

    /// Encrypt and sign a node name with the parent key.
    async fn encrypt_name(
        &self,
        name: &str,
        parent_keys: &NodeKeys,
        signing_key: &str,
    ) -> Result<EncryptedName>;

    /// Decrypt a node name and verify its signature.
    async fn decrypt_name(
        &self,
        encrypted_name: &str,
        claimed_author: Option<&str>,
        parent_keys: &NodeKeys,
        verification_keys: &[String],
    ) -> Result<DecryptedName>;

    /// Decrypt a node's key material with the parent key and verify the
    /// passphrase signature.
    async fn decrypt_node_keys(
        &self,
        crypto: &NodeCryptoDto,
        parent_keys: &NodeKeys,
        verification_keys: &[String],
    ) -> Result<DecryptedNodeKeys>;

    /// Compute the lookup hash of a name under a folder hash key.
    async fn hash_name(&self, name: &str, hash_key: &str) -> Result<String>;

    /// Re-encrypt a node passphrase to a new parent key, re-signing it.
    async fn reencrypt_passphrase(
        &self,
        keys: &NodeKeys,
        new_parent_keys: &NodeKeys,
        signing_key: &str,
    ) -> Result<ReencryptedPassphrase>;

    /// Encrypt extended attributes (JSON) to the node key.
    async fn encrypt_extended_attributes(
        &self,
        attributes_json: &str,
        node_keys: &NodeKeys,
        signing_key: &str,
    ) -> Result<String>;

    /// Decrypt extended attributes into JSON.
    async fn decrypt_extended_attributes(
        &self,
        encrypted: &str,
        node_keys: &NodeKeys,
    ) -> Result<String>;

    /// Encrypt one content block with the revision's session key.
    async fn encrypt_block(
        &self,
        data: &[u8],
        session_key: &str,
        signing_key: &str,
    ) -> Result<EncryptedBlock>;

    /// Decrypt one content block given the revision's content key packet.
    ///
    /// Used by the block verifier as a corruption probe before upload.
    async fn decrypt_block(&self, data: &[u8], content_key_packet: &[u8]) -> Result<Vec<u8>>;

    /// Sign an upload manifest.
    async fn sign_manifest(&self, manifest: &[u8], signing_key: &str) -> Result<String>;
}
