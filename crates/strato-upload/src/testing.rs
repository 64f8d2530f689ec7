//! Shared fixtures for the crate's tests: scriptable transports, a
//! reversible fake crypto provider, and a full uploader stack over
//! in-memory caches.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use strato_api::dto::{NodeCryptoDto, NodeDto, RevisionDto};
use strato_api::{
    AccountService, BlockTransport, CryptoProvider, DecryptedName, DecryptedNodeKeys, DriveApi,
    EncryptedBlock, EncryptedName, GeneratedContentKey, GeneratedHashKey, GeneratedNodeKey,
    MyFilesIds, NoopTelemetry, ReencryptedPassphrase, SharesService, SigningKey, Transport,
};
use strato_cache_memory::MemoryCache;
use strato_events::NodeEventsHandler;
use strato_node_cache::{CryptoCache, NodeCache};
use strato_nodes::NodeAccess;
use strato_types::{Error, InvalidNameError, NodeKeys, Result};

use crate::drafts::Uploader;

//─────────────────────────────
//  Transports
//─────────────────────────────

pub type Responder = dyn Fn(&str, &str, Option<&Value>) -> Result<Value> + Send + Sync;

pub struct MockTransport {
    responder: Box<Responder>,
    pub calls: Mutex<Vec<(String, String, Option<Value>)>>,
}

impl MockTransport {
    pub fn new(
        responder: impl Fn(&str, &str, Option<&Value>) -> Result<Value> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn respond(&self, method: &str, path: &str, body: Option<&Value>) -> Result<Value> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), path.to_string(), body.cloned()));
        (self.responder)(method, path, body)
    }

    pub fn calls_matching(&self, method: &str, path_fragment: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, p, _)| m == method && p.contains(path_fragment))
            .count()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, path: &str, _cancel: &CancellationToken) -> Result<Value> {
        self.respond("GET", path, None)
    }
    async fn post(&self, path: &str, body: Value, _cancel: &CancellationToken) -> Result<Value> {
        self.respond("POST", path, Some(&body))
    }
    async fn put(&self, path: &str, body: Value, _cancel: &CancellationToken) -> Result<Value> {
        self.respond("PUT", path, Some(&body))
    }
    async fn delete(&self, path: &str, _cancel: &CancellationToken) -> Result<Value> {
        self.respond("DELETE", path, None)
    }
}

/// Block transport that records every upload and can fail specific tokens
/// once.
#[derive(Default)]
pub struct MockBlockTransport {
    pub uploads: Mutex<Vec<String>>,
    pub fail_once_with_not_found: Mutex<Vec<String>>,
}

impl MockBlockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }
}

#[async_trait]
impl BlockTransport for MockBlockTransport {
    async fn upload_block(
        &self,
        _upload_url: &str,
        token: &str,
        _data: &[u8],
        _cancel: &CancellationToken,
    ) -> Result<()> {
        self.uploads.lock().unwrap().push(token.to_string());
        let mut failing = self.fail_once_with_not_found.lock().unwrap();
        if let Some(position) = failing.iter().position(|t| t == token) {
            failing.remove(position);
            return Err(Error::NotFound("upload token expired".into()));
        }
        Ok(())
    }
}

//─────────────────────────────
//  Crypto
//─────────────────────────────

/// Reversible fake: "encryption" is a prefix byte or string marker, so
/// pipeline output is assertable.
pub struct FakeCrypto {
    counter: AtomicU64,
}

impl FakeCrypto {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            counter: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl CryptoProvider for FakeCrypto {
    async fn generate_node_key(
        &self,
        _parent_keys: &NodeKeys,
        _signing_key: &str,
    ) -> Result<GeneratedNodeKey> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        Ok(GeneratedNodeKey {
            keys: NodeKeys {
                passphrase: format!("pass-{n}"),
                private_key: format!("key-{n}"),
                passphrase_session_key: "sk".into(),
                content_key_packet_session_key: None,
                hash_key: None,
            },
            encrypted_passphrase: format!("enc-pass-{n}"),
            passphrase_signature: "pass-sig".into(),
        })
    }

    async fn generate_hash_key(&self, _node_keys: &NodeKeys) -> Result<GeneratedHashKey> {
        Ok(GeneratedHashKey {
            hash_key: "hashkey".into(),
            encrypted_hash_key: "enc-hashkey".into(),
        })
    }

    async fn generate_content_key(&self, _node_keys: &NodeKeys) -> Result<GeneratedContentKey> {
        Ok(GeneratedContentKey {
            session_key: "session".into(),
            content_key_packet: "packet".into(),
            content_key_signature: "packet-sig".into(),
        })
    }

    async fn encrypt_name(
        &self,
        name: &str,
        _parent_keys: &NodeKeys,
        _signing_key: &str,
    ) -> Result<EncryptedName> {
        Ok(EncryptedName {
            armored: format!("enc:{name}"),
        })
    }

    async fn decrypt_name(
        &self,
        encrypted_name: &str,
        claimed_author: Option<&str>,
        _parent_keys: &NodeKeys,
        _verification_keys: &[String],
    ) -> Result<DecryptedName> {
        let author = claimed_author.unwrap_or("anonymous@example.com").to_string();
        match encrypted_name.strip_prefix("enc:") {
            Some(name) => Ok(DecryptedName {
                name: Ok(name.to_string()),
                author: Ok(author),
            }),
            None => Ok(DecryptedName {
                name: Err(InvalidNameError {
                    message: "not an encrypted name".into(),
                    encrypted_name: Some(encrypted_name.to_string()),
                }),
                author: Ok(author),
            }),
        }
    }

    async fn decrypt_node_keys(
        &self,
        crypto: &NodeCryptoDto,
        _parent_keys: &NodeKeys,
        _verification_keys: &[String],
    ) -> Result<DecryptedNodeKeys> {
        Ok(DecryptedNodeKeys {
            keys: NodeKeys {
                passphrase: format!("pass:{}", crypto.node_passphrase),
                private_key: crypto.node_key.clone(),
                passphrase_session_key: "sk".into(),
                content_key_packet_session_key: crypto
                    .content_key_packet
                    .as_ref()
                    .map(|p| format!("sk:{p}")),
                hash_key: crypto.node_hash_key.clone(),
            },
            key_author: Ok(crypto
                .signature_email
                .clone()
                .unwrap_or_else(|| "anonymous@example.com".into())),
        })
    }

    async fn hash_name(&self, name: &str, hash_key: &str) -> Result<String> {
        Ok(format!("h:{hash_key}:{name}"))
    }

    async fn reencrypt_passphrase(
        &self,
        keys: &NodeKeys,
        _new_parent_keys: &NodeKeys,
        _signing_key: &str,
    ) -> Result<ReencryptedPassphrase> {
        Ok(ReencryptedPassphrase {
            encrypted_passphrase: format!("rewrap:{}", keys.passphrase),
            passphrase_signature: "rewrap-sig".into(),
        })
    }

    async fn encrypt_extended_attributes(
        &self,
        attributes_json: &str,
        _node_keys: &NodeKeys,
        _signing_key: &str,
    ) -> Result<String> {
        Ok(format!("xenc:{attributes_json}"))
    }

    async fn decrypt_extended_attributes(
        &self,
        encrypted: &str,
        _node_keys: &NodeKeys,
    ) -> Result<String> {
        encrypted
            .strip_prefix("xenc:")
            .map(str::to_string)
            .ok_or_else(|| Error::Decryption("not encrypted attributes".into()))
    }

    async fn encrypt_block(
        &self,
        data: &[u8],
        _session_key: &str,
        _signing_key: &str,
    ) -> Result<EncryptedBlock> {
        let mut encrypted = vec![0xEE];
        encrypted.extend_from_slice(data);
        Ok(EncryptedBlock {
            hash: format!("bh-{}", encrypted.len()),
            data: encrypted,
            encrypted_signature: "block-sig".into(),
        })
    }

    async fn decrypt_block(&self, data: &[u8], _content_key_packet: &[u8]) -> Result<Vec<u8>> {
        match data.first() {
            Some(0xEE) => Ok(data[1..].to_vec()),
            _ => Err(Error::Decryption("block is garbled".into())),
        }
    }

    async fn sign_manifest(&self, manifest: &[u8], _signing_key: &str) -> Result<String> {
        Ok(format!("manifest-sig:{}", manifest.len()))
    }
}

//─────────────────────────────
//  Shares & account
//─────────────────────────────

pub struct StubShares;

#[async_trait]
impl SharesService for StubShares {
    async fn my_files_ids(&self) -> Result<MyFilesIds> {
        Ok(MyFilesIds {
            volume_id: "vol".into(),
            root_node_id: "root".into(),
        })
    }
    async fn share_private_key(&self, share_id: &str) -> Result<NodeKeys> {
        Ok(NodeKeys {
            passphrase: format!("sharepass:{share_id}"),
            private_key: format!("sharekey:{share_id}"),
            passphrase_session_key: "sk".into(),
            content_key_packet_session_key: None,
            hash_key: Some(format!("sharehash:{share_id}")),
        })
    }
    async fn volume_metric_context(&self, _volume_id: &str) -> Result<String> {
        Ok("own_volume".into())
    }
    async fn is_own_volume(&self, _volume_id: &str) -> Result<bool> {
        Ok(true)
    }
    async fn my_files_member_email_key(&self) -> Result<SigningKey> {
        Ok(SigningKey {
            email: "me@example.com".into(),
            address_key: "address-key".into(),
        })
    }
    async fn context_share_member_email_key(&self, share_id: &str) -> Result<SigningKey> {
        Ok(SigningKey {
            email: format!("member@{share_id}.example.com"),
            address_key: "share-address-key".into(),
        })
    }
}

pub struct StubAccount;

#[async_trait]
impl AccountService for StubAccount {
    async fn verification_keys(&self, _email: &str) -> Result<Vec<String>> {
        Ok(vec!["public-key".into()])
    }
}

//─────────────────────────────
//  DTO builders & stack assembly
//─────────────────────────────

pub fn folder_dto(volume_id: &str, node_id: &str, parent_id: Option<&str>, name: &str) -> NodeDto {
    NodeDto {
        volume_id: volume_id.to_string(),
        node_id: node_id.to_string(),
        parent_id: parent_id.map(str::to_string),
        node_type: 2,
        encrypted_name: format!("enc:{name}"),
        hash: Some(format!("srvhash:{name}")),
        creation_time: 1_700_000_000,
        trash_time: None,
        media_type: None,
        total_storage_size: None,
        share_id: parent_id.is_none().then(|| "share-1".to_string()),
        is_shared: false,
        member_role: Some("admin".into()),
        crypto: NodeCryptoDto {
            node_key: format!("nodekey:{node_id}"),
            node_passphrase: format!("nodepass:{node_id}"),
            node_passphrase_signature: Some("sig".into()),
            node_hash_key: Some(format!("hashkey:{node_id}")),
            content_key_packet: None,
            signature_email: Some("author@example.com".into()),
            name_signature_email: Some("author@example.com".into()),
        },
        active_revision: None,
        folder_extended_attributes: None,
    }
}

/// A committed file with an active revision, as the server reports it
/// after a successful commit.
pub fn committed_file_dto(node_id: &str, parent_id: &str, name: &str) -> NodeDto {
    let mut dto = folder_dto("vol", node_id, Some(parent_id), name);
    dto.node_type = 1;
    dto.crypto.node_hash_key = None;
    dto.crypto.content_key_packet = Some("packet".into());
    dto.active_revision = Some(RevisionDto {
        revision_id: "rev-1".into(),
        state: 1,
        creation_time: 1_700_000_500,
        storage_size: 42,
        extended_attributes: None,
        thumbnails: vec![],
    });
    dto
}

pub fn verification_payload() -> Value {
    serde_json::json!({
        "verificationCode": BASE64.encode([0x11, 0x22, 0x33, 0x44]),
        "contentKeyPacket": BASE64.encode(b"packet"),
    })
}

pub struct UploadStack {
    pub uploader: Uploader,
    pub access: NodeAccess,
    pub cache: NodeCache,
    pub crypto_cache: CryptoCache,
    pub handler: Arc<NodeEventsHandler>,
    pub transport: Arc<MockTransport>,
    pub blocks: Arc<MockBlockTransport>,
}

pub fn upload_stack(
    transport: Arc<MockTransport>,
    blocks: Arc<MockBlockTransport>,
    client_uid: Option<String>,
) -> UploadStack {
    let cache = NodeCache::new(Arc::new(MemoryCache::new()));
    let crypto_cache = CryptoCache::new(Arc::new(MemoryCache::new()));
    let handler = Arc::new(NodeEventsHandler::new(cache.clone(), crypto_cache.clone()));
    let access = NodeAccess::new(
        DriveApi::new(transport.clone()),
        cache.clone(),
        crypto_cache.clone(),
        FakeCrypto::new(),
        Arc::new(StubShares),
        Arc::new(StubAccount),
        Arc::new(NoopTelemetry),
    );
    let uploader = Uploader::new(
        DriveApi::new(transport.clone()),
        access.clone(),
        crypto_cache.clone(),
        FakeCrypto::new(),
        Arc::new(StubShares),
        handler.clone(),
        blocks.clone(),
        Arc::new(NoopTelemetry),
        client_uid,
    );
    UploadStack {
        uploader,
        access,
        cache,
        crypto_cache,
        handler,
        transport,
        blocks,
    }
}
