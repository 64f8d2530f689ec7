//! Shared fixtures for the Strato integration suite.
//!
//! The centerpiece is [`MockDriveServer`]: a stateful, in-memory rendition
//! of the drive endpoints backing one volume, mutable from tests so
//! scenarios can move the server-side truth out from under the client.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use strato_api::dto::{NodeCryptoDto, NodeDto};
use strato_api::{
    AccountService, BlockTransport, CryptoProvider, DecryptedName, DecryptedNodeKeys,
    EncryptedBlock, EncryptedName, GeneratedContentKey, GeneratedHashKey, GeneratedNodeKey,
    MyFilesIds, NoopTelemetry, ReencryptedPassphrase, SharesService, SigningKey, Transport,
};
use strato_client::{ClientConfig, Collaborators, DriveClient};
use strato_types::{Error, InvalidNameError, NodeKeys, Result};

/// The single volume every fixture lives in.
pub const VOLUME_ID: &str = "vol";

//─────────────────────────────
//  Stateful drive server
//─────────────────────────────

#[derive(Default)]
struct ServerState {
    nodes: HashMap<String, NodeDto>,
    events: Vec<Value>,
    latest_event_id: u64,
    refresh: bool,
}

/// In-memory drive server over one volume.
pub struct MockDriveServer {
    state: Mutex<ServerState>,
    calls: Mutex<Vec<(String, String)>>,
}

impl MockDriveServer {
    /// A server seeded with the volume root.
    pub fn new() -> Arc<Self> {
        let server = Arc::new(Self {
            state: Mutex::new(ServerState::default()),
            calls: Mutex::new(Vec::new()),
        });
        server.insert_node(folder_dto("root", None, "root"));
        server
    }

    pub fn insert_folder(&self, node_id: &str, parent_id: &str, name: &str) {
        self.insert_node(folder_dto(node_id, Some(parent_id), name));
    }

    pub fn insert_file(&self, node_id: &str, parent_id: &str, name: &str) {
        self.insert_node(file_dto(node_id, parent_id, name));
    }

    fn insert_node(&self, dto: NodeDto) {
        self.state
            .lock()
            .unwrap()
            .nodes
            .insert(dto.node_id.clone(), dto);
    }

    pub fn rename(&self, node_id: &str, name: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(dto) = state.nodes.get_mut(node_id) {
            dto.encrypted_name = format!("enc:{name}");
            dto.hash = Some(format!("srvhash:{name}"));
        }
    }

    pub fn set_parent(&self, node_id: &str, parent_id: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(dto) = state.nodes.get_mut(node_id) {
            dto.parent_id = Some(parent_id.to_string());
        }
    }

    pub fn remove(&self, node_id: &str) {
        self.state.lock().unwrap().nodes.remove(node_id);
    }

    /// Queue one volume event: 0 = delete, 1 = create, 2 = update.
    pub fn push_event(&self, event_type: u8, node_id: &str) {
        let mut state = self.state.lock().unwrap();
        state.latest_event_id += 1;
        let node = state.nodes.get(node_id);
        let event = json!({
            "eventId": state.latest_event_id.to_string(),
            "type": event_type,
            "node": {
                "nodeId": node_id,
                "parentId": node.and_then(|n| n.parent_id.clone()),
                "isTrashed": node.map(|n| n.trash_time.is_some()).unwrap_or(false),
                "isShared": false,
            },
        });
        state.events.push(event);
    }

    /// Ask the client for a full refresh on the next poll.
    pub fn push_refresh(&self) {
        let mut state = self.state.lock().unwrap();
        state.latest_event_id += 1;
        state.refresh = true;
    }

    pub fn calls_matching(&self, method: &str, fragment: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, p)| m == method && p.contains(fragment))
            .count()
    }

    fn record(&self, method: &str, path: &str) {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), path.to_string()));
    }

    fn node_json(&self, node_id: &str) -> Result<Value> {
        self.state
            .lock()
            .unwrap()
            .nodes
            .get(node_id)
            .map(|dto| serde_json::to_value(dto).expect("dto serializes"))
            .ok_or_else(|| Error::NotFound(format!("node {node_id}")))
    }

    fn children_of(&self, parent_id: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut ids: Vec<String> = state
            .nodes
            .values()
            .filter(|dto| dto.parent_id.as_deref() == Some(parent_id))
            .filter(|dto| dto.trash_time.is_none())
            .map(|dto| dto.node_id.clone())
            .collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl Transport for MockDriveServer {
    async fn get(&self, path: &str, _cancel: &CancellationToken) -> Result<Value> {
        self.record("GET", path);
        let segments: Vec<&str> = path.split('/').collect();
        match segments.as_slice() {
            ["drive", "volumes", VOLUME_ID, "nodes", node_id] => self.node_json(node_id),
            ["drive", "volumes", VOLUME_ID, "folders", parent_id, "children"] => {
                Ok(json!({"nodeIds": self.children_of(parent_id), "more": false}))
            }
            ["drive", "volumes", VOLUME_ID, "trash"] => {
                let state = self.state.lock().unwrap();
                let ids: Vec<String> = state
                    .nodes
                    .values()
                    .filter(|dto| dto.trash_time.is_some())
                    .map(|dto| dto.node_id.clone())
                    .collect();
                Ok(json!({"nodeIds": ids, "more": false}))
            }
            ["drive", "volumes", VOLUME_ID, "events", "latest"] => {
                let state = self.state.lock().unwrap();
                Ok(json!({"eventId": state.latest_event_id.to_string()}))
            }
            ["drive", "volumes", VOLUME_ID, "events", _since] => {
                let mut state = self.state.lock().unwrap();
                let refresh = std::mem::take(&mut state.refresh);
                let events = std::mem::take(&mut state.events);
                Ok(json!({
                    "latestEventId": state.latest_event_id.to_string(),
                    "more": false,
                    "refresh": refresh,
                    "events": if refresh { vec![] } else { events },
                }))
            }
            _ => Err(Error::NotFound(format!("no GET route for {path}"))),
        }
    }

    async fn post(&self, path: &str, body: Value, _cancel: &CancellationToken) -> Result<Value> {
        self.record("POST", path);
        let segments: Vec<&str> = path.split('/').collect();
        match segments.as_slice() {
            ["drive", "volumes", VOLUME_ID, "nodes", "fetch"] => {
                let ids: Vec<String> = body
                    .get("nodeIds")
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
                    .unwrap_or_default();
                let nodes: Result<Vec<Value>> =
                    ids.iter().map(|id| self.node_json(id)).collect();
                Ok(json!({"nodes": nodes?}))
            }
            _ => Err(Error::NotFound(format!("no POST route for {path}"))),
        }
    }

    async fn put(&self, path: &str, _body: Value, _cancel: &CancellationToken) -> Result<Value> {
        self.record("PUT", path);
        Err(Error::NotFound(format!("no PUT route for {path}")))
    }

    async fn delete(&self, path: &str, _cancel: &CancellationToken) -> Result<Value> {
        self.record("DELETE", path);
        Err(Error::NotFound(format!("no DELETE route for {path}")))
    }
}

//─────────────────────────────
//  DTO builders
//─────────────────────────────

fn base_crypto(node_id: &str) -> NodeCryptoDto {
    NodeCryptoDto {
        node_key: format!("nodekey:{node_id}"),
        node_passphrase: format!("nodepass:{node_id}"),
        node_passphrase_signature: Some("sig".into()),
        node_hash_key: None,
        content_key_packet: None,
        signature_email: Some("author@example.com".into()),
        name_signature_email: Some("author@example.com".into()),
    }
}

pub fn folder_dto(node_id: &str, parent_id: Option<&str>, name: &str) -> NodeDto {
    let mut crypto = base_crypto(node_id);
    crypto.node_hash_key = Some(format!("hashkey:{node_id}"));
    NodeDto {
        volume_id: VOLUME_ID.to_string(),
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
        crypto,
        active_revision: None,
        folder_extended_attributes: None,
    }
}

pub fn file_dto(node_id: &str, parent_id: &str, name: &str) -> NodeDto {
    let mut dto = folder_dto(node_id, Some(parent_id), name);
    dto.node_type = 1;
    dto.crypto.node_hash_key = None;
    dto
}

//─────────────────────────────
//  Collaborator stubs
//─────────────────────────────

pub struct FakeCrypto;

#[async_trait]
impl CryptoProvider for FakeCrypto {
    async fn generate_node_key(&self, _: &NodeKeys, _: &str) -> Result<GeneratedNodeKey> {
        Ok(GeneratedNodeKey {
            keys: NodeKeys {
                passphrase: "pass".into(),
                private_key: "key".into(),
                passphrase_session_key: "sk".into(),
                content_key_packet_session_key: None,
                hash_key: None,
            },
            encrypted_passphrase: "enc-pass".into(),
            passphrase_signature: "pass-sig".into(),
        })
    }
    async fn generate_hash_key(&self, _: &NodeKeys) -> Result<GeneratedHashKey> {
        Ok(GeneratedHashKey {
            hash_key: "hashkey".into(),
            encrypted_hash_key: "enc-hashkey".into(),
        })
    }
    async fn generate_content_key(&self, _: &NodeKeys) -> Result<GeneratedContentKey> {
        Ok(GeneratedContentKey {
            session_key: "session".into(),
            content_key_packet: "packet".into(),
            content_key_signature: "packet-sig".into(),
        })
    }
    async fn encrypt_name(&self, name: &str, _: &NodeKeys, _: &str) -> Result<EncryptedName> {
        Ok(EncryptedName {
            armored: format!("enc:{name}"),
        })
    }
    async fn decrypt_name(
        &self,
        encrypted_name: &str,
        claimed_author: Option<&str>,
        _: &NodeKeys,
        _: &[String],
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
        _: &NodeKeys,
        _: &[String],
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
            key_author: Ok("author@example.com".into()),
        })
    }
    async fn hash_name(&self, name: &str, hash_key: &str) -> Result<String> {
        Ok(format!("h:{hash_key}:{name}"))
    }
    async fn reencrypt_passphrase(
        &self,
        keys: &NodeKeys,
        _: &NodeKeys,
        _: &str,
    ) -> Result<ReencryptedPassphrase> {
        Ok(ReencryptedPassphrase {
            encrypted_passphrase: format!("rewrap:{}", keys.passphrase),
            passphrase_signature: "rewrap-sig".into(),
        })
    }
    async fn encrypt_extended_attributes(
        &self,
        attributes_json: &str,
        _: &NodeKeys,
        _: &str,
    ) -> Result<String> {
        Ok(format!("xenc:{attributes_json}"))
    }
    async fn decrypt_extended_attributes(&self, encrypted: &str, _: &NodeKeys) -> Result<String> {
        encrypted
            .strip_prefix("xenc:")
            .map(str::to_string)
            .ok_or_else(|| Error::Decryption("not encrypted attributes".into()))
    }
    async fn encrypt_block(&self, data: &[u8], _: &str, _: &str) -> Result<EncryptedBlock> {
        let mut encrypted = vec![0xEE];
        encrypted.extend_from_slice(data);
        Ok(EncryptedBlock {
            hash: format!("bh-{}", encrypted.len()),
            data: encrypted,
            encrypted_signature: "block-sig".into(),
        })
    }
    async fn decrypt_block(&self, data: &[u8], _: &[u8]) -> Result<Vec<u8>> {
        match data.first() {
            Some(0xEE) => Ok(data[1..].to_vec()),
            _ => Err(Error::Decryption("block is garbled".into())),
        }
    }
    async fn sign_manifest(&self, manifest: &[u8], _: &str) -> Result<String> {
        Ok(format!("manifest-sig:{}", manifest.len()))
    }
}

pub struct StubShares;

#[async_trait]
impl SharesService for StubShares {
    async fn my_files_ids(&self) -> Result<MyFilesIds> {
        Ok(MyFilesIds {
            volume_id: VOLUME_ID.into(),
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
    async fn volume_metric_context(&self, _: &str) -> Result<String> {
        Ok("own_volume".into())
    }
    async fn is_own_volume(&self, _: &str) -> Result<bool> {
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
    async fn verification_keys(&self, _: &str) -> Result<Vec<String>> {
        Ok(vec!["public-key".into()])
    }
}

pub struct QuietBlocks;

#[async_trait]
impl BlockTransport for QuietBlocks {
    async fn upload_block(
        &self,
        _: &str,
        _: &str,
        _: &[u8],
        _: &CancellationToken,
    ) -> Result<()> {
        Ok(())
    }
}

//─────────────────────────────
//  Environment assembly
//─────────────────────────────

/// Route test output through tracing; safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A client over a mock server, everything in memory.
pub struct TestEnvironment {
    pub server: Arc<MockDriveServer>,
    pub client: DriveClient,
}

impl TestEnvironment {
    pub fn new() -> Self {
        init_tracing();
        let server = MockDriveServer::new();
        let client = DriveClient::new(
            ClientConfig::default(),
            Collaborators {
                transport: server.clone(),
                block_transport: Arc::new(QuietBlocks),
                crypto: Arc::new(FakeCrypto),
                shares: Arc::new(StubShares),
                account: Arc::new(StubAccount),
                telemetry: Arc::new(NoopTelemetry),
                latest_event_id_provider: None,
            },
        )
        .expect("client wires");
        Self { server, client }
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll an async condition until it holds, with a generous virtual-time
/// budget.
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..2_000 {
        if condition().await {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    panic!("condition did not hold within the wait budget");
}
