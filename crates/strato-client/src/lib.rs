#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **strato-client** – Runtime adapter for the Strato sync core.
//!
//! This crate provides the configuration and wiring layer that assembles a
//! working sync core from injected collaborators: it builds the two entity
//! caches from configuration, stands up the event service and the node
//! events handler (attached once, resolver installed), and exposes the
//! read, write, and upload paths behind one [`DriveClient`] value.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use strato_api::{
    AccountService, BlockTransport, CryptoProvider, DriveApi, LatestEventIdProvider,
    SharesService, Telemetry, Transport,
};
use strato_cache_core::EntityCache;
use strato_cache_memory::MemoryCache;
use strato_cache_sled::SledCache;
use strato_events::{EventService, EventSubscription, NodeEventsHandler};
use strato_node_cache::{CryptoCache, NodeCache};
use strato_nodes::{NodeAccess, NodeManagement};
use strato_types::Result;
use strato_upload::Uploader;

//─────────────────────────────
//  Configuration
//─────────────────────────────

/// Backing store of one entity cache.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub enum CacheConfig {
    /// In-memory storage; nothing survives the process.
    #[default]
    Memory,
    /// Sled-backed persistent storage.
    Sled {
        /// Database directory path.
        path: String,
    },
}

/// Configuration of a [`DriveClient`].
///
/// Metadata and key material configure separately so keys can live in a
/// different (possibly better protected) store than plain metadata.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClientConfig {
    /// Backing store of the node metadata cache.
    pub cache: CacheConfig,
    /// Backing store of the key-material cache.
    pub crypto_cache: CacheConfig,
    /// Stable client identifier, used to recognize the caller's own
    /// drafts during upload conflicts.
    pub client_uid: Option<String>,
}

/// External services the sync core consumes, supplied by the embedding
/// application.
#[derive(Clone)]
pub struct Collaborators {
    /// JSON transport to the drive endpoints.
    pub transport: Arc<dyn Transport>,
    /// Binary block upload transport.
    pub block_transport: Arc<dyn BlockTransport>,
    /// Cryptographic primitives.
    pub crypto: Arc<dyn CryptoProvider>,
    /// Share membership and key resolution.
    pub shares: Arc<dyn SharesService>,
    /// Email to verification-key resolution.
    pub account: Arc<dyn AccountService>,
    /// Product metric sink.
    pub telemetry: Arc<dyn Telemetry>,
    /// Optional event-id resumption across restarts.
    pub latest_event_id_provider: Option<Arc<dyn LatestEventIdProvider>>,
}

//─────────────────────────────
//  Client
//─────────────────────────────

/// A fully wired sync core instance.
pub struct DriveClient {
    access: NodeAccess,
    management: NodeManagement,
    uploader: Uploader,
    events: Arc<EventService>,
    handler: Arc<NodeEventsHandler>,
    node_cache: NodeCache,
    crypto_cache: CryptoCache,
}

impl DriveClient {
    /// Build a client from configuration and collaborators.
    pub fn new(config: ClientConfig, collaborators: Collaborators) -> Result<Self> {
        info!(?config.cache, ?config.crypto_cache, "initializing drive client");

        let node_cache = NodeCache::new(Self::create_cache(&config.cache)?);
        let crypto_cache = CryptoCache::new(Self::create_cache(&config.crypto_cache)?);
        let api = DriveApi::new(collaborators.transport.clone());

        let handler = Arc::new(NodeEventsHandler::new(
            node_cache.clone(),
            crypto_cache.clone(),
        ));
        let events = Arc::new(EventService::new(
            api.clone(),
            collaborators.shares.clone(),
            collaborators.telemetry.clone(),
            collaborators.latest_event_id_provider.clone(),
        ));

        let access = NodeAccess::new(
            api.clone(),
            node_cache.clone(),
            crypto_cache.clone(),
            collaborators.crypto.clone(),
            collaborators.shares.clone(),
            collaborators.account.clone(),
            collaborators.telemetry.clone(),
        );
        handler.set_resolver(Arc::new(access.clone()));

        let management = NodeManagement::new(
            access.clone(),
            api.clone(),
            node_cache.clone(),
            crypto_cache.clone(),
            collaborators.crypto.clone(),
            collaborators.shares.clone(),
            handler.clone(),
        );
        let uploader = Uploader::new(
            api,
            access.clone(),
            crypto_cache.clone(),
            collaborators.crypto,
            collaborators.shares,
            handler.clone(),
            collaborators.block_transport,
            collaborators.telemetry,
            config.client_uid,
        );

        debug!("drive client wired");
        Ok(Self {
            access,
            management,
            uploader,
            events,
            handler,
            node_cache,
            crypto_cache,
        })
    }

    fn create_cache(config: &CacheConfig) -> Result<Arc<dyn EntityCache>> {
        match config {
            CacheConfig::Memory => {
                debug!("creating in-memory entity cache");
                Ok(Arc::new(MemoryCache::new()))
            }
            CacheConfig::Sled { path } => {
                debug!(path, "creating sled entity cache");
                Ok(Arc::new(SledCache::open(path)?))
            }
        }
    }

    /// The read path.
    pub fn access(&self) -> &NodeAccess {
        &self.access
    }

    /// The write path.
    pub fn management(&self) -> &NodeManagement {
        &self.management
    }

    /// The upload path.
    pub fn uploader(&self) -> &Uploader {
        &self.uploader
    }

    /// The event service, for raw per-scope subscriptions.
    pub fn events(&self) -> &Arc<EventService> {
        &self.events
    }

    /// The node events handler, for filtered node-change subscriptions.
    pub fn node_events(&self) -> &Arc<NodeEventsHandler> {
        &self.handler
    }

    /// The node metadata cache (mostly useful to tests and tooling).
    pub fn node_cache(&self) -> &NodeCache {
        &self.node_cache
    }

    /// The key-material cache (mostly useful to tests and tooling).
    pub fn crypto_cache(&self) -> &CryptoCache {
        &self.crypto_cache
    }

    /// Start syncing a volume: the cache-updating handler subscribes to
    /// the volume's event stream.
    pub async fn start_volume_sync(&self, volume_id: &str) -> Result<EventSubscription> {
        self.events
            .subscribe_to_tree_events(volume_id, self.handler.clone())
            .await
    }

    /// Start syncing the account-level core scope.
    pub async fn start_core_sync(&self) -> Result<EventSubscription> {
        self.events
            .subscribe_to_core_events(self.handler.clone())
            .await
    }

    /// Stop every polling loop, awaiting in-flight iterations.
    pub async fn shutdown(&self) {
        info!("shutting down drive client");
        self.events.stop_all().await;
    }
}
