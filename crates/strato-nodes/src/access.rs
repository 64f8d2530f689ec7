//! Cache-first node reads and staleness-respecting iteration.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use strato_api::dto::NodeDto;
use strato_api::{AccountService, CryptoProvider, DriveApi, SharesService, Telemetry};
use strato_events::NodeResolver;
use strato_node_cache::{CryptoCache, NodeCache};
use strato_tools::{group_by, try_map_bounded, DEFAULT_CONCURRENCY};
use strato_types::{Error, Node, NodeKeys, NodeUid, Result};

use crate::decrypt::NodeDecryptor;

/// Number of stale or missing uids accumulated before a batched refetch.
pub const BATCH_LOADING: usize = 10;

/// Channel capacity between an iterator's producer task and its consumer.
const ITERATOR_BUFFER: usize = 16;

/// A pull-based, cancellable sequence of nodes.
///
/// Produced by the iteration entry points of [`NodeAccess`]; the producer
/// runs on its own task and stops when the stream is dropped or the
/// cancellation token fires.
pub struct NodeStream {
    rx: mpsc::Receiver<Result<Node>>,
}

impl NodeStream {
    /// Next node, or `None` when the sequence is exhausted.
    pub async fn next(&mut self) -> Option<Result<Node>> {
        self.rx.recv().await
    }

    /// Drain the sequence, failing on the first error.
    pub async fn try_collect(mut self) -> Result<Vec<Node>> {
        let mut nodes = Vec::new();
        while let Some(item) = self.next().await {
            nodes.push(item?);
        }
        Ok(nodes)
    }
}

struct AccessInner {
    api: DriveApi,
    cache: NodeCache,
    crypto_cache: CryptoCache,
    decryptor: NodeDecryptor,
    shares: Arc<dyn SharesService>,
}

/// The read path: cache, staleness, fetch, decrypt, write back.
#[derive(Clone)]
pub struct NodeAccess {
    inner: Arc<AccessInner>,
}

impl NodeAccess {
    /// Assemble the read path from its collaborators.
    pub fn new(
        api: DriveApi,
        cache: NodeCache,
        crypto_cache: CryptoCache,
        crypto: Arc<dyn CryptoProvider>,
        shares: Arc<dyn SharesService>,
        account: Arc<dyn AccountService>,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        Self {
            inner: Arc::new(AccessInner {
                api,
                cache,
                crypto_cache,
                decryptor: NodeDecryptor::new(crypto, account, telemetry),
                shares,
            }),
        }
    }

    /// Fetch a node, serving fresh cache hits without touching the network.
    pub async fn get_node(&self, uid: &NodeUid, cancel: &CancellationToken) -> Result<Node> {
        match self.inner.cache.get_node(uid).await {
            Ok(node) if !node.is_stale => return Ok(node),
            Ok(_) | Err(Error::NotFound(_)) | Err(Error::CorruptedEntity(_)) => {}
            Err(error) => return Err(error),
        }
        self.fetch_node(uid, cancel).await
    }

    /// Force-refetch and decrypt nodes, bypassing the cache read but still
    /// writing back. Results come in input order; a uid the server does not
    /// return fails the call.
    pub async fn load_nodes(
        &self,
        uids: &[NodeUid],
        cancel: &CancellationToken,
    ) -> Result<Vec<Node>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        let mut by_uid: HashMap<NodeUid, Node> = HashMap::new();
        for (volume_id, group) in group_by(uids.iter().cloned(), |u| u.volume_id().to_string()) {
            let ids: Vec<String> = group.iter().map(|u| u.node_id().to_string()).collect();
            let dtos = self.inner.api.nodes(&volume_id, &ids, cancel).await?;
            let nodes = try_map_bounded(dtos, DEFAULT_CONCURRENCY, |dto| {
                let access = self.clone();
                let cancel = cancel.clone();
                async move { access.decrypt_and_store(&dto, &cancel).await }
            })
            .await?;
            for node in nodes {
                by_uid.insert(node.uid.clone(), node);
            }
        }
        uids.iter()
            .map(|uid| {
                by_uid.get(uid).cloned().ok_or_else(|| {
                    Error::NotFound(format!("node {uid} was not returned by the server"))
                })
            })
            .collect()
    }

    /// Iterate a folder's children with the completeness protocol.
    ///
    /// With the listing-complete marker set, cached children stream out
    /// directly and stale rows divert into the batch loader. Otherwise the
    /// child uids come from the API, fresh cache hits short-circuit, and the
    /// marker is set once the stream ends.
    pub async fn iterate_children(
        &self,
        parent_uid: &NodeUid,
        cancel: &CancellationToken,
    ) -> Result<NodeStream> {
        let listing_complete = self
            .inner
            .cache
            .is_folder_children_loaded(parent_uid)
            .await?;
        let access = self.clone();
        let parent_uid = parent_uid.clone();
        Ok(spawn_producer(cancel, move |tx, cancel| async move {
            if listing_complete {
                debug!(parent = %parent_uid, "listing children from complete cache");
                access.stream_cached_children(&parent_uid, &cancel, &tx).await
            } else {
                access.stream_remote_children(&parent_uid, &cancel, &tx).await
            }
        }))
    }

    /// Iterate the trashed nodes of the caller's own volume.
    pub async fn iterate_trashed_nodes(&self, cancel: &CancellationToken) -> Result<NodeStream> {
        let my_files = self.inner.shares.my_files_ids().await?;
        let access = self.clone();
        Ok(spawn_producer(cancel, move |tx, cancel| async move {
            let ids = access
                .inner
                .api
                .trashed_node_ids(&my_files.volume_id, &cancel)
                .await?;
            let mut batch = BatchSender::new(access.clone(), cancel.clone(), tx.clone());
            for id in ids {
                bail_if_cancelled(&cancel)?;
                let uid = NodeUid::new(&my_files.volume_id, &id)?;
                access.yield_cached_or_batch(uid, &tx, &mut batch).await?;
            }
            batch.flush().await
        }))
    }

    /// Iterate arbitrary uids, cache-first, batching misses and stale rows.
    ///
    /// Yields exactly one result per input uid.
    pub async fn iterate_nodes(
        &self,
        uids: &[NodeUid],
        cancel: &CancellationToken,
    ) -> Result<NodeStream> {
        let access = self.clone();
        let uids = uids.to_vec();
        Ok(spawn_producer(cancel, move |tx, cancel| async move {
            let mut batch = BatchSender::new(access.clone(), cancel.clone(), tx.clone());
            let mut lookups = access.inner.cache.iterate_nodes(&uids).await?;
            while let Some(lookup) = lookups.next().await {
                bail_if_cancelled(&cancel)?;
                match lookup.node {
                    Ok(node) if !node.is_stale => forward(&tx, node).await?,
                    Ok(_) | Err(Error::NotFound(_)) | Err(Error::CorruptedEntity(_)) => {
                        batch.push(lookup.uid).await?;
                    }
                    Err(error) => return Err(error),
                }
            }
            batch.flush().await
        }))
    }

    /// Key material for a node, loading the node when the crypto cache
    /// cannot serve it.
    pub fn get_node_keys<'a>(
        &'a self,
        uid: &'a NodeUid,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<NodeKeys>> {
        // Boxed: key resolution recurses through ancestors.
        Box::pin(async move {
            match self.inner.crypto_cache.get_node_keys(uid).await {
                Ok(keys) => return Ok(keys),
                Err(Error::NotFound(_)) | Err(Error::CorruptedKeys(_)) => {}
                Err(error) => return Err(error),
            }
            self.fetch_node(uid, cancel).await?;
            self.inner.crypto_cache.get_node_keys(uid).await
        })
    }

    /// Keys used to decrypt a node: the parent's keys, or the share root
    /// key when the node is a volume root.
    pub async fn get_parent_keys(
        &self,
        node: &Node,
        cancel: &CancellationToken,
    ) -> Result<NodeKeys> {
        match &node.parent_uid {
            Some(parent_uid) => self.get_node_keys(parent_uid, cancel).await,
            None => {
                let share_id = node.share_id.as_ref().ok_or_else(|| {
                    Error::validation(format!("root node {} has no share", node.uid))
                })?;
                self.inner.shares.share_private_key(share_id).await
            }
        }
    }

    //─────────────────────────────
    //  Internals
    //─────────────────────────────

    async fn fetch_node(&self, uid: &NodeUid, cancel: &CancellationToken) -> Result<Node> {
        let dto = self.inner.api.node(uid, cancel).await?;
        self.decrypt_and_store(&dto, cancel).await
    }

    async fn decrypt_and_store(&self, dto: &NodeDto, cancel: &CancellationToken) -> Result<Node> {
        let parent_keys = self.parent_keys_for_dto(dto, cancel).await?;
        let (node, keys) = self.inner.decryptor.decrypt_node(dto, &parent_keys).await?;
        self.inner.cache.set_node(&node).await?;
        self.inner.crypto_cache.set_node_keys(&node.uid, &keys).await?;
        Ok(node)
    }

    async fn parent_keys_for_dto(
        &self,
        dto: &NodeDto,
        cancel: &CancellationToken,
    ) -> Result<NodeKeys> {
        match &dto.parent_id {
            Some(parent_id) => {
                let parent_uid = NodeUid::new(&dto.volume_id, parent_id)?;
                self.get_node_keys(&parent_uid, cancel).await
            }
            None => {
                let share_id = dto.share_id.as_ref().ok_or_else(|| {
                    Error::validation(format!(
                        "root node {} has no share to take keys from",
                        dto.node_id
                    ))
                })?;
                self.inner.shares.share_private_key(share_id).await
            }
        }
    }

    async fn yield_cached_or_batch(
        &self,
        uid: NodeUid,
        tx: &mpsc::Sender<Result<Node>>,
        batch: &mut BatchSender,
    ) -> Result<()> {
        match self.inner.cache.get_node(&uid).await {
            Ok(node) if !node.is_stale => forward(tx, node).await,
            Ok(_) | Err(Error::NotFound(_)) | Err(Error::CorruptedEntity(_)) => {
                batch.push(uid).await
            }
            Err(error) => Err(error),
        }
    }

    async fn stream_cached_children(
        &self,
        parent_uid: &NodeUid,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<Result<Node>>,
    ) -> Result<()> {
        let mut batch = BatchSender::new(self.clone(), cancel.clone(), tx.clone());
        let mut seen = HashSet::new();
        let mut children = self.inner.cache.iterate_children(parent_uid).await?;
        while let Some(item) = children.next().await {
            bail_if_cancelled(cancel)?;
            let node = item?;
            if !seen.insert(node.uid.clone()) {
                continue;
            }
            if node.is_stale {
                batch.push(node.uid).await?;
            } else {
                forward(tx, node).await?;
            }
        }
        batch.flush().await
    }

    async fn stream_remote_children(
        &self,
        parent_uid: &NodeUid,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<Result<Node>>,
    ) -> Result<()> {
        let ids = self.inner.api.child_node_ids(parent_uid, cancel).await?;
        let mut batch = BatchSender::new(self.clone(), cancel.clone(), tx.clone());
        let mut seen = HashSet::new();
        for id in ids {
            bail_if_cancelled(cancel)?;
            let uid = NodeUid::new(parent_uid.volume_id(), &id)?;
            if !seen.insert(uid.clone()) {
                continue;
            }
            self.yield_cached_or_batch(uid, tx, &mut batch).await?;
        }
        batch.flush().await?;
        self.inner
            .cache
            .set_folder_children_loaded(parent_uid)
            .await
    }
}

#[async_trait]
impl NodeResolver for NodeAccess {
    async fn resolve_node(&self, uid: &NodeUid) -> Result<Node> {
        self.get_node(uid, &CancellationToken::new()).await
    }
}

fn bail_if_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::Aborted)
    } else {
        Ok(())
    }
}

async fn forward(tx: &mpsc::Sender<Result<Node>>, node: Node) -> Result<()> {
    // A dropped receiver means the consumer is gone; stop producing.
    tx.send(Ok(node)).await.map_err(|_| Error::Aborted)
}

fn spawn_producer<F, Fut>(cancel: &CancellationToken, producer: F) -> NodeStream
where
    F: FnOnce(mpsc::Sender<Result<Node>>, CancellationToken) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(ITERATOR_BUFFER);
    let cancel = cancel.clone();
    tokio::spawn(async move {
        if let Err(error) = producer(tx.clone(), cancel).await {
            let _ = tx.send(Err(error)).await;
        }
    });
    NodeStream { rx }
}

/// Accumulates uids that need a refetch and flushes them through
/// [`NodeAccess::load_nodes`] in batches of [`BATCH_LOADING`].
struct BatchSender {
    access: NodeAccess,
    cancel: CancellationToken,
    tx: mpsc::Sender<Result<Node>>,
    pending: Vec<NodeUid>,
}

impl BatchSender {
    fn new(
        access: NodeAccess,
        cancel: CancellationToken,
        tx: mpsc::Sender<Result<Node>>,
    ) -> Self {
        Self {
            access,
            cancel,
            tx,
            pending: Vec::with_capacity(BATCH_LOADING),
        }
    }

    async fn push(&mut self, uid: NodeUid) -> Result<()> {
        self.pending.push(uid);
        if self.pending.len() >= BATCH_LOADING {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let uids = std::mem::take(&mut self.pending);
        let nodes = self.access.load_nodes(&uids, &self.cancel).await?;
        for node in nodes {
            forward(&self.tx, node).await?;
        }
        Ok(())
    }
}
