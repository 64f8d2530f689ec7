//! Cache-updating event consumer and node-change fan-out.
//!
//! The handler is attached once to the event service and is the only event
//! listener that mutates the caches. Downstream SDK subscribers register a
//! predicate on `{parent_uid, is_trashed, is_shared}` and receive
//! [`NodeChange`]s; raw events are available to any other listener attached
//! to the same managers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use strato_node_cache::{CryptoCache, NodeCache};
use strato_types::{DriveEvent, Error, EventScope, Node, NodeUid, Result};

use crate::manager::EventListener;

/// Fresh-node lookup used for update dispatch.
///
/// Implemented by the node access layer; a trait here keeps the event crate
/// below the access crate in the graph.
#[async_trait]
pub trait NodeResolver: Send + Sync {
    /// Fetch the current state of a node, cache-first.
    async fn resolve_node(&self, uid: &NodeUid) -> Result<Node>;
}

/// Predicate selecting which node changes a subscriber wants.
///
/// Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct NodeEventFilter {
    /// Only nodes under this parent.
    pub parent_uid: Option<NodeUid>,
    /// Only nodes with this trash state.
    pub is_trashed: Option<bool>,
    /// Only nodes with this sharing state.
    pub is_shared: Option<bool>,
}

impl NodeEventFilter {
    fn matches(&self, node: &Node) -> bool {
        if let Some(parent_uid) = &self.parent_uid {
            if node.parent_uid.as_ref() != Some(parent_uid) {
                return false;
            }
        }
        if let Some(is_trashed) = self.is_trashed {
            if node.is_trashed() != is_trashed {
                return false;
            }
        }
        if let Some(is_shared) = self.is_shared {
            if node.is_shared != is_shared {
                return false;
            }
        }
        true
    }
}

/// A node change delivered to SDK subscribers.
#[derive(Debug, Clone)]
pub enum NodeChange {
    /// The node exists and its current state is attached.
    Updated {
        /// The changed node.
        uid: NodeUid,
        /// Fresh state of the node.
        node: Box<Node>,
    },
    /// The node is gone.
    Removed {
        /// The removed node.
        uid: NodeUid,
    },
}

/// Subscriber callback. Must not block; heavy work belongs on the
/// subscriber's own tasks.
pub type NodeChangeCallback = Arc<dyn Fn(&NodeChange) + Send + Sync>;

struct Subscriber {
    id: u64,
    filter: NodeEventFilter,
    callback: NodeChangeCallback,
}

type SubscriberList = StdMutex<Vec<Subscriber>>;

/// Handle to a node-change subscriber registration.
pub struct NodeChangeSubscription {
    subscribers: Weak<SubscriberList>,
    id: u64,
}

impl NodeChangeSubscription {
    /// Remove the subscriber.
    pub fn dispose(&self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers
                .lock()
                .expect("subscriber list poisoned")
                .retain(|s| s.id != self.id);
        }
    }
}

/// Consumes scope events and keeps the caches honest.
pub struct NodeEventsHandler {
    cache: NodeCache,
    crypto_cache: CryptoCache,
    resolver: StdMutex<Option<Arc<dyn NodeResolver>>>,
    subscribers: Arc<SubscriberList>,
    next_subscriber_id: AtomicU64,
}

impl NodeEventsHandler {
    /// Build a handler over the two caches.
    pub fn new(cache: NodeCache, crypto_cache: CryptoCache) -> Self {
        Self {
            cache,
            crypto_cache,
            resolver: StdMutex::new(None),
            subscribers: Arc::new(StdMutex::new(Vec::new())),
            next_subscriber_id: AtomicU64::new(0),
        }
    }

    /// Install the fresh-node resolver (the node access layer).
    pub fn set_resolver(&self, resolver: Arc<dyn NodeResolver>) {
        *self.resolver.lock().expect("resolver slot poisoned") = Some(resolver);
    }

    /// Register a node-change subscriber.
    pub fn subscribe(
        &self,
        filter: NodeEventFilter,
        callback: NodeChangeCallback,
    ) -> NodeChangeSubscription {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .expect("subscriber list poisoned")
            .push(Subscriber {
                id,
                filter,
                callback,
            });
        NodeChangeSubscription {
            subscribers: Arc::downgrade(&self.subscribers),
            id,
        }
    }

    /// Notify subscribers about a locally created node and invalidate the
    /// parent's listing marker.
    pub async fn notify_node_created(&self, node: &Node) -> Result<()> {
        if let Some(parent_uid) = &node.parent_uid {
            self.cache.reset_folder_children_loaded(parent_uid).await?;
        }
        self.dispatch_node(node);
        Ok(())
    }

    /// Notify subscribers about a locally updated node.
    pub fn notify_node_updated(&self, node: &Node) {
        self.dispatch_node(node);
    }

    fn dispatch_node(&self, node: &Node) {
        let change = NodeChange::Updated {
            uid: node.uid.clone(),
            node: Box::new(node.clone()),
        };
        let subscribers = self.subscribers.lock().expect("subscriber list poisoned");
        for subscriber in subscribers.iter() {
            if subscriber.filter.matches(node) {
                (subscriber.callback)(&change);
            }
        }
    }

    fn dispatch_removed(&self, uid: &NodeUid, last_known: Option<&Node>) {
        let change = NodeChange::Removed { uid: uid.clone() };
        let subscribers = self.subscribers.lock().expect("subscriber list poisoned");
        for subscriber in subscribers.iter() {
            // Without a last-cached copy the predicate cannot be evaluated;
            // deliver rather than drop.
            let matches = last_known
                .map(|node| subscriber.filter.matches(node))
                .unwrap_or(true);
            if matches {
                (subscriber.callback)(&change);
            }
        }
    }

    async fn dispatch_update_for(&self, uid: &NodeUid) {
        let resolver = self
            .resolver
            .lock()
            .expect("resolver slot poisoned")
            .clone();
        let Some(resolver) = resolver else {
            debug!(%uid, "no node resolver installed, skipping update dispatch");
            return;
        };
        if self
            .subscribers
            .lock()
            .expect("subscriber list poisoned")
            .is_empty()
        {
            return;
        }
        match resolver.resolve_node(uid).await {
            Ok(node) => self.dispatch_node(&node),
            Err(error) => {
                warn!(%uid, %error, "could not resolve updated node for subscribers");
            }
        }
    }

    async fn apply(&self, event: &DriveEvent) -> Result<()> {
        match event {
            // The event payload is encrypted at source and needs parent
            // keys, so the node is not cached here; the next listing of the
            // parent refetches it.
            DriveEvent::NodeCreated { parent_uid, .. } => {
                if let Some(parent_uid) = parent_uid {
                    self.cache.reset_folder_children_loaded(parent_uid).await?;
                }
                Ok(())
            }
            DriveEvent::NodeUpdated {
                uid,
                parent_uid,
                is_trashed,
                is_shared,
                ..
            } => {
                match self.cache.get_node(uid).await {
                    Ok(mut node) => {
                        // Fold the event payload in so the tag index moves
                        // with the node; the row stays stale until the next
                        // full fetch.
                        node.is_stale = true;
                        if let Some(parent_uid) = parent_uid {
                            node.parent_uid = Some(parent_uid.clone());
                        }
                        if *is_trashed {
                            if node.trash_time.is_none() {
                                node.trash_time = Some(Utc::now());
                            }
                        } else {
                            node.trash_time = None;
                        }
                        node.is_shared = *is_shared;
                        if let Err(set_error) = self.cache.set_node(&node).await {
                            // The row can no longer be trusted; drop it. If
                            // even that fails, callers must see the original
                            // failure.
                            if self
                                .cache
                                .remove_nodes(std::slice::from_ref(uid))
                                .await
                                .is_err()
                            {
                                return Err(set_error);
                            }
                        }
                    }
                    Err(Error::NotFound(_)) | Err(Error::CorruptedEntity(_)) => {}
                    Err(error) => return Err(error),
                }
                self.dispatch_update_for(uid).await;
                Ok(())
            }
            DriveEvent::NodeDeleted { uid, .. } => {
                let last_known = self.cache.get_node(uid).await.ok();
                self.cache.remove_nodes(std::slice::from_ref(uid)).await?;
                self.crypto_cache
                    .remove_node_keys(std::slice::from_ref(uid))
                    .await?;
                self.dispatch_removed(uid, last_known.as_ref());
                Ok(())
            }
            DriveEvent::TreeRefresh { scope, .. } => {
                if let EventScope::Volume(volume_id) = scope {
                    self.cache.set_nodes_stale_from_volume(volume_id).await?;
                }
                Ok(())
            }
            DriveEvent::TreeRemove { scope, .. } => {
                if let EventScope::Volume(volume_id) = scope {
                    let roots = self.cache.root_node_uids(volume_id).await?;
                    self.cache.remove_nodes(&roots).await?;
                }
                Ok(())
            }
            // No cache mutation; other listeners on the managers observe
            // these directly.
            DriveEvent::SharedWithMeUpdated { .. } | DriveEvent::FastForward { .. } => Ok(()),
        }
    }
}

#[async_trait]
impl EventListener for NodeEventsHandler {
    async fn on_event(&self, event: &DriveEvent) -> Result<()> {
        self.apply(event).await
    }
}
