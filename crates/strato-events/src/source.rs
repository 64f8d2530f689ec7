//! Specialized event sources for the core and volume scopes.
//!
//! Each source turns one scope's HTTP responses into a uniform stream of
//! [`DriveEvent`]s. The stream is produced by a spawned task feeding a
//! bounded channel, so a slow consumer applies backpressure to the paging
//! loop and dropping the stream stops it.

use futures::stream::{BoxStream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use strato_api::DriveApi;
use strato_types::{DriveEvent, Error, EventScope, NodeUid};

/// Event id attached to a `TreeRemove` produced by a vanished stream.
const NONE_EVENT_ID: &str = "none";

/// Channel capacity between a source's paging task and its consumer.
const SOURCE_BUFFER: usize = 16;

/// Errors surfaced by an event source to its scope manager.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The server no longer serves this scope; the manager must stop and
    /// the subscription must not be retried.
    #[error("unsubscribe from events source")]
    Unsubscribe,
    /// A retryable failure; the manager backs off and polls again.
    #[error(transparent)]
    Other(#[from] Error),
}

/// A specialized event source the scope manager polls.
#[async_trait::async_trait]
pub trait EventSource: Send + Sync {
    /// The scope this source serves.
    fn scope(&self) -> EventScope;

    /// Resolve the server's current latest event id.
    async fn latest_event_id(&self, cancel: &CancellationToken) -> Result<String, SourceError>;

    /// Stream events after `since`, in server order.
    ///
    /// The stream ends after one poll round; the manager schedules the next
    /// round. A yielded `Err` terminates the round.
    fn events(
        &self,
        since: &str,
        cancel: &CancellationToken,
    ) -> BoxStream<'static, Result<DriveEvent, SourceError>>;
}

fn channel_stream(
    rx: mpsc::Receiver<Result<DriveEvent, SourceError>>,
) -> BoxStream<'static, Result<DriveEvent, SourceError>> {
    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
    .boxed()
}

//─────────────────────────────
//  Core scope
//─────────────────────────────

/// Event source of the account-level `core` scope.
#[derive(Clone)]
pub struct CoreEventSource {
    api: DriveApi,
}

impl CoreEventSource {
    /// Build a core source over the drive API.
    pub fn new(api: DriveApi) -> Self {
        Self { api }
    }
}

#[async_trait::async_trait]
impl EventSource for CoreEventSource {
    fn scope(&self) -> EventScope {
        EventScope::Core
    }

    async fn latest_event_id(&self, cancel: &CancellationToken) -> Result<String, SourceError> {
        Ok(self.api.core_latest_event_id(cancel).await?)
    }

    fn events(
        &self,
        since: &str,
        cancel: &CancellationToken,
    ) -> BoxStream<'static, Result<DriveEvent, SourceError>> {
        let (tx, rx) = mpsc::channel(SOURCE_BUFFER);
        let api = self.api.clone();
        let since = since.to_string();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let response = match api.core_events(&since, &cancel).await {
                Ok(response) => response,
                Err(error) => {
                    let _ = tx.send(Err(error.into())).await;
                    return;
                }
            };
            if response.refresh || response.shared_with_me_refresh {
                let _ = tx
                    .send(Ok(DriveEvent::SharedWithMeUpdated {
                        event_id: response.latest_event_id,
                        scope: EventScope::Core,
                    }))
                    .await;
            } else if response.latest_event_id != since {
                // Nothing observable changed but the id advanced; surface it
                // so resumption state keeps up.
                let _ = tx
                    .send(Ok(DriveEvent::FastForward {
                        event_id: response.latest_event_id,
                        scope: EventScope::Core,
                    }))
                    .await;
            }
        });
        channel_stream(rx)
    }
}

//─────────────────────────────
//  Volume scopes
//─────────────────────────────

/// Event source of one volume's scope.
#[derive(Clone)]
pub struct VolumeEventSource {
    api: DriveApi,
    volume_id: String,
}

impl VolumeEventSource {
    /// Build a volume source over the drive API.
    pub fn new(api: DriveApi, volume_id: impl Into<String>) -> Self {
        Self {
            api,
            volume_id: volume_id.into(),
        }
    }
}

#[async_trait::async_trait]
impl EventSource for VolumeEventSource {
    fn scope(&self) -> EventScope {
        EventScope::volume(&self.volume_id)
    }

    async fn latest_event_id(&self, cancel: &CancellationToken) -> Result<String, SourceError> {
        match self.api.volume_latest_event_id(&self.volume_id, cancel).await {
            Ok(id) => Ok(id),
            // The volume is gone; polling it again can never succeed.
            Err(Error::NotFound(_)) => Err(SourceError::Unsubscribe),
            Err(error) => Err(error.into()),
        }
    }

    fn events(
        &self,
        since: &str,
        cancel: &CancellationToken,
    ) -> BoxStream<'static, Result<DriveEvent, SourceError>> {
        let (tx, rx) = mpsc::channel(SOURCE_BUFFER);
        let api = self.api.clone();
        let volume_id = self.volume_id.clone();
        let since = since.to_string();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let scope = EventScope::volume(&volume_id);
            let mut since = since;
            loop {
                let page = match api.volume_events(&volume_id, &since, &cancel).await {
                    Ok(page) => page,
                    Err(Error::NotFound(message)) => {
                        // Tell listeners the tree is gone, then re-raise so
                        // the manager stops this round.
                        let _ = tx
                            .send(Ok(DriveEvent::TreeRemove {
                                event_id: NONE_EVENT_ID.to_string(),
                                scope: scope.clone(),
                            }))
                            .await;
                        let _ = tx
                            .send(Err(SourceError::Other(Error::NotFound(message))))
                            .await;
                        return;
                    }
                    Err(error) => {
                        let _ = tx.send(Err(error.into())).await;
                        return;
                    }
                };

                if page.refresh {
                    let _ = tx
                        .send(Ok(DriveEvent::TreeRefresh {
                            event_id: page.latest_event_id,
                            scope,
                        }))
                        .await;
                    return;
                }
                if page.events.is_empty() {
                    if page.latest_event_id != since {
                        let _ = tx
                            .send(Ok(DriveEvent::FastForward {
                                event_id: page.latest_event_id,
                                scope,
                            }))
                            .await;
                    }
                    return;
                }

                for raw in page.events {
                    let uid = match NodeUid::new(&volume_id, &raw.node.node_id) {
                        Ok(uid) => uid,
                        Err(error) => {
                            warn!(%error, "skipping event with malformed node id");
                            continue;
                        }
                    };
                    let parent_uid = match &raw.node.parent_id {
                        Some(parent_id) => match NodeUid::new(&volume_id, parent_id) {
                            Ok(parent) => Some(parent),
                            Err(error) => {
                                warn!(%error, "dropping malformed parent id on event");
                                None
                            }
                        },
                        None => None,
                    };
                    let event = match raw.event_type {
                        0 => DriveEvent::NodeDeleted {
                            event_id: raw.event_id,
                            scope: scope.clone(),
                            uid,
                        },
                        1 => DriveEvent::NodeCreated {
                            event_id: raw.event_id,
                            scope: scope.clone(),
                            uid,
                            parent_uid,
                        },
                        2 | 3 => DriveEvent::NodeUpdated {
                            event_id: raw.event_id,
                            scope: scope.clone(),
                            uid,
                            parent_uid,
                            is_trashed: raw.node.is_trashed,
                            is_shared: raw.node.is_shared,
                        },
                        other => {
                            warn!(event_type = other, "skipping event of unknown type");
                            continue;
                        }
                    };
                    if tx.send(Ok(event)).await.is_err() {
                        // Consumer dropped the stream.
                        return;
                    }
                }

                since = page.latest_event_id;
                if !page.more {
                    return;
                }
            }
        });
        channel_stream(rx)
    }
}
