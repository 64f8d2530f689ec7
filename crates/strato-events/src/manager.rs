//! Per-scope polling loop.
//!
//! One manager owns one scope's long-poll loop: fetch events, fan them out
//! to listeners in registration order, persist the latest event id, sleep,
//! repeat. Failures back off on the Fibonacci ladder; the unsubscribe signal
//! from the source stops the loop for good.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use strato_types::{DriveEvent, Error, Result};

use crate::source::{EventSource, SourceError};

/// Backoff multipliers applied to the polling interval after consecutive
/// failures. The ladder caps at its last rung.
pub const FIBONACCI_BACKOFF: [u32; 7] = [1, 1, 2, 3, 5, 8, 13];

/// A consumer of one scope's event stream.
///
/// Listeners run inside the polling iteration; an error from a listener
/// aborts the iteration (later listeners and later events are not notified)
/// and counts as an iteration failure.
#[async_trait]
pub trait EventListener: Send + Sync {
    /// Handle one event. Events arrive in server order.
    async fn on_event(&self, event: &DriveEvent) -> Result<()>;
}

#[derive(Clone)]
struct ListenerEntry {
    id: u64,
    listener: Arc<dyn EventListener>,
}

type ListenerList = StdMutex<Vec<ListenerEntry>>;

/// Handle to a registered listener; dropping it does nothing, disposal is
/// explicit.
pub struct EventSubscription {
    listeners: Weak<ListenerList>,
    id: u64,
}

impl EventSubscription {
    /// Remove the listener from its manager.
    pub fn dispose(&self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners
                .lock()
                .expect("listener list poisoned")
                .retain(|entry| entry.id != self.id);
        }
    }
}

#[derive(Debug, Default)]
struct PollState {
    latest_event_id: Option<String>,
    retry_index: usize,
}

/// The polling loop of one scope.
pub struct ScopeEventManager {
    source: Arc<dyn EventSource>,
    poll_interval: Duration,
    listeners: Arc<ListenerList>,
    next_listener_id: AtomicU64,
    state: Arc<Mutex<PollState>>,
    task: StdMutex<Option<JoinHandle<()>>>,
    cancel: StdMutex<CancellationToken>,
}

impl ScopeEventManager {
    /// Build a manager over a specialized source.
    ///
    /// `initial_event_id` comes from the caller's latest-event-id provider;
    /// without one, the id is resolved lazily on the first [`start`].
    ///
    /// [`start`]: ScopeEventManager::start
    pub fn new(
        source: Arc<dyn EventSource>,
        poll_interval: Duration,
        initial_event_id: Option<String>,
    ) -> Self {
        Self {
            source,
            poll_interval,
            listeners: Arc::new(StdMutex::new(Vec::new())),
            next_listener_id: AtomicU64::new(0),
            state: Arc::new(Mutex::new(PollState {
                latest_event_id: initial_event_id,
                retry_index: 0,
            })),
            task: StdMutex::new(None),
            cancel: StdMutex::new(CancellationToken::new()),
        }
    }

    /// Register a listener; it receives events after already-registered
    /// listeners within each iteration.
    pub fn add_listener(&self, listener: Arc<dyn EventListener>) -> EventSubscription {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .expect("listener list poisoned")
            .push(ListenerEntry { id, listener });
        EventSubscription {
            listeners: Arc::downgrade(&self.listeners),
            id,
        }
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().expect("listener list poisoned").len()
    }

    /// The last event id observed (or seeded) for this scope.
    pub async fn latest_event_id(&self) -> Option<String> {
        self.state.lock().await.latest_event_id.clone()
    }

    /// True while the polling loop is alive.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .expect("task slot poisoned")
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Start the polling loop.
    ///
    /// With a known latest event id the first iteration runs immediately;
    /// otherwise the id is resolved now and the first tick waits for the
    /// scheduled interval. Starting a running manager is a no-op.
    pub async fn start(&self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        let cancel = CancellationToken::new();
        *self.cancel.lock().expect("cancel slot poisoned") = cancel.clone();

        let known = self.state.lock().await.latest_event_id.is_some();
        let immediate_first_tick = if known {
            true
        } else {
            let id = self
                .source
                .latest_event_id(&cancel)
                .await
                .map_err(|error| match error {
                    SourceError::Unsubscribe => Error::NotFound(format!(
                        "events source for scope {} is gone",
                        self.source.scope()
                    )),
                    SourceError::Other(error) => error,
                })?;
            debug!(scope = %self.source.scope(), latest = %id, "resolved initial event id");
            self.state.lock().await.latest_event_id = Some(id);
            false
        };

        let poll_loop = PollLoop {
            source: self.source.clone(),
            interval: self.poll_interval,
            listeners: self.listeners.clone(),
            state: self.state.clone(),
            cancel,
        };
        let handle = tokio::spawn(poll_loop.run(immediate_first_tick));
        *self.task.lock().expect("task slot poisoned") = Some(handle);
        Ok(())
    }

    /// Stop the polling loop, awaiting the in-flight iteration and
    /// swallowing its failure.
    pub async fn stop(&self) {
        self.cancel
            .lock()
            .expect("cancel slot poisoned")
            .cancel();
        let task = self.task.lock().expect("task slot poisoned").take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

struct PollLoop {
    source: Arc<dyn EventSource>,
    interval: Duration,
    listeners: Arc<ListenerList>,
    state: Arc<Mutex<PollState>>,
    cancel: CancellationToken,
}

impl PollLoop {
    async fn run(self, immediate_first_tick: bool) {
        let mut delay = if immediate_first_tick {
            Duration::ZERO
        } else {
            self.interval
        };
        loop {
            if !delay.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            if self.cancel.is_cancelled() {
                return;
            }
            match self.run_iteration().await {
                Ok(()) => {
                    self.state.lock().await.retry_index = 0;
                    delay = self.interval;
                }
                Err(SourceError::Unsubscribe) => {
                    info!(scope = %self.source.scope(), "events source unsubscribed, stopping");
                    return;
                }
                // A vanished scope can never produce events again; polling
                // on would 404 forever.
                Err(SourceError::Other(Error::NotFound(reason))) => {
                    info!(scope = %self.source.scope(), %reason, "events source gone, stopping");
                    return;
                }
                Err(SourceError::Other(error)) => {
                    let mut state = self.state.lock().await;
                    let rung = state.retry_index.min(FIBONACCI_BACKOFF.len() - 1);
                    state.retry_index += 1;
                    delay = self.interval * FIBONACCI_BACKOFF[rung];
                    warn!(
                        scope = %self.source.scope(),
                        %error,
                        failures = state.retry_index,
                        next_poll_in = ?delay,
                        "event poll failed, backing off"
                    );
                }
            }
        }
    }

    async fn run_iteration(&self) -> std::result::Result<(), SourceError> {
        let since = self
            .state
            .lock()
            .await
            .latest_event_id
            .clone()
            .unwrap_or_default();
        let mut events = self.source.events(&since, &self.cancel);
        while let Some(item) = events.next().await {
            let event = item?;
            let snapshot: Vec<ListenerEntry> = self
                .listeners
                .lock()
                .expect("listener list poisoned")
                .clone();
            for entry in snapshot {
                entry
                    .listener
                    .on_event(&event)
                    .await
                    .map_err(SourceError::Other)?;
            }
            self.state.lock().await.latest_event_id = Some(event.event_id().to_string());
        }
        Ok(())
    }
}
