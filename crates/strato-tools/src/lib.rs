#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **strato-tools** – Async helpers shared across the Strato sync core.
//!
//! Small building blocks with no domain knowledge: bounded-concurrency
//! mapping for per-item I/O, batch grouping used by the batch loaders and
//! batch mutations, a polling condition waiter, and a pause/resume gate for
//! long-running transfers. Everything here honors cancellation.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use strato_types::{Error, Result};

/// Default maximum number of in-flight futures for [`map_bounded`].
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Poll interval of [`wait_for_condition`].
const CONDITION_POLL_INTERVAL: Duration = Duration::from_millis(50);

//─────────────────────────────
//  Bounded-concurrency mapping
//─────────────────────────────

/// Map `items` through an async function with at most `limit` futures in
/// flight, yielding outputs in input order.
///
/// This is the adapter to reach for wherever per-item I/O occurs inside an
/// iteration; it keeps the pipeline busy without unbounded fan-out.
pub fn map_bounded<I, F, Fut>(
    items: I,
    limit: usize,
    f: F,
) -> impl Stream<Item = Fut::Output>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future,
{
    stream::iter(items).map(f).buffered(limit.max(1))
}

/// Collect [`map_bounded`] into a `Vec`, failing fast on the first error.
pub async fn try_map_bounded<I, F, Fut, T>(items: I, limit: usize, f: F) -> Result<Vec<T>>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut out = Vec::new();
    let mut mapped = std::pin::pin!(map_bounded(items, limit, f));
    while let Some(item) = mapped.next().await {
        out.push(item?);
    }
    Ok(out)
}

//─────────────────────────────
//  Batch grouping
//─────────────────────────────

/// Split `items` into consecutive chunks of at most `size` elements.
pub fn chunked<T>(items: impl IntoIterator<Item = T>, size: usize) -> Vec<Vec<T>> {
    let size = size.max(1);
    let mut chunks = Vec::new();
    let mut current = Vec::with_capacity(size);
    for item in items {
        current.push(item);
        if current.len() == size {
            chunks.push(std::mem::replace(&mut current, Vec::with_capacity(size)));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Group `items` by a key, preserving the input order within each group.
pub fn group_by<T, K, F>(items: impl IntoIterator<Item = T>, mut key: F) -> HashMap<K, Vec<T>>
where
    K: Eq + Hash,
    F: FnMut(&T) -> K,
{
    let mut groups: HashMap<K, Vec<T>> = HashMap::new();
    for item in items {
        groups.entry(key(&item)).or_default().push(item);
    }
    groups
}

//─────────────────────────────
//  Condition waiting
//─────────────────────────────

/// Poll an async condition every 50 ms until it returns true.
///
/// Fails with [`Error::Aborted`] when the cancellation token fires first.
pub async fn wait_for_condition<F, Fut>(mut condition: F, cancel: &CancellationToken) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Aborted);
        }
        if condition().await {
            return Ok(());
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Aborted),
            _ = tokio::time::sleep(CONDITION_POLL_INTERVAL) => {}
        }
    }
}

//─────────────────────────────
//  Pause/resume control
//─────────────────────────────

/// A cooperative pause gate for long-running transfers.
///
/// Workers call [`PauseController::wait_if_paused`] between units of work;
/// the call returns immediately while running and parks until [`resume`]
/// while paused. Cancellation wins over pausing on all paths.
///
/// [`resume`]: PauseController::resume
#[derive(Debug, Clone)]
pub struct PauseController {
    paused: tokio::sync::watch::Sender<bool>,
}

impl Default for PauseController {
    fn default() -> Self {
        Self::new()
    }
}

impl PauseController {
    /// Create a controller in the running state.
    pub fn new() -> Self {
        let (paused, _) = tokio::sync::watch::channel(false);
        Self { paused }
    }

    /// Park new work until [`PauseController::resume`] is called.
    pub fn pause(&self) {
        let _ = self.paused.send(true);
    }

    /// Release every waiter parked in [`PauseController::wait_if_paused`].
    pub fn resume(&self) {
        let _ = self.paused.send(false);
    }

    /// True while the controller is paused.
    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Wait until the controller is running.
    ///
    /// Fails with [`Error::Aborted`] when the cancellation token fires while
    /// parked.
    pub async fn wait_if_paused(&self, cancel: &CancellationToken) -> Result<()> {
        let mut rx = self.paused.subscribe();
        while *rx.borrow_and_update() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Aborted),
                changed = rx.changed() => {
                    if changed.is_err() {
                        // Controller dropped; treat as running.
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }
}
