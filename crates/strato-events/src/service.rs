//! Subscription multiplexing across scopes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::debug;

use strato_api::{
    DriveApi, LatestEventIdProvider, MetricName, MetricRecord, SharesService, Telemetry,
};
use strato_types::{Error, EventScope, Result};

use crate::manager::{EventListener, EventSubscription, ScopeEventManager};
use crate::source::{CoreEventSource, VolumeEventSource};

/// Polling interval of the core scope.
const CORE_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Polling interval of volumes owned by the caller.
const OWN_VOLUME_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Polling interval of volumes shared with the caller.
const OTHER_VOLUME_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Registry of scope event managers, created and started on demand.
///
/// One manager exists per subscribed scope. Volume managers pick their
/// polling cadence from volume ownership at creation time; the core manager
/// requires a caller-supplied latest-event-id provider because the core
/// stream has no server-side lazy entry point worth trusting across
/// restarts.
pub struct EventService {
    api: DriveApi,
    shares: Arc<dyn SharesService>,
    telemetry: Arc<dyn Telemetry>,
    latest_provider: Option<Arc<dyn LatestEventIdProvider>>,
    managers: Mutex<HashMap<EventScope, Arc<ScopeEventManager>>>,
}

impl EventService {
    /// Build the service.
    pub fn new(
        api: DriveApi,
        shares: Arc<dyn SharesService>,
        telemetry: Arc<dyn Telemetry>,
        latest_provider: Option<Arc<dyn LatestEventIdProvider>>,
    ) -> Self {
        Self {
            api,
            shares,
            telemetry,
            latest_provider,
            managers: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to the account-level `core` event stream.
    ///
    /// Fails with `Configuration` when no latest-event-id provider was
    /// supplied.
    pub async fn subscribe_to_core_events(
        &self,
        listener: Arc<dyn EventListener>,
    ) -> Result<EventSubscription> {
        let provider = self.latest_provider.as_ref().ok_or_else(|| {
            Error::Configuration(
                "core event subscriptions require a latest-event-id provider".to_string(),
            )
        })?;

        let mut managers = self.managers.lock().await;
        let manager = match managers.get(&EventScope::Core) {
            Some(manager) => manager.clone(),
            None => {
                let initial = provider.latest_event_id(&EventScope::Core).await?;
                let source = Arc::new(CoreEventSource::new(self.api.clone()));
                let manager = Arc::new(ScopeEventManager::new(
                    source,
                    CORE_POLL_INTERVAL,
                    initial,
                ));
                debug!("created core event manager");
                managers.insert(EventScope::Core, manager.clone());
                manager
            }
        };
        let subscription = manager.add_listener(listener);
        manager.start().await?;
        Ok(subscription)
    }

    /// Subscribe to one volume's event stream.
    pub async fn subscribe_to_tree_events(
        &self,
        volume_id: &str,
        listener: Arc<dyn EventListener>,
    ) -> Result<EventSubscription> {
        let scope = EventScope::volume(volume_id);
        let mut managers = self.managers.lock().await;
        let manager = match managers.get(&scope) {
            Some(manager) => manager.clone(),
            None => {
                let interval = if self.shares.is_own_volume(volume_id).await? {
                    OWN_VOLUME_POLL_INTERVAL
                } else {
                    OTHER_VOLUME_POLL_INTERVAL
                };
                let initial = match &self.latest_provider {
                    Some(provider) => provider.latest_event_id(&scope).await?,
                    None => None,
                };
                let source = Arc::new(VolumeEventSource::new(self.api.clone(), volume_id));
                let manager =
                    Arc::new(ScopeEventManager::new(source, interval, initial));
                debug!(volume_id, poll = ?interval, "created volume event manager");
                managers.insert(scope, manager.clone());
                manager
            }
        };
        let subscription = manager.add_listener(listener);
        manager.start().await?;

        let subscriptions: usize = managers
            .iter()
            .filter(|(scope, _)| matches!(scope, EventScope::Volume(_)))
            .map(|(_, manager)| manager.listener_count())
            .sum();
        self.telemetry.log_event(
            MetricRecord::new(MetricName::VolumeEventsSubscriptionsChanged)
                .with_value(subscriptions as i64),
        );
        Ok(subscription)
    }

    /// The manager of a scope, when one was created.
    pub async fn manager(&self, scope: &EventScope) -> Option<Arc<ScopeEventManager>> {
        self.managers.lock().await.get(scope).cloned()
    }

    /// Stop every manager, awaiting in-flight iterations.
    pub async fn stop_all(&self) {
        let managers: Vec<Arc<ScopeEventManager>> =
            self.managers.lock().await.values().cloned().collect();
        for manager in managers {
            manager.stop().await;
        }
    }
}
