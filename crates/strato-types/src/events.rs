//! Server event stream types.
//!
//! Events arrive per scope (the literal `core` scope or one volume) and feed
//! the cache's staleness machinery. The enum mirrors exactly what the event
//! engine can observe; anything richer is resolved later against the cache
//! or the API.

use serde::{Deserialize, Serialize};

use crate::NodeUid;

/// The stream a server event belongs to.
///
/// Every volume has its own event stream; account-level notifications arrive
/// on the special `core` scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EventScope {
    /// Account-level events.
    Core,
    /// Events of one volume.
    Volume(String),
}

/// Scope name of the account-level stream.
pub const CORE_SCOPE: &str = "core";

impl EventScope {
    /// Scope for a volume's event stream.
    pub fn volume(volume_id: impl Into<String>) -> Self {
        EventScope::Volume(volume_id.into())
    }

    /// The volume id, when this is a volume scope.
    pub fn volume_id(&self) -> Option<&str> {
        match self {
            EventScope::Core => None,
            EventScope::Volume(id) => Some(id),
        }
    }
}

impl std::fmt::Display for EventScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventScope::Core => f.write_str(CORE_SCOPE),
            EventScope::Volume(id) => f.write_str(id),
        }
    }
}

impl From<EventScope> for String {
    fn from(scope: EventScope) -> Self {
        scope.to_string()
    }
}

impl TryFrom<String> for EventScope {
    type Error = std::convert::Infallible;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Ok(if s == CORE_SCOPE {
            EventScope::Core
        } else {
            EventScope::Volume(s)
        })
    }
}

/// One server event, as delivered to event listeners.
///
/// All variants carry the event id that produced them and the scope they
/// arrived on; node variants additionally carry whatever the (encrypted)
/// event payload exposes without keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DriveEvent {
    /// A node was created. The payload is encrypted at source, so only
    /// identifiers travel with the event.
    NodeCreated {
        /// Event id that produced this event.
        event_id: String,
        /// Scope the event arrived on.
        scope: EventScope,
        /// The created node.
        uid: NodeUid,
        /// Parent folder of the created node, when reported.
        parent_uid: Option<NodeUid>,
    },
    /// A node's metadata, location, or content changed.
    NodeUpdated {
        /// Event id that produced this event.
        event_id: String,
        /// Scope the event arrived on.
        scope: EventScope,
        /// The updated node.
        uid: NodeUid,
        /// Parent folder after the update, when reported.
        parent_uid: Option<NodeUid>,
        /// Whether the node is trashed after the update.
        is_trashed: bool,
        /// Whether the node is shared after the update.
        is_shared: bool,
    },
    /// A node was permanently deleted.
    NodeDeleted {
        /// Event id that produced this event.
        event_id: String,
        /// Scope the event arrived on.
        scope: EventScope,
        /// The deleted node.
        uid: NodeUid,
    },
    /// The set of nodes shared with the caller changed.
    SharedWithMeUpdated {
        /// Event id that produced this event.
        event_id: String,
        /// Scope the event arrived on (always the core scope).
        scope: EventScope,
    },
    /// The server asked for a full refresh of the scope's tree.
    TreeRefresh {
        /// Event id that produced this event.
        event_id: String,
        /// Scope whose tree must be refreshed.
        scope: EventScope,
    },
    /// The scope's tree is gone and must be dropped from the cache.
    TreeRemove {
        /// Event id that produced this event (`"none"` when the stream
        /// itself disappeared).
        event_id: String,
        /// Scope whose tree must be removed.
        scope: EventScope,
    },
    /// The event id advanced without observable changes.
    FastForward {
        /// The new latest event id.
        event_id: String,
        /// Scope that fast-forwarded.
        scope: EventScope,
    },
}

impl DriveEvent {
    /// The event id that produced this event.
    pub fn event_id(&self) -> &str {
        match self {
            DriveEvent::NodeCreated { event_id, .. }
            | DriveEvent::NodeUpdated { event_id, .. }
            | DriveEvent::NodeDeleted { event_id, .. }
            | DriveEvent::SharedWithMeUpdated { event_id, .. }
            | DriveEvent::TreeRefresh { event_id, .. }
            | DriveEvent::TreeRemove { event_id, .. }
            | DriveEvent::FastForward { event_id, .. } => event_id,
        }
    }

    /// The scope this event arrived on.
    pub fn scope(&self) -> &EventScope {
        match self {
            DriveEvent::NodeCreated { scope, .. }
            | DriveEvent::NodeUpdated { scope, .. }
            | DriveEvent::NodeDeleted { scope, .. }
            | DriveEvent::SharedWithMeUpdated { scope, .. }
            | DriveEvent::TreeRefresh { scope, .. }
            | DriveEvent::TreeRemove { scope, .. }
            | DriveEvent::FastForward { scope, .. } => scope,
        }
    }
}
