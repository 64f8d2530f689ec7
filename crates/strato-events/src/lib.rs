#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! **strato-events** – Event engine of the Strato sync core.
//!
//! A family of long-polling loops keeps the local cache eventually
//! consistent with the server:
//!
//! - [`source`] adapts the core and volume event endpoints into a uniform
//!   [`DriveEvent`](strato_types::DriveEvent) stream,
//! - [`manager`] runs one polling loop per scope with Fibonacci backoff and
//!   a dispose-able subscription model,
//! - [`service`] multiplexes subscriptions across scopes and creates
//!   managers on demand,
//! - [`handler`] consumes events, drives the cache's staleness and
//!   invalidation machinery, and fans node changes out to SDK subscribers.

pub mod handler;
pub mod manager;
pub mod service;
pub mod source;

pub use handler::{
    NodeChange, NodeChangeCallback, NodeChangeSubscription, NodeEventFilter, NodeEventsHandler,
    NodeResolver,
};
pub use manager::{EventListener, EventSubscription, ScopeEventManager};
pub use service::EventService;
pub use source::{CoreEventSource, EventSource, SourceError, VolumeEventSource};
