#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! **strato-nodes** – Node access and management for the Strato sync core.
//!
//! The read path ([`NodeAccess`]) combines the caches, event-driven
//! staleness, API fetches, and decryption: cache hits return immediately,
//! stale or missing rows are refetched in batches of ten, and folder
//! listings honor the per-folder completeness marker. The write path
//! ([`NodeManagement`]) derives encrypted payloads with parent keys, calls
//! the API, and only then writes back to the caches and notifies the node
//! events handler.

mod access;
mod decrypt;
mod management;

#[cfg(test)]
mod testing;

pub use access::{NodeAccess, NodeStream, BATCH_LOADING};
pub use management::NodeManagement;
