//! Error types for the Strato sync core.
//!
//! This module provides the structured error taxonomy visible to SDK
//! callers, using thiserror so failures stay chainable and matchable. The
//! two payload errors ([`InvalidNameError`], [`VerificationError`]) are
//! serde-derived because they live inside cached node records.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::NodeUid;

/// Convenient result alias used across the sync core.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the Strato sync core.
///
/// This enum covers the caller-visible failure kinds of the whole core:
/// validation, write-path conflicts, transport-level failures, cryptography
/// failures, cache corruption, and aggregated per-node batch outcomes.
#[derive(Debug, Error)]
pub enum Error {
    /// Caller-supplied bad data or state.
    #[error("validation failed: {message}")]
    Validation {
        /// Application error code reported by the server, when present.
        code: Option<u32>,
        /// Reason the input was rejected.
        message: String,
        /// Structured rejection details reported by the server.
        details: Option<serde_json::Value>,
    },

    /// A write-path conflict: the target name is already taken.
    #[error("node already exists")]
    NodeAlreadyExists {
        /// Uid of the conflicting node, when the server reported it.
        existing_node_uid: Option<NodeUid>,
        /// True when the conflict is with a draft rather than a committed node.
        has_draft_conflict: bool,
    },

    /// The operation was cancelled before completing.
    #[error("operation aborted")]
    Aborted,

    /// The server asked the client to slow down.
    #[error("rate limited by the server")]
    RateLimited,

    /// The server failed (5xx) or timed out.
    #[error("server error (status {status})")]
    Server {
        /// HTTP status code.
        status: u16,
    },

    /// The transport could not reach the server.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Content or metadata could not be decrypted.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// An integrity check on transferred content failed.
    #[error("integrity check failed")]
    Integrity {
        /// Diagnostic detail, safe to log but not shown to end users.
        debug: Option<String>,
    },

    /// The requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The local cache backing store failed.
    #[error("cache backend failure: {0}")]
    CacheBackend(String),

    /// A cached record failed schema validation and was evicted.
    #[error("corrupted cache entry: {0}")]
    CorruptedEntity(String),

    /// Cached key material failed validation and was evicted.
    #[error("corrupted cached keys: {0}")]
    CorruptedKeys(String),

    /// The core was asked to do something its configuration does not allow.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Aggregate outcome of a batch mutation with per-node failures.
    #[error("{} node operation(s) failed", node_errors.len())]
    NodeResults {
        /// Failure message per failed node.
        node_errors: HashMap<NodeUid, String>,
    },
}

impl Error {
    /// Shorthand for a validation error without a server code.
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            code: None,
            message: message.into(),
            details: None,
        }
    }
}

//─────────────────────────────
//  Payload errors
//─────────────────────────────

/// A node name that could not be decrypted or failed validation.
///
/// Carried inside `Node::name` so the failure round-trips through the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("invalid node name: {message}")]
pub struct InvalidNameError {
    /// Why the name is unusable.
    pub message: String,
    /// The still-encrypted name, for diagnostics and re-decryption attempts.
    pub encrypted_name: Option<String>,
}

/// A signature that did not verify against the claimed author's keys.
///
/// The claimed author is preserved so callers can render "claimed by X,
/// unverified" instead of dropping the attribution entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("signature verification failed: {reason}")]
pub struct VerificationError {
    /// Email the signature claims as its author, when known.
    pub claimed_author: Option<String>,
    /// Why verification failed.
    pub reason: String,
}

//─────────────────────────────
//  Telemetry categorization
//─────────────────────────────

/// Closed set of error categories reported to telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The server throttled the client.
    RateLimited,
    /// Content integrity check failed.
    IntegrityError,
    /// Decryption failed.
    DecryptionError,
    /// A 4xx response other than rate limiting.
    ClientError,
    /// A 5xx response or timeout.
    ServerError,
    /// The network was unreachable.
    NetworkError,
    /// Anything else.
    Unknown,
}

impl ErrorCategory {
    /// Stable wire name of the category.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::RateLimited => "rate_limited",
            ErrorCategory::IntegrityError => "integrity_error",
            ErrorCategory::DecryptionError => "decryption_error",
            ErrorCategory::ClientError => "4xx",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::NetworkError => "network_error",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

/// Map an error to its telemetry category.
///
/// Returns `None` for errors that are explicitly dropped from metrics:
/// validation failures describe caller input, and aborts describe caller
/// intent; neither says anything about service health.
pub fn categorize(error: &Error) -> Option<ErrorCategory> {
    match error {
        Error::Validation { .. } | Error::Aborted | Error::NodeAlreadyExists { .. } => None,
        Error::RateLimited => Some(ErrorCategory::RateLimited),
        Error::Integrity { .. } => Some(ErrorCategory::IntegrityError),
        Error::Decryption(_) | Error::CorruptedKeys(_) => Some(ErrorCategory::DecryptionError),
        Error::NotFound(_) => Some(ErrorCategory::ClientError),
        Error::Server { status } if *status >= 500 => Some(ErrorCategory::ServerError),
        Error::Server { .. } => Some(ErrorCategory::ClientError),
        Error::Connection(_) => Some(ErrorCategory::NetworkError),
        _ => Some(ErrorCategory::Unknown),
    }
}
