#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! **strato-api** – External collaborator contracts for the Strato sync core.
//!
//! The sync core deliberately owns neither the HTTP stack nor the
//! cryptographic primitives; both are injected by the embedding application.
//! This crate reduces each collaborator to the interface the core consumes:
//!
//! - [`Transport`] / [`BlockTransport`] – raw JSON verbs and block upload
//!   with cancellation,
//! - [`DriveApi`] – the typed endpoint adapter the core calls,
//! - [`CryptoProvider`] – key generation, name/block/attribute encryption,
//!   and signature verification,
//! - [`SharesService`] / [`AccountService`] – share membership and key
//!   resolution,
//! - [`Telemetry`] – the closed metric event set,
//! - [`LatestEventIdProvider`] – event-id resumption across restarts.

pub mod collaborators;
pub mod crypto;
pub mod drive;
pub mod dto;
pub mod telemetry;
pub mod transport;

pub use collaborators::{
    AccountService, LatestEventIdProvider, MyFilesIds, SharesService, SigningKey,
};
pub use crypto::{
    CryptoProvider, DecryptedName, DecryptedNodeKeys, EncryptedBlock, EncryptedName,
    GeneratedContentKey, GeneratedHashKey, GeneratedNodeKey, ReencryptedPassphrase,
    VerificationStatus,
};
pub use drive::{DraftOutcome, DriveApi};
pub use telemetry::{MetricName, MetricRecord, NoopTelemetry, Telemetry};
pub use transport::{BlockTransport, Transport, CODE_ALREADY_EXISTS, CODE_OK};
