#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! **strato-upload** – Upload manager and block pipeline of the Strato sync core.
//!
//! The upload path in three layers:
//!
//! - [`drafts`] creates draft nodes and draft revisions, resolving name
//!   conflicts (own stale drafts are replaced, foreign ones surface as
//!   typed conflicts) and finding free names,
//! - [`verifier`] probes each encrypted block for corruption and derives
//!   the XOR verification token the server checks on receipt,
//! - [`pipeline`] chunks content into 4 MiB blocks, encrypts and verifies
//!   each, requests upload tokens in one round trip, uploads with bounded
//!   concurrency and one-off retries, and commits with a SHA-1 manifest.

mod drafts;
mod pipeline;
mod verifier;

#[cfg(test)]
mod testing;

pub use drafts::{CommitMetadata, Draft, DraftOptions, Uploader};
pub use pipeline::{UploadMetadata, FILE_CHUNK_SIZE};
pub use verifier::BlockVerifier;
