//! Raw transport contract.
//!
//! The embedding application supplies an HTTP client implementing
//! [`Transport`]; the core only ever sees JSON values and the error taxonomy
//! of `strato-types`. Implementations must map wire failures as follows:
//!
//! - HTTP 404 → [`Error::NotFound`]
//! - HTTP 429 → [`Error::RateLimited`]
//! - HTTP 5xx and timeouts → [`Error::Server`]
//! - unreachable network → [`Error::Connection`]
//! - application-level rejection → [`Error::Validation`] with the server's
//!   error code
//!
//! Cancellation tokens must interrupt in-flight requests; an interrupted
//! request surfaces [`Error::Aborted`].

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use strato_types::{Error, Result};

/// Application code for a successful response.
pub const CODE_OK: u32 = 1000;

/// Application code for a name conflict on a write path.
pub const CODE_ALREADY_EXISTS: u32 = 2500;

/// Application codes reserved for validation rejections.
pub const VALIDATION_CODE_RANGE: std::ops::Range<u32> = 2000..3000;

/// JSON transport with cancellation, supplied by the caller.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a GET request.
    async fn get(&self, path: &str, cancel: &CancellationToken) -> Result<serde_json::Value>;

    /// Issue a POST request with a JSON body.
    async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value>;

    /// Issue a PUT request with a JSON body.
    async fn put(
        &self,
        path: &str,
        body: serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value>;

    /// Issue a DELETE request.
    async fn delete(&self, path: &str, cancel: &CancellationToken) -> Result<serde_json::Value>;
}

/// Binary block upload, supplied by the caller alongside [`Transport`].
///
/// Block uploads go to storage URLs handed out by the token endpoint and
/// carry opaque tokens rather than session auth, which is why they sit on a
/// separate contract.
#[async_trait]
pub trait BlockTransport: Send + Sync {
    /// Upload one encrypted block to its assigned storage URL.
    ///
    /// A 404 response means the token expired; callers re-request a token
    /// and retry once.
    async fn upload_block(
        &self,
        upload_url: &str,
        token: &str,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// True when an application code falls in the reserved validation range.
pub fn is_validation_code(code: u32) -> bool {
    VALIDATION_CODE_RANGE.contains(&code)
}

/// Decode a typed response body, mapping malformed payloads onto the
/// connection error kind (the bytes made it here, the content did not).
pub fn decode<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| Error::Connection(format!("unexpected response body: {e}")))
}
