//! Telemetry sink contract.
//!
//! Leveled logging goes through `tracing` throughout the workspace; this
//! contract only covers the closed set of product metric events. Errors are
//! attached pre-categorized; validation failures and aborts never reach a
//! record (see `strato_types::errors::categorize`).

use strato_types::ErrorCategory;

/// Closed set of metric event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricName {
    /// A download finished (successfully or not).
    Download,
    /// An upload finished (successfully or not).
    Upload,
    /// A block failed verification before upload.
    BlockVerificationError,
    /// The number of volume event subscriptions changed.
    VolumeEventsSubscriptionsChanged,
    /// Node metadata failed to decrypt.
    DecryptionError,
    /// A signature failed to verify.
    VerificationError,
}

impl MetricName {
    /// Stable wire name of the event.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::Download => "download",
            MetricName::Upload => "upload",
            MetricName::BlockVerificationError => "blockVerificationError",
            MetricName::VolumeEventsSubscriptionsChanged => "volumeEventsSubscriptionsChanged",
            MetricName::DecryptionError => "decryptionError",
            MetricName::VerificationError => "verificationError",
        }
    }
}

/// One metric event record.
#[derive(Debug, Clone)]
pub struct MetricRecord {
    /// Which event happened.
    pub name: MetricName,
    /// Volume context label, when the event is volume-scoped.
    pub volume_context: Option<String>,
    /// Failure category, when the event records a failure.
    pub error: Option<ErrorCategory>,
    /// Counter or gauge value, when the event carries one.
    pub value: Option<i64>,
}

impl MetricRecord {
    /// A bare record with just the event name.
    pub fn new(name: MetricName) -> Self {
        Self {
            name,
            volume_context: None,
            error: None,
            value: None,
        }
    }

    /// Attach a volume context label.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.volume_context = Some(context.into());
        self
    }

    /// Attach a failure category.
    pub fn with_error(mut self, error: ErrorCategory) -> Self {
        self.error = Some(error);
        self
    }

    /// Attach a counter or gauge value.
    pub fn with_value(mut self, value: i64) -> Self {
        self.value = Some(value);
        self
    }
}

/// Metric sink supplied by the caller.
pub trait Telemetry: Send + Sync {
    /// Record one metric event. Must not block.
    fn log_event(&self, record: MetricRecord);
}

/// A telemetry sink that drops every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn log_event(&self, _record: MetricRecord) {}
}
