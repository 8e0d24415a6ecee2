use crate::domain::result::DomainResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use garde::Validate;

/// Telemetry reading as submitted by a device, before tenancy enrichment
#[derive(Debug, Clone, PartialEq, Validate)]
pub struct DataEnvelope {
    #[garde(length(min = 1))]
    pub end_device_id: String,
    /// Device-reported event time; `None` means "now" at ingestion
    #[garde(skip)]
    pub occurred_at: Option<DateTime<Utc>>,
    #[garde(custom(non_empty_payload))]
    pub data: serde_json::Map<String, serde_json::Value>,
}

fn non_empty_payload(
    value: &serde_json::Map<String, serde_json::Value>,
    _context: &(),
) -> garde::Result {
    if value.is_empty() {
        return Err(garde::Error::new("payload must not be empty"));
    }
    Ok(())
}

/// Domain entity for a processed envelope
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedEnvelope {
    pub organization_id: String,
    pub end_device_id: String,
    pub occurred_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
    pub data: serde_json::Map<String, serde_json::Value>,
}

/// Input for storing processed envelopes (batch operation)
#[derive(Debug, Clone)]
pub struct StoreEnvelopesInput {
    pub envelopes: Vec<ProcessedEnvelope>,
}

/// Trait for publishing processed envelopes to message broker
///
/// Implementations should:
/// - Serialize envelope to the wire format (protobuf)
/// - Publish to a per-device subject on the broker
/// - Return error if publish fails
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ProcessedEnvelopeProducer: Send + Sync {
    async fn publish_processed_envelope(&self, envelope: &ProcessedEnvelope) -> DomainResult<()>;
}

/// Repository trait for processed envelope storage operations
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ProcessedEnvelopeRepository: Send + Sync {
    /// Store a batch of processed envelopes
    /// Failure handling: the whole batch is reported failed, never a silent partial write
    async fn store_batch(&self, input: StoreEnvelopesInput) -> DomainResult<()>;
}
