use common::domain::{DomainResult, ProcessedEnvelopeRepository, StoreEnvelopesInput};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Write side of the batch consumer loop
pub struct ProcessedEnvelopeService {
    repository: Arc<dyn ProcessedEnvelopeRepository>,
}

impl ProcessedEnvelopeService {
    pub fn new(repository: Arc<dyn ProcessedEnvelopeRepository>) -> Self {
        Self { repository }
    }

    /// Persist a decoded batch in one write
    #[instrument(skip(self, input), fields(envelope_count = input.envelopes.len()))]
    pub async fn store_batch(&self, input: StoreEnvelopesInput) -> DomainResult<()> {
        if input.envelopes.is_empty() {
            debug!("empty batch, nothing to store");
            return Ok(());
        }

        debug!(
            envelope_count = input.envelopes.len(),
            "storing batch of envelopes"
        );

        self.repository.store_batch(input).await
    }
}
