use crate::clickhouse::ClickHouseEnvelopeRepository;
use crate::domain::ProcessedEnvelopeService;
use crate::nats::create_processed_envelope_processor;
use common::nats::{JetStreamConsumer, NatsConsumer};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct AnalyticsWorkerConfig {
    pub processed_envelopes_stream: String,
    pub processed_envelopes_subject: String,
    pub consumer_name: String,
    pub nats_batch_size: usize,
    pub nats_batch_wait_secs: u64,
}

/// Batch consumer loop: processed-envelope stream into the time-series store
pub struct AnalyticsWorker {
    consumer: NatsConsumer,
}

impl AnalyticsWorker {
    pub async fn new(
        envelope_repository: Arc<ClickHouseEnvelopeRepository>,
        jetstream: Arc<dyn JetStreamConsumer>,
        config: AnalyticsWorkerConfig,
    ) -> anyhow::Result<Self> {
        info!("Initializing analytics worker");

        let envelope_service = Arc::new(ProcessedEnvelopeService::new(envelope_repository));
        let processor = create_processed_envelope_processor(envelope_service);

        let consumer = NatsConsumer::new(
            jetstream.as_ref(),
            &config.processed_envelopes_stream,
            &config.consumer_name,
            &config.processed_envelopes_subject,
            config.nats_batch_size,
            config.nats_batch_wait_secs,
            processor,
        )
        .await?;

        info!("Analytics worker initialized");
        Ok(Self { consumer })
    }

    /// Blocks until cancelled or until a batch fails
    pub async fn run(self, ctx: CancellationToken) -> anyhow::Result<()> {
        self.consumer.run(ctx).await
    }
}
