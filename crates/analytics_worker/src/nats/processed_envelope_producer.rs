use async_trait::async_trait;
use common::domain::{
    DomainError, DomainResult, ProcessedEnvelope,
    ProcessedEnvelopeProducer as ProcessedEnvelopeProducerTrait,
};
use common::nats::JetStreamPublisher;
use common::proto::encode_processed_envelope;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Publishes processed envelopes to `{base_subject}.{end_device_id}`
pub struct ProcessedEnvelopeProducer {
    jetstream: Arc<dyn JetStreamPublisher>,
    base_subject: String,
}

impl ProcessedEnvelopeProducer {
    pub fn new(jetstream: Arc<dyn JetStreamPublisher>, base_subject: String) -> Self {
        debug!(base_subject = %base_subject, "initialized ProcessedEnvelopeProducer");
        Self {
            jetstream,
            base_subject,
        }
    }

    fn subject_for(&self, envelope: &ProcessedEnvelope) -> String {
        format!("{}.{}", self.base_subject, envelope.end_device_id)
    }
}

#[async_trait]
impl ProcessedEnvelopeProducerTrait for ProcessedEnvelopeProducer {
    #[instrument(
        skip(self, envelope),
        fields(
            organization_id = %envelope.organization_id,
            end_device_id = %envelope.end_device_id
        )
    )]
    async fn publish_processed_envelope(&self, envelope: &ProcessedEnvelope) -> DomainResult<()> {
        let payload = encode_processed_envelope(envelope);
        let subject = self.subject_for(envelope);

        self.jetstream
            .publish(subject, payload.into())
            .await
            .map_err(DomainError::BrokerError)?;

        debug!("published processed envelope");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::nats::MockJetStreamPublisher;
    use common::proto::decode_processed_envelope;

    fn envelope() -> ProcessedEnvelope {
        let mut data = serde_json::Map::new();
        data.insert("temperature".to_string(), serde_json::json!(25.5));

        ProcessedEnvelope {
            organization_id: "org-123".to_string(),
            end_device_id: "device-456".to_string(),
            occurred_at: chrono::Utc::now(),
            processed_at: chrono::Utc::now(),
            data,
        }
    }

    #[tokio::test]
    async fn test_publish_uses_per_device_subject() {
        let mut mock_publisher = MockJetStreamPublisher::new();
        mock_publisher
            .expect_publish()
            .withf(|subject: &String, payload: &bytes::Bytes| {
                subject == "processed_envelopes.device-456"
                    && decode_processed_envelope(payload)
                        .map(|e| e.organization_id == "org-123")
                        .unwrap_or(false)
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let producer = ProcessedEnvelopeProducer::new(
            Arc::new(mock_publisher),
            "processed_envelopes".to_string(),
        );

        let result = producer.publish_processed_envelope(&envelope()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_publish_failure_is_surfaced_as_broker_error() {
        let mut mock_publisher = MockJetStreamPublisher::new();
        mock_publisher
            .expect_publish()
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("no responders")));

        let producer = ProcessedEnvelopeProducer::new(
            Arc::new(mock_publisher),
            "processed_envelopes".to_string(),
        );

        let result = producer.publish_processed_envelope(&envelope()).await;
        assert!(matches!(result, Err(DomainError::BrokerError(_))));
    }
}
