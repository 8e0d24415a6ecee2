use chrono::Utc;
use common::domain::{
    DataEnvelope, DomainError, DomainResult, EndDeviceRepository, GetOwningOrganizationInput,
    ProcessedEnvelope, ProcessedEnvelopeProducer,
};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Ingestion entry point: tenancy check, stamp, publish.
///
/// Flow:
/// 1. Validate the envelope and organization id
/// 2. Look up the organization owning the end device
/// 3. Reject unless it matches the claimed organization
/// 4. Stamp `processed_at` and publish to the broker
///
/// Authorization happens before this service is called; there is no bypass here.
pub struct DataEnvelopeService {
    end_device_repository: Arc<dyn EndDeviceRepository>,
    producer: Arc<dyn ProcessedEnvelopeProducer>,
}

impl DataEnvelopeService {
    pub fn new(
        end_device_repository: Arc<dyn EndDeviceRepository>,
        producer: Arc<dyn ProcessedEnvelopeProducer>,
    ) -> Self {
        Self {
            end_device_repository,
            producer,
        }
    }

    /// Publish failures are returned to the caller, who retries the whole call.
    /// A retry after an ambiguous failure may publish the record twice.
    #[instrument(skip_all, fields(end_device_id = %envelope.end_device_id, organization_id = %organization_id))]
    pub async fn ingest(&self, envelope: DataEnvelope, organization_id: &str) -> DomainResult<()> {
        if organization_id.is_empty() {
            return Err(DomainError::ValidationError(
                "organization_id: length is lower than 1".to_string(),
            ));
        }
        common::garde::validate_struct(&envelope)?;

        let owner = self
            .end_device_repository
            .get_owning_organization(GetOwningOrganizationInput {
                end_device_id: envelope.end_device_id.clone(),
            })
            .await?
            .ok_or_else(|| DomainError::EndDeviceNotFound(envelope.end_device_id.clone()))?;

        if owner != organization_id {
            warn!(
                device_organization_id = %owner,
                "rejecting envelope for end device owned by another organization"
            );
            return Err(DomainError::TenancyMismatch {
                end_device_id: envelope.end_device_id,
                device_organization_id: owner,
                organization_id: organization_id.to_string(),
            });
        }

        let processed_at = Utc::now();
        let record = ProcessedEnvelope {
            organization_id: owner,
            end_device_id: envelope.end_device_id,
            occurred_at: envelope.occurred_at.unwrap_or(processed_at),
            processed_at,
            data: envelope.data,
        };

        self.producer.publish_processed_envelope(&record).await?;

        debug!("ingested data envelope");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone};
    use common::domain::{MockEndDeviceRepository, MockProcessedEnvelopeProducer};

    fn occurred_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 1, 9, 0, 0).unwrap()
    }

    fn envelope() -> DataEnvelope {
        let mut data = serde_json::Map::new();
        data.insert("temp".to_string(), serde_json::json!(21.5));
        DataEnvelope {
            end_device_id: "device-1".to_string(),
            occurred_at: Some(occurred_at()),
            data,
        }
    }

    fn registry_owned_by(org: &'static str) -> MockEndDeviceRepository {
        let mut repo = MockEndDeviceRepository::new();
        repo.expect_get_owning_organization()
            .withf(|input: &GetOwningOrganizationInput| input.end_device_id == "device-1")
            .times(1)
            .return_once(move |_| Ok(Some(org.to_string())));
        repo
    }

    #[tokio::test]
    async fn test_ingest_publishes_stamped_record() {
        // Arrange
        let mut producer = MockProcessedEnvelopeProducer::new();
        let before = Utc::now();
        producer
            .expect_publish_processed_envelope()
            .withf(move |record: &ProcessedEnvelope| {
                record.organization_id == "org-1"
                    && record.end_device_id == "device-1"
                    && record.occurred_at == occurred_at()
                    && record.processed_at >= before
                    && record.data["temp"] == serde_json::json!(21.5)
            })
            .times(1)
            .return_once(|_| Ok(()));

        let service =
            DataEnvelopeService::new(Arc::new(registry_owned_by("org-1")), Arc::new(producer));

        // Act
        let result = service.ingest(envelope(), "org-1").await;

        // Assert
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_ingest_defaults_occurred_at_to_processing_time() {
        let mut producer = MockProcessedEnvelopeProducer::new();
        producer
            .expect_publish_processed_envelope()
            .withf(|record: &ProcessedEnvelope| record.occurred_at == record.processed_at)
            .times(1)
            .return_once(|_| Ok(()));

        let service =
            DataEnvelopeService::new(Arc::new(registry_owned_by("org-1")), Arc::new(producer));

        let mut envelope = envelope();
        envelope.occurred_at = None;

        assert!(service.ingest(envelope, "org-1").await.is_ok());
    }

    #[tokio::test]
    async fn test_ingest_rejects_cross_tenant_envelope_without_publishing() {
        let mut producer = MockProcessedEnvelopeProducer::new();
        producer.expect_publish_processed_envelope().times(0);

        let service =
            DataEnvelopeService::new(Arc::new(registry_owned_by("org-1")), Arc::new(producer));

        let result = service.ingest(envelope(), "org-2").await;

        match result {
            Err(DomainError::TenancyMismatch {
                end_device_id,
                device_organization_id,
                organization_id,
            }) => {
                assert_eq!(end_device_id, "device-1");
                assert_eq!(device_organization_id, "org-1");
                assert_eq!(organization_id, "org-2");
            }
            other => panic!("expected TenancyMismatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ingest_unknown_device_is_not_found() {
        let mut repo = MockEndDeviceRepository::new();
        repo.expect_get_owning_organization()
            .times(1)
            .return_once(|_| Ok(None));
        let mut producer = MockProcessedEnvelopeProducer::new();
        producer.expect_publish_processed_envelope().times(0);

        let service = DataEnvelopeService::new(Arc::new(repo), Arc::new(producer));

        let result = service.ingest(envelope(), "org-1").await;

        assert!(matches!(result, Err(DomainError::EndDeviceNotFound(id)) if id == "device-1"));
    }

    #[tokio::test]
    async fn test_ingest_validates_before_registry_lookup() {
        let mut repo = MockEndDeviceRepository::new();
        repo.expect_get_owning_organization().times(0);
        let mut producer = MockProcessedEnvelopeProducer::new();
        producer.expect_publish_processed_envelope().times(0);

        let service = DataEnvelopeService::new(Arc::new(repo), Arc::new(producer));

        let mut empty_payload = envelope();
        empty_payload.data.clear();

        assert!(matches!(
            service.ingest(empty_payload, "org-1").await,
            Err(DomainError::ValidationError(_))
        ));
        assert!(matches!(
            service.ingest(envelope(), "").await,
            Err(DomainError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_ingest_surfaces_publish_failure() {
        let mut producer = MockProcessedEnvelopeProducer::new();
        producer
            .expect_publish_processed_envelope()
            .times(1)
            .return_once(|_| Err(DomainError::BrokerError(anyhow::anyhow!("timeout"))));

        let service =
            DataEnvelopeService::new(Arc::new(registry_owned_by("org-1")), Arc::new(producer));

        assert!(matches!(
            service.ingest(envelope(), "org-1").await,
            Err(DomainError::BrokerError(_))
        ));
    }
}
