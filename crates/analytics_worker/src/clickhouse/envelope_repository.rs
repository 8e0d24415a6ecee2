use crate::clickhouse::histogram_query::{fill_empty_buckets, HistogramQueryBuilder, HistogramRow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clickhouse::Row;
use common::clickhouse::ClickHouseClient;
use common::domain::{
    DomainError, DomainResult, EndDeviceDataRepository, HistogramQueryInput, ProcessedEnvelope,
    ProcessedEnvelopeRepository, StoreEnvelopesInput, TimeWindowHistogram,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct ProcessedEnvelopeRow {
    pub organization_id: String,
    pub end_device_id: String,
    #[serde(with = "clickhouse::serde::chrono::datetime64::millis")]
    pub occurred_at: DateTime<Utc>,
    #[serde(with = "clickhouse::serde::chrono::datetime64::millis")]
    pub processed_at: DateTime<Utc>,
    /// Payload document serialized as JSON text
    pub data: String,
}

impl TryFrom<&ProcessedEnvelope> for ProcessedEnvelopeRow {
    type Error = serde_json::Error;

    fn try_from(envelope: &ProcessedEnvelope) -> Result<Self, Self::Error> {
        Ok(ProcessedEnvelopeRow {
            organization_id: envelope.organization_id.clone(),
            end_device_id: envelope.end_device_id.clone(),
            occurred_at: envelope.occurred_at,
            processed_at: envelope.processed_at,
            data: serde_json::to_string(&envelope.data)?,
        })
    }
}

/// ClickHouse-backed time-series store: batch writes and histogram reads
#[derive(Clone)]
pub struct ClickHouseEnvelopeRepository {
    client: ClickHouseClient,
    table: String,
}

impl ClickHouseEnvelopeRepository {
    pub fn new(client: ClickHouseClient, table: String) -> Self {
        Self { client, table }
    }
}

#[async_trait]
impl ProcessedEnvelopeRepository for ClickHouseEnvelopeRepository {
    /// One INSERT per batch. Any failure before `end()` returns an error, so
    /// the caller naks and the batch is redelivered; retried rows may duplicate.
    #[instrument(skip(self, input), fields(envelope_count = input.envelopes.len(), table = %self.table))]
    async fn store_batch(&self, input: StoreEnvelopesInput) -> DomainResult<()> {
        if input.envelopes.is_empty() {
            debug!("no envelopes to store, skipping");
            return Ok(());
        }

        let rows = input
            .envelopes
            .iter()
            .map(ProcessedEnvelopeRow::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DomainError::StoreError(e.into()))?;

        let mut insert = self
            .client
            .get_client()
            .insert::<ProcessedEnvelopeRow>(&self.table)
            .await
            .map_err(|e| {
                error!(error = %e, "failed to create ClickHouse insert");
                DomainError::StoreError(e.into())
            })?;

        for row in &rows {
            insert.write(row).await.map_err(|e| {
                error!(error = %e, "failed to write row to ClickHouse");
                DomainError::StoreError(e.into())
            })?;
        }

        insert.end().await.map_err(|e| {
            error!(error = %e, "failed to finalize ClickHouse insert");
            DomainError::StoreError(e.into())
        })?;

        debug!(rows_inserted = rows.len(), "stored envelope batch");
        Ok(())
    }
}

#[async_trait]
impl EndDeviceDataRepository for ClickHouseEnvelopeRepository {
    #[instrument(
        skip(self, input),
        fields(
            organization_id = %input.organization_id,
            field_path = %input.field_path,
            interval_secs = input.time_bucket_interval.as_secs()
        )
    )]
    async fn query_histogram(
        &self,
        input: HistogramQueryInput,
    ) -> DomainResult<Vec<TimeWindowHistogram>> {
        let query = HistogramQueryBuilder::new(&self.table, &input).build()?;

        let mut statement = self.client.get_client().query(&query.sql);
        for param in &query.params {
            statement = statement.bind(param);
        }

        let rows = statement.fetch_all::<HistogramRow>().await.map_err(|e| {
            error!(error = %e, "histogram query failed");
            DomainError::StoreError(e.into())
        })?;

        debug!(non_empty_buckets = rows.len(), "histogram query returned");

        fill_empty_buckets(rows, &input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn envelope(data: serde_json::Map<String, serde_json::Value>) -> ProcessedEnvelope {
        ProcessedEnvelope {
            organization_id: "org-123".to_string(),
            end_device_id: "device-456".to_string(),
            occurred_at: Utc.with_ymd_and_hms(2025, 6, 1, 8, 30, 0).unwrap(),
            processed_at: Utc.with_ymd_and_hms(2025, 6, 1, 8, 30, 2).unwrap(),
            data,
        }
    }

    #[test]
    fn test_domain_to_row_conversion() {
        let mut data = serde_json::Map::new();
        data.insert("temperature".to_string(), serde_json::json!(23.5));
        data.insert(
            "battery".to_string(),
            serde_json::json!({"voltage": 3.3}),
        );

        let row = ProcessedEnvelopeRow::try_from(&envelope(data)).unwrap();

        assert_eq!(row.organization_id, "org-123");
        assert_eq!(row.end_device_id, "device-456");
        assert_eq!(
            row.occurred_at,
            Utc.with_ymd_and_hms(2025, 6, 1, 8, 30, 0).unwrap()
        );

        let stored: serde_json::Value = serde_json::from_str(&row.data).unwrap();
        assert_eq!(stored["temperature"], serde_json::json!(23.5));
        assert_eq!(stored["battery"]["voltage"], serde_json::json!(3.3));
    }

    #[test]
    fn test_empty_data_conversion() {
        let row = ProcessedEnvelopeRow::try_from(&envelope(serde_json::Map::new())).unwrap();
        assert_eq!(row.data, "{}");
    }
}
