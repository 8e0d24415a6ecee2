use chrono::{DateTime, Utc};
use common::domain::{
    calculate_time_bucket_interval, CountEndDevicesInput, DomainError, DomainResult,
    EndDeviceDataRepository, EndDeviceRepository, HistogramQueryInput, QueryMetadata,
    TimeWindowHistogram,
};
use garde::Validate;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Upper bound on time windows in one response
pub const MAX_TIME_BUCKETS: u64 = 10_000;

/// Histogram request for one organization
#[derive(Debug, Clone, Validate)]
pub struct QueryEndDeviceDataInput {
    #[garde(length(min = 1))]
    pub organization_id: String,
    /// Empty means every device of the organization
    #[garde(skip)]
    pub end_device_ids: Vec<String>,
    #[garde(skip)]
    pub start_time: DateTime<Utc>,
    #[garde(skip)]
    pub end_time: DateTime<Utc>,
    /// Dot-separated path into the payload, e.g. `sensors.temp`
    #[garde(length(min = 1))]
    pub field_path: String,
    #[garde(custom(finite_thresholds))]
    pub thresholds: Vec<f64>,
}

#[allow(clippy::ptr_arg)]
fn finite_thresholds(value: &Vec<f64>, _context: &()) -> garde::Result {
    if value.iter().any(|t| !t.is_finite()) {
        return Err(garde::Error::new("thresholds must be finite numbers"));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryEndDeviceDataOutput {
    pub time_series: Vec<TimeWindowHistogram>,
    pub metadata: QueryMetadata,
}

/// Query entry point: validates the request, picks the bucket interval, runs
/// the histogram query and summarizes it.
pub struct EndDeviceDataService {
    data_repository: Arc<dyn EndDeviceDataRepository>,
    end_device_repository: Arc<dyn EndDeviceRepository>,
}

impl EndDeviceDataService {
    pub fn new(
        data_repository: Arc<dyn EndDeviceDataRepository>,
        end_device_repository: Arc<dyn EndDeviceRepository>,
    ) -> Self {
        Self {
            data_repository,
            end_device_repository,
        }
    }

    #[instrument(
        skip_all,
        fields(
            organization_id = %input.organization_id,
            field_path = %input.field_path,
            device_filter = input.end_device_ids.len()
        )
    )]
    pub async fn query_end_device_data(
        &self,
        input: QueryEndDeviceDataInput,
    ) -> DomainResult<QueryEndDeviceDataOutput> {
        common::garde::validate_struct(&input)?;

        if input.end_time <= input.start_time {
            return Err(DomainError::ValidationError(
                "end_time must be after start_time".to_string(),
            ));
        }

        if input.field_path.split('.').any(str::is_empty) {
            return Err(DomainError::ValidationError(format!(
                "field_path '{}' contains an empty segment",
                input.field_path
            )));
        }

        let mut thresholds = input.thresholds;
        thresholds.sort_by(f64::total_cmp);
        thresholds.dedup();

        let time_bucket_interval = calculate_time_bucket_interval(input.start_time, input.end_time);

        let range_secs = (input.end_time - input.start_time).num_seconds().max(0) as u64;
        let window_count = range_secs / time_bucket_interval.as_secs() + 1;
        if window_count > MAX_TIME_BUCKETS {
            return Err(DomainError::ValidationError(format!(
                "time range spans {} buckets of {}s, at most {} allowed",
                window_count,
                time_bucket_interval.as_secs(),
                MAX_TIME_BUCKETS
            )));
        }

        let mut end_device_ids = input.end_device_ids;
        end_device_ids.sort();
        end_device_ids.dedup();

        let device_count = if end_device_ids.is_empty() {
            self.end_device_repository
                .count_end_devices(CountEndDevicesInput {
                    organization_id: input.organization_id.clone(),
                })
                .await?
        } else {
            u32::try_from(end_device_ids.len()).unwrap_or(u32::MAX)
        };

        let time_series = self
            .data_repository
            .query_histogram(HistogramQueryInput {
                organization_id: input.organization_id,
                end_device_ids,
                start_time: input.start_time,
                end_time: input.end_time,
                field_path: input.field_path,
                thresholds,
                time_bucket_interval,
            })
            .await?;

        let metadata = QueryMetadata {
            total_count: time_series.iter().map(|w| w.count).sum(),
            time_bucket_interval,
            time_bucket_count: u32::try_from(time_series.len()).unwrap_or(u32::MAX),
            device_count,
        };

        debug!(
            total_count = metadata.total_count,
            time_bucket_count = metadata.time_bucket_count,
            "histogram query complete"
        );

        Ok(QueryEndDeviceDataOutput {
            time_series,
            metadata,
        })
    }
}
