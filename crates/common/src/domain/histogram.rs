use crate::domain::result::DomainResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

/// One cumulative bucket: number of observations `<= le`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramBucket {
    pub le: f64,
    pub cumulative_count: u64,
}

/// Cumulative histogram for a single time bucket `[bucket_start, bucket_end)`.
/// The last bucket always has `le = +inf` and `cumulative_count == count`.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeWindowHistogram {
    pub bucket_start: DateTime<Utc>,
    pub bucket_end: DateTime<Utc>,
    pub buckets: Vec<HistogramBucket>,
    pub count: u64,
    pub sum: f64,
}

impl TimeWindowHistogram {
    /// Histogram row for a bucket with no contributing records
    pub fn empty(bucket_start: DateTime<Utc>, bucket_end: DateTime<Utc>, thresholds: &[f64]) -> Self {
        let buckets = thresholds
            .iter()
            .chain(std::iter::once(&f64::INFINITY))
            .map(|le| HistogramBucket {
                le: *le,
                cumulative_count: 0,
            })
            .collect();

        Self {
            bucket_start,
            bucket_end,
            buckets,
            count: 0,
            sum: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryMetadata {
    pub total_count: u64,
    pub time_bucket_interval: Duration,
    pub time_bucket_count: u32,
    pub device_count: u32,
}

/// Store-level histogram query. Thresholds are expected sorted and deduplicated.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramQueryInput {
    pub organization_id: String,
    /// Empty means every device of the organization
    pub end_device_ids: Vec<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub field_path: String,
    pub thresholds: Vec<f64>,
    pub time_bucket_interval: Duration,
}

/// Read side of the time-series store
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait EndDeviceDataRepository: Send + Sync {
    async fn query_histogram(
        &self,
        input: HistogramQueryInput,
    ) -> DomainResult<Vec<TimeWindowHistogram>>;
}

/// Pick the display granularity for a query range.
///
/// | range    | interval |
/// |----------|----------|
/// | < 1h     | 5m       |
/// | < 6h     | 15m      |
/// | < 24h    | 1h       |
/// | < 7d     | 6h       |
/// | >= 7d    | 1d       |
pub fn calculate_time_bucket_interval(start: DateTime<Utc>, end: DateTime<Utc>) -> Duration {
    // Negative ranges are rejected by callers; treat them as the shortest range.
    let range = (end - start).num_seconds().max(0) as u64;

    let secs = if range < HOUR {
        5 * MINUTE
    } else if range < 6 * HOUR {
        15 * MINUTE
    } else if range < DAY {
        HOUR
    } else if range < 7 * DAY {
        6 * HOUR
    } else {
        DAY
    };

    Duration::from_secs(secs)
}
