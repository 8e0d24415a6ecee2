//! Cumulative histogram aggregation over the processed envelope table.

use chrono::{DateTime, Utc};
use clickhouse::Row;
use common::domain::{
    DomainError, DomainResult, HistogramBucket, HistogramQueryInput, TimeWindowHistogram,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// JSON types that count as a numeric observation
const NUMERIC_JSON_TYPES: &str = "('Int64', 'UInt64', 'Double')";

/// A bound query parameter, in placeholder order
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryParam {
    Str(String),
    StrList(Vec<String>),
    Float(f64),
    Int(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistogramQuery {
    pub sql: String,
    pub params: Vec<QueryParam>,
}

/// One non-empty time bucket as returned by ClickHouse
#[derive(Debug, Clone, PartialEq, Row, Serialize, Deserialize)]
pub struct HistogramRow {
    /// Unix seconds, aligned to the interval
    pub bucket_start: i64,
    pub total_count: u64,
    pub value_sum: f64,
    /// One cumulative count per threshold, same order
    pub bucket_counts: Vec<u64>,
}

/// Builds the parameterized histogram query.
///
/// Every caller value is a `?` placeholder; only the interval (seconds) and
/// the table name are part of the SQL text.
pub struct HistogramQueryBuilder<'a> {
    table: &'a str,
    input: &'a HistogramQueryInput,
}

impl<'a> HistogramQueryBuilder<'a> {
    pub fn new(table: &'a str, input: &'a HistogramQueryInput) -> Self {
        Self { table, input }
    }

    pub fn build(&self) -> DomainResult<HistogramQuery> {
        let input = self.input;
        let path = field_path_segments(&input.field_path)?;
        let interval_secs = input.time_bucket_interval.as_secs();
        if interval_secs == 0 {
            return Err(DomainError::ValidationError(
                "time bucket interval must be at least one second".to_string(),
            ));
        }

        let mut params = Vec::new();

        // SELECT: one countIf per threshold
        let bucket_counts = if input.thresholds.is_empty() {
            "CAST([], 'Array(UInt64)')".to_string()
        } else {
            let counts = input
                .thresholds
                .iter()
                .map(|threshold| {
                    params.push(QueryParam::Float(*threshold));
                    "countIf(value <= ?)"
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!("[{}]", counts)
        };

        // Inner SELECT: extract the observation
        let path_placeholders = vec!["?"; path.len()].join(", ");
        params.extend(path.iter().map(|s| QueryParam::Str(s.to_string())));

        // WHERE
        params.push(QueryParam::Str(input.organization_id.clone()));
        params.push(QueryParam::Int(input.start_time.timestamp_millis()));
        params.push(QueryParam::Int(input.end_time.timestamp_millis()));

        let device_filter = if input.end_device_ids.is_empty() {
            ""
        } else {
            params.push(QueryParam::StrList(input.end_device_ids.clone()));
            " AND has(?, end_device_id)"
        };

        params.extend(path.iter().map(|s| QueryParam::Str(s.to_string())));

        let sql = format!(
            "SELECT \
                toInt64(toUnixTimestamp(toStartOfInterval(occurred_at, INTERVAL {interval} SECOND))) AS bucket_start, \
                count() AS total_count, \
                sum(value) AS value_sum, \
                {bucket_counts} AS bucket_counts \
            FROM (\
                SELECT occurred_at, JSONExtractFloat(data, {path}) AS value \
                FROM {table} \
                WHERE organization_id = ? \
                AND occurred_at >= fromUnixTimestamp64Milli(toInt64(?)) \
                AND occurred_at < fromUnixTimestamp64Milli(toInt64(?))\
                {device_filter} \
                AND JSONType(data, {path}) IN {numeric}\
            ) \
            GROUP BY bucket_start \
            ORDER BY bucket_start",
            interval = interval_secs,
            bucket_counts = bucket_counts,
            path = path_placeholders,
            table = self.table,
            device_filter = device_filter,
            numeric = NUMERIC_JSON_TYPES,
        );

        Ok(HistogramQuery { sql, params })
    }
}

/// Split `a.b.c` into JSON path keys
pub fn field_path_segments(field_path: &str) -> DomainResult<Vec<&str>> {
    let segments: Vec<&str> = field_path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(DomainError::ValidationError(format!(
            "invalid field path '{}': empty segment",
            field_path
        )));
    }
    Ok(segments)
}

/// Expand the non-empty rows from ClickHouse into one histogram per
/// epoch-aligned bucket in `[floor(start), end)`, closing every row with `+inf`.
pub fn fill_empty_buckets(
    rows: Vec<HistogramRow>,
    input: &HistogramQueryInput,
) -> DomainResult<Vec<TimeWindowHistogram>> {
    let interval = input.time_bucket_interval.as_secs() as i64;
    if interval <= 0 {
        return Err(DomainError::ValidationError(
            "time bucket interval must be at least one second".to_string(),
        ));
    }

    let mut by_start: HashMap<i64, HistogramRow> =
        rows.into_iter().map(|row| (row.bucket_start, row)).collect();

    let end_millis = input.end_time.timestamp_millis();
    let mut bucket_start = input.start_time.timestamp().div_euclid(interval) * interval;
    let mut result = Vec::new();

    while bucket_start * 1000 < end_millis {
        let start = to_datetime(bucket_start)?;
        let end = to_datetime(bucket_start + interval)?;

        let histogram = match by_start.remove(&bucket_start) {
            Some(row) => to_histogram(row, start, end, &input.thresholds)?,
            None => TimeWindowHistogram::empty(start, end, &input.thresholds),
        };
        result.push(histogram);

        bucket_start += interval;
    }

    if !by_start.is_empty() {
        let mut unmatched: Vec<i64> = by_start.into_keys().collect();
        unmatched.sort_unstable();
        return Err(DomainError::StoreError(anyhow::anyhow!(
            "histogram rows at bucket starts {:?} do not align to {}s buckets in the requested range",
            unmatched,
            interval
        )));
    }

    Ok(result)
}

fn to_histogram(
    row: HistogramRow,
    bucket_start: DateTime<Utc>,
    bucket_end: DateTime<Utc>,
    thresholds: &[f64],
) -> DomainResult<TimeWindowHistogram> {
    if row.bucket_counts.len() != thresholds.len() {
        return Err(DomainError::StoreError(anyhow::anyhow!(
            "histogram row has {} bucket counts for {} thresholds",
            row.bucket_counts.len(),
            thresholds.len()
        )));
    }

    let buckets = thresholds
        .iter()
        .zip(row.bucket_counts)
        .map(|(le, cumulative_count)| HistogramBucket {
            le: *le,
            cumulative_count,
        })
        .chain(std::iter::once(HistogramBucket {
            le: f64::INFINITY,
            cumulative_count: row.total_count,
        }))
        .collect();

    Ok(TimeWindowHistogram {
        bucket_start,
        bucket_end,
        buckets,
        count: row.total_count,
        sum: row.value_sum,
    })
}

fn to_datetime(secs: i64) -> DomainResult<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| {
        DomainError::ValidationError(format!("bucket start {} is out of range", secs))
    })
}
