use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // NATS configuration
    /// NATS server URL
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// NATS JetStream stream name
    #[serde(default = "default_processed_envelopes_stream")]
    pub processed_envelopes_stream: String,

    /// NATS subject pattern for consumer filter
    #[serde(default = "default_processed_envelopes_subject")]
    pub processed_envelopes_subject: String,

    /// Durable consumer name shared by every worker replica
    #[serde(default = "default_analytics_consumer_name")]
    pub analytics_consumer_name: String,

    /// Batch size for consumer
    #[serde(default = "default_nats_batch_size")]
    pub nats_batch_size: usize,

    /// Max wait time for batches in seconds
    #[serde(default = "default_nats_batch_wait_secs")]
    pub nats_batch_wait_secs: u64,

    /// Startup timeout for initialization operations in seconds
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    // ClickHouse configuration
    /// ClickHouse HTTP URL (for client connections)
    #[serde(default = "default_clickhouse_url")]
    pub clickhouse_url: String,

    /// ClickHouse native TCP address (for migrations with goose)
    #[serde(default = "default_clickhouse_native_url")]
    pub clickhouse_native_url: String,

    #[serde(default = "default_clickhouse_database")]
    pub clickhouse_database: String,

    #[serde(default = "default_clickhouse_username")]
    pub clickhouse_username: String,

    #[serde(default = "default_clickhouse_password")]
    pub clickhouse_password: String,

    /// Table holding processed envelopes
    #[serde(default = "default_clickhouse_table")]
    pub clickhouse_table: String,

    /// Path to migrations directory
    #[serde(default = "default_clickhouse_migrations_dir")]
    pub clickhouse_migrations_dir: String,

    /// Path to goose binary
    #[serde(default = "default_clickhouse_goose_binary_path")]
    pub clickhouse_goose_binary_path: String,

    // OpenTelemetry configuration
    /// OpenTelemetry OTLP endpoint (gRPC)
    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    /// Enable OpenTelemetry trace export
    #[serde(default = "default_otel_enabled")]
    pub otel_enabled: bool,

    /// Service name for OpenTelemetry resource
    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,

    /// Seconds closers get to flush before the process exits anyway
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

// NATS defaults
fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_processed_envelopes_stream() -> String {
    "processed_envelopes".to_string()
}

fn default_processed_envelopes_subject() -> String {
    "processed_envelopes.>".to_string()
}

fn default_analytics_consumer_name() -> String {
    "analytics_worker".to_string()
}

fn default_nats_batch_size() -> usize {
    30
}

fn default_nats_batch_wait_secs() -> u64 {
    5
}

fn default_startup_timeout_secs() -> u64 {
    30
}

// ClickHouse defaults
fn default_clickhouse_url() -> String {
    "http://localhost:8123".to_string()
}

fn default_clickhouse_native_url() -> String {
    "localhost:9000".to_string()
}

fn default_clickhouse_database() -> String {
    "telemetry".to_string()
}

fn default_clickhouse_username() -> String {
    "telemetry".to_string()
}

fn default_clickhouse_password() -> String {
    "telemetry".to_string()
}

fn default_clickhouse_table() -> String {
    "processed_envelopes".to_string()
}

fn default_clickhouse_migrations_dir() -> String {
    "/home/telemetry/migrations/clickhouse".to_string()
}

fn default_clickhouse_goose_binary_path() -> String {
    "goose".to_string()
}

// OpenTelemetry defaults
fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_enabled() -> bool {
    false
}

fn default_otel_service_name() -> String {
    "telemetry-all-in-one".to_string()
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("TELEMETRY"))
            .build()?
            .try_deserialize()
    }
}
