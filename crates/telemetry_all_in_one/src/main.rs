mod config;

use analytics_worker::{AnalyticsWorker, AnalyticsWorkerConfig, ClickHouseEnvelopeRepository};
use common::clickhouse::ClickHouseClient;
use common::nats::NatsClient;
use common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig, TelemetryProviders};
use config::ServiceConfig;
use goose::MigrationRunner;
use std::sync::Arc;
use std::time::Duration;
use telemetry_runner::Runner;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let telemetry_providers: Option<TelemetryProviders> = match init_telemetry(&TelemetryConfig {
        service_name: config.otel_service_name.clone(),
        otel_endpoint: config.otel_endpoint.clone(),
        otel_enabled: config.otel_enabled,
        log_level: config.log_level.clone(),
    }) {
        Ok(providers) => providers,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {:#}", e);
            std::process::exit(1);
        }
    };

    info!(
        otel_enabled = config.otel_enabled,
        otel_endpoint = %config.otel_endpoint,
        "Starting telemetry-all-in-one service"
    );
    debug!("Configuration: {:?}", config);

    let (clickhouse_client, nats_client) = match initialize_shared_dependencies(&config).await {
        Ok(deps) => deps,
        Err(e) => {
            error!("Failed to initialize shared dependencies: {:#}", e);
            std::process::exit(1);
        }
    };

    let envelope_repository = Arc::new(ClickHouseEnvelopeRepository::new(
        clickhouse_client,
        config.clickhouse_table.clone(),
    ));

    let analytics_worker = match AnalyticsWorker::new(
        envelope_repository,
        nats_client.create_consumer_client(),
        AnalyticsWorkerConfig {
            processed_envelopes_stream: config.processed_envelopes_stream.clone(),
            processed_envelopes_subject: config.processed_envelopes_subject.clone(),
            consumer_name: config.analytics_consumer_name.clone(),
            nats_batch_size: config.nats_batch_size,
            nats_batch_wait_secs: config.nats_batch_wait_secs,
        },
    )
    .await
    {
        Ok(worker) => worker,
        Err(e) => {
            error!("Failed to initialize analytics worker: {:#}", e);
            std::process::exit(1);
        }
    };

    Runner::new()
        .with_app_process("analytics_worker", move |ctx| analytics_worker.run(ctx))
        .with_closer(move || async move {
            info!("Running cleanup tasks...");
            if let Err(e) = nats_client.close().await {
                error!("Failed to close NATS client: {:#}", e);
            }

            // flush pending spans
            shutdown_telemetry(telemetry_providers);

            info!("Cleanup complete");
            Ok(())
        })
        .with_closer_timeout(Duration::from_secs(config.shutdown_timeout_secs))
        .run()
        .await;
}

async fn initialize_shared_dependencies(
    config: &ServiceConfig,
) -> anyhow::Result<(ClickHouseClient, NatsClient)> {
    info!("Initializing ClickHouse...");
    run_clickhouse_migrations(config).await?;
    let clickhouse_client = create_clickhouse_client(config).await?;

    info!("Initializing NATS...");
    let nats_client = NatsClient::connect(
        &config.nats_url,
        Duration::from_secs(config.startup_timeout_secs),
    )
    .await?;
    nats_client
        .ensure_stream(&config.processed_envelopes_stream)
        .await?;

    Ok((clickhouse_client, nats_client))
}

async fn run_clickhouse_migrations(config: &ServiceConfig) -> anyhow::Result<()> {
    MigrationRunner::clickhouse(
        config.clickhouse_goose_binary_path.clone(),
        config.clickhouse_migrations_dir.clone(),
        &config.clickhouse_native_url,
        &config.clickhouse_database,
        &config.clickhouse_username,
        &config.clickhouse_password,
    )
    .run_migrations()
    .await
}

async fn create_clickhouse_client(config: &ServiceConfig) -> anyhow::Result<ClickHouseClient> {
    let client = ClickHouseClient::new(
        &config.clickhouse_url,
        &config.clickhouse_database,
        &config.clickhouse_username,
        &config.clickhouse_password,
    );
    client.ping().await?;
    Ok(client)
}
