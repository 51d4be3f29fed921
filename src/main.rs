//! Kafka Metrics Exporter
//!
//! Consumes JSON metric events from Kafka and serves the latest value of each
//! series on a Prometheus scrape endpoint.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | KAFKA_BROKERS | (required) | Comma-separated brokers |
//! | KAFKA_TOPICS | (required) | Comma-separated topics |
//! | KAFKA_GROUP_ID | kafka-metrics-exporter | Consumer group |
//! | EXPORTER_PORT | 9000 | Scrape port |
//! | EXPORTER_PATH | /metrics | Scrape path |
//! | EXPORTER_EXPIRATION_SECS | 0 | Sample max age (0 = never) |
//! | EXPORTER_EXPORT_TIMESTAMP | false | Render sample timestamps |
//! | EXPORTER_DROP_LABELS | | Labels to strip |
//! | EXPORTER_LOG_LEVEL | info | Log level |

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use anyhow::{Context, Result};
use kafka_metrics_exporter::config::ExporterConfig;
use kafka_metrics_exporter::metrics::{DecoderConfig, EventDecoder, RenderOptions, SeriesStore};
use kafka_metrics_exporter::observability::init_tracing;
use kafka_metrics_exporter::production::{
    bind, cancel_on_signal, ingest_queue, router, serve, IngestPipeline, KafkaSource,
    DEFAULT_QUEUE_CAPACITY,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ExporterConfig::from_args().context("invalid configuration")?;
    init_tracing(&config.log_level).context("failed to initialize logging")?;

    info!(
        brokers = %config.bootstrap_servers(),
        topics = ?config.topics,
        group_id = %config.group_id,
        port = config.port,
        path = %config.path,
        max_age_secs = config.max_age_secs,
        export_timestamp = config.export_timestamp,
        drop_labels = ?config.drop_labels,
        "starting kafka-metrics-exporter"
    );

    let store = Arc::new(SeriesStore::new(config.max_age_secs));
    let decoder = EventDecoder::new(DecoderConfig {
        drop_labels: config.drop_labels.clone(),
    });
    let (tx, rx) = ingest_queue(DEFAULT_QUEUE_CAPACITY);

    let source = KafkaSource::new(&config).context("failed to start Kafka consumer")?;
    let listener = bind(config.port).await.context("failed to start scrape endpoint")?;
    let app = router(
        store.clone(),
        &config.path,
        RenderOptions {
            export_timestamp: config.export_timestamp,
        },
    );

    let shutdown = CancellationToken::new();
    let signal_task = cancel_on_signal(shutdown.clone());

    let source_token = shutdown.clone();
    let source_task = tokio::spawn(async move {
        let result = source.run(tx, source_token.clone()).await;
        if let Err(e) = &result {
            error!(error = %e, "Kafka consumer failed, shutting down");
            source_token.cancel();
        }
        result
    });

    let pipeline_task = tokio::spawn(IngestPipeline::new(rx, decoder, store).run(shutdown.clone()));

    let server_token = shutdown.clone();
    let server_task = tokio::spawn(async move {
        let result = serve(listener, app, server_token.clone()).await;
        if result.is_err() {
            server_token.cancel();
        }
        result
    });

    let (source_result, pipeline_result, server_result) =
        tokio::join!(source_task, pipeline_task, server_task);
    shutdown.cancel();
    signal_task.abort();

    let stats = pipeline_result.context("ingestion pipeline panicked")?;
    info!(ingested = stats.ingested(), rejected = stats.rejected, "exporter stopped");

    server_result
        .context("scrape server panicked")?
        .context("scrape server failed")?;
    source_result
        .context("Kafka consumer panicked")?
        .context("Kafka consumer failed")?;
    Ok(())
}
