//! Kafka consumer-group source
//!
//! Receives raw event payloads and forwards them to the ingest queue. Offsets
//! are stored only after a payload has been enqueued (at-least-once); librdkafka
//! auto-commits stored offsets and the final state is committed on shutdown.

use crate::config::ExporterConfig;
use bytes::Bytes;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, ConsumerContext, StreamConsumer};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::{ClientContext, Message, TopicPartitionList};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
/// Consecutive receive failures before the source gives up
pub const MAX_CONSECUTIVE_ERRORS: u32 = 10;

#[derive(Debug)]
pub enum SourceError {
    Create(KafkaError),
    Subscribe(KafkaError),
    /// Receive kept failing; carries the last error
    Receive { consecutive: u32, last: KafkaError },
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Create(e) => write!(f, "failed to create Kafka consumer: {}", e),
            SourceError::Subscribe(e) => write!(f, "failed to subscribe to topics: {}", e),
            SourceError::Receive { consecutive, last } => write!(
                f,
                "Kafka receive failed {} consecutive times, last error: {}",
                consecutive, last
            ),
        }
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SourceError::Create(e) | SourceError::Subscribe(e) => Some(e),
            SourceError::Receive { last, .. } => Some(last),
        }
    }
}

/// Routes client-level errors and commit results into the log
pub struct LoggingContext;

impl ClientContext for LoggingContext {
    fn error(&self, error: KafkaError, reason: &str) {
        error!(error = %error, reason, "Kafka client error");
    }
}

impl ConsumerContext for LoggingContext {
    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        match result {
            Ok(()) => debug!(partitions = offsets.count(), "offsets committed"),
            // Nothing stored since the last commit
            Err(KafkaError::ConsumerCommit(rdkafka::types::RDKafkaErrorCode::NoOffset)) => {}
            Err(e) => warn!(error = %e, "offset commit failed"),
        }
    }
}

/// librdkafka settings for the exporter's consumer
pub fn client_config(config: &ExporterConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", config.bootstrap_servers())
        .set("group.id", &config.group_id)
        .set("enable.auto.commit", "true")
        // Store offsets only after the payload is queued (at-least-once)
        .set("enable.auto.offset.store", "false")
        .set("auto.offset.reset", "earliest")
        .set("enable.partition.eof", "false");
    client
}

/// Exponential backoff between failed receives
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    failures: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff {
            next: INITIAL_BACKOFF,
            failures: 0,
        }
    }
}

impl Backoff {
    /// Record a failure and return how long to wait before retrying
    pub fn fail(&mut self) -> Duration {
        let delay = self.next;
        self.failures += 1;
        self.next = (self.next * 2).min(MAX_BACKOFF);
        delay
    }

    pub fn reset(&mut self) {
        *self = Backoff::default();
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

/// Counters reported when the source stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub received: u64,
    pub forwarded: u64,
    pub empty_payloads: u64,
}

pub struct KafkaSource {
    consumer: StreamConsumer<LoggingContext>,
    topics: Vec<String>,
}

impl KafkaSource {
    /// Create the consumer and subscribe. Failures here are fatal at startup.
    pub fn new(config: &ExporterConfig) -> Result<Self, SourceError> {
        let consumer: StreamConsumer<LoggingContext> = client_config(config)
            .create_with_context(LoggingContext)
            .map_err(SourceError::Create)?;

        let topics: Vec<&str> = config.topics.iter().map(String::as_str).collect();
        consumer.subscribe(&topics).map_err(SourceError::Subscribe)?;

        info!(
            brokers = %config.bootstrap_servers(),
            group_id = %config.group_id,
            topics = ?config.topics,
            "Kafka consumer subscribed"
        );

        Ok(KafkaSource {
            consumer,
            topics: config.topics.clone(),
        })
    }

    /// Forward payloads into `tx` until shutdown, queue closure, or too many
    /// consecutive receive failures.
    pub async fn run(
        self,
        tx: mpsc::Sender<Bytes>,
        shutdown: CancellationToken,
    ) -> Result<SourceStats, SourceError> {
        let mut stats = SourceStats::default();
        let mut backoff = Backoff::default();

        let outcome = loop {
            let received = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("shutdown requested, stopping Kafka consumer");
                    break Ok(());
                }
                received = self.consumer.recv() => received,
            };

            let message = match received {
                Ok(message) => message,
                Err(e) => {
                    let delay = backoff.fail();
                    if backoff.failures() >= MAX_CONSECUTIVE_ERRORS {
                        error!(error = %e, failures = backoff.failures(), "giving up on Kafka consumer");
                        break Err(SourceError::Receive {
                            consecutive: backoff.failures(),
                            last: e,
                        });
                    }
                    warn!(
                        error = %e,
                        failures = backoff.failures(),
                        retry_in_ms = delay.as_millis() as u64,
                        "Kafka receive failed"
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => break Ok(()),
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
            };
            backoff.reset();
            stats.received += 1;

            let topic = message.topic().to_string();
            let partition = message.partition();
            let offset = message.offset();
            let payload = message.payload().map(Bytes::copy_from_slice);
            drop(message);

            match payload {
                Some(payload) => {
                    let sent = tokio::select! {
                        _ = shutdown.cancelled() => break Ok(()),
                        sent = tx.send(payload) => sent,
                    };
                    if sent.is_err() {
                        info!("ingest queue closed, stopping Kafka consumer");
                        break Ok(());
                    }
                    stats.forwarded += 1;
                }
                None => {
                    stats.empty_payloads += 1;
                    warn!(topic = %topic, partition, offset, "skipping Kafka message without payload");
                }
            }

            if let Err(e) = self.consumer.store_offset(&topic, partition, offset + 1) {
                error!(error = %e, topic = %topic, partition, offset, "failed to store offset");
            }
        };

        self.commit();
        info!(
            topics = ?self.topics,
            received = stats.received,
            forwarded = stats.forwarded,
            empty_payloads = stats.empty_payloads,
            "Kafka consumer stopped"
        );
        outcome.map(|()| stats)
    }

    fn commit(&self) {
        match self.consumer.commit_consumer_state(CommitMode::Sync) {
            Ok(()) => info!("committed consumer state"),
            Err(KafkaError::ConsumerCommit(rdkafka::types::RDKafkaErrorCode::NoOffset)) => {
                debug!("no offsets to commit")
            }
            Err(e) => error!(error = %e, "commit_consumer_state failed during shutdown"),
        }
    }
}
