//! Ingestion pipeline
//!
//! A single task drains the bounded payload queue, decodes each payload and
//! upserts the resulting sample. Upserts happen in dequeue order; a payload
//! that fails to decode is logged and dropped.

use crate::clock::Clock;
use crate::metrics::{DecodeError, EventDecoder, SeriesStore, UpsertOutcome};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default bound on payloads waiting to be ingested
pub const DEFAULT_QUEUE_CAPACITY: usize = 100_000;

/// Create the bounded queue between the stream consumer and the pipeline
pub fn ingest_queue(capacity: usize) -> (mpsc::Sender<Bytes>, mpsc::Receiver<Bytes>) {
    debug_assert!(capacity > 0, "queue capacity must be positive");
    mpsc::channel(capacity)
}

/// Counters reported when the pipeline stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub inserted: u64,
    pub replaced: u64,
    pub rejected: u64,
}

impl PipelineStats {
    pub fn ingested(&self) -> u64 {
        self.inserted + self.replaced
    }

    fn record(&mut self, result: &Result<UpsertOutcome, DecodeError>) {
        match result {
            Ok(UpsertOutcome::Inserted) => self.inserted += 1,
            Ok(UpsertOutcome::Replaced) => self.replaced += 1,
            Err(_) => self.rejected += 1,
        }
    }
}

pub struct IngestPipeline<C: Clock> {
    rx: mpsc::Receiver<Bytes>,
    decoder: EventDecoder,
    store: Arc<SeriesStore<C>>,
    stats: PipelineStats,
}

impl<C: Clock> IngestPipeline<C> {
    pub fn new(rx: mpsc::Receiver<Bytes>, decoder: EventDecoder, store: Arc<SeriesStore<C>>) -> Self {
        IngestPipeline {
            rx,
            decoder,
            store,
            stats: PipelineStats::default(),
        }
    }

    /// Decode one payload and upsert it. Decode failures leave the store untouched.
    pub fn process(&self, payload: &[u8]) -> Result<UpsertOutcome, DecodeError> {
        let sample = self.decoder.decode(payload, self.store.clock().now_secs())?;
        debug!(
            metric = %sample.name,
            kind = sample.kind.exposition_type(),
            labels = ?sample.labels,
            fingerprint = sample.identity().fingerprint(),
            "ingesting sample"
        );
        Ok(self.store.upsert(sample))
    }

    /// Drain the queue until it closes or `shutdown` is cancelled
    pub async fn run(mut self, shutdown: CancellationToken) -> PipelineStats {
        info!("ingestion pipeline started");

        loop {
            let payload = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("shutdown requested, stopping ingestion pipeline");
                    break;
                }
                payload = self.rx.recv() => match payload {
                    Some(payload) => payload,
                    None => {
                        info!("ingest queue closed, stopping ingestion pipeline");
                        break;
                    }
                },
            };

            let result = self.process(&payload);
            if let Err(e) = &result {
                warn!(error = %e, payload_len = payload.len(), "dropping undecodable event");
            }
            self.stats.record(&result);
        }

        info!(
            inserted = self.stats.inserted,
            replaced = self.stats.replaced,
            rejected = self.stats.rejected,
            "ingestion pipeline stopped"
        );
        self.stats
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }
}
