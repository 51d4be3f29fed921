//! Metric Aggregation Module
//!
//! Everything between a raw event payload and a rendered scrape:
//!
//! - **Decoding** JSON events into validated samples
//! - **Series store** keeping the latest sample per identity, with age-based eviction
//! - **Exposition** of a store snapshot in the Prometheus text format

mod types;
mod decoder;
mod store;
mod exposition;
mod store_dst;

pub use types::{LabelSet, MetricKind, Sample, SampleIdentity};
pub use decoder::{normalize_metric_name, DecodeError, DecoderConfig, EventDecoder, FieldValue, MetricName};
pub use store::{SeriesStore, Snapshot, UpsertOutcome};
pub use exposition::{metric_families, render, RenderError, RenderOptions, CONTENT_TYPE};
pub use store_dst::{
    run_store_batch, summarize_store_batch, StoreDSTConfig, StoreDSTHarness, StoreDSTResult,
    StoreOp,
};
