//! Kafka to Prometheus metrics exporter
//!
//! JSON metric events consumed from Kafka are decoded into samples, kept as the
//! latest value per series in [`metrics::SeriesStore`], and served on a scrape
//! endpoint in the Prometheus text format.

pub mod clock;
pub mod config;
pub mod metrics;
pub mod observability;
pub mod production;

pub use clock::{Clock, SimulatedClock, SystemClock};
pub use config::{ConfigError, ExporterArgs, ExporterConfig};
pub use metrics::{EventDecoder, Sample, SampleIdentity, SeriesStore};
