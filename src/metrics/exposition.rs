//! Prometheus text exposition
//!
//! ```text
//! # HELP requests_total requests_total
//! # TYPE requests_total counter
//! requests_total{path="/a"} 2 1001000
//! ```
//!
//! Samples are grouped into one `MetricFamily` per name and encoded with the
//! `prometheus` text encoder. Families are sorted by name and series by label
//! set. A series that cannot be described is skipped and logged; the rest of
//! the scrape is unaffected.

use super::types::{MetricKind, Sample};
use prometheus::core::Desc;
use prometheus::proto::{Counter, Gauge, LabelPair, Metric, MetricFamily, MetricType};
use prometheus::{Encoder, TextEncoder};
use std::collections::HashMap;
use tracing::error;

/// Content type served with the rendered text
pub const CONTENT_TYPE: &str = prometheus::TEXT_FORMAT;

/// Why one series was left out of a scrape
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// Name or label names rejected by the metric descriptor
    InvalidSeries { metric: String, reason: String },
    /// Family already declared with a different `# TYPE`
    KindConflict {
        metric: String,
        declared: MetricKind,
        found: MetricKind,
    },
}

impl std::fmt::Display for RenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenderError::InvalidSeries { metric, reason } => {
                write!(f, "invalid series for metric '{}': {}", metric, reason)
            }
            RenderError::KindConflict {
                metric,
                declared,
                found,
            } => write!(
                f,
                "metric '{}' declared as {} but sample is {}",
                metric,
                declared.exposition_type(),
                found.exposition_type()
            ),
        }
    }
}

impl std::error::Error for RenderError {}

/// Rendering options
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    /// Attach each sample's observation time as an explicit timestamp
    pub export_timestamp: bool,
}

/// Build sorted metric families from samples. Invalid series are skipped.
pub fn metric_families<'a, I>(samples: I, options: RenderOptions) -> Vec<MetricFamily>
where
    I: IntoIterator<Item = &'a Sample>,
{
    let mut samples: Vec<&Sample> = samples.into_iter().collect();
    samples.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.labels.cmp(&b.labels)));

    let mut families = Vec::new();
    let mut current: Option<(MetricKind, MetricFamily)> = None;

    for sample in samples {
        let declared = match &current {
            Some((kind, family)) if family.get_name() == sample.name => Some(*kind),
            _ => None,
        };

        if let Err(e) = validate(sample, declared) {
            error!(
                metric = %sample.name,
                label_names = ?sample.label_names(),
                label_values = ?sample.label_values(),
                error = %e,
                "skipping series that cannot be rendered"
            );
            continue;
        }

        if declared.is_none() {
            if let Some((_, family)) = current.take() {
                families.push(family);
            }
            current = Some((sample.kind, new_family(&sample.name, sample.kind)));
        }
        if let Some((_, family)) = current.as_mut() {
            family.mut_metric().push(to_metric(sample, options));
        }
    }

    if let Some((_, family)) = current {
        families.push(family);
    }
    families
}

/// Render samples as exposition text. Pure; failures only skip series.
pub fn render<'a, I>(samples: I, options: RenderOptions) -> String
where
    I: IntoIterator<Item = &'a Sample>,
{
    let families = metric_families(samples, options);
    let encoder = TextEncoder::new();
    let mut buffer = Vec::with_capacity(families.len() * 128);

    for family in &families {
        let mut chunk = Vec::new();
        match encoder.encode(std::slice::from_ref(family), &mut chunk) {
            Ok(()) => buffer.extend_from_slice(&chunk),
            Err(e) => error!(metric = family.get_name(), error = %e, "failed to encode metric family"),
        }
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

fn validate(sample: &Sample, family_kind: Option<MetricKind>) -> Result<(), RenderError> {
    // Help text is the metric name itself
    let label_names = sample.labels.names().map(str::to_string).collect();
    Desc::new(sample.name.clone(), sample.name.clone(), label_names, HashMap::new()).map_err(
        |e| RenderError::InvalidSeries {
            metric: sample.name.clone(),
            reason: e.to_string(),
        },
    )?;

    match family_kind {
        Some(declared) if declared != sample.kind => Err(RenderError::KindConflict {
            metric: sample.name.clone(),
            declared,
            found: sample.kind,
        }),
        _ => Ok(()),
    }
}

fn new_family(name: &str, kind: MetricKind) -> MetricFamily {
    let mut family = MetricFamily::default();
    family.set_name(name.to_string());
    family.set_help(name.to_string());
    family.set_field_type(match kind {
        MetricKind::Gauge => MetricType::GAUGE,
        MetricKind::Counter => MetricType::COUNTER,
    });
    family
}

fn to_metric(sample: &Sample, options: RenderOptions) -> Metric {
    let mut metric = Metric::default();
    for (name, value) in sample.labels.iter() {
        let mut pair = LabelPair::default();
        pair.set_name(name.to_string());
        pair.set_value(value.to_string());
        metric.mut_label().push(pair);
    }

    match sample.kind {
        MetricKind::Gauge => {
            let mut gauge = Gauge::default();
            gauge.set_value(sample.value);
            metric.set_gauge(gauge);
        }
        MetricKind::Counter => {
            let mut counter = Counter::default();
            counter.set_value(sample.value);
            metric.set_counter(counter);
        }
    }

    // The encoder omits a zero timestamp
    if options.export_timestamp {
        metric.set_timestamp_ms(sample.observed_at.saturating_mul(1000));
    }
    metric
}
