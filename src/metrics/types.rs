//! Core metric types for the aggregation store

use fnv::FnvHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// Kind of value carried by a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// Point-in-time value
    /// Use for: CPU load, memory usage, queue depth
    Gauge,

    /// Monotonically increasing counter, reported as its running total
    /// Use for: request counts, error counts
    Counter,
}

impl MetricKind {
    /// Parse the `valueType` field of an event (`GAUGE` / `COUNTER`)
    pub fn from_value_type(value_type: &str) -> Option<MetricKind> {
        match value_type {
            "GAUGE" => Some(MetricKind::Gauge),
            "COUNTER" => Some(MetricKind::Counter),
            _ => None,
        }
    }

    /// Name used on the `# TYPE` line of the exposition format
    pub fn exposition_type(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }
}

/// A set of labels (name-value pairs) associated with a sample
/// Labels are stored in sorted order so identity is independent of event key order
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelSet {
    labels: BTreeMap<String, String>,
}

impl LabelSet {
    /// Create a new LabelSet from name-value pairs
    pub fn new(labels: BTreeMap<String, String>) -> Self {
        LabelSet { labels }
    }

    /// Create an empty LabelSet
    pub fn empty() -> Self {
        LabelSet::default()
    }

    /// Create LabelSet from slice of (name, value) tuples
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        let labels = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self::new(labels)
    }

    /// Label names in lexicographic order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.labels.keys().map(String::as_str)
    }

    /// Label values, positionally aligned with [`LabelSet::names`]
    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.labels.values().map(String::as_str)
    }

    /// Sorted (name, value) pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.labels.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Get a specific label value
    pub fn get(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }

    /// Check whether a label name is present
    pub fn contains(&self, name: &str) -> bool {
        self.labels.contains_key(name)
    }

    /// Number of labels
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl FromIterator<(String, String)> for LabelSet {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        LabelSet::new(iter.into_iter().collect())
    }
}

/// Key identifying one series: metric name plus its sorted label set.
///
/// Equality is structural, so two distinct label sets can never collide the
/// way a joined string key could (`a="x,y"` vs `a="x",b="y"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SampleIdentity {
    name: String,
    labels: LabelSet,
}

impl SampleIdentity {
    pub fn new(name: impl Into<String>, labels: LabelSet) -> Self {
        SampleIdentity {
            name: name.into(),
            labels,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    /// Stable 64-bit FNV-1a digest of (name, label names, label values).
    ///
    /// Fields are length-prefixed so the digest is unambiguous; used for log
    /// correlation only, the store keys on the full identity.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = FnvHasher::default();
        write_field(&mut hasher, &self.name);
        hasher.write_usize(self.labels.len());
        for name in self.labels.names() {
            write_field(&mut hasher, name);
        }
        for value in self.labels.values() {
            write_field(&mut hasher, value);
        }
        hasher.finish()
    }
}

impl std::fmt::Display for SampleIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{{", self.name)?;
        for (i, (k, v)) in self.labels.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}={:?}", k, v)?;
        }
        write!(f, "}}")
    }
}

fn write_field(hasher: &mut FnvHasher, field: &str) {
    hasher.write_usize(field.len());
    field.hash(hasher);
}

/// A single observed metric reading
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Metric (family) name, e.g. "svc_latency"
    pub name: String,

    /// Labels of this series
    pub labels: LabelSet,

    /// Observed value
    pub value: f64,

    /// Kind of value
    pub kind: MetricKind,

    /// Observation time in seconds since the Unix epoch
    pub observed_at: i64,
}

impl Sample {
    pub fn new(
        name: impl Into<String>,
        labels: LabelSet,
        value: f64,
        kind: MetricKind,
        observed_at: i64,
    ) -> Self {
        Sample {
            name: name.into(),
            labels,
            value,
            kind,
            observed_at,
        }
    }

    /// Create a gauge sample
    pub fn gauge(name: impl Into<String>, labels: LabelSet, value: f64, observed_at: i64) -> Self {
        Self::new(name, labels, value, MetricKind::Gauge, observed_at)
    }

    /// Create a counter sample
    pub fn counter(
        name: impl Into<String>,
        labels: LabelSet,
        value: f64,
        observed_at: i64,
    ) -> Self {
        Self::new(name, labels, value, MetricKind::Counter, observed_at)
    }

    /// Identity of the series this sample belongs to
    pub fn identity(&self) -> SampleIdentity {
        SampleIdentity::new(self.name.clone(), self.labels.clone())
    }

    /// Label names, sorted
    pub fn label_names(&self) -> Vec<&str> {
        self.labels.names().collect()
    }

    /// Label values, aligned with [`Sample::label_names`]
    pub fn label_values(&self) -> Vec<&str> {
        self.labels.values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_set_sorted_and_aligned() {
        let labels = LabelSet::from_pairs(&[("zone", "b"), ("app", "api"), ("host", "web01")]);
        let names: Vec<_> = labels.names().collect();
        let values: Vec<_> = labels.values().collect();
        assert_eq!(names, vec!["app", "host", "zone"]);
        assert_eq!(values, vec!["api", "web01", "b"]);
    }

    #[test]
    fn test_identity_independent_of_label_order() {
        let a = Sample::gauge("cpu", LabelSet::from_pairs(&[("a", "1"), ("b", "2")]), 1.0, 10);
        let b = Sample::gauge("cpu", LabelSet::from_pairs(&[("b", "2"), ("a", "1")]), 5.0, 20);
        assert_eq!(a.identity(), b.identity());
        assert_eq!(a.identity().fingerprint(), b.identity().fingerprint());
    }

    #[test]
    fn test_identity_distinguishes_ambiguous_joins() {
        let joined = SampleIdentity::new("m", LabelSet::from_pairs(&[("a", "x,y")]));
        let split = SampleIdentity::new("m", LabelSet::from_pairs(&[("a", "x"), ("b", "y")]));
        assert_ne!(joined, split);
        assert_ne!(joined.fingerprint(), split.fingerprint());
    }

    #[test]
    fn test_identity_includes_name() {
        let labels = LabelSet::from_pairs(&[("path", "/a")]);
        let a = SampleIdentity::new("requests_total", labels.clone());
        let b = SampleIdentity::new("errors_total", labels);
        assert_ne!(a, b);
    }

    #[test]
    fn test_value_type_parsing() {
        assert_eq!(MetricKind::from_value_type("GAUGE"), Some(MetricKind::Gauge));
        assert_eq!(MetricKind::from_value_type("COUNTER"), Some(MetricKind::Counter));
        assert_eq!(MetricKind::from_value_type("gauge"), None);
        assert_eq!(MetricKind::from_value_type("HISTOGRAM"), None);
    }

    #[test]
    fn test_identity_display() {
        let id = SampleIdentity::new("requests_total", LabelSet::from_pairs(&[("path", "/a")]));
        assert_eq!(id.to_string(), "requests_total{path=\"/a\"}");
    }
}
