//! Event decoding
//!
//! Turns one raw JSON payload from the event stream into a [`Sample`]:
//!
//! ```text
//! {"metric": "svc.latency", "valueType": "GAUGE", "value": 0.25,
//!  "timestamp": 1700000000, "host": "web01"}
//! ```
//!
//! `metric`, `valueType`, `value` and `timestamp` are reserved; every other key
//! is a label unless it appears in the configured drop-list.

use super::types::{LabelSet, MetricKind, Sample};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

const METRIC_KEY: &str = "metric";
const VALUE_TYPE_KEY: &str = "valueType";
const VALUE_KEY: &str = "value";
const TIMESTAMP_KEY: &str = "timestamp";

/// Error type for event decoding. Every variant drops only the one event.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Payload is not a JSON object
    Malformed(String),
    /// A required key is absent
    MissingField(&'static str),
    /// A key holds a value of the wrong type
    InvalidType {
        field: String,
        expected: &'static str,
        found: &'static str,
    },
    /// `metric` is an empty string
    EmptyMetricName,
    /// `valueType` is neither GAUGE nor COUNTER
    UnsupportedValueType { metric: String, value_type: String },
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::Malformed(msg) => write!(f, "malformed event payload: {}", msg),
            DecodeError::MissingField(field) => write!(f, "missing required field '{}'", field),
            DecodeError::InvalidType {
                field,
                expected,
                found,
            } => write!(f, "field '{}' must be {}, found {}", field, expected, found),
            DecodeError::EmptyMetricName => write!(f, "metric name is empty"),
            DecodeError::UnsupportedValueType { metric, value_type } => write!(
                f,
                "unsupported value type '{}' for metric '{}'",
                value_type, metric
            ),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Tagged intermediate representation of one top-level event field
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
    /// null, arrays and objects; never valid, but tolerated until the
    /// drop-list has been applied
    Unsupported(serde::de::IgnoredAny),
}

impl FieldValue {
    fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Bool(_) => "bool",
            FieldValue::Number(_) => "number",
            FieldValue::Text(_) => "string",
            FieldValue::Unsupported(_) => "null, array or object",
        }
    }
}

/// Decoder configuration, fixed at construction
#[derive(Debug, Clone, Default)]
pub struct DecoderConfig {
    /// Label names removed from every event before label extraction
    pub drop_labels: Vec<String>,
}

/// Outcome of applying the metric name policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricName {
    /// Name passed the policy and was rewritten
    Normalized(String),
    /// Name failed the policy and is kept verbatim
    Unchanged(String),
}

/// Apply the metric name policy.
///
/// Names containing `.` are accepted: dots become underscores and the result
/// is lowercased. Any other name fails the policy and is returned unchanged.
pub fn normalize_metric_name(name: &str) -> MetricName {
    if name.contains('.') {
        MetricName::Normalized(name.replace('.', "_").to_lowercase())
    } else {
        MetricName::Unchanged(name.to_string())
    }
}

/// Stateless JSON event decoder
#[derive(Debug, Clone, Default)]
pub struct EventDecoder {
    drop_labels: HashSet<String>,
}

impl EventDecoder {
    pub fn new(config: DecoderConfig) -> Self {
        EventDecoder {
            drop_labels: config
                .drop_labels
                .into_iter()
                .filter(|label| !label.is_empty())
                .collect(),
        }
    }

    /// Decode one payload. `now_secs` is used when the event has no timestamp.
    pub fn decode(&self, payload: &[u8], now_secs: i64) -> Result<Sample, DecodeError> {
        let mut fields: BTreeMap<String, FieldValue> = serde_json::from_slice(payload)
            .map_err(|e| DecodeError::Malformed(e.to_string()))?;

        fields.retain(|key, _| !self.drop_labels.contains(key));

        let value_type = take_string(&mut fields, VALUE_TYPE_KEY)?;
        let raw_name = take_string(&mut fields, METRIC_KEY)?;
        if raw_name.is_empty() {
            return Err(DecodeError::EmptyMetricName);
        }

        let name = match normalize_metric_name(&raw_name) {
            MetricName::Normalized(name) => name,
            MetricName::Unchanged(name) => {
                warn!(metric = %name, "invalid metric name, ingesting unchanged");
                name
            }
        };

        let kind = MetricKind::from_value_type(&value_type).ok_or_else(|| {
            DecodeError::UnsupportedValueType {
                metric: name.clone(),
                value_type: value_type.clone(),
            }
        })?;

        let value = take_value(&mut fields)?;
        let observed_at = take_timestamp(&mut fields)?.unwrap_or(now_secs);
        let labels = into_labels(fields)?;

        Ok(Sample::new(name, labels, value, kind, observed_at))
    }
}

fn take_string(
    fields: &mut BTreeMap<String, FieldValue>,
    key: &'static str,
) -> Result<String, DecodeError> {
    match fields.remove(key) {
        Some(FieldValue::Text(s)) => Ok(s),
        Some(other) => Err(invalid_type(key, "a string", &other)),
        None => Err(DecodeError::MissingField(key)),
    }
}

fn take_value(fields: &mut BTreeMap<String, FieldValue>) -> Result<f64, DecodeError> {
    match fields.remove(VALUE_KEY) {
        Some(FieldValue::Number(n)) => n
            .as_f64()
            .ok_or_else(|| DecodeError::Malformed(format!("value {} is not representable", n))),
        Some(other) => Err(invalid_type(VALUE_KEY, "a number", &other)),
        None => Err(DecodeError::MissingField(VALUE_KEY)),
    }
}

fn take_timestamp(fields: &mut BTreeMap<String, FieldValue>) -> Result<Option<i64>, DecodeError> {
    let number = match fields.remove(TIMESTAMP_KEY) {
        Some(FieldValue::Number(n)) => n,
        Some(other) => return Err(invalid_type(TIMESTAMP_KEY, "an integer", &other)),
        None => return Ok(None),
    };

    if let Some(secs) = number.as_i64() {
        return Ok(Some(secs));
    }

    // Producers serializing through doubles send e.g. 1.7e9; accept integral floats.
    match number.as_f64() {
        // i64::MAX as f64 rounds up to 2^63, which does not fit
        Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
            Ok(Some(f as i64))
        }
        _ => Err(DecodeError::InvalidType {
            field: TIMESTAMP_KEY.to_string(),
            expected: "an integer",
            found: "a non-integral number",
        }),
    }
}

fn into_labels(fields: BTreeMap<String, FieldValue>) -> Result<LabelSet, DecodeError> {
    fields
        .into_iter()
        .map(|(name, value)| match value {
            FieldValue::Text(s) => Ok((name, s)),
            other => Err(invalid_type(&name, "a string", &other)),
        })
        .collect::<Result<BTreeMap<_, _>, _>>()
        .map(LabelSet::new)
}

fn invalid_type(field: &str, expected: &'static str, found: &FieldValue) -> DecodeError {
    DecodeError::InvalidType {
        field: field.to_string(),
        expected,
        found: found.type_name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn decoder() -> EventDecoder {
        EventDecoder::default()
    }

    #[test]
    fn test_decode_gauge_with_labels() {
        let payload = br#"{"metric":"svc.latency","valueType":"GAUGE","value":0.25,
            "timestamp":1000,"host":"web01","env":"prod"}"#;
        let sample = decoder().decode(payload, NOW).unwrap();

        assert_eq!(sample.name, "svc_latency");
        assert_eq!(sample.kind, MetricKind::Gauge);
        assert_eq!(sample.value, 0.25);
        assert_eq!(sample.observed_at, 1000);
        assert_eq!(sample.label_names(), vec!["env", "host"]);
        assert_eq!(sample.label_values(), vec!["prod", "web01"]);
    }

    #[test]
    fn test_missing_timestamp_uses_now() {
        let payload = br#"{"metric":"a.b","valueType":"COUNTER","value":3}"#;
        let sample = decoder().decode(payload, NOW).unwrap();
        assert_eq!(sample.observed_at, NOW);
        assert_eq!(sample.kind, MetricKind::Counter);
        assert!(sample.labels.is_empty());
    }

    #[test]
    fn test_name_normalization() {
        assert_eq!(
            normalize_metric_name("Svc.Latency"),
            MetricName::Normalized("svc_latency".to_string())
        );
        assert_eq!(
            normalize_metric_name("svc.latency"),
            MetricName::Normalized("svc_latency".to_string())
        );
        assert_eq!(
            normalize_metric_name("RequestsTotal"),
            MetricName::Unchanged("RequestsTotal".to_string())
        );
    }

    #[test]
    fn test_name_without_dot_ingested_unchanged() {
        let payload = br#"{"metric":"Requests_Total","valueType":"COUNTER","value":1}"#;
        let sample = decoder().decode(payload, NOW).unwrap();
        assert_eq!(sample.name, "Requests_Total");
    }

    #[test]
    fn test_unsupported_value_type() {
        let payload = br#"{"metric":"a.b","valueType":"HISTOGRAM","value":1}"#;
        let err = decoder().decode(payload, NOW).unwrap_err();
        assert_eq!(
            err,
            DecodeError::UnsupportedValueType {
                metric: "a_b".to_string(),
                value_type: "HISTOGRAM".to_string(),
            }
        );
    }

    #[test]
    fn test_drop_labels_removed() {
        let decoder = EventDecoder::new(DecoderConfig {
            drop_labels: vec!["pod".to_string(), "instance".to_string()],
        });
        let payload = br#"{"metric":"a.b","valueType":"GAUGE","value":1,
            "pod":"p-123","instance":"i-9","app":"api"}"#;
        let sample = decoder.decode(payload, NOW).unwrap();
        assert!(!sample.labels.contains("pod"));
        assert!(!sample.labels.contains("instance"));
        assert_eq!(sample.labels.get("app"), Some("api"));
    }

    #[test]
    fn test_drop_list_applies_before_type_checks() {
        let decoder = EventDecoder::new(DecoderConfig {
            drop_labels: vec!["meta".to_string()],
        });
        let payload = br#"{"metric":"a.b","valueType":"GAUGE","value":1,"meta":{"x":1}}"#;
        assert!(decoder.decode(payload, NOW).is_ok());
    }

    #[test]
    fn test_non_string_label_rejected() {
        let payload = br#"{"metric":"a.b","valueType":"GAUGE","value":1,"port":8080}"#;
        let err = decoder().decode(payload, NOW).unwrap_err();
        assert_eq!(
            err,
            DecodeError::InvalidType {
                field: "port".to_string(),
                expected: "a string",
                found: "number",
            }
        );
    }

    #[test]
    fn test_null_label_rejected() {
        let payload = br#"{"metric":"a.b","valueType":"GAUGE","value":1,"zone":null}"#;
        assert!(matches!(
            decoder().decode(payload, NOW),
            Err(DecodeError::InvalidType { .. })
        ));
    }

    #[test]
    fn test_missing_required_fields() {
        assert_eq!(
            decoder().decode(br#"{"valueType":"GAUGE","value":1}"#, NOW),
            Err(DecodeError::MissingField("metric"))
        );
        assert_eq!(
            decoder().decode(br#"{"metric":"a.b","value":1}"#, NOW),
            Err(DecodeError::MissingField("valueType"))
        );
        assert_eq!(
            decoder().decode(br#"{"metric":"a.b","valueType":"GAUGE"}"#, NOW),
            Err(DecodeError::MissingField("value"))
        );
    }

    #[test]
    fn test_value_must_be_number() {
        let payload = br#"{"metric":"a.b","valueType":"GAUGE","value":"12"}"#;
        assert!(matches!(
            decoder().decode(payload, NOW),
            Err(DecodeError::InvalidType { .. })
        ));
    }

    #[test]
    fn test_timestamp_variants() {
        let float_ts = br#"{"metric":"a.b","valueType":"GAUGE","value":1,"timestamp":1.7e9}"#;
        assert_eq!(decoder().decode(float_ts, NOW).unwrap().observed_at, 1_700_000_000);

        let fractional = br#"{"metric":"a.b","valueType":"GAUGE","value":1,"timestamp":1.5}"#;
        assert!(decoder().decode(fractional, NOW).is_err());

        let text = br#"{"metric":"a.b","valueType":"GAUGE","value":1,"timestamp":"1000"}"#;
        assert!(decoder().decode(text, NOW).is_err());
    }

    #[test]
    fn test_timestamp_out_of_i64_range_rejected() {
        // 2^63 as a float and as an unsigned integer
        for ts in ["9.223372036854775808e18", "9223372036854775808", "-1e19"] {
            let payload = format!(
                r#"{{"metric":"a.b","valueType":"GAUGE","value":1,"timestamp":{}}}"#,
                ts
            );
            assert!(
                matches!(
                    decoder().decode(payload.as_bytes(), NOW),
                    Err(DecodeError::InvalidType { .. })
                ),
                "timestamp {} should be rejected",
                ts
            );
        }

        let max = format!(
            r#"{{"metric":"a.b","valueType":"GAUGE","value":1,"timestamp":{}}}"#,
            i64::MAX
        );
        assert_eq!(decoder().decode(max.as_bytes(), NOW).unwrap().observed_at, i64::MAX);
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(matches!(
            decoder().decode(b"not json", NOW),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            decoder().decode(b"[1,2,3]", NOW),
            Err(DecodeError::Malformed(_))
        ));
        assert_eq!(
            decoder().decode(br#"{"metric":"","valueType":"GAUGE","value":1}"#, NOW),
            Err(DecodeError::EmptyMetricName)
        );
    }
}
