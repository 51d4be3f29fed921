//! Exporter configuration
//!
//! Every setting is a command-line flag with an environment fallback:
//!
//! - `KAFKA_BROKERS`: comma-separated broker list (required)
//! - `KAFKA_TOPICS`: comma-separated topic list (required)
//! - `KAFKA_GROUP_ID`: consumer group id (default: kafka-metrics-exporter)
//! - `EXPORTER_PORT`: scrape port (default: 9000)
//! - `EXPORTER_PATH`: scrape path (default: /metrics)
//! - `EXPORTER_EXPIRATION_SECS`: sample max age, 0 = never expire (default: 0)
//! - `EXPORTER_EXPORT_TIMESTAMP`: render observation timestamps (default: false)
//! - `EXPORTER_DROP_LABELS`: comma-separated label names to strip
//! - `EXPORTER_LOG_LEVEL`: trace, debug, info, warn or error (default: info);
//!   `warning`, `fatal` and `panic` are accepted as aliases

use clap::Parser;

const DEFAULT_KAFKA_PORT: u16 = 9092;
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Raw command-line arguments
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Exports JSON metric events from Kafka as Prometheus metrics")]
pub struct ExporterArgs {
    /// Kafka brokers, comma separated (port defaults to 9092)
    #[arg(long, env = "KAFKA_BROKERS")]
    pub brokers: String,

    /// Kafka topics to consume, comma separated
    #[arg(long, env = "KAFKA_TOPICS")]
    pub topics: String,

    /// Kafka consumer group id
    #[arg(long, env = "KAFKA_GROUP_ID", default_value = "kafka-metrics-exporter")]
    pub group: String,

    /// Scrape endpoint port
    #[arg(long, env = "EXPORTER_PORT", default_value = "9000")]
    pub port: u16,

    /// Scrape endpoint path
    #[arg(long, env = "EXPORTER_PATH", default_value = "/metrics")]
    pub path: String,

    /// Drop samples older than this many seconds (0 keeps them forever)
    #[arg(long, env = "EXPORTER_EXPIRATION_SECS", default_value = "0")]
    pub expiration: u64,

    /// Render each sample's observation time as an explicit timestamp
    #[arg(long, env = "EXPORTER_EXPORT_TIMESTAMP")]
    pub export_timestamp: bool,

    /// Label names to strip from every event, comma separated
    #[arg(long, env = "EXPORTER_DROP_LABELS", default_value = "")]
    pub drop_labels: String,

    /// Log level
    #[arg(long, env = "EXPORTER_LOG_LEVEL", default_value = "info")]
    pub level: String,
}

/// Validated exporter configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExporterConfig {
    /// Brokers as `host:port`
    pub brokers: Vec<String>,
    pub topics: Vec<String>,
    pub group_id: String,
    pub port: u16,
    pub path: String,
    pub max_age_secs: u64,
    pub export_timestamp: bool,
    pub drop_labels: Vec<String>,
    /// Lowercased log level
    pub log_level: String,
}

/// Configuration validation error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    NoBrokers,
    NoTopics,
    EmptyGroupId,
    InvalidPath(String),
    InvalidLogLevel(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NoBrokers => write!(f, "at least one Kafka broker is required"),
            ConfigError::NoTopics => write!(f, "at least one Kafka topic is required"),
            ConfigError::EmptyGroupId => write!(f, "consumer group id must not be empty"),
            ConfigError::InvalidPath(path) => {
                write!(f, "scrape path '{}' must start with '/'", path)
            }
            ConfigError::InvalidLogLevel(level) => write!(
                f,
                "unknown log level '{}' (expected one of {})",
                level,
                LOG_LEVELS.join(", ")
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

impl TryFrom<ExporterArgs> for ExporterConfig {
    type Error = ConfigError;

    fn try_from(args: ExporterArgs) -> Result<Self, Self::Error> {
        let brokers = normalize_brokers(&args.brokers);
        if brokers.is_empty() {
            return Err(ConfigError::NoBrokers);
        }

        let topics = parse_list(&args.topics);
        if topics.is_empty() {
            return Err(ConfigError::NoTopics);
        }

        let group_id = args.group.trim().to_string();
        if group_id.is_empty() {
            return Err(ConfigError::EmptyGroupId);
        }

        if !args.path.starts_with('/') {
            return Err(ConfigError::InvalidPath(args.path));
        }

        let log_level = match canonical_log_level(&args.level) {
            Some(level) => level.to_string(),
            None => return Err(ConfigError::InvalidLogLevel(args.level)),
        };

        Ok(ExporterConfig {
            brokers,
            topics,
            group_id,
            port: args.port,
            path: args.path,
            max_age_secs: args.expiration,
            export_timestamp: args.export_timestamp,
            drop_labels: parse_list(&args.drop_labels),
            log_level,
        })
    }
}

impl ExporterConfig {
    /// Parse flags and environment, then validate
    pub fn from_args() -> Result<Self, ConfigError> {
        ExporterArgs::parse().try_into()
    }

    /// Broker list in the form librdkafka expects
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }
}

/// Map a level name to one `tracing` understands. Accepts the logrus
/// spellings `warning`, `fatal` and `panic`.
pub fn canonical_log_level(raw: &str) -> Option<&'static str> {
    let level = raw.trim().to_ascii_lowercase();
    match level.as_str() {
        "warning" => Some("warn"),
        "fatal" | "panic" => Some("error"),
        other => LOG_LEVELS.iter().copied().find(|l| *l == other),
    }
}

/// Split a comma-separated list, trimming items and dropping empty ones
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a broker list, appending the default Kafka port where none is given
pub fn normalize_brokers(raw: &str) -> Vec<String> {
    parse_list(raw)
        .into_iter()
        .map(|broker| {
            if broker.contains(':') {
                broker
            } else {
                format!("{}:{}", broker, DEFAULT_KAFKA_PORT)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> ExporterArgs {
        let mut argv = vec!["kafka-metrics-exporter", "--brokers", "kafka1", "--topics", "metrics"];
        argv.extend_from_slice(extra);
        ExporterArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = ExporterConfig::try_from(args(&[])).unwrap();
        assert_eq!(config.brokers, vec!["kafka1:9092"]);
        assert_eq!(config.topics, vec!["metrics"]);
        assert_eq!(config.group_id, "kafka-metrics-exporter");
        assert_eq!(config.port, 9000);
        assert_eq!(config.path, "/metrics");
        assert_eq!(config.max_age_secs, 0);
        assert!(!config.export_timestamp);
        assert!(config.drop_labels.is_empty());
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_broker_normalization() {
        assert_eq!(
            normalize_brokers(" a , b:9093,,c "),
            vec!["a:9092", "b:9093", "c:9092"]
        );
        assert!(normalize_brokers(" , ").is_empty());
    }

    #[test]
    fn test_drop_labels_parsed() {
        let config =
            ExporterConfig::try_from(args(&["--drop-labels", "pod, instance,,"])).unwrap();
        assert_eq!(config.drop_labels, vec!["pod", "instance"]);
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = ExporterConfig::try_from(args(&[
            "--port",
            "9100",
            "--path",
            "/prom",
            "--expiration",
            "60",
            "--export-timestamp",
            "--level",
            "DEBUG",
        ]))
        .unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.path, "/prom");
        assert_eq!(config.max_age_secs, 60);
        assert!(config.export_timestamp);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_validation_errors() {
        let mut raw = args(&[]);
        raw.brokers = " ,".to_string();
        assert_eq!(ExporterConfig::try_from(raw), Err(ConfigError::NoBrokers));

        let mut raw = args(&[]);
        raw.topics = String::new();
        assert_eq!(ExporterConfig::try_from(raw), Err(ConfigError::NoTopics));

        let raw = args(&["--path", "metrics"]);
        assert_eq!(
            ExporterConfig::try_from(raw),
            Err(ConfigError::InvalidPath("metrics".to_string()))
        );

        let raw = args(&["--level", "verbose"]);
        assert_eq!(
            ExporterConfig::try_from(raw),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );
    }

    #[test]
    fn test_logrus_level_aliases() {
        for (raw, expected) in [
            ("warning", "warn"),
            ("WARNING", "warn"),
            ("fatal", "error"),
            ("panic", "error"),
            (" Info ", "info"),
        ] {
            let config = ExporterConfig::try_from(args(&["--level", raw])).unwrap();
            assert_eq!(config.log_level, expected, "level {}", raw);
        }
        assert_eq!(canonical_log_level("verbose"), None);
    }

    #[test]
    fn test_bootstrap_servers() {
        let config = ExporterConfig::try_from(args(&[])).unwrap();
        assert_eq!(config.bootstrap_servers(), "kafka1:9092");
    }
}
