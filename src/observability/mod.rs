//! Logging setup
//!
//! Structured JSON logs via `tracing-subscriber`. The configured level is the
//! default filter; `RUST_LOG`, when set, takes precedence.

use tracing_subscriber::EnvFilter;

/// Error installing the global subscriber
#[derive(Debug)]
pub enum ObservabilityError {
    InvalidFilter(String),
    AlreadyInitialized(String),
}

impl std::fmt::Display for ObservabilityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObservabilityError::InvalidFilter(e) => write!(f, "invalid log filter: {}", e),
            ObservabilityError::AlreadyInitialized(e) => {
                write!(f, "tracing subscriber already installed: {}", e)
            }
        }
    }
}

impl std::error::Error for ObservabilityError {}

/// Build the log filter: `RUST_LOG` if present, otherwise `level`
pub fn env_filter(level: &str) -> Result<EnvFilter, ObservabilityError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level)
            .map_err(|e| ObservabilityError::InvalidFilter(e.to_string())),
    }
}

/// Install the global JSON subscriber
pub fn init_tracing(level: &str) -> Result<(), ObservabilityError> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(level)?)
        .with_target(true)
        .json()
        .try_init()
        .map_err(|e| ObservabilityError::AlreadyInitialized(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_accepts_levels() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            assert!(env_filter(level).is_ok(), "level {} should parse", level);
        }
    }

    #[test]
    fn test_second_init_fails() {
        let _ = init_tracing("info");
        assert!(matches!(
            init_tracing("info"),
            Err(ObservabilityError::AlreadyInitialized(_))
        ));
    }
}
