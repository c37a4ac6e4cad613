//! Tracing configuration and initialization.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Noisy dependencies kept at `warn` unless `RUST_LOG` says otherwise.
const QUIET_TARGETS: &[&str] = &["bollard", "hyper", "mongodb", "lapin", "tiberius", "rskafka"];

#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("invalid log level {0:?}, expected one of trace, debug, info, warn, error")]
    InvalidLevel(String),

    #[error("a global tracing subscriber is already installed: {0}")]
    AlreadyInitialized(String),
}

/// Parse a log level name, case-insensitively.
pub fn parse_level(name: &str) -> Result<Level, TracingError> {
    Level::from_str(name.trim()).map_err(|_| TracingError::InvalidLevel(name.to_string()))
}

/// Configuration for tracing initialization.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Service name for identification
    pub service_name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: Level,
    /// Whether to include span events (enter, exit, close)
    pub include_span_events: bool,
    /// Whether to output in JSON format
    pub json_output: bool,
    /// Whether to include file and line numbers
    pub include_location: bool,
    /// Whether to include target (module path)
    pub include_target: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: "provisioner".to_string(),
            log_level: Level::INFO,
            include_span_events: false,
            json_output: false,
            include_location: false,
            include_target: true,
        }
    }
}

impl TracingConfig {
    /// Create a new config with the given service name.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set the log level.
    pub fn with_level(mut self, level: Level) -> Self {
        self.log_level = level;
        self
    }

    /// Enable JSON output format.
    pub fn with_json(mut self, json: bool) -> Self {
        self.json_output = json;
        self
    }

    /// Include span events in output.
    pub fn with_span_events(mut self, include: bool) -> Self {
        self.include_span_events = include;
        self
    }

    /// Include file and line numbers.
    pub fn with_location(mut self, include: bool) -> Self {
        self.include_location = include;
        self
    }

    /// `RUST_LOG` wins; otherwise the configured level, with client
    /// libraries held at `warn`.
    fn filter_directives(&self) -> String {
        let mut directives = vec![self.log_level.to_string().to_lowercase()];
        if self.log_level > Level::WARN {
            directives.extend(QUIET_TARGETS.iter().map(|target| format!("{target}=warn")));
        }
        directives.join(",")
    }

    fn build_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.filter_directives()))
    }
}

/// Install the global subscriber, failing if one is already installed.
pub fn try_init_tracing(config: &TracingConfig) -> Result<(), TracingError> {
    let filter = config.build_filter();

    let span_events = if config.include_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let installed = if config.json_output {
        // JSON format for log aggregation
        let fmt_layer = fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_target(config.include_target);

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
    } else {
        let fmt_layer = fmt::layer()
            .with_span_events(span_events)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_target(config.include_target);

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
    };
    installed.map_err(|e| TracingError::AlreadyInitialized(e.to_string()))?;

    tracing::info!(
        service = %config.service_name,
        level = %config.log_level,
        json = config.json_output,
        "Tracing initialized"
    );
    Ok(())
}

/// Initialize tracing with the given configuration.
///
/// This should be called once at application startup; later calls are
/// ignored with a warning.
///
/// # Example
///
/// ```no_run
/// use observability::{init_tracing, TracingConfig};
/// use tracing::Level;
///
/// init_tracing(TracingConfig::new("provisioner").with_level(Level::DEBUG));
/// ```
pub fn init_tracing(config: TracingConfig) {
    if let Err(e) = try_init_tracing(&config) {
        tracing::warn!(error = %e, "Tracing was not reinitialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_config_default() {
        let config = TracingConfig::default();
        assert_eq!(config.service_name, "provisioner");
        assert_eq!(config.log_level, Level::INFO);
        assert!(!config.json_output);
    }

    #[test]
    fn test_tracing_config_builder() {
        let config = TracingConfig::new("test-service")
            .with_level(Level::DEBUG)
            .with_json(true)
            .with_span_events(true)
            .with_location(true);

        assert_eq!(config.service_name, "test-service");
        assert_eq!(config.log_level, Level::DEBUG);
        assert!(config.json_output);
        assert!(config.include_span_events);
        assert!(config.include_location);
    }

    #[test]
    fn test_client_libraries_are_quieted() {
        let directives = TracingConfig::default().with_level(Level::DEBUG).filter_directives();
        assert!(directives.starts_with("debug,"));
        assert!(directives.contains("bollard=warn"));

        let directives = TracingConfig::default().with_level(Level::ERROR).filter_directives();
        assert_eq!(directives, "error");
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG").unwrap(), Level::DEBUG);
        assert_eq!(parse_level(" warn ").unwrap(), Level::WARN);
        assert!(matches!(parse_level("loud"), Err(TracingError::InvalidLevel(_))));
    }

    #[test]
    fn test_second_init_is_rejected() {
        let config = TracingConfig::default();
        let _ = try_init_tracing(&config);
        assert!(matches!(
            try_init_tracing(&config),
            Err(TracingError::AlreadyInitialized(_))
        ));
    }
}
