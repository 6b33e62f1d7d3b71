/// Structured logging for the water quality monitoring service
///
/// Thin layer over `tracing`. Every event carries a `component` field and,
/// when it concerns a single node, a `node` field. Supports console output
/// and an optional append-only log file for daemon operation.

use std::fmt;
use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::cycle::CycleReport;
use crate::model::StoreError;

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Analyzer,
    Simulator,
    Alert,
    Store,
    System,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Analyzer => write!(f, "ANALYZER"),
            Component::Simulator => write!(f, "SIM"),
            Component::Alert => write!(f, "ALERT"),
            Component::Store => write!(f, "DB"),
            Component::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Indicates a broken store or a bug; needs attention
    Unexpected,
    /// Possibly transient (load, network blip); the next tick may succeed
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Classify a store failure
pub fn classify_store_failure(err: &StoreError) -> FailureType {
    match err {
        StoreError::Timeout(_) => FailureType::Unknown,
        StoreError::Unavailable(_) | StoreError::Query(_) | StoreError::Corrupt(_) => {
            FailureType::Unexpected
        }
    }
}

// ---------------------------------------------------------------------------
// Initialisation
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),
    #[error("cannot open log file {path}: {source}")]
    File {
        path: String,
        source: std::io::Error,
    },
    #[error("logger already initialised: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Install the global subscriber.
///
/// `RUST_LOG`, when set, takes precedence over `level`. When `log_file` is
/// given, every event is also appended to it without ANSI colouring.
pub fn init_logger(level: &str, log_file: Option<&str>) -> Result<(), LoggingError> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(filter) => EnvFilter::try_new(filter)?,
        Err(_) => EnvFilter::try_new(level)?,
    };

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| LoggingError::File { path: path.to_string(), source })?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .try_init()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

/// Log a general informational message
pub fn info(component: Component, node: Option<&str>, message: &str) {
    match node {
        Some(node) => tracing::info!(component = %component, node, "{}", message),
        None => tracing::info!(component = %component, "{}", message),
    }
}

/// Log a warning message
pub fn warn(component: Component, node: Option<&str>, message: &str) {
    match node {
        Some(node) => tracing::warn!(component = %component, node, "{}", message),
        None => tracing::warn!(component = %component, "{}", message),
    }
}

/// Log an error message
pub fn error(component: Component, node: Option<&str>, message: &str) {
    match node {
        Some(node) => tracing::error!(component = %component, node, "{}", message),
        None => tracing::error!(component = %component, "{}", message),
    }
}

/// Log a debug message
pub fn debug(component: Component, node: Option<&str>, message: &str) {
    match node {
        Some(node) => tracing::debug!(component = %component, node, "{}", message),
        None => tracing::debug!(component = %component, "{}", message),
    }
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Log a store failure with automatic classification
pub fn log_store_failure(component: Component, operation: &str, err: &StoreError) {
    let failure_type = classify_store_failure(err);
    let message = format!("{} failed [{}]: {}", operation, failure_type, err);

    match failure_type {
        FailureType::Unexpected => error(component, None, &message),
        FailureType::Unknown => warn(component, None, &message),
    }
}

// ---------------------------------------------------------------------------
// Cycle Summary Logging
// ---------------------------------------------------------------------------

/// Log the outcome of one analysis tick
pub fn log_cycle_summary(report: &CycleReport) {
    let message = format!(
        "Scored {} nodes ({} green, {} amber, {} red); alerts: {} raised, {} changed, {} resolved, {} healed",
        report.nodes_scored,
        report.green,
        report.amber,
        report.red,
        report.raised,
        report.replaced,
        report.resolved,
        report.healed,
    );

    if report.red > 0 {
        warn(Component::Analyzer, None, &message);
    } else {
        info(Component::Analyzer, None, &message);
    }

    if report.stale_readings > 0 {
        warn(
            Component::Analyzer,
            None,
            &format!("{} nodes are reporting stale readings", report.stale_readings),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_tags() {
        assert_eq!(Component::Store.to_string(), "DB");
        assert_eq!(Component::Analyzer.to_string(), "ANALYZER");
    }

    #[test]
    fn test_failure_classification() {
        let timeout = StoreError::Timeout("canceling statement due to statement timeout".into());
        assert_eq!(classify_store_failure(&timeout), FailureType::Unknown);

        let down = StoreError::Unavailable("connection refused".into());
        assert_eq!(classify_store_failure(&down), FailureType::Unexpected);

        let corrupt = StoreError::Corrupt("unknown severity: PURPLE".into());
        assert_eq!(classify_store_failure(&corrupt), FailureType::Unexpected);
    }

    #[test]
    fn test_invalid_filter_is_rejected() {
        // Only exercised when RUST_LOG is unset, otherwise the env wins.
        if std::env::var("RUST_LOG").is_err() {
            let result = init_logger("wqmon_service=verbose", None);
            assert!(matches!(result, Err(LoggingError::Filter(_))), "got {:?}", result);
        }
    }
}
