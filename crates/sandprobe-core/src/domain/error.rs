//! Harness-level error taxonomy.
//!
//! Probe-level problems never surface here: they are folded into an
//! [`Outcome`](crate::domain::outcome::Outcome) at the probe boundary. Only
//! conditions that make the whole run meaningless (bad configuration) or
//! that prevent the harness from talking to the outside world at all are
//! represented as [`HarnessError`].

/// Errors that abort a run or a harness operation.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// The suite, thresholds, critical list or transport settings are
    /// malformed. Raised before any probe executes.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The underlying transport could not be constructed at all.
    #[error("transport setup failed: {0}")]
    TransportSetup(String),

    #[error("report sink error: {0}")]
    ReportSink(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Shorthand for a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        HarnessError::Configuration(msg.into())
    }

    /// Whether this error means the harness itself was misconfigured, as
    /// opposed to an environmental failure.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            HarnessError::Configuration(_) | HarnessError::ConfigParse(_)
        )
    }
}

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;
