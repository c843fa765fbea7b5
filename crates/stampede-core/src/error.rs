use thiserror::Error;

/// Canonical error type for scenario compilation and engine setup.
///
/// Only configuration-class errors are fatal: they abort a run before any
/// virtual user is spawned. Per-iteration failures (workload errors,
/// timeouts, dropped starts) are never surfaced through this type; they are
/// absorbed by the workload invoker and recorded as metrics.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Scenario document is invalid or contradictory.
    #[error("invalid scenario: {message}")]
    Config {
        /// Human-readable explanation of the configuration problem.
        message: String,
    },

    /// Scenario references a workload function that is not registered.
    #[error("unknown workload `{name}`")]
    UnknownWorkload {
        /// Name the scenario's `exec` field asked for.
        name: String,
    },

    /// A threshold selector or expression could not be parsed.
    #[error("invalid threshold `{expression}`: {message}")]
    Threshold {
        /// The offending selector or expression text.
        expression: String,
        /// What was wrong with it.
        message: String,
    },

    /// Unexpected internal error occurred.
    #[error("internal error: {message}")]
    Internal {
        /// Human-readable details for debugging purposes.
        message: String,
    },

    /// I/O error occurred while reading scenario or config files.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error occurred.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error occurred.
    #[error("deserialization error: {0}")]
    DeserializationError(String),
}

impl CoreError {
    /// Creates a `Config` variant.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an `UnknownWorkload` variant.
    #[must_use]
    pub fn unknown_workload(name: impl Into<String>) -> Self {
        Self::UnknownWorkload { name: name.into() }
    }

    /// Creates a `Threshold` variant.
    #[must_use]
    pub fn threshold(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Threshold {
            expression: expression.into(),
            message: message.into(),
        }
    }

    /// Creates an `Internal` variant.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True when the error is fatal for the whole run (exit code 2 territory).
    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config { .. } | Self::UnknownWorkload { .. } | Self::Threshold { .. }
        )
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_eof() || err.is_syntax() || err.is_data() {
            Self::DeserializationError(err.to_string())
        } else {
            Self::SerializationError(err.to_string())
        }
    }
}

impl From<serde_yaml::Error> for CoreError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::DeserializationError(err.to_string())
    }
}

/// Convenient result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
