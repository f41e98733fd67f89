//! Engine error types
//!
//! Every failure the engine can surface to a caller of `observe`, `respond`
//! or `end_session`. Transient variants (delivery, persistence) are retried
//! locally before they reach the caller; the rest are surfaced immediately.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while detecting patterns or deciding interventions
#[derive(Error, Debug)]
pub enum EngineError {
    /// Observation is malformed or missing features; session state unchanged
    #[error("Invalid observation for session '{session_id}': {reason}")]
    InvalidObservation { session_id: String, reason: String },

    /// Observation arrived out of order; session state unchanged
    #[error(
        "Stale observation for session '{session_id}': {timestamp} is older than last applied {last_applied}"
    )]
    StaleObservation {
        session_id: String,
        timestamp: DateTime<Utc>,
        last_applied: DateTime<Utc>,
    },

    /// Classifier returned a label outside A..F
    #[error("Unknown pattern label '{label}'")]
    UnknownLabel { label: String },

    /// Classifier returned an incomplete or unnormalized distribution
    #[error("Invalid distribution: {reason}")]
    InvalidDistribution { reason: String },

    /// Classifier could not be reached or answered with an error
    #[error("Classifier '{classifier}' unavailable: {reason}")]
    ClassifierUnavailable { classifier: String, reason: String },

    /// Intervention sink unreachable after local retries
    #[error("Delivery failed for session '{session_id}' after {attempts} attempt(s): {reason}")]
    DeliveryFailure {
        session_id: String,
        attempts: u32,
        reason: String,
    },

    /// Gateway write failed after local retries; the change is not committed
    #[error(
        "Persistence failed for session '{session_id}' after {attempts} attempt(s): {reason}"
    )]
    PersistenceFailure {
        session_id: String,
        attempts: u32,
        reason: String,
    },

    /// No live state exists for the session
    #[error("Unknown session '{session_id}'")]
    UnknownSession { session_id: String },

    /// A record addressed one session but carried another session's id
    #[error("Session mismatch: expected '{expected}', got '{actual}'")]
    SessionMismatch { expected: String, actual: String },

    /// Configuration value failed validation
    #[error("Invalid config {field}={value}: {reason}")]
    InvalidConfig {
        field: String,
        value: String,
        reason: String,
    },

    /// Configuration file could not be parsed
    #[error("Config parse error in {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Create an invalid observation error
    pub fn invalid_observation(session_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidObservation {
            session_id: session_id.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid distribution error
    pub fn invalid_distribution(reason: impl Into<String>) -> Self {
        Self::InvalidDistribution {
            reason: reason.into(),
        }
    }

    /// Create a classifier unavailable error
    pub fn classifier(classifier: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ClassifierUnavailable {
            classifier: classifier.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid config error
    pub fn invalid_config(
        field: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Create an unknown session error
    pub fn unknown_session(session_id: impl Into<String>) -> Self {
        Self::UnknownSession {
            session_id: session_id.into(),
        }
    }

    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidObservation { .. } => "INVALID_OBSERVATION",
            Self::StaleObservation { .. } => "STALE_OBSERVATION",
            Self::UnknownLabel { .. } => "UNKNOWN_LABEL",
            Self::InvalidDistribution { .. } => "INVALID_DISTRIBUTION",
            Self::ClassifierUnavailable { .. } => "CLASSIFIER_UNAVAILABLE",
            Self::DeliveryFailure { .. } => "DELIVERY_FAILURE",
            Self::PersistenceFailure { .. } => "PERSISTENCE_FAILURE",
            Self::UnknownSession { .. } => "UNKNOWN_SESSION",
            Self::SessionMismatch { .. } => "SESSION_MISMATCH",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::ConfigParse { .. } => "CONFIG_PARSE",
            Self::Io(_) => "IO_ERROR",
        }
    }

    /// Check if this error is retryable (transient failure)
    ///
    /// Classifier contract violations are fatal misconfigurations and are
    /// never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::DeliveryFailure { .. }
            | Self::PersistenceFailure { .. }
            | Self::ClassifierUnavailable { .. } => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }

    /// Whether the error means the classifier or config is broken
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnknownLabel { .. }
                | Self::InvalidDistribution { .. }
                | Self::InvalidConfig { .. }
                | Self::ConfigParse { .. }
        )
    }

    /// Convert to a serializable report for line-oriented callers
    pub fn to_report(&self) -> ErrorReport {
        ErrorReport {
            code: self.code().to_string(),
            message: self.to_string(),
            retryable: self.is_retryable(),
        }
    }
}

/// Serializable form of an [`EngineError`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Machine-readable error code (e.g., "STALE_OBSERVATION")
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Whether the caller may retry the same operation
    pub retryable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        let err = EngineError::invalid_observation("s1", "no features");
        assert_eq!(err.code(), "INVALID_OBSERVATION");
        assert!(err.to_string().contains("s1"));

        let err = EngineError::UnknownLabel {
            label: "G".to_string(),
        };
        assert_eq!(err.code(), "UNKNOWN_LABEL");
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        let err = EngineError::PersistenceFailure {
            session_id: "s1".to_string(),
            attempts: 3,
            reason: "disk full".to_string(),
        };
        assert!(err.is_retryable());
        assert!(!err.is_fatal());

        let err = EngineError::DeliveryFailure {
            session_id: "s1".to_string(),
            attempts: 2,
            reason: "no subscribers".to_string(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn test_report_serialization() {
        let report = EngineError::unknown_session("s9").to_report();
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"code\":\"UNKNOWN_SESSION\""), "JSON: {json}");
        assert!(json.contains("\"retryable\":false"), "JSON: {json}");
    }
}
