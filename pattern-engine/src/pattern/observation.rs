//! Feature observations: one timestamped tick of interaction signals

use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A timestamped vector of interaction signals for one session tick.
///
/// Produced outside the engine and never mutated by it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureObservation {
    /// Session this tick belongs to
    pub session_id: String,
    /// When the signals were observed
    pub timestamp: DateTime<Utc>,
    /// Named signal values (e.g., "p1".."r2" engagement dimensions)
    pub features: BTreeMap<String, f64>,
}

impl FeatureObservation {
    /// Create an observation with no features yet
    pub fn new(session_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            timestamp,
            features: BTreeMap::new(),
        }
    }

    /// Add a feature value
    pub fn with_feature(mut self, name: impl Into<String>, value: f64) -> Self {
        self.features.insert(name.into(), value);
        self
    }

    /// Check the observation is usable.
    ///
    /// `required` lists feature names that must be present.
    pub fn validate(&self, required: &[String]) -> EngineResult<()> {
        if self.session_id.trim().is_empty() {
            return Err(EngineError::invalid_observation(
                &self.session_id,
                "session id is empty",
            ));
        }
        if self.features.is_empty() {
            return Err(EngineError::invalid_observation(
                &self.session_id,
                "feature vector is empty",
            ));
        }
        for (name, value) in &self.features {
            if name.trim().is_empty() {
                return Err(EngineError::invalid_observation(
                    &self.session_id,
                    "feature with empty name",
                ));
            }
            if !value.is_finite() {
                return Err(EngineError::invalid_observation(
                    &self.session_id,
                    format!("feature '{}' is not finite ({})", name, value),
                ));
            }
        }
        let missing: Vec<&str> = required
            .iter()
            .filter(|name| !self.features.contains_key(name.as_str()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(EngineError::invalid_observation(
                &self.session_id,
                format!("missing required feature(s): {}", missing.join(", ")),
            ));
        }
        Ok(())
    }
}
