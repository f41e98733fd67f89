//! Engine configuration
//!
//! Layered the usual way: defaults, then an optional TOML file (every field
//! optional), then environment overrides. `validate` runs last.
//!
//! ```toml
//! [state_machine]
//! debounce_len = 3
//! override_confidence = 0.9
//!
//! [escalation]
//! concerning_labels = ["F"]
//!
//! [escalation.thresholds]
//! t1 = 2
//! t2 = 4
//! t3 = 8
//! s_min = 0.5
//! ```

use crate::delivery::RetryPolicy;
use crate::error::{EngineError, EngineResult};
use crate::escalation::EscalationConfig;
use crate::pattern::{Label, StateMachineConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub state_machine: StateMachineConfig,
    pub escalation: EscalationConfig,
    /// Local retries for sink delivery inside one call
    pub delivery_retry: RetryPolicy,
    /// Local retries for gateway writes inside one call
    pub persistence_retry: RetryPolicy,
}

impl EngineConfig {
    /// Create config from environment variables
    pub fn from_env() -> EngineResult<Self> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> EngineResult<Self> {
        toml::from_str(content).map_err(|e| EngineError::ConfigParse {
            path: "<inline>".into(),
            message: e.to_string(),
        })
    }

    /// Load a TOML file
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| EngineError::ConfigParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Apply environment overrides on top of the current values
    pub fn with_env_overrides(mut self) -> EngineResult<Self> {
        self.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(self)
    }

    /// Apply overrides from any key lookup (environment, test map)
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> EngineResult<()> {
        let sm = &mut self.state_machine;
        if let Some(v) = parse(&lookup, "PATTERN_DEBOUNCE_LEN")? {
            sm.debounce_len = v;
        }
        if let Some(v) = parse(&lookup, "PATTERN_OVERRIDE_CONFIDENCE")? {
            sm.override_confidence = v;
        }
        if let Some(v) = parse(&lookup, "PATTERN_STABILITY_DECAY")? {
            sm.stability_decay = v;
        }
        if let Some(v) = parse(&lookup, "PATTERN_SNAPSHOT_EVERY")? {
            sm.snapshot_every = v;
        }
        if let Some(v) = lookup("PATTERN_REQUIRED_FEATURES") {
            sm.required_features = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        let esc = &mut self.escalation;
        if let Some(v) = parse(&lookup, "ESCALATION_T1")? {
            esc.thresholds.t1 = v;
        }
        if let Some(v) = parse(&lookup, "ESCALATION_T2")? {
            esc.thresholds.t2 = v;
        }
        if let Some(v) = parse(&lookup, "ESCALATION_T3")? {
            esc.thresholds.t3 = v;
        }
        if let Some(v) = parse(&lookup, "ESCALATION_S_MIN")? {
            esc.thresholds.s_min = v;
        }
        if let Some(v) = parse(&lookup, "ESCALATION_RETRIGGER_DELTA")? {
            esc.retrigger_delta = v;
        }
        if let Some(v) = parse(&lookup, "ESCALATION_REMIND_COOLDOWN_SECS")? {
            esc.remind_later_cooldown_secs = v;
        }
        if let Some(v) = parse(&lookup, "ESCALATION_REDELIVERY_TIMEOUT_SECS")? {
            esc.redelivery_timeout_secs = v;
        }
        if let Some(v) = lookup("ESCALATION_CONCERNING_LABELS") {
            esc.concerning_labels = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(Label::from_str)
                .collect::<EngineResult<BTreeSet<Label>>>()?;
        }
        Ok(())
    }

    /// Check every section
    pub fn validate(&self) -> EngineResult<()> {
        self.state_machine.validate()?;
        self.escalation.validate()?;
        self.delivery_retry.validate("delivery_retry")?;
        self.persistence_retry.validate("persistence_retry")?;
        Ok(())
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> EngineResult<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| EngineError::invalid_config(key, &raw, e.to_string())),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.state_machine.debounce_len, 3);
        assert_eq!(config.escalation.thresholds.t2, 4);
        assert!(config.escalation.concerning_labels.contains(&Label::F));
    }

    #[test]
    fn test_partial_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
            [state_machine]
            debounce_len = 5

            [escalation]
            concerning_labels = ["D", "F"]

            [escalation.thresholds]
            t3 = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.state_machine.debounce_len, 5);
        assert_eq!(config.state_machine.override_confidence, 0.9);
        assert_eq!(config.escalation.thresholds.t3, 10);
        assert_eq!(config.escalation.thresholds.t1, 2);
        assert_eq!(config.escalation.concerning_labels.len(), 2);
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        let err = EngineConfig::from_toml_str("state_machine = 3").unwrap_err();
        assert_eq!(err.code(), "CONFIG_PARSE");
    }

    #[test]
    fn test_overrides() {
        let mut config = EngineConfig::default();
        config
            .apply_overrides(lookup(&[
                ("PATTERN_DEBOUNCE_LEN", "4"),
                ("ESCALATION_S_MIN", "0.6"),
                ("ESCALATION_CONCERNING_LABELS", "E, F"),
                ("PATTERN_REQUIRED_FEATURES", "p1,e1"),
            ]))
            .unwrap();
        assert_eq!(config.state_machine.debounce_len, 4);
        assert_eq!(config.escalation.thresholds.s_min, 0.6);
        assert_eq!(
            config.escalation.concerning_labels,
            BTreeSet::from([Label::E, Label::F])
        );
        assert_eq!(config.state_machine.required_features, vec!["p1", "e1"]);
    }

    #[test]
    fn test_unparseable_override_names_the_key() {
        let mut config = EngineConfig::default();
        let err = config
            .apply_overrides(lookup(&[("ESCALATION_T1", "two")]))
            .unwrap_err();
        assert!(err.to_string().contains("ESCALATION_T1"), "{err}");
    }

    #[test]
    fn test_validate_rejects_inverted_thresholds() {
        let mut config = EngineConfig::default();
        config.escalation.thresholds.t3 = 1;
        assert_eq!(config.validate().unwrap_err().code(), "INVALID_CONFIG");
    }
}
