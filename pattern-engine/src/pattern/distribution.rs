//! Probability distributions over labels and the detections derived from them
//!
//! # Tie-break
//!
//! Labels whose probability is within [`TIE_EPSILON`] of the maximum are tied.
//! If the session's current label is among them it wins, so a tie never
//! flips state on its own. Otherwise the lexicographically first tied label
//! wins.

use super::label::Label;
use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Allowed deviation of the distribution sum from 1.0
pub const DISTRIBUTION_EPSILON: f64 = 1e-6;

/// Probabilities closer than this are treated as equal
pub const TIE_EPSILON: f64 = 1e-9;

/// Classifier output for one observation, validated against the label set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternProbabilities {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    /// Probability per label; every label present, values sum to 1
    pub distribution: BTreeMap<Label, f64>,
}

impl PatternProbabilities {
    /// Validate a raw classifier map.
    ///
    /// Fails with `UnknownLabel` for keys outside A..F and with
    /// `InvalidDistribution` for missing labels, values outside [0, 1], or a
    /// sum that is not 1.
    pub fn from_raw(
        session_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        raw: &HashMap<String, f64>,
    ) -> EngineResult<Self> {
        let mut distribution = BTreeMap::new();
        for (key, &value) in raw {
            let label: Label = key.parse()?;
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(EngineError::invalid_distribution(format!(
                    "probability for {} out of range: {}",
                    label, value
                )));
            }
            distribution.insert(label, value);
        }
        Self::from_distribution(session_id, timestamp, distribution)
    }

    /// Validate an already-typed distribution
    pub fn from_distribution(
        session_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        distribution: BTreeMap<Label, f64>,
    ) -> EngineResult<Self> {
        let missing: Vec<String> = Label::ALL
            .iter()
            .filter(|l| !distribution.contains_key(l))
            .map(|l| l.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(EngineError::invalid_distribution(format!(
                "missing label(s): {}",
                missing.join(", ")
            )));
        }
        if let Some((label, value)) = distribution
            .iter()
            .find(|(_, v)| !v.is_finite() || !(0.0..=1.0).contains(*v))
        {
            return Err(EngineError::invalid_distribution(format!(
                "probability for {} out of range: {}",
                label, value
            )));
        }
        let sum: f64 = distribution.values().sum();
        if (sum - 1.0).abs() > DISTRIBUTION_EPSILON {
            return Err(EngineError::invalid_distribution(format!(
                "probabilities sum to {:.6}, expected 1",
                sum
            )));
        }
        Ok(Self {
            session_id: session_id.into(),
            timestamp,
            distribution,
        })
    }

    /// Probability of a label (0 when absent)
    pub fn probability(&self, label: Label) -> f64 {
        self.distribution.get(&label).copied().unwrap_or(0.0)
    }

    /// Labels tied at the maximum probability, in lexicographic order
    pub fn top_labels(&self) -> Vec<Label> {
        let max = self
            .distribution
            .values()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        self.distribution
            .iter()
            .filter(|&(_, &p)| (max - p).abs() <= TIE_EPSILON)
            .map(|(&l, _)| l)
            .collect()
    }

    /// Reify the argmax as a detection, applying the tie-break rule.
    pub fn detect(&self, current: Option<Label>) -> PatternDetection {
        let tied = self.top_labels();
        let label = match current {
            Some(c) if tied.contains(&c) => c,
            _ => tied[0],
        };
        let confidence = self.probability(label);
        let runner_up = self
            .distribution
            .iter()
            .filter(|&(&l, _)| l != label)
            .map(|(_, &p)| p)
            .fold(0.0, f64::max);

        PatternDetection {
            session_id: self.session_id.clone(),
            timestamp: self.timestamp,
            label,
            confidence,
            margin: (confidence - runner_up).max(0.0),
            distribution: self.distribution.clone(),
        }
    }
}

/// The classifier's verdict for one observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternDetection {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    /// Winning label after tie-break
    pub label: Label,
    /// Probability of the winning label
    pub confidence: f64,
    /// Winning probability minus the runner-up probability
    pub margin: f64,
    pub distribution: BTreeMap<Label, f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn raw(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn even_with(top: &[(Label, f64)]) -> BTreeMap<Label, f64> {
        let assigned: f64 = top.iter().map(|(_, p)| p).sum();
        let rest = (1.0 - assigned) / (6 - top.len()) as f64;
        Label::ALL
            .iter()
            .map(|l| {
                let p = top.iter().find(|(t, _)| t == l).map(|(_, p)| *p);
                (*l, p.unwrap_or(rest))
            })
            .collect()
    }

    #[test]
    fn test_valid_distribution() {
        let probs = PatternProbabilities::from_raw(
            "s1",
            ts(),
            &raw(&[
                ("A", 0.05),
                ("B", 0.05),
                ("C", 0.1),
                ("D", 0.05),
                ("E", 0.05),
                ("F", 0.7),
            ]),
        )
        .unwrap();
        let det = probs.detect(None);
        assert_eq!(det.label, Label::F);
        assert!((det.confidence - 0.7).abs() < 1e-12);
        assert!((det.margin - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_label_is_contract_violation() {
        let err = PatternProbabilities::from_raw("s1", ts(), &raw(&[("A", 0.5), ("Z", 0.5)]))
            .unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_LABEL");
    }

    #[test]
    fn test_lowercase_label_key_rejected() {
        let mut pairs = raw(&[("A", 0.2), ("B", 0.2), ("C", 0.2), ("D", 0.2), ("E", 0.1)]);
        pairs.insert("f".to_string(), 0.1);
        let err = PatternProbabilities::from_raw("s1", ts(), &pairs).unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_LABEL");
    }

    #[test]
    fn test_incomplete_distribution_rejected() {
        let err =
            PatternProbabilities::from_raw("s1", ts(), &raw(&[("A", 0.5), ("B", 0.5)])).unwrap_err();
        assert_eq!(err.code(), "INVALID_DISTRIBUTION");
        assert!(err.to_string().contains("missing"), "{err}");
    }

    #[test]
    fn test_unnormalized_distribution_rejected() {
        let mut dist = even_with(&[]);
        dist.insert(Label::A, 0.9);
        let err = PatternProbabilities::from_distribution("s1", ts(), dist).unwrap_err();
        assert!(err.to_string().contains("sum"), "{err}");
    }

    #[test]
    fn test_tie_keeps_current_label() {
        let dist = even_with(&[(Label::B, 0.4), (Label::D, 0.4)]);
        let probs = PatternProbabilities::from_distribution("s1", ts(), dist).unwrap();
        assert_eq!(probs.top_labels(), vec![Label::B, Label::D]);
        assert_eq!(probs.detect(Some(Label::D)).label, Label::D);
        assert_eq!(probs.detect(Some(Label::B)).label, Label::B);
    }

    #[test]
    fn test_tie_without_current_picks_lexicographic_first() {
        let dist = even_with(&[(Label::E, 0.4), (Label::C, 0.4)]);
        let probs = PatternProbabilities::from_distribution("s1", ts(), dist).unwrap();
        assert_eq!(probs.detect(None).label, Label::C);
        assert_eq!(probs.detect(Some(Label::A)).label, Label::C);
        let det = probs.detect(Some(Label::A));
        assert_eq!(det.margin, 0.0);
    }
}
