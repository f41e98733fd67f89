//! Classifier boundary and the in-process rule-based classifier
//!
//! The engine never trains or selects a model. Anything that maps a feature
//! vector to a distribution over the six labels can sit behind
//! [`PatternClassifier`]: the remote model service ([`super::http`]), the rule
//! ladder below, or a test double.

use super::label::Label;
use crate::error::EngineResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Raw classifier output keyed by label code; validated by
/// [`super::distribution::PatternProbabilities::from_raw`].
pub type RawDistribution = HashMap<String, f64>;

/// Capability interface over `{classify}`.
#[async_trait]
pub trait PatternClassifier: Send + Sync {
    /// Identifier used in logs and errors
    fn name(&self) -> &str;

    /// Map a feature vector to a probability per label
    async fn classify(&self, features: &BTreeMap<String, f64>) -> EngineResult<RawDistribution>;
}

/// Engagement dimensions scored 0..=3, in canonical order
pub const ENGAGEMENT_DIMENSIONS: [&str; 12] = [
    "p1", "p2", "p3", "p4", "m1", "m2", "m3", "e1", "e2", "e3", "r1", "r2",
];

/// Deterministic classifier over the twelve engagement dimensions.
///
/// Rule ladder (first match wins):
///
/// ```text
/// total <= 15 && e_avg < 1.5                 → F
/// total >= 28 && e_avg >= 2.5 && p_avg >= 2.5 → A
/// p_avg >= 2.5 && m_avg >= 2 && r_avg < 2     → B
/// m_avg >= 2.5 && total >= 22                 → D
/// r_avg >= 2.5 && p_avg >= 2                  → E
/// otherwise                                   → C
/// ```
///
/// Missing dimensions score 0. The winner receives `primary_weight` of the
/// mass and the remainder is split evenly across the other five labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleBasedClassifier {
    pub primary_weight: f64,
}

impl RuleBasedClassifier {
    pub fn new(primary_weight: f64) -> Self {
        Self {
            primary_weight: primary_weight.clamp(1.0 / 6.0, 1.0),
        }
    }

    /// Apply the rule ladder
    pub fn rule_label(features: &BTreeMap<String, f64>) -> Label {
        let score = |name: &str| features.get(name).copied().unwrap_or(0.0);
        let avg = |names: &[&str]| names.iter().map(|&n| score(n)).sum::<f64>() / names.len() as f64;

        let total: f64 = ENGAGEMENT_DIMENSIONS.iter().map(|&n| score(n)).sum();
        let p_avg = avg(&["p1", "p2", "p3", "p4"]);
        let m_avg = avg(&["m1", "m2", "m3"]);
        let e_avg = avg(&["e1", "e2", "e3"]);
        let r_avg = avg(&["r1", "r2"]);

        if total <= 15.0 && e_avg < 1.5 {
            Label::F
        } else if total >= 28.0 && e_avg >= 2.5 && p_avg >= 2.5 {
            Label::A
        } else if p_avg >= 2.5 && m_avg >= 2.0 && r_avg < 2.0 {
            Label::B
        } else if m_avg >= 2.5 && total >= 22.0 {
            Label::D
        } else if r_avg >= 2.5 && p_avg >= 2.0 {
            Label::E
        } else {
            Label::C
        }
    }
}

impl Default for RuleBasedClassifier {
    fn default() -> Self {
        Self::new(0.75)
    }
}

#[async_trait]
impl PatternClassifier for RuleBasedClassifier {
    fn name(&self) -> &str {
        "rule_based"
    }

    async fn classify(&self, features: &BTreeMap<String, f64>) -> EngineResult<RawDistribution> {
        let winner = Self::rule_label(features);
        let rest = (1.0 - self.primary_weight) / 5.0;
        Ok(Label::ALL
            .iter()
            .map(|l| {
                let p = if *l == winner { self.primary_weight } else { rest };
                (l.code().to_string(), p)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(values: [f64; 12]) -> BTreeMap<String, f64> {
        ENGAGEMENT_DIMENSIONS
            .iter()
            .zip(values)
            .map(|(n, v)| (n.to_string(), v))
            .collect()
    }

    #[test]
    fn test_rule_ladder() {
        // Low total, no evaluation
        assert_eq!(
            RuleBasedClassifier::rule_label(&features([1., 1., 1., 1., 1., 1., 1., 0., 0., 0., 1., 1.])),
            Label::F
        );
        // High engagement across the board
        assert_eq!(
            RuleBasedClassifier::rule_label(&features([3., 3., 3., 3., 2., 2., 2., 3., 3., 3., 2., 2.])),
            Label::A
        );
        // Strong planning and monitoring, little reflection
        assert_eq!(
            RuleBasedClassifier::rule_label(&features([3., 3., 3., 3., 2., 2., 2., 2., 2., 2., 1., 1.])),
            Label::B
        );
        // Middle of the road
        assert_eq!(
            RuleBasedClassifier::rule_label(&features([2., 2., 2., 2., 2., 2., 2., 2., 2., 2., 2., 2.])),
            Label::C
        );
    }

    #[test]
    fn test_missing_dimensions_score_zero() {
        let only = BTreeMap::from([("p1".to_string(), 3.0)]);
        assert_eq!(RuleBasedClassifier::rule_label(&only), Label::F);
    }

    #[tokio::test]
    async fn test_distribution_is_complete_and_normalized() {
        let classifier = RuleBasedClassifier::default();
        let raw = classifier
            .classify(&features([2.; 12]))
            .await
            .unwrap();
        assert_eq!(raw.len(), 6);
        let sum: f64 = raw.values().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!((raw["C"] - 0.75).abs() < 1e-12);
        assert!((raw["A"] - 0.05).abs() < 1e-12);
    }
}
