//! Intervention tiers and the pure tier-selection rule

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

/// Escalation level of an intervention, from nothing to blocking
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionTier {
    None,
    /// Passive hint
    Tier1,
    /// Popup that asks for a response
    Tier2,
    /// Blocking alert
    Tier3,
}

impl InterventionTier {
    /// Whether the UI must collect a response before continuing
    pub fn requires_response(&self) -> bool {
        matches!(self, Self::Tier2 | Self::Tier3)
    }

    pub fn is_none(&self) -> bool {
        *self == Self::None
    }
}

impl std::fmt::Display for InterventionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Tier1 => write!(f, "tier1"),
            Self::Tier2 => write!(f, "tier2"),
            Self::Tier3 => write!(f, "tier3"),
        }
    }
}

/// Escalation count and stability thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierThresholds {
    pub t1: u32,
    pub t2: u32,
    pub t3: u32,
    /// Minimum stability for Tier2 and Tier3
    pub s_min: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            t1: 2,
            t2: 4,
            t3: 8,
            s_min: 0.5,
        }
    }
}

impl TierThresholds {
    pub fn validate(&self) -> EngineResult<()> {
        if self.t1 == 0 {
            return Err(EngineError::invalid_config("t1", self.t1, "must be at least 1"));
        }
        if self.t2 < self.t1 {
            return Err(EngineError::invalid_config("t2", self.t2, "must be >= t1"));
        }
        if self.t3 < self.t2 {
            return Err(EngineError::invalid_config("t3", self.t3, "must be >= t2"));
        }
        if !(0.0..=1.0).contains(&self.s_min) {
            return Err(EngineError::invalid_config(
                "s_min",
                self.s_min,
                "must be in [0, 1]",
            ));
        }
        Ok(())
    }
}

/// Map escalation count and stability to a tier.
///
/// Tier2 and Tier3 need stability at or above `s_min`; below it the
/// highest reachable tier is Tier1. Labels outside the concerning set never
/// escalate.
pub fn select_tier(
    count: u32,
    stability: f64,
    concerning: bool,
    thresholds: &TierThresholds,
) -> InterventionTier {
    if !concerning {
        return InterventionTier::None;
    }
    let stable = stability >= thresholds.s_min;
    if count >= thresholds.t3 && stable {
        InterventionTier::Tier3
    } else if count >= thresholds.t2 && stable {
        InterventionTier::Tier2
    } else if count >= thresholds.t1 {
        InterventionTier::Tier1
    } else {
        InterventionTier::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_table() {
        let thr = TierThresholds::default();
        assert_eq!(select_tier(1, 0.9, true, &thr), InterventionTier::None);
        assert_eq!(select_tier(2, 0.9, true, &thr), InterventionTier::Tier1);
        assert_eq!(select_tier(5, 0.9, true, &thr), InterventionTier::Tier2);
        assert_eq!(select_tier(8, 0.9, true, &thr), InterventionTier::Tier3);
    }

    #[test]
    fn test_low_stability_caps_at_tier1() {
        let thr = TierThresholds::default();
        assert_eq!(select_tier(5, 0.4, true, &thr), InterventionTier::Tier1);
        assert_eq!(select_tier(20, 0.4, true, &thr), InterventionTier::Tier1);
        assert_eq!(select_tier(8, 0.5, true, &thr), InterventionTier::Tier3);
    }

    #[test]
    fn test_non_concerning_never_escalates() {
        let thr = TierThresholds::default();
        assert_eq!(select_tier(50, 1.0, false, &thr), InterventionTier::None);
    }

    #[test]
    fn test_monotonic_in_count() {
        let thr = TierThresholds::default();
        for stability in [0.5, 0.75, 1.0] {
            let mut prev = InterventionTier::None;
            for count in 0..20 {
                let tier = select_tier(count, stability, true, &thr);
                assert!(tier >= prev, "tier dropped at count {}", count);
                prev = tier;
            }
        }
    }

    #[test]
    fn test_threshold_validation() {
        assert!(TierThresholds::default().validate().is_ok());
        let bad = TierThresholds {
            t2: 1,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        assert!(InterventionTier::Tier2.requires_response());
        assert!(!InterventionTier::Tier1.requires_response());
    }
}
