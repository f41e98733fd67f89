//! Pattern labels: the fixed six-way behavior taxonomy

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Behavior pattern a session is classified into.
///
/// Ordering is lexicographic (`A < B < ... < F`) and is relied on by the
/// tie-break rule in [`super::distribution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Label {
    /// Active Critical Engagement
    A,
    /// Selective Engagement
    B,
    /// Moderate Balanced Use
    C,
    /// Tool-Oriented Use
    D,
    /// Exploratory Learning
    E,
    /// Passive Over-Reliance
    F,
}

impl Label {
    /// Every label, in lexicographic order
    pub const ALL: [Label; 6] = [Label::A, Label::B, Label::C, Label::D, Label::E, Label::F];

    /// Short code ("A".."F")
    pub fn code(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::E => "E",
            Self::F => "F",
        }
    }

    /// Human-readable pattern name
    pub fn name(&self) -> &'static str {
        match self {
            Self::A => "Active Critical Engagement",
            Self::B => "Selective Engagement",
            Self::C => "Moderate Balanced Use",
            Self::D => "Tool-Oriented Use",
            Self::E => "Exploratory Learning",
            Self::F => "Passive Over-Reliance",
        }
    }

    /// Position in [`Label::ALL`]
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Label {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            "C" => Ok(Self::C),
            "D" => Ok(Self::D),
            "E" => Ok(Self::E),
            "F" => Ok(Self::F),
            other => Err(EngineError::UnknownLabel {
                label: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_parse_roundtrip() {
        for label in Label::ALL {
            assert_eq!(label.code().parse::<Label>().unwrap(), label);
        }
    }

    #[test]
    fn test_label_parse_is_exact() {
        for raw in ["f", " F", "F ", " f ", "", "AB"] {
            let err = raw.parse::<Label>().unwrap_err();
            assert!(matches!(err, EngineError::UnknownLabel { ref label } if label == raw));
        }
    }

    #[test]
    fn test_unknown_label_rejected() {
        let err = "G".parse::<Label>().unwrap_err();
        assert!(matches!(err, EngineError::UnknownLabel { ref label } if label == "G"));
    }

    #[test]
    fn test_label_order_is_lexicographic() {
        let mut shuffled = vec![Label::E, Label::A, Label::F, Label::C];
        shuffled.sort();
        assert_eq!(shuffled, vec![Label::A, Label::C, Label::E, Label::F]);
        assert_eq!(Label::D.index(), 3);
    }

    #[test]
    fn test_label_serializes_as_code() {
        assert_eq!(serde_json::to_string(&Label::B).unwrap(), "\"B\"");
        assert_eq!(Label::F.name(), "Passive Over-Reliance");
    }
}
