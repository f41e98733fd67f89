//! Suppression memory: what the user has said about interventions
//!
//! One [`SessionSuppressionMemory`] per live session, plus one
//! [`UserPreferences`] per user for mutes that outlive the session.

use super::policy::InterventionDecision;
use super::tier::InterventionTier;
use crate::pattern::{Label, PatternState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// User callback on a delivered intervention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    /// User took the suggested action
    Acted,
    /// Snooze for the cooldown period
    RemindLater,
    DontShowThisSession,
    /// Mute the label for the user permanently
    DontShowAgain,
    #[serde(alias = "dismiss")]
    Dismissed,
}

impl std::fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Acted => write!(f, "acted"),
            Self::RemindLater => write!(f, "remind_later"),
            Self::DontShowThisSession => write!(f, "dont_show_this_session"),
            Self::DontShowAgain => write!(f, "dont_show_again"),
            Self::Dismissed => write!(f, "dismissed"),
        }
    }
}

/// A response reported back by the intervention sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserResponse {
    pub session_id: String,
    /// Decision the response answers, when the UI knows it
    #[serde(default)]
    pub decision_id: Option<Uuid>,
    pub kind: ResponseKind,
    pub timestamp: DateTime<Utc>,
}

impl UserResponse {
    pub fn new(session_id: impl Into<String>, kind: ResponseKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            decision_id: None,
            kind,
            timestamp,
        }
    }
}

/// Confidence and stability when the user asked for session silence
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SuppressionBaseline {
    pub confidence: f64,
    pub stability_score: f64,
}

/// Escalation count already consumed by an `acted` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationOffset {
    pub label_since: DateTime<Utc>,
    pub consumed_count: u32,
}

/// Ledger entry: a tier handed to the sink for one label period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveredTier {
    pub label: Label,
    pub label_since: DateTime<Utc>,
    pub tier: InterventionTier,
    pub decided_at: DateTime<Utc>,
    pub decision_id: Uuid,
}

/// Decision awaiting delivery or a user response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingDelivery {
    pub decision: InterventionDecision,
    /// Delivery attempts made so far
    pub attempts: u32,
    /// Whether the sink accepted the decision
    pub delivered: bool,
    /// Earliest time a redelivery may run
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl PendingDelivery {
    pub fn new(decision: InterventionDecision) -> Self {
        Self {
            decision,
            attempts: 0,
            delivered: false,
            next_attempt_at: None,
            last_error: None,
        }
    }

    /// Undelivered and past its backoff
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.delivered && self.next_attempt_at.map_or(true, |at| at <= now)
    }
}

/// Per-session record of user responses and delivered tiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSuppressionMemory {
    pub session_id: String,
    pub user_id: String,
    /// Labels the user never wants to hear about again
    pub dont_show_again: BTreeSet<Label>,
    pub session_suppressed_since: Option<DateTime<Utc>>,
    pub suppression_baseline: Option<SuppressionBaseline>,
    pub remind_until: Option<DateTime<Utc>>,
    pub last_responded_tier: Option<InterventionTier>,
    pub last_response_kind: Option<ResponseKind>,
    pub escalation_offset: Option<EscalationOffset>,
    pub pending: Option<PendingDelivery>,
    pub delivered: Vec<DeliveredTier>,
}

impl SessionSuppressionMemory {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            dont_show_again: BTreeSet::new(),
            session_suppressed_since: None,
            suppression_baseline: None,
            remind_until: None,
            last_responded_tier: None,
            last_response_kind: None,
            escalation_offset: None,
            pending: None,
            delivered: Vec::new(),
        }
    }

    /// Whether the user muted this label
    pub fn is_muted(&self, label: Label) -> bool {
        self.dont_show_again.contains(&label)
    }

    /// Fold in mutes recorded for the user in earlier sessions
    pub fn merge_preferences(&mut self, preferences: &UserPreferences) {
        self.dont_show_again
            .extend(preferences.muted_labels.iter().copied());
    }

    /// Consecutive count minus what an `acted` response already consumed
    pub fn effective_count(&self, state: &PatternState) -> u32 {
        match &self.escalation_offset {
            Some(offset) if offset.label_since == state.current_label_since => {
                state.consecutive_count.saturating_sub(offset.consumed_count)
            }
            _ => state.consecutive_count,
        }
    }

    /// Forget ledger entries, pending work and offsets from earlier label
    /// periods.
    pub fn prune(&mut self, label_since: DateTime<Utc>) {
        self.delivered.retain(|d| d.label_since == label_since);
        if self
            .pending
            .as_ref()
            .is_some_and(|p| p.decision.label_since != label_since)
        {
            self.pending = None;
        }
        if self
            .escalation_offset
            .as_ref()
            .is_some_and(|o| o.label_since != label_since)
        {
            self.escalation_offset = None;
        }
    }

    /// Highest ledger entry at or above `tier` for the label period
    pub fn delivered_at_or_above(
        &self,
        label_since: DateTime<Utc>,
        tier: InterventionTier,
    ) -> Option<&DeliveredTier> {
        self.delivered
            .iter()
            .filter(|d| d.label_since == label_since && d.tier >= tier)
            .max_by_key(|d| d.tier)
    }

    /// Tier of the outstanding or most recent delivered decision
    pub fn latest_tier(&self) -> Option<InterventionTier> {
        self.pending
            .as_ref()
            .map(|p| p.decision.tier)
            .or_else(|| self.delivered.iter().map(|d| d.tier).max())
    }
}

/// Cross-session preferences for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPreferences {
    pub user_id: String,
    pub muted_labels: BTreeSet<Label>,
    pub updated_at: DateTime<Utc>,
}

impl UserPreferences {
    pub fn new(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            muted_labels: BTreeSet::new(),
            updated_at: now,
        }
    }

    /// Mute a label; returns false when it was already muted
    pub fn mute(&mut self, label: Label, now: DateTime<Utc>) -> bool {
        let added = self.muted_labels.insert(label);
        if added {
            self.updated_at = now;
        }
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(i: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap() + Duration::seconds(i)
    }

    fn state(count: u32, since: DateTime<Utc>) -> PatternState {
        PatternState {
            session_id: "s1".to_string(),
            current_label: Label::F,
            current_label_since: since,
            consecutive_count: count,
            stability_score: 0.8,
            confidence_ewma: 0.8,
            last_confidence: 0.8,
            last_transition: None,
            candidate: None,
            observation_count: count as u64,
            last_observed_at: since,
        }
    }

    fn ledger(since: DateTime<Utc>, tier: InterventionTier) -> DeliveredTier {
        DeliveredTier {
            label: Label::F,
            label_since: since,
            tier,
            decided_at: since,
            decision_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_effective_count_uses_offset_for_same_period() {
        let mut memory = SessionSuppressionMemory::new("s1", "u1");
        memory.escalation_offset = Some(EscalationOffset {
            label_since: t(0),
            consumed_count: 4,
        });
        assert_eq!(memory.effective_count(&state(6, t(0))), 2);
        assert_eq!(memory.effective_count(&state(6, t(9))), 6);
    }

    #[test]
    fn test_prune_drops_earlier_periods() {
        let mut memory = SessionSuppressionMemory::new("s1", "u1");
        memory.delivered.push(ledger(t(0), InterventionTier::Tier1));
        memory.delivered.push(ledger(t(5), InterventionTier::Tier1));
        memory.escalation_offset = Some(EscalationOffset {
            label_since: t(0),
            consumed_count: 2,
        });
        memory.prune(t(5));
        assert_eq!(memory.delivered.len(), 1);
        assert!(memory.escalation_offset.is_none());
    }

    #[test]
    fn test_delivered_at_or_above() {
        let mut memory = SessionSuppressionMemory::new("s1", "u1");
        memory.delivered.push(ledger(t(0), InterventionTier::Tier2));
        assert!(memory
            .delivered_at_or_above(t(0), InterventionTier::Tier1)
            .is_some());
        assert!(memory
            .delivered_at_or_above(t(0), InterventionTier::Tier3)
            .is_none());
        assert_eq!(memory.latest_tier(), Some(InterventionTier::Tier2));
    }

    #[test]
    fn test_preferences_merge_into_memory() {
        let mut prefs = UserPreferences::new("u1", t(0));
        assert!(prefs.mute(Label::F, t(1)));
        assert!(!prefs.mute(Label::F, t(2)));
        assert_eq!(prefs.updated_at, t(1));

        let mut memory = SessionSuppressionMemory::new("s2", "u1");
        memory.merge_preferences(&prefs);
        assert!(memory.is_muted(Label::F));
        assert!(!memory.is_muted(Label::D));
    }

    #[test]
    fn test_response_kind_wire_names() {
        let kind: ResponseKind = serde_json::from_str("\"dont_show_again\"").unwrap();
        assert_eq!(kind, ResponseKind::DontShowAgain);
        let kind: ResponseKind = serde_json::from_str("\"dismiss\"").unwrap();
        assert_eq!(kind, ResponseKind::Dismissed);
    }
}
