//! Escalation policy: from pattern state and suppression memory to a
//! tiered intervention decision
//!
//! `decide` walks a fixed order of checks:
//!
//! 1. prune memory from earlier label periods
//! 2. permanent mute (`dont_show_again`)
//! 3. remind-later cooldown
//! 4. session suppression, lifted once confidence or stability rises by the
//!    re-trigger delta
//! 5. tier selection
//! 6. idempotency against the delivery ledger
//!
//! All checks compare timestamps; nothing here sleeps or spawns.

use super::memory::{
    DeliveredTier, EscalationOffset, PendingDelivery, ResponseKind, SessionSuppressionMemory,
    SuppressionBaseline, UserResponse,
};
use super::tier::{select_tier, InterventionTier, TierThresholds};
use crate::error::{EngineError, EngineResult};
use crate::pattern::{Label, PatternState};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info};
use uuid::Uuid;

/// Tolerance when comparing a rise against the re-trigger delta
const RETRIGGER_EPSILON: f64 = 1e-9;

/// Upper bound for configured cooldown and timeout windows (one year)
pub const MAX_WINDOW_SECS: i64 = 366 * 24 * 60 * 60;

/// Configuration for the escalation policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    pub thresholds: TierThresholds,
    /// Labels that may escalate at all
    pub concerning_labels: BTreeSet<Label>,
    /// Rise in confidence or stability that lifts session suppression
    pub retrigger_delta: f64,
    /// Quiet period after "remind me later"
    pub remind_later_cooldown_secs: i64,
    /// Age after which an unanswered ledger entry may be delivered again
    pub redelivery_timeout_secs: i64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            thresholds: TierThresholds::default(),
            concerning_labels: BTreeSet::from([Label::F]),
            retrigger_delta: 0.15,
            remind_later_cooldown_secs: 300,
            redelivery_timeout_secs: 900,
        }
    }
}

impl EscalationConfig {
    pub fn validate(&self) -> EngineResult<()> {
        self.thresholds.validate()?;
        if !(self.retrigger_delta > 0.0 && self.retrigger_delta <= 1.0) {
            return Err(EngineError::invalid_config(
                "retrigger_delta",
                self.retrigger_delta,
                "must be in (0, 1]",
            ));
        }
        if !(0..=MAX_WINDOW_SECS).contains(&self.remind_later_cooldown_secs) {
            return Err(EngineError::invalid_config(
                "remind_later_cooldown_secs",
                self.remind_later_cooldown_secs,
                format!("must be in [0, {}]", MAX_WINDOW_SECS),
            ));
        }
        if !(1..=MAX_WINDOW_SECS).contains(&self.redelivery_timeout_secs) {
            return Err(EngineError::invalid_config(
                "redelivery_timeout_secs",
                self.redelivery_timeout_secs,
                format!("must be in [1, {}]", MAX_WINDOW_SECS),
            ));
        }
        Ok(())
    }

    pub fn remind_later_cooldown(&self) -> Duration {
        Duration::seconds(self.remind_later_cooldown_secs)
    }

    pub fn redelivery_timeout(&self) -> Duration {
        Duration::seconds(self.redelivery_timeout_secs)
    }
}

/// Why a decision came out the way it did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// Label is outside the concerning set
    NotConcerning,
    /// Escalation count below T1
    BelowThreshold,
    /// User chose "don't show again" for this label
    Muted,
    /// Remind-later cooldown still running
    Cooldown,
    /// "Don't show this session" and no sufficient rise yet
    SessionSuppressed,
    /// Same or higher tier already delivered for this label period
    AlreadyDelivered,
    /// New delivery
    Escalated,
    /// New delivery after session suppression lifted
    Retriggered,
}

impl std::fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotConcerning => "not_concerning",
            Self::BelowThreshold => "below_threshold",
            Self::Muted => "muted",
            Self::Cooldown => "cooldown",
            Self::SessionSuppressed => "session_suppressed",
            Self::AlreadyDelivered => "already_delivered",
            Self::Escalated => "escalated",
            Self::Retriggered => "retriggered",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of one `decide` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterventionDecision {
    pub id: Uuid,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub label: Label,
    pub label_since: DateTime<Utc>,
    pub tier: InterventionTier,
    pub reason: DecisionReason,
    /// End of the remind-later cooldown forcing this decision to `None`
    pub suppressed_until: Option<DateTime<Utc>>,
    /// True only when this decision must be handed to the sink
    pub deliver: bool,
}

impl InterventionDecision {
    fn quiet(state: &PatternState, now: DateTime<Utc>, reason: DecisionReason) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: state.session_id.clone(),
            timestamp: now,
            label: state.current_label,
            label_since: state.current_label_since,
            tier: InterventionTier::None,
            reason,
            suppressed_until: None,
            deliver: false,
        }
    }
}

/// What a user response changed
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResponseEffect {
    /// Label newly muted for the user, to be written to their preferences
    pub muted: Option<Label>,
    /// Tier the response answered
    pub answered_tier: Option<InterventionTier>,
}

/// Deterministic escalation policy
#[derive(Debug, Clone, Default)]
pub struct EscalationPolicy {
    config: EscalationConfig,
}

impl EscalationPolicy {
    pub fn new(config: EscalationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EscalationConfig {
        &self.config
    }

    /// Decide whether to intervene for the current state.
    ///
    /// Updates `memory` (ledger, pending delivery, expired suppression) but
    /// never touches `state`.
    pub fn decide(
        &self,
        state: &PatternState,
        memory: &mut SessionSuppressionMemory,
        now: DateTime<Utc>,
    ) -> InterventionDecision {
        let label = state.current_label;
        let since = state.current_label_since;
        memory.prune(since);

        if memory.is_muted(label) {
            // An undelivered decision for a muted label must never go out
            if memory.pending.as_ref().is_some_and(|p| p.decision.label == label) {
                memory.pending = None;
            }
            return InterventionDecision::quiet(state, now, DecisionReason::Muted);
        }

        match memory.remind_until {
            Some(until) if until > now => {
                let mut decision = InterventionDecision::quiet(state, now, DecisionReason::Cooldown);
                decision.suppressed_until = Some(until);
                return decision;
            }
            Some(_) => memory.remind_until = None,
            None => {}
        }

        let mut retriggered = false;
        if memory.session_suppressed_since.is_some() {
            // Suppressed before any state existed: the first state seen is the baseline
            let baseline = *memory
                .suppression_baseline
                .get_or_insert(SuppressionBaseline {
                    confidence: state.last_confidence,
                    stability_score: state.stability_score,
                });
            let rise = (state.last_confidence - baseline.confidence)
                .max(state.stability_score - baseline.stability_score);
            if rise + RETRIGGER_EPSILON < self.config.retrigger_delta {
                return InterventionDecision::quiet(state, now, DecisionReason::SessionSuppressed);
            }
            info!(
                session_id = %state.session_id,
                label = %label,
                rise,
                "Session suppression lifted"
            );
            memory.session_suppressed_since = None;
            memory.suppression_baseline = None;
            retriggered = true;
        }

        let concerning = self.config.concerning_labels.contains(&label);
        let count = memory.effective_count(state);
        let tier = select_tier(
            count,
            state.stability_score,
            concerning,
            &self.config.thresholds,
        );
        if tier.is_none() {
            let reason = if concerning {
                DecisionReason::BelowThreshold
            } else {
                DecisionReason::NotConcerning
            };
            return InterventionDecision::quiet(state, now, reason);
        }

        let timeout = self.config.redelivery_timeout();
        if let Some(entry) = memory.delivered_at_or_above(since, tier) {
            if now - entry.decided_at < timeout {
                debug!(
                    session_id = %state.session_id,
                    tier = %entry.tier,
                    "Tier already delivered for this label period"
                );
                return InterventionDecision {
                    id: entry.decision_id,
                    session_id: state.session_id.clone(),
                    timestamp: now,
                    label,
                    label_since: since,
                    tier: entry.tier,
                    reason: DecisionReason::AlreadyDelivered,
                    suppressed_until: None,
                    deliver: false,
                };
            }
            memory
                .delivered
                .retain(|d| !(d.label_since == since && d.tier >= tier && now - d.decided_at >= timeout));
        }

        let decision = InterventionDecision {
            id: Uuid::new_v4(),
            session_id: state.session_id.clone(),
            timestamp: now,
            label,
            label_since: since,
            tier,
            reason: if retriggered {
                DecisionReason::Retriggered
            } else {
                DecisionReason::Escalated
            },
            suppressed_until: None,
            deliver: true,
        };
        memory.delivered.push(DeliveredTier {
            label,
            label_since: since,
            tier,
            decided_at: now,
            decision_id: decision.id,
        });
        memory.pending = Some(PendingDelivery::new(decision.clone()));
        info!(
            session_id = %state.session_id,
            label = %label,
            tier = %tier,
            count,
            stability = state.stability_score,
            "Intervention decided"
        );
        decision
    }

    /// Fold a user response into session memory.
    ///
    /// `state` is the session's live pattern state, if any; it is read but
    /// never changed.
    pub fn apply_response(
        &self,
        state: Option<&PatternState>,
        memory: &mut SessionSuppressionMemory,
        response: &UserResponse,
    ) -> EngineResult<ResponseEffect> {
        if response.session_id != memory.session_id {
            return Err(EngineError::SessionMismatch {
                expected: memory.session_id.clone(),
                actual: response.session_id.clone(),
            });
        }

        let answered = memory.pending.take();
        if let (Some(id), Some(p)) = (response.decision_id, answered.as_ref()) {
            if p.decision.id != id {
                debug!(
                    session_id = %response.session_id,
                    decision_id = %id,
                    "Response refers to an older decision"
                );
            }
        }
        let answered_tier = answered
            .as_ref()
            .map(|p| p.decision.tier)
            .or_else(|| memory.latest_tier());
        let answered_label = answered
            .as_ref()
            .map(|p| p.decision.label)
            .or_else(|| memory.delivered.last().map(|d| d.label))
            .or_else(|| state.map(|s| s.current_label));

        memory.last_response_kind = Some(response.kind);
        memory.last_responded_tier = answered_tier;

        let mut effect = ResponseEffect {
            muted: None,
            answered_tier,
        };

        match response.kind {
            ResponseKind::Acted => {
                memory.delivered.clear();
                if let Some(s) = state {
                    memory.escalation_offset = Some(EscalationOffset {
                        label_since: s.current_label_since,
                        consumed_count: s.consecutive_count,
                    });
                }
            }
            ResponseKind::RemindLater => {
                memory.remind_until = Some(response.timestamp + self.config.remind_later_cooldown());
                // Free the answered tier so the first decision after the cooldown shows it again
                let since = answered
                    .as_ref()
                    .map(|p| p.decision.label_since)
                    .or_else(|| state.map(|s| s.current_label_since));
                if let (Some(since), Some(tier)) = (since, answered_tier) {
                    memory
                        .delivered
                        .retain(|d| !(d.label_since == since && d.tier == tier));
                }
            }
            ResponseKind::DontShowThisSession => {
                memory.session_suppressed_since = Some(response.timestamp);
                memory.suppression_baseline = state.map(|s| SuppressionBaseline {
                    confidence: s.last_confidence,
                    stability_score: s.stability_score,
                });
            }
            ResponseKind::DontShowAgain => {
                if let Some(label) = answered_label {
                    if memory.dont_show_again.insert(label) {
                        effect.muted = Some(label);
                    }
                }
            }
            ResponseKind::Dismissed => {}
        }

        info!(
            session_id = %response.session_id,
            response = %response.kind,
            tier = ?answered_tier,
            "User response applied"
        );
        Ok(effect)
    }
}
