//! Per-session pattern state machine
//!
//! Consumes detections in timestamp order and maintains one [`PatternState`]
//! per session. A new label must persist for `debounce_len` consecutive
//! observations before it replaces the current one, unless its confidence
//! reaches `override_confidence`, in which case it flips immediately.
//!
//! # Stability
//!
//! Stability is the running maximum of an EWMA over the current label's
//! confidence:
//!
//! ```text
//! ewma'      = (1 - decay) * c + decay * ewma
//! stability' = max(stability, ewma')
//! ```
//!
//! Both restart at the detection confidence when a transition commits, so
//! stability never drops while the label holds.

use super::distribution::PatternDetection;
use super::label::Label;
use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Configuration for the state machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateMachineConfig {
    /// Consecutive observations a new label needs before it commits (K)
    pub debounce_len: u32,
    /// Confidence at or above which a new label commits immediately
    pub override_confidence: f64,
    /// Weight of history in the confidence EWMA, in [0, 1)
    pub stability_decay: f64,
    /// Emit a cadence snapshot every N observations (0 = only on transitions)
    pub snapshot_every: u64,
    /// Feature names every observation must carry
    pub required_features: Vec<String>,
}

impl Default for StateMachineConfig {
    fn default() -> Self {
        Self {
            debounce_len: 3,
            override_confidence: 0.9,
            stability_decay: 0.7,
            snapshot_every: 10,
            required_features: Vec::new(),
        }
    }
}

impl StateMachineConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.debounce_len == 0 {
            return Err(EngineError::invalid_config(
                "debounce_len",
                self.debounce_len,
                "must be at least 1",
            ));
        }
        if !(self.override_confidence > 0.0 && self.override_confidence <= 1.0) {
            return Err(EngineError::invalid_config(
                "override_confidence",
                self.override_confidence,
                "must be in (0, 1]",
            ));
        }
        if !(0.0..1.0).contains(&self.stability_decay) {
            return Err(EngineError::invalid_config(
                "stability_decay",
                self.stability_decay,
                "must be in [0, 1)",
            ));
        }
        Ok(())
    }
}

/// A label seen while a different label is current, not yet committed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCandidate {
    pub label: Label,
    /// Consecutive observations of this label so far
    pub count: u32,
    pub first_seen: DateTime<Utc>,
    pub last_confidence: f64,
}

/// Committed change of the current label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternTransition {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub from_label: Label,
    pub to_label: Label,
    /// New label's confidence minus the last confidence of the old label
    pub confidence_delta: f64,
    /// Consecutive observations of the new label when it committed
    pub debounce_count: u32,
    /// Committed through the high-confidence override before K was reached
    pub forced: bool,
}

/// Live per-session state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternState {
    pub session_id: String,
    pub current_label: Label,
    pub current_label_since: DateTime<Utc>,
    /// Observations of the current label since it was committed (>= 1)
    pub consecutive_count: u32,
    pub stability_score: f64,
    pub confidence_ewma: f64,
    /// Confidence of the latest observation that matched the current label
    pub last_confidence: f64,
    pub last_transition: Option<PatternTransition>,
    pub candidate: Option<PendingCandidate>,
    pub observation_count: u64,
    pub last_observed_at: DateTime<Utc>,
}

impl PatternState {
    fn initial(detection: &PatternDetection) -> Self {
        Self {
            session_id: detection.session_id.clone(),
            current_label: detection.label,
            current_label_since: detection.timestamp,
            consecutive_count: 1,
            stability_score: base_stability(detection.confidence),
            confidence_ewma: detection.confidence,
            last_confidence: detection.confidence,
            last_transition: None,
            candidate: None,
            observation_count: 1,
            last_observed_at: detection.timestamp,
        }
    }
}

/// Why a stability snapshot was written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotTrigger {
    Cadence,
    Transition,
    Escalation,
}

/// Point-in-time view of stability, written for analysis only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternStabilitySnapshot {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub label: Label,
    pub stability_score: f64,
    pub consecutive_count: u32,
    pub trigger: SnapshotTrigger,
}

impl PatternStabilitySnapshot {
    pub fn of(state: &PatternState, trigger: SnapshotTrigger) -> Self {
        Self {
            session_id: state.session_id.clone(),
            timestamp: state.last_observed_at,
            label: state.current_label,
            stability_score: state.stability_score,
            consecutive_count: state.consecutive_count,
            trigger,
        }
    }
}

/// Result of applying one detection
#[derive(Debug, Clone, PartialEq)]
pub struct Advance {
    pub state: PatternState,
    pub transition: Option<PatternTransition>,
    pub snapshot: Option<PatternStabilitySnapshot>,
}

/// Stability assigned right after a label commits
pub fn base_stability(confidence: f64) -> f64 {
    confidence
}

/// Deterministic transition function over [`PatternState`]
#[derive(Debug, Clone, Default)]
pub struct PatternStateMachine {
    config: StateMachineConfig,
}

impl PatternStateMachine {
    pub fn new(config: StateMachineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StateMachineConfig {
        &self.config
    }

    /// Reject records for another session and timestamps older than the
    /// last applied one. Equal timestamps are accepted.
    pub fn check_order(
        prior: &PatternState,
        session_id: &str,
        timestamp: DateTime<Utc>,
    ) -> EngineResult<()> {
        if prior.session_id != session_id {
            return Err(EngineError::SessionMismatch {
                expected: prior.session_id.clone(),
                actual: session_id.to_string(),
            });
        }
        if timestamp < prior.last_observed_at {
            return Err(EngineError::StaleObservation {
                session_id: session_id.to_string(),
                timestamp,
                last_applied: prior.last_observed_at,
            });
        }
        Ok(())
    }

    /// Apply one detection to the prior state.
    ///
    /// Never mutates `prior`; on error the caller keeps its state as is.
    pub fn advance(
        &self,
        prior: Option<&PatternState>,
        detection: &PatternDetection,
    ) -> EngineResult<Advance> {
        let Some(prior) = prior else {
            let state = PatternState::initial(detection);
            let snapshot = self.cadence_snapshot(&state);
            debug!(
                session_id = %state.session_id,
                label = %state.current_label,
                "Session state initialized"
            );
            return Ok(Advance {
                state,
                transition: None,
                snapshot,
            });
        };

        Self::check_order(prior, &detection.session_id, detection.timestamp)?;

        let mut state = prior.clone();
        state.observation_count += 1;
        state.last_observed_at = detection.timestamp;
        let c = detection.confidence;

        if detection.label == state.current_label {
            let decay = self.config.stability_decay;
            state.consecutive_count = state.consecutive_count.saturating_add(1);
            state.confidence_ewma = (1.0 - decay) * c + decay * state.confidence_ewma;
            state.stability_score = state.stability_score.max(state.confidence_ewma);
            state.last_confidence = c;
            state.candidate = None;
            let snapshot = self.cadence_snapshot(&state);
            return Ok(Advance {
                state,
                transition: None,
                snapshot,
            });
        }

        let (count, first_seen) = match &state.candidate {
            Some(candidate) if candidate.label == detection.label => {
                (candidate.count + 1, candidate.first_seen)
            }
            _ => (1, detection.timestamp),
        };

        let debounced = count >= self.config.debounce_len;
        let forced = !debounced && c >= self.config.override_confidence;

        if !(debounced || forced) {
            debug!(
                session_id = %state.session_id,
                current = %state.current_label,
                candidate = %detection.label,
                count,
                "Deviation held by debounce"
            );
            state.candidate = Some(PendingCandidate {
                label: detection.label,
                count,
                first_seen,
                last_confidence: c,
            });
            let snapshot = self.cadence_snapshot(&state);
            return Ok(Advance {
                state,
                transition: None,
                snapshot,
            });
        }

        let transition = PatternTransition {
            session_id: state.session_id.clone(),
            timestamp: detection.timestamp,
            from_label: state.current_label,
            to_label: detection.label,
            confidence_delta: c - state.last_confidence,
            debounce_count: count,
            forced,
        };
        info!(
            session_id = %state.session_id,
            from = %transition.from_label,
            to = %transition.to_label,
            debounce_count = count,
            forced,
            "Pattern transition committed"
        );

        state.current_label = detection.label;
        state.current_label_since = detection.timestamp;
        state.consecutive_count = 1;
        state.stability_score = base_stability(c);
        state.confidence_ewma = c;
        state.last_confidence = c;
        state.candidate = None;
        state.last_transition = Some(transition.clone());

        let snapshot = Some(PatternStabilitySnapshot::of(
            &state,
            SnapshotTrigger::Transition,
        ));
        Ok(Advance {
            state,
            transition: Some(transition),
            snapshot,
        })
    }

    fn cadence_snapshot(&self, state: &PatternState) -> Option<PatternStabilitySnapshot> {
        let every = self.config.snapshot_every;
        (every > 0 && state.observation_count % every == 0)
            .then(|| PatternStabilitySnapshot::of(state, SnapshotTrigger::Cadence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeMap;

    fn t(i: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap() + Duration::seconds(i)
    }

    fn det(i: i64, label: Label, confidence: f64) -> PatternDetection {
        PatternDetection {
            session_id: "s1".to_string(),
            timestamp: t(i),
            label,
            confidence,
            margin: 0.0,
            distribution: BTreeMap::new(),
        }
    }

    fn run(machine: &PatternStateMachine, seq: &[(Label, f64)]) -> (PatternState, Vec<PatternTransition>) {
        let mut state: Option<PatternState> = None;
        let mut transitions = Vec::new();
        for (i, (label, c)) in seq.iter().enumerate() {
            let adv = machine
                .advance(state.as_ref(), &det(i as i64, *label, *c))
                .unwrap();
            transitions.extend(adv.transition);
            state = Some(adv.state);
        }
        (state.unwrap(), transitions)
    }

    #[test]
    fn test_same_label_increments_count() {
        let machine = PatternStateMachine::default();
        let seq: Vec<_> = (0..5).map(|_| (Label::C, 0.6)).collect();
        let (state, transitions) = run(&machine, &seq);
        assert_eq!(state.consecutive_count, 5);
        assert!(transitions.is_empty());
        assert_eq!(state.observation_count, 5);
    }

    #[test]
    fn test_single_deviation_does_not_commit() {
        let machine = PatternStateMachine::default();
        let (state, transitions) = run(
            &machine,
            &[(Label::C, 0.6), (Label::C, 0.6), (Label::F, 0.6), (Label::C, 0.6)],
        );
        assert!(transitions.is_empty());
        assert_eq!(state.current_label, Label::C);
        // The deviation neither counted nor reset
        assert_eq!(state.consecutive_count, 3);
        assert!(state.candidate.is_none());
    }

    #[test]
    fn test_debounced_transition_on_kth_observation() {
        let machine = PatternStateMachine::default();
        let seq = [
            (Label::C, 0.6),
            (Label::C, 0.6),
            (Label::C, 0.6),
            (Label::B, 0.5),
            (Label::B, 0.5),
            (Label::B, 0.55),
            (Label::B, 0.5),
        ];
        let mut state: Option<PatternState> = None;
        for (i, (label, c)) in seq.iter().enumerate() {
            let adv = machine
                .advance(state.as_ref(), &det(i as i64, *label, *c))
                .unwrap();
            if i == 5 {
                let tr = adv.transition.as_ref().expect("transition on 6th");
                assert_eq!((tr.from_label, tr.to_label), (Label::C, Label::B));
                assert_eq!(tr.debounce_count, 3);
                assert!(!tr.forced);
                assert_eq!(adv.state.consecutive_count, 1);
                assert_eq!(adv.state.stability_score, base_stability(0.55));
                assert_eq!(adv.state.current_label_since, t(5));
                assert_eq!(
                    adv.snapshot.as_ref().map(|s| s.trigger),
                    Some(SnapshotTrigger::Transition)
                );
            } else {
                assert!(adv.transition.is_none(), "unexpected transition at {}", i);
            }
            state = Some(adv.state);
        }
        assert_eq!(state.unwrap().consecutive_count, 2);
    }

    #[test]
    fn test_high_confidence_override() {
        let machine = PatternStateMachine::default();
        let (state, transitions) = run(&machine, &[(Label::C, 0.6), (Label::F, 0.95)]);
        assert_eq!(transitions.len(), 1);
        assert!(transitions[0].forced);
        assert_eq!(state.current_label, Label::F);
        assert!((transitions[0].confidence_delta - 0.35).abs() < 1e-9);
    }

    #[test]
    fn test_interrupted_candidate_restarts() {
        let machine = PatternStateMachine::default();
        let (state, transitions) = run(
            &machine,
            &[
                (Label::C, 0.6),
                (Label::B, 0.5),
                (Label::B, 0.5),
                (Label::D, 0.5),
                (Label::B, 0.5),
            ],
        );
        assert!(transitions.is_empty());
        let candidate = state.candidate.unwrap();
        assert_eq!((candidate.label, candidate.count), (Label::B, 1));
    }

    #[test]
    fn test_stability_monotonic_while_label_holds() {
        let machine = PatternStateMachine::default();
        let confidences = [0.5, 0.9, 0.3, 0.2, 0.95, 0.1];
        let mut state: Option<PatternState> = None;
        let mut last = 0.0;
        for (i, c) in confidences.iter().enumerate() {
            let adv = machine
                .advance(state.as_ref(), &det(i as i64, Label::A, *c))
                .unwrap();
            assert!(adv.state.stability_score >= last);
            last = adv.state.stability_score;
            state = Some(adv.state);
        }
        // 0.3 * 0.9 + 0.7 * 0.5 = 0.62 after the second observation
        assert!(last >= 0.62 - 1e-12);
    }

    #[test]
    fn test_stale_observation_rejected() {
        let machine = PatternStateMachine::default();
        let first = machine.advance(None, &det(10, Label::C, 0.6)).unwrap();
        let err = machine
            .advance(Some(&first.state), &det(5, Label::C, 0.6))
            .unwrap_err();
        assert_eq!(err.code(), "STALE_OBSERVATION");
        // Equal timestamps are fine
        assert!(machine
            .advance(Some(&first.state), &det(10, Label::C, 0.6))
            .is_ok());
    }

    #[test]
    fn test_session_mismatch_rejected() {
        let machine = PatternStateMachine::default();
        let first = machine.advance(None, &det(0, Label::C, 0.6)).unwrap();
        let mut other = det(1, Label::C, 0.6);
        other.session_id = "s2".to_string();
        let err = machine.advance(Some(&first.state), &other).unwrap_err();
        assert_eq!(err.code(), "SESSION_MISMATCH");
    }

    #[test]
    fn test_cadence_snapshots() {
        let machine = PatternStateMachine::new(StateMachineConfig {
            snapshot_every: 2,
            ..Default::default()
        });
        let mut state: Option<PatternState> = None;
        let mut snapshots = 0;
        for i in 0..6 {
            let adv = machine
                .advance(state.as_ref(), &det(i, Label::E, 0.6))
                .unwrap();
            if let Some(snap) = adv.snapshot {
                assert_eq!(snap.trigger, SnapshotTrigger::Cadence);
                snapshots += 1;
            }
            state = Some(adv.state);
        }
        assert_eq!(snapshots, 3);
    }

    #[test]
    fn test_config_validation() {
        assert!(StateMachineConfig::default().validate().is_ok());
        let bad = StateMachineConfig {
            debounce_len: 0,
            ..Default::default()
        };
        assert_eq!(bad.validate().unwrap_err().code(), "INVALID_CONFIG");
        let bad = StateMachineConfig {
            stability_decay: 1.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
