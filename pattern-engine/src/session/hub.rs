//! Session hub: single-writer owner of every live session
//!
//! Each session lives in its own `Mutex<SessionSlot>`. Every operation on a
//! session holds that mutex for its whole duration, classifier and gateway
//! awaits included, so two observations for one session never interleave
//! while different sessions proceed independently.
//!
//! # Commit protocol
//!
//! An observation produces a batch of gateway writes (detection, transition,
//! snapshots, decision, state, memory). The batch is staged on the slot and
//! applied front to back with local retries. The slot's live state only
//! moves forward once the whole batch is written. If a write keeps failing
//! the batch stays staged, the caller gets `PersistenceFailure`, and the
//! session rejects new work until the batch is flushed. Delivery happens
//! only after a successful commit, so nothing reaches the user while the
//! store is down.

use crate::config::EngineConfig;
use crate::delivery::{RetryPolicy, SharedSink};
use crate::error::{EngineError, EngineResult};
use crate::escalation::{
    EscalationPolicy, InterventionDecision, InterventionTier, ResponseKind,
    SessionSuppressionMemory, UserPreferences, UserResponse,
};
use crate::pattern::{
    FeatureObservation, Label, PatternClassifier, PatternDetection, PatternProbabilities,
    PatternStabilitySnapshot, PatternState, PatternStateMachine, PatternTransition,
    SnapshotTrigger,
};
use crate::store::{SharedGateway, StoreError, WriteOp};
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Shared reference to a hub
pub type SharedSessionHub = Arc<SessionHub>;

/// Outcome of a delivery attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Nothing to deliver
    NotRequested,
    /// The sink accepted the decision
    Delivered { sink: String, attempts: u32 },
    /// The sink stayed unreachable; the decision is kept for redelivery
    Deferred {
        attempts: u32,
        next_attempt_at: Option<DateTime<Utc>>,
        reason: String,
    },
}

/// Everything one observation produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationOutcome {
    pub detection: PatternDetection,
    pub state: PatternState,
    pub transition: Option<PatternTransition>,
    pub decision: InterventionDecision,
    pub delivery: DeliveryStatus,
}

/// Result of opening a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenedSession {
    pub session_id: String,
    pub user_id: String,
    /// Prior state was found in the store
    pub resumed: bool,
    pub muted_labels: Vec<Label>,
}

/// Result of applying a user response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseOutcome {
    pub session_id: String,
    pub kind: ResponseKind,
    pub answered_tier: Option<InterventionTier>,
    /// Label muted for the user by this response
    pub muted: Option<Label>,
}

/// Result of one redelivery attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedeliveryReport {
    pub session_id: String,
    pub decision_id: Uuid,
    pub status: DeliveryStatus,
}

/// Writes staged for a session plus the records they make current
#[derive(Debug)]
struct PendingCommit {
    ops: VecDeque<WriteOp>,
    state: Option<PatternState>,
    memory: Option<SessionSuppressionMemory>,
    preferences: Option<UserPreferences>,
}

/// Live per-session records owned by the hub
#[derive(Debug)]
struct SessionSlot {
    session_id: String,
    user_id: String,
    state: Option<PatternState>,
    memory: SessionSuppressionMemory,
    pending_commit: Option<PendingCommit>,
}

/// Wires classifier, state machine, policy, gateway and sink together
pub struct SessionHub {
    config: EngineConfig,
    machine: PatternStateMachine,
    policy: EscalationPolicy,
    classifier: Arc<dyn PatternClassifier>,
    gateway: SharedGateway,
    sink: SharedSink,
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionSlot>>>>,
    preferences: RwLock<HashMap<String, UserPreferences>>,
}

impl SessionHub {
    /// Create a hub; fails when the config does not validate
    pub fn new(
        config: EngineConfig,
        classifier: Arc<dyn PatternClassifier>,
        gateway: SharedGateway,
        sink: SharedSink,
    ) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self {
            machine: PatternStateMachine::new(config.state_machine.clone()),
            policy: EscalationPolicy::new(config.escalation.clone()),
            config,
            classifier,
            gateway,
            sink,
            sessions: RwLock::new(HashMap::new()),
            preferences: RwLock::new(HashMap::new()),
        })
    }

    /// Create a shared reference to this hub
    pub fn shared(self) -> SharedSessionHub {
        Arc::new(self)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // =========================================================================
    // Session lifecycle
    // =========================================================================

    /// Open (or resume) a session for a user.
    ///
    /// Loads the last persisted state and memory, and folds in the user's
    /// cross-session mutes.
    pub async fn open_session(&self, session_id: &str, user_id: &str) -> EngineResult<OpenedSession> {
        let (slot, resumed) = self.open_slot(session_id, user_id).await?;
        let slot = slot.lock().await;
        info!(
            session_id = %slot.session_id,
            user_id = %slot.user_id,
            resumed,
            "Session opened"
        );
        Ok(OpenedSession {
            session_id: slot.session_id.clone(),
            user_id: slot.user_id.clone(),
            resumed,
            muted_labels: slot.memory.dont_show_again.iter().copied().collect(),
        })
    }

    /// End a session: clear its suppression memory and drop the slot.
    ///
    /// Pattern state stays in the store.
    pub async fn end_session(&self, session_id: &str) -> EngineResult<()> {
        let slot = self.existing_slot(session_id).await?;
        {
            let mut slot = slot.lock().await;
            self.flush(&mut slot).await?;
            let ops = vec![WriteOp::DeleteMemory(session_id.to_string())];
            self.commit(&mut slot, ops, None, None, None).await?;
        }
        self.sessions.write().await.remove(session_id);
        info!(session_id, "Session ended");
        Ok(())
    }

    /// IDs of sessions with a live slot
    pub async fn active_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Live pattern state of a session
    pub async fn state(&self, session_id: &str) -> Option<PatternState> {
        let slot = self.sessions.read().await.get(session_id).cloned()?;
        let slot = slot.lock().await;
        slot.state.clone()
    }

    /// Live suppression memory of a session
    pub async fn memory(&self, session_id: &str) -> Option<SessionSuppressionMemory> {
        let slot = self.sessions.read().await.get(session_id).cloned()?;
        let slot = slot.lock().await;
        Some(slot.memory.clone())
    }

    // =========================================================================
    // Observation path
    // =========================================================================

    /// Classify an observation, advance the session state and decide on an
    /// intervention.
    ///
    /// Sessions that were never opened are opened with the session id as
    /// the user id.
    pub async fn observe(&self, observation: FeatureObservation) -> EngineResult<ObservationOutcome> {
        observation.validate(&self.config.state_machine.required_features)?;
        let session_id = observation.session_id.clone();
        let (slot, _) = self.open_slot(&session_id, &session_id).await?;
        let mut slot = slot.lock().await;

        self.flush(&mut slot).await?;

        if let Some(prior) = &slot.state {
            if let Err(e) =
                PatternStateMachine::check_order(prior, &session_id, observation.timestamp)
            {
                warn!(session_id = %session_id, error = %e, "Observation rejected");
                return Err(e);
            }
        }

        let raw = self
            .classifier
            .classify(&observation.features)
            .await
            .inspect_err(|e| {
                warn!(
                    session_id = %session_id,
                    classifier = self.classifier.name(),
                    error = %e,
                    "Classification failed"
                )
            })?;
        let probabilities =
            PatternProbabilities::from_raw(&session_id, observation.timestamp, &raw)?;
        let detection = probabilities.detect(slot.state.as_ref().map(|s| s.current_label));
        let advance = self.machine.advance(slot.state.as_ref(), &detection)?;

        let mut memory = slot.memory.clone();
        if let Some(prefs) = self.preferences.read().await.get(&slot.user_id) {
            memory.merge_preferences(prefs);
        }
        let decision = self
            .policy
            .decide(&advance.state, &mut memory, observation.timestamp);

        let mut ops = vec![WriteOp::Detection(detection.clone())];
        if let Some(transition) = &advance.transition {
            ops.push(WriteOp::Transition(transition.clone()));
        }
        if let Some(snapshot) = &advance.snapshot {
            ops.push(WriteOp::Snapshot(snapshot.clone()));
        }
        if decision.deliver {
            ops.push(WriteOp::Snapshot(PatternStabilitySnapshot::of(
                &advance.state,
                SnapshotTrigger::Escalation,
            )));
            ops.push(WriteOp::Decision(decision.clone()));
        }
        ops.push(WriteOp::State(advance.state.clone()));
        ops.push(WriteOp::Memory(memory.clone()));

        self.commit(&mut slot, ops, Some(advance.state.clone()), Some(memory), None)
            .await?;

        debug!(
            session_id = %session_id,
            label = %advance.state.current_label,
            count = advance.state.consecutive_count,
            stability = advance.state.stability_score,
            tier = %decision.tier,
            reason = %decision.reason,
            "Observation applied"
        );

        // Covers the new decision and any earlier one whose backoff elapsed
        let due = slot
            .memory
            .pending
            .as_ref()
            .is_some_and(|p| p.is_due(observation.timestamp));
        let delivery = if due {
            self.deliver_pending(&mut slot, observation.timestamp).await
        } else {
            DeliveryStatus::NotRequested
        };

        Ok(ObservationOutcome {
            detection,
            state: advance.state,
            transition: advance.transition,
            decision,
            delivery,
        })
    }

    // =========================================================================
    // Response path
    // =========================================================================

    /// Apply a user response reported by the sink
    pub async fn respond(&self, response: UserResponse) -> EngineResult<ResponseOutcome> {
        let slot = self.existing_slot(&response.session_id).await?;
        let mut slot = slot.lock().await;
        self.flush(&mut slot).await?;

        let mut memory = slot.memory.clone();
        let effect = self
            .policy
            .apply_response(slot.state.as_ref(), &mut memory, &response)?;

        let mut ops = vec![WriteOp::Memory(memory.clone())];
        let mut preferences = None;
        if let Some(label) = effect.muted {
            let mut prefs = self.load_preferences(&slot.user_id).await?;
            prefs.mute(label, response.timestamp);
            ops.push(WriteOp::Preferences(prefs.clone()));
            preferences = Some(prefs);
        }
        self.commit(&mut slot, ops, None, Some(memory), preferences)
            .await?;

        Ok(ResponseOutcome {
            session_id: response.session_id,
            kind: response.kind,
            answered_tier: effect.answered_tier,
            muted: effect.muted,
        })
    }

    // =========================================================================
    // Retry paths
    // =========================================================================

    /// Flush writes staged by an earlier persistence failure.
    ///
    /// Returns true when something was flushed.
    pub async fn retry_pending(&self, session_id: &str) -> EngineResult<bool> {
        let slot = self.existing_slot(session_id).await?;
        let mut slot = slot.lock().await;
        let had_pending = slot.pending_commit.is_some();
        self.flush(&mut slot).await?;
        Ok(had_pending)
    }

    /// Retry delivery of one session's pending decision.
    ///
    /// Fails with `DeliveryFailure` when the sink is still unreachable; the
    /// decision stays pending.
    pub async fn redeliver(&self, session_id: &str, now: DateTime<Utc>) -> EngineResult<DeliveryStatus> {
        let slot = self.existing_slot(session_id).await?;
        let mut slot = slot.lock().await;
        self.flush(&mut slot).await?;
        match self.deliver_pending(&mut slot, now).await {
            DeliveryStatus::Deferred {
                attempts, reason, ..
            } => Err(EngineError::DeliveryFailure {
                session_id: session_id.to_string(),
                attempts,
                reason,
            }),
            status => Ok(status),
        }
    }

    /// Retry every undelivered decision whose backoff has elapsed, across
    /// sessions concurrently.
    pub async fn redeliver_due(&self, now: DateTime<Utc>) -> Vec<RedeliveryReport> {
        let slots: Vec<Arc<Mutex<SessionSlot>>> =
            self.sessions.read().await.values().cloned().collect();

        let attempts = slots.into_iter().map(|slot| async move {
            let mut slot = slot.lock().await;
            if let Err(e) = self.flush(&mut slot).await {
                debug!(session_id = %slot.session_id, error = %e, "Redelivery skipped");
                return None;
            }
            let decision_id = slot
                .memory
                .pending
                .as_ref()
                .filter(|p| p.is_due(now))
                .map(|p| p.decision.id)?;
            let status = self.deliver_pending(&mut slot, now).await;
            if status == DeliveryStatus::NotRequested {
                return None;
            }
            Some(RedeliveryReport {
                session_id: slot.session_id.clone(),
                decision_id,
                status,
            })
        });

        let mut reports: Vec<RedeliveryReport> =
            join_all(attempts).await.into_iter().flatten().collect();
        reports.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        reports
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn open_slot(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> EngineResult<(Arc<Mutex<SessionSlot>>, bool)> {
        if let Some(slot) = self.sessions.read().await.get(session_id).cloned() {
            return Ok((slot, true));
        }
        let (slot, resumed) = self.load_slot(session_id, user_id).await?;
        Ok((self.insert_slot(slot).await, resumed))
    }

    /// Slot for a session that is open or has records in the store
    async fn existing_slot(&self, session_id: &str) -> EngineResult<Arc<Mutex<SessionSlot>>> {
        if let Some(slot) = self.sessions.read().await.get(session_id).cloned() {
            return Ok(slot);
        }
        let (slot, resumed) = self.load_slot(session_id, session_id).await?;
        if !resumed {
            return Err(EngineError::unknown_session(session_id));
        }
        Ok(self.insert_slot(slot).await)
    }

    /// Build a slot from whatever the store holds for the session
    async fn load_slot(&self, session_id: &str, user_id: &str) -> EngineResult<(SessionSlot, bool)> {
        let state = self
            .gateway
            .get_state(session_id)
            .await
            .map_err(|e| persistence_failure(session_id, 1, e))?;
        let stored_memory = self
            .gateway
            .get_memory(session_id)
            .await
            .map_err(|e| persistence_failure(session_id, 1, e))?;
        let resumed = state.is_some() || stored_memory.is_some();

        let mut memory =
            stored_memory.unwrap_or_else(|| SessionSuppressionMemory::new(session_id, user_id));
        let user_id = memory.user_id.clone();
        let prefs = self.load_preferences(&user_id).await?;
        memory.merge_preferences(&prefs);

        let slot = SessionSlot {
            session_id: session_id.to_string(),
            user_id,
            state,
            memory,
            pending_commit: None,
        };
        Ok((slot, resumed))
    }

    /// Register a slot; a slot inserted concurrently for the same session wins
    async fn insert_slot(&self, slot: SessionSlot) -> Arc<Mutex<SessionSlot>> {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(slot.session_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(slot)))
            .clone()
    }

    async fn load_preferences(&self, user_id: &str) -> EngineResult<UserPreferences> {
        if let Some(prefs) = self.preferences.read().await.get(user_id) {
            return Ok(prefs.clone());
        }
        let prefs = self
            .gateway
            .get_preferences(user_id)
            .await
            .map_err(|e| persistence_failure(user_id, 1, e))?
            .unwrap_or_else(|| UserPreferences::new(user_id, Utc::now()));
        self.preferences
            .write()
            .await
            .insert(user_id.to_string(), prefs.clone());
        Ok(prefs)
    }

    /// Stage a batch and try to flush it
    async fn commit(
        &self,
        slot: &mut SessionSlot,
        ops: Vec<WriteOp>,
        state: Option<PatternState>,
        memory: Option<SessionSuppressionMemory>,
        preferences: Option<UserPreferences>,
    ) -> EngineResult<()> {
        slot.pending_commit = Some(PendingCommit {
            ops: ops.into(),
            state,
            memory,
            preferences,
        });
        self.flush(slot).await
    }

    /// Write out the staged batch, if any, and make its records current
    async fn flush(&self, slot: &mut SessionSlot) -> EngineResult<()> {
        let Some(mut pending) = slot.pending_commit.take() else {
            return Ok(());
        };

        while let Some(op) = pending.ops.front() {
            let written = self.write_with_retry(&slot.session_id, op).await;
            match written {
                Ok(()) => {
                    pending.ops.pop_front();
                }
                Err((attempts, e)) => {
                    warn!(
                        session_id = %slot.session_id,
                        remaining = pending.ops.len(),
                        attempts,
                        error = %e,
                        "Commit failed; session blocked until flushed"
                    );
                    slot.pending_commit = Some(pending);
                    return Err(persistence_failure(&slot.session_id, attempts, e));
                }
            }
        }

        if let Some(state) = pending.state {
            slot.state = Some(state);
        }
        if let Some(memory) = pending.memory {
            slot.memory = memory;
        }
        if let Some(prefs) = pending.preferences {
            self.preferences
                .write()
                .await
                .insert(prefs.user_id.clone(), prefs);
        }
        Ok(())
    }

    async fn write_with_retry(&self, session_id: &str, op: &WriteOp) -> Result<(), (u32, StoreError)> {
        let policy = &self.config.persistence_retry;
        let mut attempt = 0;
        loop {
            match op.apply(self.gateway.as_ref()).await {
                Ok(()) => return Ok(()),
                Err(e) if policy.should_retry(attempt) => {
                    attempt += 1;
                    debug!(
                        session_id,
                        op = op.kind(),
                        attempt,
                        error = %e,
                        "Retrying gateway write"
                    );
                    tokio::time::sleep(policy.backoff_duration(attempt)).await;
                }
                Err(e) => return Err((attempt + 1, e)),
            }
        }
    }

    /// Hand the pending decision to the sink and record the outcome in
    /// session memory.
    async fn deliver_pending(&self, slot: &mut SessionSlot, now: DateTime<Utc>) -> DeliveryStatus {
        let Some(pending) = slot.memory.pending.clone().filter(|p| !p.delivered) else {
            return DeliveryStatus::NotRequested;
        };

        // The user may have muted the label from another session since this was decided
        let prefs = self.preferences.read().await.get(&slot.user_id).cloned();
        if let Some(prefs) = prefs {
            if prefs.muted_labels.contains(&pending.decision.label) {
                let mut memory = slot.memory.clone();
                memory.merge_preferences(&prefs);
                memory.pending = None;
                info!(
                    session_id = %slot.session_id,
                    decision_id = %pending.decision.id,
                    label = %pending.decision.label,
                    "Pending intervention dropped for muted label"
                );
                let ops = vec![WriteOp::Memory(memory.clone())];
                if let Err(e) = self.commit(slot, ops, None, Some(memory), None).await {
                    warn!(session_id = %slot.session_id, error = %e, "Dropped intervention not yet persisted");
                }
                return DeliveryStatus::NotRequested;
            }
        }

        let policy: &RetryPolicy = &self.config.delivery_retry;
        let mut attempt = 0;
        let result = loop {
            match self.sink.deliver(&pending.decision).await {
                Ok(result) => break Ok(result),
                Err(e) if policy.should_retry(attempt) => {
                    attempt += 1;
                    debug!(
                        session_id = %slot.session_id,
                        sink = self.sink.name(),
                        attempt,
                        error = %e,
                        "Retrying delivery"
                    );
                    tokio::time::sleep(policy.backoff_duration(attempt)).await;
                }
                Err(e) => break Err(e),
            }
        };

        let mut memory = slot.memory.clone();
        let Some(entry) = memory.pending.as_mut() else {
            return DeliveryStatus::NotRequested;
        };
        entry.attempts += attempt + 1;
        let status = match result {
            Ok(result) => {
                entry.delivered = true;
                entry.next_attempt_at = None;
                entry.last_error = None;
                info!(
                    session_id = %slot.session_id,
                    decision_id = %entry.decision.id,
                    tier = %entry.decision.tier,
                    sink = %result.sink,
                    "Intervention handed to sink"
                );
                DeliveryStatus::Delivered {
                    sink: result.sink,
                    attempts: entry.attempts,
                }
            }
            Err(e) => {
                let backoff = policy.backoff_ms(entry.attempts).max(policy.initial_backoff_ms);
                let next = now + Duration::milliseconds(backoff as i64);
                entry.last_error = Some(e.to_string());
                entry.next_attempt_at = Some(next);
                warn!(
                    session_id = %slot.session_id,
                    decision_id = %entry.decision.id,
                    attempts = entry.attempts,
                    per_call = policy.max_attempts(),
                    error = %e,
                    "Delivery deferred"
                );
                DeliveryStatus::Deferred {
                    attempts: entry.attempts,
                    next_attempt_at: Some(next),
                    reason: e.to_string(),
                }
            }
        };

        let ops = vec![WriteOp::Memory(memory.clone())];
        if let Err(e) = self.commit(slot, ops, None, Some(memory), None).await {
            warn!(session_id = %slot.session_id, error = %e, "Delivery outcome not yet persisted");
        }
        status
    }
}

fn persistence_failure(session_id: &str, attempts: u32, error: StoreError) -> EngineError {
    EngineError::PersistenceFailure {
        session_id: session_id.to_string(),
        attempts,
        reason: error.to_string(),
    }
}
