//! In-process gateway
//!
//! Keeps every record in memory behind a `std::sync::RwLock`. Locks are
//! never held across an await. Writes can be switched to fail, which is how
//! the fail-closed behavior of the hub is exercised.

use super::gateway::{PersistenceGateway, StoreError, StoreResult};
use crate::escalation::{InterventionDecision, SessionSuppressionMemory, UserPreferences};
use crate::pattern::{PatternDetection, PatternStabilitySnapshot, PatternState, PatternTransition};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Default)]
struct Inner {
    detections: Vec<PatternDetection>,
    transitions: Vec<PatternTransition>,
    snapshots: Vec<PatternStabilitySnapshot>,
    decisions: Vec<InterventionDecision>,
    states: HashMap<String, PatternState>,
    memory: HashMap<String, SessionSuppressionMemory>,
    preferences: HashMap<String, UserPreferences>,
}

/// Gateway backed by process memory
#[derive(Default)]
pub struct MemoryGateway {
    inner: RwLock<Inner>,
    fail_writes: AtomicBool,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared reference to this gateway
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Make every write fail until switched back
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn detections(&self) -> Vec<PatternDetection> {
        self.read(|i| i.detections.clone())
    }

    pub fn transitions(&self) -> Vec<PatternTransition> {
        self.read(|i| i.transitions.clone())
    }

    pub fn snapshots(&self) -> Vec<PatternStabilitySnapshot> {
        self.read(|i| i.snapshots.clone())
    }

    pub fn decisions(&self) -> Vec<InterventionDecision> {
        self.read(|i| i.decisions.clone())
    }

    fn read<T: Default>(&self, f: impl FnOnce(&Inner) -> T) -> T {
        self.inner.read().map(|i| f(&*i)).unwrap_or_default()
    }

    fn write(&self, f: impl FnOnce(&mut Inner)) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("writes disabled".to_string()));
        }
        let mut inner = self.inner.write().map_err(|_| StoreError::LockPoisoned)?;
        f(&mut *inner);
        Ok(())
    }

    fn lookup<T: Clone>(
        &self,
        f: impl FnOnce(&Inner) -> Option<&T>,
    ) -> StoreResult<Option<T>> {
        let inner = self.inner.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(f(&*inner).cloned())
    }
}

#[async_trait]
impl PersistenceGateway for MemoryGateway {
    async fn append_detection(&self, detection: &PatternDetection) -> StoreResult<()> {
        self.write(|i| i.detections.push(detection.clone()))
    }

    async fn append_transition(&self, transition: &PatternTransition) -> StoreResult<()> {
        self.write(|i| i.transitions.push(transition.clone()))
    }

    async fn append_snapshot(&self, snapshot: &PatternStabilitySnapshot) -> StoreResult<()> {
        self.write(|i| i.snapshots.push(snapshot.clone()))
    }

    async fn append_decision(&self, decision: &InterventionDecision) -> StoreResult<()> {
        self.write(|i| i.decisions.push(decision.clone()))
    }

    async fn upsert_state(&self, state: &PatternState) -> StoreResult<()> {
        self.write(|i| {
            i.states.insert(state.session_id.clone(), state.clone());
        })
    }

    async fn get_state(&self, session_id: &str) -> StoreResult<Option<PatternState>> {
        self.lookup(|i| i.states.get(session_id))
    }

    async fn upsert_memory(&self, memory: &SessionSuppressionMemory) -> StoreResult<()> {
        self.write(|i| {
            i.memory.insert(memory.session_id.clone(), memory.clone());
        })
    }

    async fn get_memory(&self, session_id: &str) -> StoreResult<Option<SessionSuppressionMemory>> {
        self.lookup(|i| i.memory.get(session_id))
    }

    async fn delete_memory(&self, session_id: &str) -> StoreResult<()> {
        self.write(|i| {
            i.memory.remove(session_id);
        })
    }

    async fn upsert_preferences(&self, preferences: &UserPreferences) -> StoreResult<()> {
        self.write(|i| {
            i.preferences
                .insert(preferences.user_id.clone(), preferences.clone());
        })
    }

    async fn get_preferences(&self, user_id: &str) -> StoreResult<Option<UserPreferences>> {
        self.lookup(|i| i.preferences.get(user_id))
    }
}
