//! Persistence gateway boundary
//!
//! The engine needs an append log for write-once facts (detections,
//! transitions, snapshots, decisions) and single-key upserts for live
//! records (pattern state, suppression memory, user preferences).

use crate::escalation::{InterventionDecision, SessionSuppressionMemory, UserPreferences};
use crate::pattern::{PatternDetection, PatternStabilitySnapshot, PatternState, PatternTransition};
use async_trait::async_trait;
use std::sync::Arc;

/// Error type for gateway operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[cfg(feature = "rocksdb-store")]
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),
}

/// Result type for gateway operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared reference to a gateway
pub type SharedGateway = Arc<dyn PersistenceGateway>;

/// Capability interface over the durable store
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn append_detection(&self, detection: &PatternDetection) -> StoreResult<()>;

    async fn append_transition(&self, transition: &PatternTransition) -> StoreResult<()>;

    async fn append_snapshot(&self, snapshot: &PatternStabilitySnapshot) -> StoreResult<()>;

    async fn append_decision(&self, decision: &InterventionDecision) -> StoreResult<()>;

    async fn upsert_state(&self, state: &PatternState) -> StoreResult<()>;

    async fn get_state(&self, session_id: &str) -> StoreResult<Option<PatternState>>;

    async fn upsert_memory(&self, memory: &SessionSuppressionMemory) -> StoreResult<()>;

    async fn get_memory(&self, session_id: &str) -> StoreResult<Option<SessionSuppressionMemory>>;

    async fn delete_memory(&self, session_id: &str) -> StoreResult<()>;

    async fn upsert_preferences(&self, preferences: &UserPreferences) -> StoreResult<()>;

    async fn get_preferences(&self, user_id: &str) -> StoreResult<Option<UserPreferences>>;
}

/// One staged gateway write
///
/// Writes are staged in order and applied front to back, so a partially
/// failed batch can resume where it stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Detection(PatternDetection),
    Transition(PatternTransition),
    Snapshot(PatternStabilitySnapshot),
    Decision(InterventionDecision),
    State(PatternState),
    Memory(SessionSuppressionMemory),
    Preferences(UserPreferences),
    DeleteMemory(String),
}

impl WriteOp {
    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Detection(_) => "detection",
            Self::Transition(_) => "transition",
            Self::Snapshot(_) => "snapshot",
            Self::Decision(_) => "decision",
            Self::State(_) => "state",
            Self::Memory(_) => "memory",
            Self::Preferences(_) => "preferences",
            Self::DeleteMemory(_) => "delete_memory",
        }
    }

    pub async fn apply(&self, gateway: &dyn PersistenceGateway) -> StoreResult<()> {
        match self {
            Self::Detection(d) => gateway.append_detection(d).await,
            Self::Transition(t) => gateway.append_transition(t).await,
            Self::Snapshot(s) => gateway.append_snapshot(s).await,
            Self::Decision(d) => gateway.append_decision(d).await,
            Self::State(s) => gateway.upsert_state(s).await,
            Self::Memory(m) => gateway.upsert_memory(m).await,
            Self::Preferences(p) => gateway.upsert_preferences(p).await,
            Self::DeleteMemory(id) => gateway.delete_memory(id).await,
        }
    }
}
