//! RocksDB-backed persistence gateway
//!
//! One column family per record kind (see [`super::schema`]). Values are
//! bincode-encoded through serde.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamilyDescriptor, Options, DB};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use super::gateway::{PersistenceGateway, StoreError, StoreResult};
use super::schema::{self, ALL_CFS};
use crate::escalation::{InterventionDecision, SessionSuppressionMemory, UserPreferences};
use crate::pattern::{PatternDetection, PatternStabilitySnapshot, PatternState, PatternTransition};

/// Durable gateway on a local RocksDB instance
pub struct RocksGateway {
    db: RwLock<DB>,
    path: PathBuf,
    seq: AtomicU64,
}

impl RocksGateway {
    /// Open or create a store at the given path
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&opts, &path, cf_descriptors)?;
        let epoch = bump_epoch(&db)?;
        debug!(path = %path.display(), epoch, "RocksDB gateway opened");

        Ok(Self {
            db: RwLock::new(db),
            path,
            seq: AtomicU64::new(epoch << 32),
        })
    }

    /// Create a shared reference to this gateway
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Get the database path
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Transitions appended for a session, oldest first
    pub fn transitions_for(&self, session_id: &str) -> StoreResult<Vec<PatternTransition>> {
        self.scan(schema::CF_TRANSITIONS, session_id)
    }

    /// Decisions appended for a session, oldest first
    pub fn decisions_for(&self, session_id: &str) -> StoreResult<Vec<InterventionDecision>> {
        self.scan(schema::CF_DECISIONS, session_id)
    }

    // =========================================================================
    // Generic operations
    // =========================================================================

    fn put<T: Serialize>(&self, cf_name: &str, key: &str, value: &T) -> StoreResult<()> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;

        let bytes = bincode::serde::encode_to_vec(value, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        db.put_cf(&cf, key.as_bytes(), bytes)?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, cf_name: &str, key: &str) -> StoreResult<Option<T>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;

        match db.get_cf(&cf, key.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn delete(&self, cf_name: &str, key: &str) -> StoreResult<()> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;

        db.delete_cf(&cf, key.as_bytes())?;
        Ok(())
    }

    fn append<T: Serialize>(
        &self,
        cf_name: &str,
        session_id: &str,
        timestamp: DateTime<Utc>,
        value: &T,
    ) -> StoreResult<()> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let nanos = timestamp.timestamp_nanos_opt().unwrap_or(0);
        let key = schema::keys::append(session_id, nanos, seq);
        self.put(cf_name, &key, value)
    }

    fn scan<T: DeserializeOwned>(&self, cf_name: &str, session_id: &str) -> StoreResult<Vec<T>> {
        let db = self.db.read().map_err(|_| StoreError::LockPoisoned)?;
        let cf = db
            .cf_handle(cf_name)
            .ok_or_else(|| StoreError::ColumnFamilyNotFound(cf_name.to_string()))?;

        let prefix = schema::keys::session_prefix(session_id);
        let mut values = Vec::new();
        for result in db.prefix_iterator_cf(&cf, prefix.as_bytes()) {
            let (key, bytes) = result?;
            if !key.starts_with(prefix.as_bytes()) {
                break; // Prefix no longer matches
            }
            values.push(decode(&bytes)?);
        }
        Ok(values)
    }
}

/// Count this open in the meta column family.
///
/// Append sequences start at `epoch << 32`, so records appended after a
/// reopen sort after earlier records with the same timestamp.
fn bump_epoch(db: &DB) -> StoreResult<u64> {
    let cf = db
        .cf_handle(schema::CF_META)
        .ok_or_else(|| StoreError::ColumnFamilyNotFound(schema::CF_META.to_string()))?;
    let epoch = match db.get_cf(&cf, schema::META_APPEND_EPOCH.as_bytes())? {
        Some(bytes) => decode::<u64>(&bytes)? + 1,
        None => 0,
    };
    let bytes = bincode::serde::encode_to_vec(epoch, bincode::config::standard())
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    db.put_cf(&cf, schema::META_APPEND_EPOCH.as_bytes(), bytes)?;
    Ok(epoch)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(|e| StoreError::Deserialization(e.to_string()))
}

#[async_trait]
impl PersistenceGateway for RocksGateway {
    async fn append_detection(&self, detection: &PatternDetection) -> StoreResult<()> {
        self.append(
            schema::CF_DETECTIONS,
            &detection.session_id,
            detection.timestamp,
            detection,
        )
    }

    async fn append_transition(&self, transition: &PatternTransition) -> StoreResult<()> {
        self.append(
            schema::CF_TRANSITIONS,
            &transition.session_id,
            transition.timestamp,
            transition,
        )
    }

    async fn append_snapshot(&self, snapshot: &PatternStabilitySnapshot) -> StoreResult<()> {
        self.append(
            schema::CF_SNAPSHOTS,
            &snapshot.session_id,
            snapshot.timestamp,
            snapshot,
        )
    }

    async fn append_decision(&self, decision: &InterventionDecision) -> StoreResult<()> {
        self.append(
            schema::CF_DECISIONS,
            &decision.session_id,
            decision.timestamp,
            decision,
        )
    }

    async fn upsert_state(&self, state: &PatternState) -> StoreResult<()> {
        self.put(schema::CF_STATES, &state.session_id, state)
    }

    async fn get_state(&self, session_id: &str) -> StoreResult<Option<PatternState>> {
        self.get(schema::CF_STATES, session_id)
    }

    async fn upsert_memory(&self, memory: &SessionSuppressionMemory) -> StoreResult<()> {
        self.put(schema::CF_MEMORY, &memory.session_id, memory)
    }

    async fn get_memory(&self, session_id: &str) -> StoreResult<Option<SessionSuppressionMemory>> {
        self.get(schema::CF_MEMORY, session_id)
    }

    async fn delete_memory(&self, session_id: &str) -> StoreResult<()> {
        self.delete(schema::CF_MEMORY, session_id)
    }

    async fn upsert_preferences(&self, preferences: &UserPreferences) -> StoreResult<()> {
        self.put(schema::CF_PREFERENCES, &preferences.user_id, preferences)
    }

    async fn get_preferences(&self, user_id: &str) -> StoreResult<Option<UserPreferences>> {
        self.get(schema::CF_PREFERENCES, user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::Label;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn state() -> PatternState {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        PatternState {
            session_id: "s1".to_string(),
            current_label: Label::D,
            current_label_since: ts,
            consecutive_count: 4,
            stability_score: 0.72,
            confidence_ewma: 0.7,
            last_confidence: 0.69,
            last_transition: Some(PatternTransition {
                session_id: "s1".to_string(),
                timestamp: ts,
                from_label: Label::C,
                to_label: Label::D,
                confidence_delta: 0.1,
                debounce_count: 3,
                forced: false,
            }),
            candidate: None,
            observation_count: 12,
            last_observed_at: ts,
        }
    }

    #[tokio::test]
    async fn test_state_roundtrip() {
        let dir = TempDir::new().unwrap();
        let gateway = RocksGateway::open(dir.path()).unwrap();
        let original = state();
        gateway.upsert_state(&original).await.unwrap();
        let loaded = gateway.get_state("s1").await.unwrap();
        assert_eq!(loaded, Some(original));
        assert!(gateway.get_state("s2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transitions_scan_in_order() {
        let dir = TempDir::new().unwrap();
        let gateway = RocksGateway::open(dir.path()).unwrap();
        let base = state().last_transition.unwrap();
        for i in 0..3 {
            let mut t = base.clone();
            t.timestamp = base.timestamp + chrono::Duration::seconds(i);
            t.debounce_count = i as u32;
            gateway.append_transition(&t).await.unwrap();
        }
        let mut other = base.clone();
        other.session_id = "s10".to_string();
        gateway.append_transition(&other).await.unwrap();

        let loaded = gateway.transitions_for("s1").unwrap();
        let counts: Vec<u32> = loaded.iter().map(|t| t.debounce_count).collect();
        assert_eq!(counts, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_appends_after_reopen_sort_after_earlier_ones() {
        let dir = TempDir::new().unwrap();
        let base = state().last_transition.unwrap();
        {
            let gateway = RocksGateway::open(dir.path()).unwrap();
            let mut first = base.clone();
            first.debounce_count = 1;
            gateway.append_transition(&first).await.unwrap();
        }
        let gateway = RocksGateway::open(dir.path()).unwrap();
        let mut second = base.clone();
        second.debounce_count = 2;
        gateway.append_transition(&second).await.unwrap();

        let counts: Vec<u32> = gateway
            .transitions_for("s1")
            .unwrap()
            .iter()
            .map(|t| t.debounce_count)
            .collect();
        assert_eq!(counts, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_memory_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let gateway = RocksGateway::open(dir.path()).unwrap();
            let mut memory = SessionSuppressionMemory::new("s1", "u1");
            memory.dont_show_again.insert(Label::F);
            gateway.upsert_memory(&memory).await.unwrap();
        }
        let gateway = RocksGateway::open(dir.path()).unwrap();
        let memory = gateway.get_memory("s1").await.unwrap().unwrap();
        assert!(memory.is_muted(Label::F));
    }
}
