//! Column family definitions for the RocksDB gateway
//!
//! Each record kind gets its own column family. Append-only facts use keys
//! that sort by session, then timestamp, then insertion sequence.

/// Column family for pattern detections
pub const CF_DETECTIONS: &str = "detections";

/// Column family for committed transitions
pub const CF_TRANSITIONS: &str = "transitions";

/// Column family for stability snapshots
pub const CF_SNAPSHOTS: &str = "snapshots";

/// Column family for delivered intervention decisions
pub const CF_DECISIONS: &str = "decisions";

/// Column family for live pattern state
pub const CF_STATES: &str = "states";

/// Column family for session suppression memory
pub const CF_MEMORY: &str = "memory";

/// Column family for per-user preferences
pub const CF_PREFERENCES: &str = "preferences";

/// Column family for store bookkeeping
pub const CF_META: &str = "meta";

/// Meta key holding the number of times the store has been opened
pub const META_APPEND_EPOCH: &str = "append_epoch";

/// All column family names
pub const ALL_CFS: &[&str] = &[
    CF_DETECTIONS,
    CF_TRANSITIONS,
    CF_SNAPSHOTS,
    CF_DECISIONS,
    CF_STATES,
    CF_MEMORY,
    CF_PREFERENCES,
    CF_META,
];

/// Key builders
pub mod keys {
    /// Append key: session, zero-padded timestamp, then a sequence number so
    /// records with equal timestamps keep insertion order. The sequence
    /// carries the open epoch in its high 32 bits.
    pub fn append(session_id: &str, timestamp_nanos: i64, seq: u64) -> String {
        format!("{}:{:020}:{:020}", session_id, timestamp_nanos, seq)
    }

    /// Prefix covering every append key of a session
    pub fn session_prefix(session_id: &str) -> String {
        format!("{}:", session_id)
    }

    /// Parse the timestamp out of an append key
    pub fn parse_append_timestamp(key: &str) -> Option<i64> {
        let mut parts = key.rsplitn(3, ':');
        let _seq = parts.next()?;
        parts.next()?.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_keys_sort_by_time() {
        let a = keys::append("s1", 1_000, 7);
        let b = keys::append("s1", 20_000, 0);
        let c = keys::append("s1", 20_000, 1);
        assert!(a < b && b < c);
        assert!(a.starts_with(&keys::session_prefix("s1")));
    }

    #[test]
    fn test_append_keys_sort_across_epochs() {
        let first_open = keys::append("s1", 20_000, 5);
        let second_open = keys::append("s1", 20_000, 1 << 32);
        assert!(first_open < second_open);
    }

    #[test]
    fn test_parse_append_timestamp() {
        let key = keys::append("sess:with:colons", 123_456, 9);
        assert_eq!(keys::parse_append_timestamp(&key), Some(123_456));
        assert_eq!(keys::parse_append_timestamp("garbage"), None);
    }

    #[test]
    fn test_all_cfs_unique() {
        let mut names = ALL_CFS.to_vec();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), ALL_CFS.len());
    }
}
