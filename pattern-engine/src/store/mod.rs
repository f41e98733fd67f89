//! Persistence for pattern and escalation records
//!
//! # Architecture
//!
//! The engine talks to storage only through [`PersistenceGateway`]:
//!
//! - append log: detections, transitions, stability snapshots, decisions
//! - latest-state lookup: pattern state and suppression memory by session,
//!   preferences by user
//!
//! [`MemoryGateway`] keeps everything in process. With the `rocksdb-store`
//! feature, [`RocksGateway`] persists to a local RocksDB instance with one
//! column family per record kind.
//!
//! # Usage
//!
//! ```ignore
//! use pattern_engine::store::{MemoryGateway, PersistenceGateway};
//!
//! let gateway = MemoryGateway::new().shared();
//! gateway.upsert_state(&state).await?;
//! let loaded = gateway.get_state(&state.session_id).await?;
//! ```

pub mod gateway;
pub mod memory;
#[cfg(feature = "rocksdb-store")]
pub mod rocks;
pub mod schema;

pub use gateway::{PersistenceGateway, SharedGateway, StoreError, StoreResult, WriteOp};
pub use memory::MemoryGateway;
#[cfg(feature = "rocksdb-store")]
pub use rocks::RocksGateway;
