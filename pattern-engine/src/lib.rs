//! Pattern Detection & Escalating Intervention Engine
//!
//! This library provides:
//! - Probabilistic classification of interaction behavior into six patterns (A-F)
//! - A per-session state machine with debounced transitions and a stability measure
//! - A deterministic escalation policy with tiered interventions, suppression and re-trigger rules
//!
//! # Patterns
//!
//! - `A`: Active Critical Engagement
//! - `B`: Selective Engagement
//! - `C`: Moderate Balanced Use
//! - `D`: Tool-Oriented Use
//! - `E`: Exploratory Learning
//! - `F`: Passive Over-Reliance (default concerning pattern)
//!
//! # Boundaries
//!
//! - [`pattern::PatternClassifier`]: feature vector → probability per label
//!   ([`pattern::RuleBasedClassifier`], [`pattern::HttpClassifier`])
//! - [`store::PersistenceGateway`]: append log plus latest-state lookup
//!   ([`store::MemoryGateway`], `store::RocksGateway` with `rocksdb-store`)
//! - [`delivery::InterventionSink`]: hands decisions to the user
//!   ([`delivery::BroadcastSink`], [`delivery::LogSink`])
//!
//! # Usage
//!
//! ```ignore
//! use pattern_engine::{EngineConfig, FeatureObservation, SessionHub};
//!
//! let hub = SessionHub::new(config, classifier, gateway, sink)?.shared();
//! hub.open_session("session-1", "user-7").await?;
//! let outcome = hub.observe(observation).await?;
//! if outcome.decision.deliver {
//!     // Tier handed to the sink; responses come back via hub.respond(..)
//! }
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod delivery;
pub mod error;
pub mod escalation;
pub mod pattern;
pub mod session;
pub mod store;

// Re-export configuration and error types
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult, ErrorReport};

// Re-export pattern detection types
pub use pattern::{
    FeatureObservation, HttpClassifier, Label, PatternClassifier, PatternDetection,
    PatternProbabilities, PatternStabilitySnapshot, PatternState, PatternStateMachine,
    PatternTransition, RuleBasedClassifier, StateMachineConfig,
};

// Re-export escalation types
pub use escalation::{
    select_tier, DecisionReason, EscalationConfig, EscalationPolicy, InterventionDecision,
    InterventionTier, ResponseKind, SessionSuppressionMemory, TierThresholds, UserPreferences,
    UserResponse,
};

// Re-export delivery types
pub use delivery::{BroadcastSink, InterventionSink, LogSink, RetryPolicy, SinkError};

// Re-export session hub types
pub use session::{DeliveryStatus, ObservationOutcome, SessionHub, SharedSessionHub};

// Re-export persistence types
pub use store::{MemoryGateway, PersistenceGateway, SharedGateway, StoreError};
#[cfg(feature = "rocksdb-store")]
pub use store::RocksGateway;
