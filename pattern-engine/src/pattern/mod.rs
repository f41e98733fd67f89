//! Pattern detection
//!
//! Turns feature observations into label detections and tracks, per
//! session, which label is current and how stable it is.
//!
//! # Flow
//!
//! ```text
//! FeatureObservation ──▶ PatternClassifier ──▶ PatternProbabilities
//!                                                   │ detect (tie-break)
//!                                                   ▼
//!                         PatternState ◀── PatternStateMachine::advance
//!                              │
//!                              └─▶ PatternTransition / PatternStabilitySnapshot
//! ```

pub mod classifier;
pub mod distribution;
pub mod http;
pub mod label;
pub mod observation;
pub mod state_machine;

pub use classifier::{PatternClassifier, RawDistribution, RuleBasedClassifier, ENGAGEMENT_DIMENSIONS};
pub use distribution::{PatternDetection, PatternProbabilities, DISTRIBUTION_EPSILON, TIE_EPSILON};
pub use http::{HealthResponse, HttpClassifier};
pub use label::Label;
pub use observation::FeatureObservation;
pub use state_machine::{
    base_stability, Advance, PatternStabilitySnapshot, PatternState, PatternStateMachine,
    PatternTransition, PendingCandidate, SnapshotTrigger, StateMachineConfig,
};
