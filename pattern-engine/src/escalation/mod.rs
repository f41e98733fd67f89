//! Escalation: deterministic tier routing for interventions
//!
//! Maps the pattern state of a session plus what the user has already said
//! into an intervention tier. Pure decision logic with no I/O; the session
//! hub persists and delivers the results.
//!
//! # Escalation Ladder
//!
//! ```text
//! count < T1                        → None
//!     │
//!     ├─ count ≥ T1                 → Tier1 (passive hint)
//!     ├─ count ≥ T2, stability ≥ S  → Tier2 (popup, needs a response)
//!     ├─ count ≥ T3, stability ≥ S  → Tier3 (blocking)
//!     │
//!     ▼
//! User response
//!     ├─ acted                      → count restarts for this label period
//!     ├─ remind later               → quiet until the cooldown ends
//!     ├─ don't show this session    → quiet until confidence/stability rises
//!     ├─ don't show again           → label muted for the user
//!     └─ dismiss                    → same tier not re-shown this period
//! ```

pub mod memory;
pub mod policy;
pub mod tier;

pub use memory::{
    DeliveredTier, EscalationOffset, PendingDelivery, ResponseKind, SessionSuppressionMemory,
    SuppressionBaseline, UserPreferences, UserResponse,
};
pub use policy::{
    DecisionReason, EscalationConfig, EscalationPolicy, InterventionDecision, ResponseEffect,
};
pub use tier::{select_tier, InterventionTier, TierThresholds};
