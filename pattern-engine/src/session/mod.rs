//! Session orchestration
//!
//! [`SessionHub`] owns one slot per live session and drives the full path
//! for each call:
//!
//! ```text
//! observe:  validate → classify → advance → decide → commit → deliver
//! respond:  apply_response → commit (memory, preferences)
//! tick:     redeliver_due (all sessions, concurrently)
//! ```

pub mod hub;

pub use hub::{
    DeliveryStatus, ObservationOutcome, OpenedSession, RedeliveryReport, ResponseOutcome,
    SessionHub, SharedSessionHub,
};
