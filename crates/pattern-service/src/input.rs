//! JSON-lines input events

use chrono::{DateTime, Utc};
use pattern_engine::{FeatureObservation, UserResponse};
use serde::{Deserialize, Serialize};

/// One input line, tagged by `"type"`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputEvent {
    /// Open (or resume) a session for a user
    Open { session_id: String, user_id: String },
    /// A feature observation for a session
    Observation(FeatureObservation),
    /// A user response to a delivered intervention
    Response(UserResponse),
    /// End a session and clear its suppression memory
    End { session_id: String },
    /// Retry every undelivered decision whose backoff elapsed by `now`
    Tick {
        #[serde(default = "Utc::now")]
        now: DateTime<Utc>,
    },
}

impl InputEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Open { .. } => "open",
            Self::Observation(_) => "observation",
            Self::Response(_) => "response",
            Self::End { .. } => "end",
            Self::Tick { .. } => "tick",
        }
    }
}
