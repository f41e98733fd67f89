//! Exponential backoff for transient sink and gateway failures
//!
//! # Usage
//!
//! ```ignore
//! use pattern_engine::delivery::RetryPolicy;
//!
//! let policy = RetryPolicy::default();
//! let mut attempt = 0;
//! loop {
//!     match write().await {
//!         Ok(v) => break v,
//!         Err(_) if policy.should_retry(attempt) => {
//!             attempt += 1;
//!             tokio::time::sleep(policy.backoff_duration(attempt)).await;
//!         }
//!         Err(e) => return Err(e),
//!     }
//! }
//! ```

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy for transient failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 0 disables retrying
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_backoff_ms: u64,
    /// Growth factor between consecutive delays
    pub backoff_multiplier: f64,
    /// Cap on any single delay
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    /// Delay in milliseconds before retry number `attempt` (0 means the
    /// first attempt, which never waits)
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        if attempt == 0 {
            return 0;
        }
        let delay =
            self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32 - 1);
        (delay as u64).min(self.max_backoff_ms)
    }

    /// Whether retry number `attempt + 1` is allowed
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms(attempt))
    }

    /// Total attempts including the first one
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn validate(&self, field: &str) -> EngineResult<()> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(EngineError::invalid_config(
                format!("{}.backoff_multiplier", field),
                self.backoff_multiplier,
                "must be a finite value >= 1",
            ));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(EngineError::invalid_config(
                format!("{}.max_backoff_ms", field),
                self.max_backoff_ms,
                "must be >= initial_backoff_ms",
            ));
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 500,
            backoff_multiplier: 2.0,
            max_backoff_ms: 5_000,
        }
    }
}
