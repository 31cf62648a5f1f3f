//! Alert rule engine
//!
//! ## Lifecycle
//!
//! ```text
//!  condition true            condition true             condition false
//! ───────────────▶ Firing ──────────────────▶ Firing ──────────────────▶ Resolved ─▶ history
//!                  (notify)                 (re-notify if the          (notify if ever
//!                                            throttle allows)           notified)
//! ```
//!
//! There is at most one alert per rule (id `<rule_id>-current`). A resolved
//! alert that fires again starts a new instance with fresh counters.

mod alert;
mod engine;
mod rule;

use std::fmt;

pub use alert::{Alert, AlertStatus, AlertType, ThrottlePolicy};
pub use engine::{AlertEngine, EvaluationSummary};
pub use rule::{AlertRule, ROOT_MOUNT, RuleCondition, Trigger};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertError {
    /// No active or historical alert has this id
    NotFound(String),
}

impl fmt::Display for AlertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertError::NotFound(id) => write!(f, "alert not found: {}", id),
        }
    }
}

impl std::error::Error for AlertError {}
