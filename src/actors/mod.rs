//! Background loops of the agent
//!
//! Each loop runs as an independent tokio task that selects between the
//! shared `CancellationToken`, its interval ticker and an mpsc command
//! channel. A cloneable handle wraps the command channel.
//!
//! ```text
//!   CollectorActor (×N) ──▶ LatestSnapshot ──▶ AlertEvaluator ──▶ AlertEngine ──▶ Notifiers
//!          │
//!          └──────────────▶ StorageAdapter ──▶ StorageBackend ◀── CleanupScheduler
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: mpsc channel per actor for control messages
//! 2. **Request/Response**: oneshot channels inside the commands
//! 3. **Shutdown**: cancelling the token stops every loop between ticks

pub mod alert;
pub mod cleanup;
pub mod collector;
pub mod messages;

pub use alert::{AlertEvaluator, EvaluatorHandle};
pub use cleanup::{CleanupHandle, CleanupScheduler};
pub use collector::{CollectorActor, CollectorHandle};
pub use messages::{CleanupStats, EvaluatorStats};
