//! Message types for actor communication
//!
//! Every background loop owns an mpsc command channel. Queries carry a
//! oneshot `respond_to` sender; shutdown is signalled through the shared
//! `CancellationToken` rather than a command.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::alerts::EvaluationSummary;
use crate::storage::{CleanupReport, StorageResult};

/// Commands that can be sent to the CleanupScheduler
#[derive(Debug)]
pub enum CleanupCommand {
    /// Run a cleanup cycle now, outside the regular interval
    RunNow {
        respond_to: oneshot::Sender<StorageResult<CleanupReport>>,
    },

    GetStats {
        respond_to: oneshot::Sender<CleanupStats>,
    },
}

/// Running totals of the cleanup scheduler
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanupStats {
    pub cycles: u64,
    pub failures: u64,
    pub rows_deleted: u64,
    pub vacuums: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_report: Option<CleanupReport>,
}

/// Commands that can be sent to the AlertEvaluator
#[derive(Debug)]
pub enum EvaluatorCommand {
    /// Evaluate all rules against the current snapshot immediately
    EvaluateNow {
        respond_to: oneshot::Sender<EvaluationSummary>,
    },

    GetStats {
        respond_to: oneshot::Sender<EvaluatorStats>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvaluatorStats {
    pub evaluations: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_summary: Option<EvaluationSummary>,
}

/// Commands that can be sent to a CollectorActor
#[derive(Debug)]
pub enum CollectorCommand {
    /// Trigger an immediate collection (bypassing the interval timer)
    CollectNow {
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },
}
