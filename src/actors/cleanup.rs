//! CleanupScheduler - periodic retention sweep
//!
//! ```text
//! start ─▶ cleanup ─▶ (reclaimable > threshold?) ─▶ VACUUM
//!            ▲                                        │
//!            └──────────── every cleanup_interval ◀───┘
//! ```
//!
//! The first cycle runs as soon as the scheduler starts. A failing cycle is
//! logged and counted; the next tick runs normally.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::RetentionSettings;
use crate::storage::{CleanupReport, StorageBackend, StorageResult};

use super::messages::{CleanupCommand, CleanupStats};

pub struct CleanupScheduler {
    store: Arc<dyn StorageBackend>,
    settings: RetentionSettings,
    command_rx: mpsc::Receiver<CleanupCommand>,
    cancel: CancellationToken,
    stats: CleanupStats,
}

impl CleanupScheduler {
    pub fn new(
        store: Arc<dyn StorageBackend>,
        settings: RetentionSettings,
        command_rx: mpsc::Receiver<CleanupCommand>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            settings,
            command_rx,
            cancel,
            stats: CleanupStats::default(),
        }
    }

    #[instrument(skip(self), fields(interval = %self.settings.cleanup_interval))]
    pub async fn run(mut self) {
        debug!("starting cleanup scheduler");

        let mut ticker = interval(self.settings.cleanup_interval.as_duration());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!("cancellation requested");
                    break;
                }

                _ = ticker.tick() => {
                    let _ = self.run_cycle(Utc::now()).await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        CleanupCommand::RunNow { respond_to } => {
                            let result = self.run_cycle(Utc::now()).await;
                            let _ = respond_to.send(result);
                        }
                        CleanupCommand::GetStats { respond_to } => {
                            let _ = respond_to.send(self.stats.clone());
                        }
                    }
                }
            }
        }

        debug!("cleanup scheduler stopped");
    }

    async fn run_cycle(&mut self, now: DateTime<Utc>) -> StorageResult<CleanupReport> {
        self.stats.cycles += 1;
        self.stats.last_run = Some(now);

        let report = match self.store.cleanup_at(&self.settings.policy(), now).await {
            Ok(report) => report,
            Err(e) => {
                self.stats.failures += 1;
                error!("cleanup failed: {}", e);
                return Err(e);
            }
        };

        self.stats.rows_deleted += report.total_deleted();
        if report.total_deleted() > 0 {
            info!(
                deleted = report.total_deleted(),
                reclaimable = report.reclaimable_bytes,
                "cleanup removed expired rows"
            );
        } else {
            debug!("cleanup found nothing to delete");
        }

        if report.reclaimable_bytes > self.settings.vacuum_threshold_bytes {
            match self.store.vacuum().await {
                Ok(()) => {
                    self.stats.vacuums += 1;
                    info!("vacuumed {} reclaimable bytes", report.reclaimable_bytes);
                }
                Err(e) => warn!("vacuum failed: {}", e),
            }
        }

        self.stats.last_report = Some(report.clone());
        Ok(report)
    }
}

/// Handle for querying a running CleanupScheduler
#[derive(Clone)]
pub struct CleanupHandle {
    sender: mpsc::Sender<CleanupCommand>,
}

impl CleanupHandle {
    pub fn spawn(
        store: Arc<dyn StorageBackend>,
        settings: RetentionSettings,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let scheduler = CleanupScheduler::new(store, settings, cmd_rx, cancel);
        let task = tokio::spawn(scheduler.run());
        (Self { sender: cmd_tx }, task)
    }

    pub async fn run_now(&self) -> Result<CleanupReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CleanupCommand::RunNow { respond_to: tx })
            .await
            .context("failed to send RunNow command")?;

        Ok(rx.await.context("failed to receive response")??)
    }

    pub async fn stats(&self) -> Result<CleanupStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CleanupCommand::GetStats { respond_to: tx })
            .await
            .context("failed to send GetStats command")?;

        rx.await.context("failed to receive response")
    }
}
