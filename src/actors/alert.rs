//! AlertEvaluator - drives the rule engine on a fixed cadence
//!
//! Every tick takes an owned copy of the latest snapshot and hands it to
//! [`AlertEngine::evaluate_rules`]. The evaluation is awaited inline, so a
//! slow notifier delays the next tick instead of overlapping it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use crate::alerts::{AlertEngine, EvaluationSummary};
use crate::snapshot::LatestSnapshot;

use super::messages::{EvaluatorCommand, EvaluatorStats};

pub struct AlertEvaluator {
    engine: Arc<AlertEngine>,
    snapshot: LatestSnapshot,
    every: Duration,
    command_rx: mpsc::Receiver<EvaluatorCommand>,
    cancel: CancellationToken,
    stats: EvaluatorStats,
}

impl AlertEvaluator {
    pub fn new(
        engine: Arc<AlertEngine>,
        snapshot: LatestSnapshot,
        every: Duration,
        command_rx: mpsc::Receiver<EvaluatorCommand>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            engine,
            snapshot,
            every,
            command_rx,
            cancel,
            stats: EvaluatorStats::default(),
        }
    }

    #[instrument(skip(self), fields(every = ?self.every))]
    pub async fn run(mut self) {
        debug!("starting alert evaluator");

        let mut ticker = interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!("cancellation requested");
                    break;
                }

                _ = ticker.tick() => {
                    self.evaluate().await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        EvaluatorCommand::EvaluateNow { respond_to } => {
                            let summary = self.evaluate().await;
                            let _ = respond_to.send(summary);
                        }
                        EvaluatorCommand::GetStats { respond_to } => {
                            let _ = respond_to.send(self.stats.clone());
                        }
                    }
                }
            }
        }

        debug!("alert evaluator stopped");
    }

    async fn evaluate(&mut self) -> EvaluationSummary {
        let snapshot = self.snapshot.get().await;
        let summary = self.engine.evaluate_rules(&snapshot).await;

        trace!(?summary, "evaluation finished");
        self.stats.evaluations += 1;
        self.stats.last_run = Some(Utc::now());
        self.stats.last_summary = Some(summary);
        summary
    }
}

#[derive(Clone)]
pub struct EvaluatorHandle {
    sender: mpsc::Sender<EvaluatorCommand>,
}

impl EvaluatorHandle {
    pub fn spawn(
        engine: Arc<AlertEngine>,
        snapshot: LatestSnapshot,
        every: Duration,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let evaluator = AlertEvaluator::new(engine, snapshot, every, cmd_rx, cancel);
        let task = tokio::spawn(evaluator.run());
        (Self { sender: cmd_tx }, task)
    }

    /// Evaluate immediately, bypassing the interval timer
    pub async fn evaluate_now(&self) -> Result<EvaluationSummary> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(EvaluatorCommand::EvaluateNow { respond_to: tx })
            .await
            .context("failed to send EvaluateNow command")?;

        rx.await.context("failed to receive response")
    }

    pub async fn stats(&self) -> Result<EvaluatorStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(EvaluatorCommand::GetStats { respond_to: tx })
            .await
            .context("failed to send GetStats command")?;

        rx.await.context("failed to receive response")
    }
}
