//! CollectorActor - drives one [`Collector`] on its interval
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → collect() → LatestSnapshot → StorageAdapter::store_*()
//!     ↑
//!     └─── Commands (CollectNow)
//! ```
//!
//! Storage writes are awaited inside the loop, so once the loop has exited
//! no batch is left in flight.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, trace};

use crate::adapter::StorageAdapter;
use crate::collectors::Collector;
use crate::snapshot::LatestSnapshot;

use super::messages::CollectorCommand;

pub struct CollectorActor {
    collector: Box<dyn Collector>,
    snapshot: LatestSnapshot,
    adapter: Arc<StorageAdapter>,
    every: Duration,
    command_rx: mpsc::Receiver<CollectorCommand>,
    cancel: CancellationToken,
}

impl CollectorActor {
    pub fn new(
        collector: Box<dyn Collector>,
        snapshot: LatestSnapshot,
        adapter: Arc<StorageAdapter>,
        every: Duration,
        command_rx: mpsc::Receiver<CollectorCommand>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            collector,
            snapshot,
            adapter,
            every,
            command_rx,
            cancel,
        }
    }

    #[instrument(skip(self), fields(collector = %self.collector.name()))]
    pub async fn run(mut self) {
        debug!("starting collector");

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
                    if let Err(e) = self.collect_once().await {
                        error!("collection failed: {:#}", e);
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        CollectorCommand::CollectNow { respond_to } => {
                            let result = self.collect_once().await;
                            let _ = respond_to.send(result);
                        }
                    }
                }
            }
        }

        debug!("collector stopped");
    }

    async fn collect_once(&mut self) -> Result<()> {
        let batch = self.collector.collect().await?;
        let written = batch
            .publish(&self.snapshot, &self.adapter)
            .await
            .context("failed to store collected samples")?;

        trace!(written, "published batch");
        Ok(())
    }
}

#[derive(Clone)]
pub struct CollectorHandle {
    sender: mpsc::Sender<CollectorCommand>,
    pub name: String,
}

impl CollectorHandle {
    pub fn spawn(
        collector: Box<dyn Collector>,
        snapshot: LatestSnapshot,
        adapter: Arc<StorageAdapter>,
        every: Duration,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let name = collector.name().to_string();
        let actor = CollectorActor::new(collector, snapshot, adapter, every, cmd_rx, cancel);
        let task = tokio::spawn(actor.run());
        (
            Self {
                sender: cmd_tx,
                name,
            },
            task,
        )
    }

    /// Collect immediately, bypassing the interval timer
    pub async fn collect_now(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CollectorCommand::CollectNow { respond_to: tx })
            .await
            .context("failed to send CollectNow command")?;

        rx.await.context("failed to receive response")?
    }
}
