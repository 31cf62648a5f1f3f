//! Agent wiring
//!
//! [`Agent`] owns the store, the storage adapter, the latest snapshot and
//! the alert engine, and passes `Arc`s of them to the background loops.
//! There is no global state.
//!
//! ## Shutdown order
//!
//! 1. cancel the shared token
//! 2. join every loop (storage writes are awaited inside the loops)
//! 3. close the store
//! 4. stop the HTTP listener, granting in-flight requests `api.shutdown_grace`

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::actors::{CleanupHandle, CollectorHandle, EvaluatorHandle};
use crate::adapter::StorageAdapter;
use crate::alerts::AlertEngine;
use crate::collectors::{Collector, HttpChecker, ServiceCollector, SystemCollector};
use crate::config::Config;
use crate::notify::build_notifiers;
use crate::snapshot::LatestSnapshot;
use crate::storage::{SqliteBackend, SqliteOptions, StorageBackend};

#[cfg(feature = "api")]
struct ApiServer {
    addr: SocketAddr,
    stop: CancellationToken,
    task: JoinHandle<Result<()>>,
}

pub struct Agent {
    config: Config,
    store: Arc<dyn StorageBackend>,
    adapter: Arc<StorageAdapter>,
    snapshot: LatestSnapshot,
    engine: Arc<AlertEngine>,
    cancel: CancellationToken,
    loops: Vec<JoinHandle<()>>,
    cleanup: Option<CleanupHandle>,
    evaluator: Option<EvaluatorHandle>,
    collectors: Vec<CollectorHandle>,
    #[cfg(feature = "api")]
    api: Option<ApiServer>,
}

impl Agent {
    /// Open the store (running migrations) and build the alerting pipeline
    #[instrument(skip_all, fields(db = %config.storage.path.display()))]
    pub async fn new(config: Config) -> Result<Self> {
        let options = SqliteOptions {
            max_connections: config.storage.max_connections,
            ..SqliteOptions::default()
        };
        let store: Arc<dyn StorageBackend> = Arc::new(
            SqliteBackend::with_options(&config.storage.path, options)
                .await
                .with_context(|| {
                    format!("failed to open database {}", config.storage.path.display())
                })?,
        );

        let notifiers = build_notifiers(&config.alerts.notifiers)?;
        debug!("configured {} notifiers", notifiers.len());

        let engine = Arc::new(
            AlertEngine::from_config(&config.alerts, notifiers).with_event_store(store.clone()),
        );
        let adapter = Arc::new(StorageAdapter::new(
            store.clone(),
            config.storage.retention.clone(),
        ));

        Ok(Self {
            config,
            store,
            adapter,
            snapshot: LatestSnapshot::new(),
            engine,
            cancel: CancellationToken::new(),
            loops: Vec::new(),
            cleanup: None,
            evaluator: None,
            collectors: Vec::new(),
            #[cfg(feature = "api")]
            api: None,
        })
    }

    pub fn store(&self) -> &Arc<dyn StorageBackend> {
        &self.store
    }

    pub fn adapter(&self) -> &Arc<StorageAdapter> {
        &self.adapter
    }

    pub fn snapshot(&self) -> &LatestSnapshot {
        &self.snapshot
    }

    pub fn engine(&self) -> &Arc<AlertEngine> {
        &self.engine
    }

    pub fn cleanup(&self) -> Option<&CleanupHandle> {
        self.cleanup.as_ref()
    }

    pub fn evaluator(&self) -> Option<&EvaluatorHandle> {
        self.evaluator.as_ref()
    }

    pub fn collectors(&self) -> &[CollectorHandle] {
        &self.collectors
    }

    /// Address the API is bound to, once started
    #[cfg(feature = "api")]
    pub fn api_addr(&self) -> Option<SocketAddr> {
        self.api.as_ref().map(|api| api.addr)
    }

    fn enabled_collectors(&self) -> Result<Vec<(Box<dyn Collector>, std::time::Duration)>> {
        let config = &self.config.collectors;
        let mut collectors: Vec<(Box<dyn Collector>, std::time::Duration)> = Vec::new();

        if config.system.enabled {
            collectors.push((
                Box::new(SystemCollector::new()),
                config.system.interval.as_duration(),
            ));
        }

        if config.services.enabled && !config.services.units.is_empty() {
            collectors.push((
                Box::new(ServiceCollector::new(config.services.units.clone())),
                config.services.interval.as_duration(),
            ));
        }

        if config.http.enabled && !config.http.checks.is_empty() {
            let client = reqwest::Client::builder()
                .build()
                .context("failed to build HTTP client")?;
            collectors.push((
                Box::new(HttpChecker::new(
                    client,
                    config.http.checks.clone(),
                    config.http.timeout.as_duration(),
                )),
                config.http.interval.as_duration(),
            ));
        }

        Ok(collectors)
    }

    /// Spawn the background loops and, if enabled, the HTTP API
    pub async fn start(&mut self) -> Result<()> {
        let (cleanup, task) = CleanupHandle::spawn(
            self.store.clone(),
            self.config.storage.retention.clone(),
            self.cancel.clone(),
        );
        self.cleanup = Some(cleanup);
        self.loops.push(task);

        if self.config.alerts.enabled {
            let (evaluator, task) = EvaluatorHandle::spawn(
                self.engine.clone(),
                self.snapshot.clone(),
                self.config.alerts.evaluation_interval.as_duration(),
                self.cancel.clone(),
            );
            self.evaluator = Some(evaluator);
            self.loops.push(task);
        }

        for (collector, every) in self.enabled_collectors()? {
            let (handle, task) = CollectorHandle::spawn(
                collector,
                self.snapshot.clone(),
                self.adapter.clone(),
                every,
                self.cancel.clone(),
            );
            debug!(collector = %handle.name, ?every, "collector started");
            self.collectors.push(handle);
            self.loops.push(task);
        }

        #[cfg(feature = "api")]
        if self.config.api.enabled {
            self.start_api().await?;
        }

        info!(
            loops = self.loops.len(),
            rules = self.engine.rules().count(),
            "agent started"
        );
        Ok(())
    }

    #[cfg(feature = "api")]
    async fn start_api(&mut self) -> Result<()> {
        use crate::api::{self, ApiState};

        let listener = tokio::net::TcpListener::bind(self.config.api.listen)
            .await
            .with_context(|| format!("failed to bind API listener on {}", self.config.api.listen))?;
        let addr = listener.local_addr()?;

        let state = ApiState::new(self.store.clone(), self.engine.clone(), self.snapshot.clone());
        let stop = CancellationToken::new();
        let task = tokio::spawn(api::serve(listener, state, stop.clone().cancelled_owned()));

        self.api = Some(ApiServer { addr, stop, task });
        Ok(())
    }

    /// Stop everything in order; see the module docs
    pub async fn shutdown(self) -> Result<()> {
        info!("shutting down agent");
        self.cancel.cancel();

        for result in join_all(self.loops).await {
            if let Err(e) = result {
                warn!("background loop ended abnormally: {}", e);
            }
        }
        debug!("all loops stopped");

        self.store.close().await.context("failed to close store")?;

        #[cfg(feature = "api")]
        if let Some(api) = self.api {
            api.stop.cancel();
            let abort = api.task.abort_handle();
            let grace = self.config.api.shutdown_grace.as_duration();
            match tokio::time::timeout(grace, api.task).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => warn!("API server failed: {:#}", e),
                Ok(Err(e)) => warn!("API server task ended abnormally: {}", e),
                Err(_) => {
                    warn!("API server did not stop within {:?}, aborting", grace);
                    abort.abort();
                }
            }
        }

        info!("agent stopped");
        Ok(())
    }
}
