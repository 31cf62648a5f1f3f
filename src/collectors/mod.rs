//! Sample producers
//!
//! Each [`Collector`] gathers one category of samples. The collector loop
//! (`actors::collector`) publishes every batch to the latest snapshot first
//! and then persists it through the storage adapter.

mod http;
mod services;
mod system;

use anyhow::Result;
use async_trait::async_trait;

use crate::adapter::StorageAdapter;
use crate::snapshot::LatestSnapshot;
use crate::{HttpCheckResult, ServiceStatus, SystemMetricsSample};

pub use http::HttpChecker;
pub use services::{ServiceCollector, parse_systemctl_show};
pub use system::SystemCollector;

/// One batch of freshly collected samples
#[derive(Debug, Clone, PartialEq)]
pub enum Collected {
    System(SystemMetricsSample),
    Services(Vec<ServiceStatus>),
    Http(Vec<HttpCheckResult>),
}

impl Collected {
    /// Update the snapshot, then write the batch to the store
    ///
    /// Returns the number of rows (metrics) or events the adapter wrote.
    pub async fn publish(self, snapshot: &LatestSnapshot, adapter: &StorageAdapter) -> Result<usize> {
        match self {
            Collected::System(sample) => {
                snapshot.set_system(sample.clone()).await;
                adapter.store_system_metrics(&sample).await
            }
            Collected::Services(services) => {
                snapshot.set_services(services.clone()).await;
                adapter.store_service_metrics(&services).await
            }
            Collected::Http(results) => {
                snapshot.set_http(results.clone()).await;
                adapter.store_http_check_results(&results).await
            }
        }
    }
}

#[async_trait]
pub trait Collector: Send {
    /// Short name used for logging (`system`, `services`, `http`)
    fn name(&self) -> &str;

    async fn collect(&mut self) -> Result<Collected>;
}
