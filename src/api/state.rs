//! API shared state

use std::sync::Arc;

use crate::alerts::AlertEngine;
use crate::snapshot::LatestSnapshot;
use crate::storage::StorageBackend;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Store for entity / event / metric queries
    pub store: Arc<dyn StorageBackend>,

    /// Rule engine for alert state and operator actions
    pub alerts: Arc<AlertEngine>,

    pub snapshot: LatestSnapshot,
}

impl ApiState {
    pub fn new(store: Arc<dyn StorageBackend>, alerts: Arc<AlertEngine>, snapshot: LatestSnapshot) -> Self {
        Self {
            store,
            alerts,
            snapshot,
        }
    }
}
