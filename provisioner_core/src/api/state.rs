//! API server state.

use std::sync::Arc;

use crate::lifecycle::LifecycleManager;

/// Shared state for the API server.
#[derive(Clone)]
pub struct ApiState {
    /// Owner of every provisioned instance.
    pub lifecycle: Arc<LifecycleManager>,
}

impl ApiState {
    /// Create new API state.
    pub fn new(lifecycle: LifecycleManager) -> Self {
        Self {
            lifecycle: Arc::new(lifecycle),
        }
    }

    /// Share an existing manager, e.g. with the shutdown path.
    pub fn from_shared(lifecycle: Arc<LifecycleManager>) -> Self {
        Self { lifecycle }
    }
}
