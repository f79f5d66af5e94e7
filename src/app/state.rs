//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::SyncHandle;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Sender side of the sync actor
    pub sync: SyncHandle,
}

impl AppState {
    pub fn new(config: Config, sync: SyncHandle) -> Self {
        Self {
            config: Arc::new(config),
            sync,
        }
    }
}
