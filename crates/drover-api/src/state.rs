//! Application state.

use drover_db::Store;
use drover_scheduler::{Scheduler, WorkerTokenMinter};
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub scheduler: Arc<Scheduler>,
    pub minter: Arc<WorkerTokenMinter>,
    /// Secret GitHub signs webhook deliveries with. Empty disables the check.
    pub webhook_secret: Arc<str>,
}

impl AppState {
    pub fn new(
        store: Store,
        scheduler: Arc<Scheduler>,
        minter: WorkerTokenMinter,
        webhook_secret: &str,
    ) -> Self {
        Self {
            store,
            scheduler,
            minter: Arc::new(minter),
            webhook_secret: Arc::from(webhook_secret),
        }
    }
}
