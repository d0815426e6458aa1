//! Shared state for the Actix-web handlers, wrapped in `web::Data`.

use crate::config::Config;
use crate::db::Db;
use crate::metrics::MetricsTracker;
use crate::scheduler::JobQueue;
use std::sync::Arc;

pub struct AppState {
    /// SQLite connection shared with the workers
    pub db: Db,
    pub config: Config,
    /// Per-strategy fetch counters
    pub metrics: Arc<MetricsTracker>,
    pub queue: JobQueue,
}
