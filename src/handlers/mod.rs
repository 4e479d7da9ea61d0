pub mod health;
pub mod metrics_handler;
pub mod quality_gates;
pub mod reports;
pub mod telemetry;

use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

use crate::bus::Topic;
use crate::models::TracesData;
use crate::report::ReportOrchestrator;

/// Shared state of the HTTP surface
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ReportOrchestrator>,
    pub telemetry_inbound: Topic<TracesData>,
    pub pool: SqlitePool,
    /// Used when a calculation request names no lookback window
    pub default_lookback_window: Duration,
}
