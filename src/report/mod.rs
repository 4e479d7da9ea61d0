//! Report orchestrator
//!
//! Owns the `QualityGateReport` saga: persists a report with its outbound
//! coverage requests, merges scorer results as they arrive and times out
//! reports that never finish.

pub mod gates;
pub mod orchestrator;
pub mod outbox;
pub mod reaper;
pub mod repository;
pub mod worker;

pub use gates::{QualityGateStore, SqliteQualityGateStore};
pub use orchestrator::{MergeOutcome, ReportOrchestrator};
pub use outbox::OutboxRelay;
pub use reaper::spawn_reaper;
pub use repository::{PendingRequest, ReportRepository};
pub use worker::ResultConsumer;

use uuid::Uuid;

use crate::bus::TopicClosed;
use crate::models::ApiIdentity;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("quality gate not found: {0}")]
    QualityGateNotFound(String),
    /// Gate vanished between dispatch and result ingestion
    #[error("quality gate configuration '{0}' does not exist")]
    ConfigurationDoesNotExist(String),
    #[error("report not found: {0}")]
    ReportNotFound(Uuid),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("test result for unknown API {api_identity} in calculation {calculation_id}")]
    TestResultForUnknownApi {
        calculation_id: Uuid,
        api_identity: ApiIdentity,
    },
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Publish(#[from] TopicClosed),
}
