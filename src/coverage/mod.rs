//! OpenAPI coverage scorer
//!
//! Consumes coverage requests, measures stored telemetry against the API's
//! declared specification and replies with one result per criterion.

pub mod criteria;
pub mod ingest;
pub mod observation;
pub mod openapi;
pub mod query;
pub mod resolver;
pub mod scorer;
pub mod store;
pub mod worker;

pub use ingest::SpanIngestor;
pub use resolver::{ChainedSpecResolver, HttpSpecResolver, SpecFetcher, SpecResolver, StaticSpecResolver};
pub use scorer::CoverageScorer;
pub use store::{CoverageStore, SqliteCoverageStore, StoredSpan};
pub use worker::CoverageWorker;

use crate::models::ApiIdentity;

#[derive(Debug, thiserror::Error)]
pub enum CoverageError {
    #[error("API not indexed: {identity} ({reason})")]
    OpenApiNotIndexed { identity: ApiIdentity, reason: String },
    #[error("specification unparseable: {0}")]
    SpecificationUnparseable(String),
    #[error("telemetry store error: {0}")]
    Store(#[from] sqlx::Error),
    #[error("invalid telemetry query: {0}")]
    InvalidQuery(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoverageError {
    /// Metric label for a failed calculation
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::OpenApiNotIndexed { .. } => "not_indexed",
            Self::SpecificationUnparseable(_) => "unparseable",
            Self::Store(_) | Self::Serialization(_) => "store_error",
            Self::InvalidQuery(_) => "invalid_query",
        }
    }
}
