use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::orchestrator::ReportOrchestrator;
use super::OrchestratorError;
use crate::bus::{Envelope, Subscription};
use crate::models::CoverageResponse;
use crate::signals::ShutdownSignal;

/// Feeds `coverage.response` into the orchestrator
///
/// A failing message is logged and skipped; it never stops the consumer.
pub struct ResultConsumer {
    orchestrator: Arc<ReportOrchestrator>,
}

impl ResultConsumer {
    pub fn new(orchestrator: Arc<ReportOrchestrator>) -> Self {
        Self { orchestrator }
    }

    pub async fn handle(&self, envelope: Envelope<CoverageResponse>) {
        let Envelope { key, payload } = envelope;
        let api = payload.api_identity.clone();

        let calculation_id = match Uuid::parse_str(&key) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(key = %key, api = %api, error = %e, "Scorer result with malformed calculation id, ignoring");
                return;
            }
        };

        match self.orchestrator.on_scorer_result(calculation_id, payload).await {
            Ok(_) => {}
            Err(e @ OrchestratorError::TestResultForUnknownApi { .. }) => {
                tracing::error!(
                    calculation_id = %calculation_id,
                    api = %api,
                    error = %e,
                    "Scorer result does not correlate with any API test"
                );
            }
            Err(e @ OrchestratorError::ConfigurationDoesNotExist(_)) => {
                tracing::error!(
                    calculation_id = %calculation_id,
                    api = %api,
                    error = %e,
                    "Quality gate disappeared while its report was in progress"
                );
            }
            Err(e) => {
                tracing::error!(calculation_id = %calculation_id, api = %api, error = %e, "Failed to merge scorer result");
            }
        }
    }

    pub async fn run(
        self,
        mut responses: Subscription<CoverageResponse>,
        mut shutdown: broadcast::Receiver<ShutdownSignal>,
    ) {
        tracing::info!(topic = responses.name(), "Scorer result consumer started");
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                message = responses.recv() => match message {
                    Some(envelope) => self.handle(envelope).await,
                    None => break,
                },
            }
        }
    }
}
