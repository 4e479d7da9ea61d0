use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};

use super::repository::ReportRepository;
use super::OrchestratorError;
use crate::bus::Topic;
use crate::models::CoverageRequest;
use crate::signals::ShutdownSignal;

const BATCH_SIZE: i64 = 100;

/// Relays committed outbox rows to `coverage.request`
///
/// Rows are marked published only after the publish succeeded, so a crash in
/// between re-publishes them on the next start.
pub struct OutboxRelay {
    repository: ReportRepository,
    requests: Topic<CoverageRequest>,
    notify: Arc<Notify>,
    poll_interval: Duration,
}

impl OutboxRelay {
    pub fn new(
        repository: ReportRepository,
        requests: Topic<CoverageRequest>,
        notify: Arc<Notify>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            repository,
            requests,
            notify,
            poll_interval,
        }
    }

    /// Publish every pending row, returning how many were relayed
    pub async fn relay_pending(&self) -> Result<usize, OrchestratorError> {
        let mut relayed = 0;
        loop {
            let batch = self.repository.unpublished(BATCH_SIZE).await?;
            if batch.is_empty() {
                break;
            }
            for pending in batch {
                self.requests
                    .publish(pending.calculation_id.to_string(), pending.request)
                    .await?;
                self.repository.mark_published(pending.id).await?;
                relayed += 1;
            }
        }

        if relayed > 0 {
            crate::metrics::record_outbox_published(relayed);
            tracing::debug!(relayed = relayed, topic = self.requests.name(), "Relayed coverage requests");
        }
        Ok(relayed)
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<ShutdownSignal>) {
        tracing::info!(
            topic = self.requests.name(),
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Outbox relay started"
        );
        loop {
            if let Err(e) = self.relay_pending().await {
                tracing::error!(error = %e, "Outbox relay failed");
                if matches!(e, OrchestratorError::Publish(_)) {
                    break;
                }
            }

            tokio::select! {
                _ = shutdown.recv() => break,
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::topic;
    use crate::models::{ApiIdentity, QualityGateReport, ReportParameters};
    use crate::server::test_pool;

    #[tokio::test]
    async fn test_relay_publishes_once_keyed_by_calculation() {
        let repository = ReportRepository::new(test_pool().await);
        let report = QualityGateReport::new(
            "strict",
            &[ApiIdentity::new("orders", "Orders API", "1.0")],
            ReportParameters {
                lookback_window: Duration::from_secs(60),
                attribute_filters: vec![],
            },
            Duration::from_secs(600),
        );
        let request = CoverageRequest {
            api_identity: ApiIdentity::new("orders", "Orders API", "1.0"),
            lookback_window: Duration::from_secs(60),
            attribute_filters: vec![],
        };
        repository.create(&report, &[request.clone()]).await.unwrap();

        let (requests, mut subscription) = topic("coverage.request", 8);
        let relay = OutboxRelay::new(repository, requests, Arc::new(Notify::new()), Duration::from_secs(5));

        assert_eq!(relay.relay_pending().await.unwrap(), 1);
        assert_eq!(relay.relay_pending().await.unwrap(), 0);

        let envelope = subscription.recv().await.unwrap();
        assert_eq!(envelope.key, report.calculation_id.to_string());
        assert_eq!(envelope.payload, request);
    }

    #[tokio::test]
    async fn test_failed_publish_keeps_row_pending() {
        let repository = ReportRepository::new(test_pool().await);
        let report = QualityGateReport::new(
            "strict",
            &[ApiIdentity::new("orders", "Orders API", "1.0")],
            ReportParameters {
                lookback_window: Duration::from_secs(60),
                attribute_filters: vec![],
            },
            Duration::from_secs(600),
        );
        let request = CoverageRequest {
            api_identity: ApiIdentity::new("orders", "Orders API", "1.0"),
            lookback_window: Duration::from_secs(60),
            attribute_filters: vec![],
        };
        repository.create(&report, &[request]).await.unwrap();

        let (requests, subscription) = topic::<CoverageRequest>("coverage.request", 8);
        drop(subscription);
        let relay = OutboxRelay::new(repository.clone(), requests, Arc::new(Notify::new()), Duration::from_secs(5));

        assert!(matches!(relay.relay_pending().await, Err(OrchestratorError::Publish(_))));
        assert_eq!(repository.unpublished(10).await.unwrap().len(), 1);
    }
}
