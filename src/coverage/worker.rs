use futures::FutureExt;
use std::sync::Arc;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;

use super::scorer::CoverageScorer;
use crate::bus::{Envelope, Subscription, Topic};
use crate::models::{CoverageRequest, CoverageResponse};
use crate::signals::ShutdownSignal;

/// Runs the scorer over `coverage.request`, replying on `coverage.response`
///
/// Requests are scored concurrently up to `concurrency`; each reply carries
/// the request's key.
pub struct CoverageWorker {
    scorer: Arc<CoverageScorer>,
    responses: Topic<CoverageResponse>,
    permits: Arc<Semaphore>,
}

impl CoverageWorker {
    pub fn new(scorer: Arc<CoverageScorer>, responses: Topic<CoverageResponse>, concurrency: usize) -> Self {
        Self {
            scorer,
            responses,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Score one request and publish the reply
    pub async fn handle(
        scorer: &CoverageScorer,
        responses: &Topic<CoverageResponse>,
        envelope: Envelope<CoverageRequest>,
    ) {
        let Envelope { key, payload } = envelope;
        let identity = payload.api_identity.clone();

        let response = match std::panic::AssertUnwindSafe(scorer.score(&payload))
            .catch_unwind()
            .await
        {
            Ok(response) => response,
            Err(panic) => {
                tracing::error!(
                    calculation_id = %key,
                    api = %identity,
                    panic = ?panic,
                    "Coverage calculation panicked"
                );
                crate::metrics::record_coverage_request("panicked");
                CoverageResponse::failure(identity.clone(), "coverage calculation failed")
            }
        };

        if let Err(e) = responses.publish(key.clone(), response).await {
            tracing::error!(calculation_id = %key, api = %identity, error = %e, "Failed to publish coverage response");
        }
    }

    pub async fn run(
        self,
        mut requests: Subscription<CoverageRequest>,
        mut shutdown: broadcast::Receiver<ShutdownSignal>,
    ) {
        tracing::info!(requests = requests.name(), responses = self.responses.name(), "Coverage worker started");
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
                message = requests.recv() => {
                    let Some(envelope) = message else { break };
                    let permit = match self.permits.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break,
                    };
                    let scorer = self.scorer.clone();
                    let responses = self.responses.clone();
                    in_flight.spawn(async move {
                        Self::handle(&scorer, &responses, envelope).await;
                        drop(permit);
                    });
                }
            }
        }

        // Let accepted requests finish so their replies are not lost
        while in_flight.join_next().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::topic;
    use crate::config::HttpAttributeKeys;
    use crate::coverage::{SpecFetcher, SqliteCoverageStore, StaticSpecResolver};
    use crate::models::ApiIdentity;
    use crate::server::test_pool;
    use std::time::Duration;

    #[tokio::test]
    async fn test_replies_keyed_by_request_and_drains_on_close() {
        let scorer = Arc::new(CoverageScorer::new(
            Arc::new(StaticSpecResolver::default()),
            SpecFetcher::new(reqwest::Client::new(), Duration::from_secs(1), 0),
            Arc::new(SqliteCoverageStore::new(test_pool().await)),
            HttpAttributeKeys::default(),
        ));
        let (requests, request_rx) = topic("coverage.request", 8);
        let (responses, mut response_rx) = topic("coverage.response", 8);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(CoverageWorker::new(scorer, responses, 2).run(request_rx, shutdown_rx));

        for key in ["calc-1", "calc-2"] {
            requests
                .publish(
                    key,
                    CoverageRequest {
                        api_identity: ApiIdentity::new("orders", "Orders API", "1.0"),
                        lookback_window: Duration::from_secs(60),
                        attribute_filters: vec![],
                    },
                )
                .await
                .unwrap();
        }
        drop(requests);
        handle.await.unwrap();

        let mut keys = Vec::new();
        while let Some(envelope) = response_rx.recv().await {
            assert!(envelope.payload.results.is_none());
            assert!(envelope.payload.error.unwrap().contains("not indexed"));
            keys.push(envelope.key);
        }
        keys.sort();
        assert_eq!(keys, vec!["calc-1", "calc-2"]);
    }
}
