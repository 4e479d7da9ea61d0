use std::sync::Arc;
use std::time::Instant;

use super::criteria;
use super::observation::{match_calls, ObservedCall};
use super::openapi::ApiSpecification;
use super::query::StoreQuery;
use super::resolver::{SpecFetcher, SpecResolver};
use super::store::CoverageStore;
use super::CoverageError;
use crate::config::HttpAttributeKeys;
use crate::models::{CoverageRequest, CoverageResponse, OpenApiCriterion, OpenApiTestResult};

/// OpenAPI coverage scorer
///
/// Stateless per request: resolves and parses the specification on every
/// call, then measures each criterion against the stored telemetry.
pub struct CoverageScorer {
    resolver: Arc<dyn SpecResolver>,
    fetcher: SpecFetcher,
    store: Arc<dyn CoverageStore>,
    http_keys: HttpAttributeKeys,
}

impl CoverageScorer {
    pub fn new(
        resolver: Arc<dyn SpecResolver>,
        fetcher: SpecFetcher,
        store: Arc<dyn CoverageStore>,
        http_keys: HttpAttributeKeys,
    ) -> Self {
        Self {
            resolver,
            fetcher,
            store,
            http_keys,
        }
    }

    /// Score one request. Every failure becomes an error response.
    pub async fn score(&self, request: &CoverageRequest) -> CoverageResponse {
        let identity = request.api_identity.clone();
        match self.try_score(request).await {
            Ok(results) => {
                crate::metrics::record_coverage_request("success");
                CoverageResponse::success(identity, results)
            }
            Err(e) => {
                tracing::warn!(api = %identity, error = %e, "Coverage calculation failed");
                crate::metrics::record_coverage_request(e.outcome());
                CoverageResponse::failure(identity, e.to_string())
            }
        }
    }

    async fn try_score(&self, request: &CoverageRequest) -> Result<Vec<OpenApiTestResult>, CoverageError> {
        let identity = &request.api_identity;

        let source = self.resolver.resolve(identity).await?;
        let document = self.fetcher.fetch(identity, &source).await?;
        let spec = ApiSpecification::parse(&document)?;

        let query = StoreQuery::lookback(
            identity.clone(),
            request.lookback_window,
            request.attribute_filters.clone(),
        );
        let spans = self.store.query(&query).await?;
        let calls: Vec<ObservedCall> = spans
            .iter()
            .filter_map(|span| ObservedCall::from_span(span, &self.http_keys))
            .collect();

        tracing::debug!(
            api = %identity,
            spec = %source,
            spans = spans.len(),
            calls = calls.len(),
            operations = spec.operations.len(),
            "Scoring API"
        );

        Ok(compute_results(&spec, &calls))
    }
}

/// Measure every criterion, timing each independently
pub fn compute_results(spec: &ApiSpecification, calls: &[ObservedCall]) -> Vec<OpenApiTestResult> {
    let matched = match_calls(spec, calls);

    OpenApiCriterion::ALL
        .into_iter()
        .map(|criterion| {
            let started = Instant::now();
            let measurement = criteria::measure(criterion, spec, &matched);
            let duration = started.elapsed();
            crate::metrics::record_criterion_duration(criterion.as_str(), duration);

            OpenApiTestResult::from_counts(
                criterion,
                measurement.covered.len(),
                measurement.declared.len(),
                duration,
                measurement.info(),
            )
        })
        .collect()
}
