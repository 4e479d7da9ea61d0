use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use super::gates::QualityGateStore;
use super::repository::ReportRepository;
use super::OrchestratorError;
use crate::models::{ApiIdentity, CoverageRequest, CoverageResponse, QualityGateReport, ReportParameters, ReportStatus};

/// Error attached to API tests still unanswered at the report deadline
pub const TIMEOUT_ERROR: &str = "calculation timed out";

/// What `on_scorer_result` did with a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// No report for the calculation id, or the result conflicts with the
    /// outcome already recorded for its API test
    Ignored,
    Merged { completed: bool },
}

/// Drives the quality-gate saga
///
/// Updates to one report are serialized through a per-report lock; different
/// reports proceed independently.
pub struct ReportOrchestrator {
    gates: Arc<dyn QualityGateStore>,
    repository: ReportRepository,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
    outbox: Arc<Notify>,
    deadline: Duration,
}

impl ReportOrchestrator {
    pub fn new(
        gates: Arc<dyn QualityGateStore>,
        repository: ReportRepository,
        outbox: Arc<Notify>,
        deadline: Duration,
    ) -> Self {
        Self {
            gates,
            repository,
            locks: DashMap::new(),
            outbox,
            deadline,
        }
    }

    pub fn gates(&self) -> &Arc<dyn QualityGateStore> {
        &self.gates
    }

    /// Create a report and queue one coverage request per API
    ///
    /// The report and its requests are committed together before the outbox
    /// relay is woken, so every response finds its report.
    pub async fn initialize(
        &self,
        gate_name: &str,
        apis: Vec<ApiIdentity>,
        parameters: ReportParameters,
    ) -> Result<QualityGateReport, OrchestratorError> {
        if self.gates.criteria(gate_name).await?.is_none() {
            return Err(OrchestratorError::QualityGateNotFound(gate_name.to_string()));
        }

        if apis.is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "includeApis must name at least one API".to_string(),
            ));
        }
        let apis = apis
            .into_iter()
            .map(normalize_identity)
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(filter) = parameters.attribute_filters.iter().find(|f| !f.is_addressable()) {
            return Err(OrchestratorError::InvalidRequest(format!(
                "attribute filter key '{}' is not addressable",
                filter.key
            )));
        }

        let mut report = QualityGateReport::new(gate_name, &apis, parameters, self.deadline);
        report.status = ReportStatus::InProgress;

        let requests: Vec<CoverageRequest> = report
            .api_tests
            .iter()
            .map(|test| CoverageRequest {
                api_identity: test.api_identity.clone(),
                lookback_window: report.report_parameters.lookback_window,
                attribute_filters: report.report_parameters.attribute_filters.clone(),
            })
            .collect();

        self.repository.create(&report, &requests).await?;
        self.outbox.notify_one();
        crate::metrics::record_report_event("created");

        tracing::info!(
            calculation_id = %report.calculation_id,
            gate = gate_name,
            api_tests = report.api_tests.len(),
            "Quality gate calculation started"
        );

        Ok(report)
    }

    /// Merge one scorer response into its report
    ///
    /// Re-delivery of the same response leaves the report unchanged.
    pub async fn on_scorer_result(
        &self,
        calculation_id: Uuid,
        response: CoverageResponse,
    ) -> Result<MergeOutcome, OrchestratorError> {
        let lock = self.lock_for(calculation_id);
        let outcome = {
            let _guard = lock.lock().await;
            self.merge(calculation_id, response).await
        };
        drop(lock);
        self.release(calculation_id);

        match &outcome {
            Ok(MergeOutcome::Ignored) => crate::metrics::record_report_event("result_ignored"),
            Ok(MergeOutcome::Merged { .. }) => crate::metrics::record_report_event("result_merged"),
            Err(_) => crate::metrics::record_report_event("result_rejected"),
        }
        outcome
    }

    async fn merge(
        &self,
        calculation_id: Uuid,
        response: CoverageResponse,
    ) -> Result<MergeOutcome, OrchestratorError> {
        let Some(mut report) = self.repository.load(calculation_id).await? else {
            tracing::warn!(
                calculation_id = %calculation_id,
                api = %response.api_identity,
                "Scorer result for unknown calculation, ignoring"
            );
            return Ok(MergeOutcome::Ignored);
        };

        // Inclusion follows the gate as configured now, not at dispatch time
        let gate_criteria = self
            .gates
            .criteria(&report.quality_gate_config_name)
            .await?
            .ok_or_else(|| {
                OrchestratorError::ConfigurationDoesNotExist(report.quality_gate_config_name.clone())
            })?;

        let test = report.api_test_mut(&response.api_identity).ok_or_else(|| {
            OrchestratorError::TestResultForUnknownApi {
                calculation_id,
                api_identity: response.api_identity.clone(),
            }
        })?;

        let applied = match (response.results, response.error) {
            (Some(results), _) => test.apply_results(&results, &gate_criteria),
            (None, Some(error)) => test.apply_error(error),
            (None, None) => test.apply_error("scorer returned neither results nor an error"),
        };
        if !applied {
            // The test already ended the other way, e.g. timed out before a late result
            tracing::warn!(
                calculation_id = %calculation_id,
                api = %response.api_identity,
                error = ?test.error,
                "Scorer result conflicts with the recorded outcome, ignoring"
            );
            return Ok(MergeOutcome::Ignored);
        }

        let completed = report.refresh_status();
        self.repository.save(&report).await?;

        if completed {
            crate::metrics::record_report_event("completed");
            tracing::info!(
                calculation_id = %calculation_id,
                gate = %report.quality_gate_config_name,
                passed = report.passed().unwrap_or(false),
                "Quality gate calculation complete"
            );
        } else {
            tracing::debug!(
                calculation_id = %calculation_id,
                api = %response.api_identity,
                "Merged scorer result"
            );
        }

        Ok(MergeOutcome::Merged { completed })
    }

    pub async fn get_report(&self, calculation_id: Uuid) -> Result<QualityGateReport, OrchestratorError> {
        self.repository
            .load(calculation_id)
            .await?
            .ok_or(OrchestratorError::ReportNotFound(calculation_id))
    }

    /// Complete every report past its deadline, failing unanswered API tests
    ///
    /// Returns the number of reports timed out.
    pub async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<usize, OrchestratorError> {
        let mut expired = 0;
        for calculation_id in self.repository.overdue(now).await? {
            let lock = self.lock_for(calculation_id);
            let result = {
                let _guard = lock.lock().await;
                self.expire(calculation_id).await
            };
            drop(lock);
            self.release(calculation_id);

            match result {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(calculation_id = %calculation_id, error = %e, "Failed to time out report");
                }
            }
        }
        Ok(expired)
    }

    async fn expire(&self, calculation_id: Uuid) -> Result<bool, OrchestratorError> {
        let Some(mut report) = self.repository.load(calculation_id).await? else {
            return Ok(false);
        };
        if report.is_complete() {
            return Ok(false);
        }

        let mut timed_out = 0;
        for test in report.api_tests.iter_mut().filter(|test| !test.is_finished()) {
            test.apply_error(TIMEOUT_ERROR);
            timed_out += 1;
        }
        report.refresh_status();
        self.repository.save(&report).await?;

        crate::metrics::record_report_event("timed_out");
        tracing::warn!(
            calculation_id = %calculation_id,
            api_tests_timed_out = timed_out,
            "Quality gate calculation timed out"
        );
        Ok(true)
    }

    fn lock_for(&self, calculation_id: Uuid) -> Arc<Mutex<()>> {
        self.locks
            .entry(calculation_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock entry once nobody else holds or waits on it
    fn release(&self, calculation_id: Uuid) {
        self.locks
            .remove_if(&calculation_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Blank versions mean "any version"; names must be present
fn normalize_identity(mut identity: ApiIdentity) -> Result<ApiIdentity, OrchestratorError> {
    if identity.service_name.trim().is_empty() || identity.api_name.trim().is_empty() {
        return Err(OrchestratorError::InvalidRequest(format!(
            "API identity {} needs a serviceName and an apiName",
            identity
        )));
    }
    if identity
        .api_version
        .as_deref()
        .is_some_and(|version| version.trim().is_empty())
    {
        identity.api_version = None;
    }
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QualityGateDefinition;
    use crate::models::{OpenApiCriterion, OpenApiTestResult};
    use crate::report::gates::SqliteQualityGateStore;
    use crate::server::test_pool;

    fn orders() -> ApiIdentity {
        ApiIdentity::new("orders", "Orders API", "1.0")
    }

    fn parameters() -> ReportParameters {
        ReportParameters {
            lookback_window: Duration::from_secs(3600),
            attribute_filters: vec![],
        }
    }

    fn result(criterion: OpenApiCriterion, coverage: f64) -> OpenApiTestResult {
        OpenApiTestResult {
            criterion,
            coverage,
            duration: Duration::from_millis(2),
            additional_info: None,
        }
    }

    async fn orchestrator(deadline: Duration) -> (ReportOrchestrator, ReportRepository, Arc<SqliteQualityGateStore>) {
        let pool = test_pool().await;
        let gates = Arc::new(SqliteQualityGateStore::new(pool.clone()));
        gates
            .seed(&[QualityGateDefinition {
                name: "strict".to_string(),
                criteria: vec![OpenApiCriterion::PathCoverage, OpenApiCriterion::ResponseCodeCoverage],
            }])
            .await
            .unwrap();
        let repository = ReportRepository::new(pool);
        let orchestrator = ReportOrchestrator::new(
            gates.clone(),
            repository.clone(),
            Arc::new(Notify::new()),
            deadline,
        );
        (orchestrator, repository, gates)
    }

    #[tokio::test]
    async fn test_initialize_persists_report_then_requests() {
        let (orchestrator, repository, _) = orchestrator(Duration::from_secs(600)).await;

        let report = orchestrator
            .initialize("strict", vec![orders(), ApiIdentity::new("billing", "Payments", "")], parameters())
            .await
            .unwrap();
        assert_eq!(report.status, ReportStatus::InProgress);
        assert_eq!(report.api_tests.len(), 2);
        assert_eq!(report.api_tests[1].api_identity.api_version, None);

        let pending = repository.unpublished(10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|p| p.calculation_id == report.calculation_id));
        assert_eq!(pending[0].request.lookback_window, Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_initialize_unknown_gate() {
        let (orchestrator, repository, _) = orchestrator(Duration::from_secs(600)).await;
        let result = orchestrator.initialize("lenient", vec![orders()], parameters()).await;
        assert!(matches!(result, Err(OrchestratorError::QualityGateNotFound(name)) if name == "lenient"));
        assert!(repository.unpublished(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_initialize_requires_apis() {
        let (orchestrator, _, _) = orchestrator(Duration::from_secs(600)).await;
        let result = orchestrator.initialize("strict", vec![], parameters()).await;
        assert!(matches!(result, Err(OrchestratorError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_results_merge_into_failing_verdict() {
        let (orchestrator, _, _) = orchestrator(Duration::from_secs(600)).await;
        let report = orchestrator.initialize("strict", vec![orders()], parameters()).await.unwrap();

        let response = CoverageResponse::success(
            orders(),
            vec![
                result(OpenApiCriterion::PathCoverage, 1.0),
                result(OpenApiCriterion::ResponseCodeCoverage, 0.8),
            ],
        );
        let outcome = orchestrator
            .on_scorer_result(report.calculation_id, response.clone())
            .await
            .unwrap();
        assert_eq!(outcome, MergeOutcome::Merged { completed: true });

        let first = orchestrator.get_report(report.calculation_id).await.unwrap();
        assert_eq!(first.status, ReportStatus::Complete);
        assert_eq!(first.passed(), Some(false));

        // Re-delivery is harmless
        let again = orchestrator
            .on_scorer_result(report.calculation_id, response)
            .await
            .unwrap();
        assert_eq!(again, MergeOutcome::Merged { completed: false });
        let second = orchestrator.get_report(report.calculation_id).await.unwrap();
        assert_eq!(second.api_tests, first.api_tests);
        assert_eq!(second.status, ReportStatus::Complete);
    }

    #[tokio::test]
    async fn test_unknown_calculation_is_ignored() {
        let (orchestrator, _, _) = orchestrator(Duration::from_secs(600)).await;
        let outcome = orchestrator
            .on_scorer_result(Uuid::new_v4(), CoverageResponse::failure(orders(), "boom"))
            .await
            .unwrap();
        assert_eq!(outcome, MergeOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_result_for_unknown_api_is_rejected() {
        let (orchestrator, _, _) = orchestrator(Duration::from_secs(600)).await;
        let report = orchestrator.initialize("strict", vec![orders()], parameters()).await.unwrap();

        let result = orchestrator
            .on_scorer_result(
                report.calculation_id,
                CoverageResponse::failure(ApiIdentity::new("orders", "Shipping", "1.0"), "boom"),
            )
            .await;
        assert!(matches!(result, Err(OrchestratorError::TestResultForUnknownApi { .. })));

        let stored = orchestrator.get_report(report.calculation_id).await.unwrap();
        assert_eq!(stored.status, ReportStatus::InProgress);
    }

    #[tokio::test]
    async fn test_gate_removed_before_merge() {
        let (orchestrator, repository, _) = orchestrator(Duration::from_secs(600)).await;
        let report = orchestrator.initialize("strict", vec![orders()], parameters()).await.unwrap();
        sqlx::query("DELETE FROM quality_gates")
            .execute(repository.pool())
            .await
            .unwrap();

        let result = orchestrator
            .on_scorer_result(report.calculation_id, CoverageResponse::failure(orders(), "boom"))
            .await;
        assert!(matches!(result, Err(OrchestratorError::ConfigurationDoesNotExist(name)) if name == "strict"));
    }

    #[tokio::test]
    async fn test_concurrent_results_for_one_report() {
        let apis: Vec<ApiIdentity> = (0..8)
            .map(|i| ApiIdentity::new("svc", format!("api-{}", i), "1"))
            .collect();
        let (orchestrator, _, _) = orchestrator(Duration::from_secs(600)).await;
        let orchestrator = Arc::new(orchestrator);
        let report = orchestrator.initialize("strict", apis.clone(), parameters()).await.unwrap();

        let handles: Vec<_> = apis
            .into_iter()
            .map(|api| {
                let orchestrator = orchestrator.clone();
                let id = report.calculation_id;
                tokio::spawn(async move {
                    orchestrator
                        .on_scorer_result(
                            id,
                            CoverageResponse::success(api, vec![result(OpenApiCriterion::PathCoverage, 1.0)]),
                        )
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stored = orchestrator.get_report(report.calculation_id).await.unwrap();
        assert!(stored.api_tests.iter().all(|test| test.is_finished()));
        assert_eq!(stored.status, ReportStatus::Complete);
        assert_eq!(stored.passed(), Some(true));
        assert!(orchestrator.locks.is_empty());
    }

    #[tokio::test]
    async fn test_expire_overdue_fails_unanswered_tests() {
        let (orchestrator, _, _) = orchestrator(Duration::from_millis(1)).await;
        let billing = ApiIdentity::new("billing", "Payments", "2");
        let report = orchestrator
            .initialize("strict", vec![orders(), billing.clone()], parameters())
            .await
            .unwrap();
        orchestrator
            .on_scorer_result(
                report.calculation_id,
                CoverageResponse::success(orders(), vec![result(OpenApiCriterion::PathCoverage, 1.0)]),
            )
            .await
            .unwrap();

        let later = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(orchestrator.expire_overdue(later).await.unwrap(), 1);
        assert_eq!(orchestrator.expire_overdue(later).await.unwrap(), 0);

        let stored = orchestrator.get_report(report.calculation_id).await.unwrap();
        assert_eq!(stored.status, ReportStatus::Complete);
        assert_eq!(stored.passed(), Some(false));
        let billing_test = stored
            .api_tests
            .iter()
            .find(|test| test.api_identity == billing)
            .unwrap();
        assert_eq!(billing_test.error.as_deref(), Some(TIMEOUT_ERROR));
        assert!(stored.api_tests[0].error.is_none());
    }

    #[tokio::test]
    async fn test_late_result_after_timeout_keeps_timeout() {
        let (orchestrator, _, _) = orchestrator(Duration::from_millis(1)).await;
        let report = orchestrator.initialize("strict", vec![orders()], parameters()).await.unwrap();

        let later = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(orchestrator.expire_overdue(later).await.unwrap(), 1);
        let timed_out = orchestrator.get_report(report.calculation_id).await.unwrap();

        let outcome = orchestrator
            .on_scorer_result(
                report.calculation_id,
                CoverageResponse::success(orders(), vec![result(OpenApiCriterion::PathCoverage, 1.0)]),
            )
            .await
            .unwrap();
        assert_eq!(outcome, MergeOutcome::Ignored);

        let stored = orchestrator.get_report(report.calculation_id).await.unwrap();
        assert_eq!(stored, timed_out);
        assert!(stored.api_tests[0].test_results.is_empty());
        assert_eq!(stored.api_tests[0].error.as_deref(), Some(TIMEOUT_ERROR));
        assert_eq!(stored.passed(), Some(false));
    }
}
