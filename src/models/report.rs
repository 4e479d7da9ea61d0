//! Quality-gate report aggregate.
//!
//! The report is owned by the orchestrator: it is created once per client
//! request, every `ApiTest` exists before any coverage request is dispatched,
//! and scorer results are merged into it as they arrive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use uuid::Uuid;

use super::api::{ApiIdentity, ApiType, AttributeFilter};
use super::criterion::{OpenApiCriterion, OpenApiTestResult};

/// Report lifecycle: `CREATED → IN_PROGRESS → COMPLETE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    Created,
    InProgress,
    Complete,
}

impl ReportStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::InProgress => "IN_PROGRESS",
            Self::Complete => "COMPLETE",
        }
    }
}

impl std::str::FromStr for ReportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(Self::Created),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETE" => Ok(Self::Complete),
            other => Err(format!("Unknown report status: {}", other)),
        }
    }
}

/// Parameters the client supplied with the calculation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportParameters {
    #[serde(with = "humantime_serde")]
    pub lookback_window: Duration,
    #[serde(default)]
    pub attribute_filters: Vec<AttributeFilter>,
}

/// One criterion result attached to an `ApiTest`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiTestResult {
    pub criterion: OpenApiCriterion,
    pub coverage: f64,
    pub included_in_quality_gate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_info: Option<String>,
}

impl ApiTestResult {
    /// A criterion is met when the gate ignores it or it is fully covered.
    pub fn is_met(&self) -> bool {
        !self.included_in_quality_gate || self.coverage == 1.0
    }
}

/// Per-API part of a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiTest {
    pub api_identity: ApiIdentity,
    pub api_type: ApiType,
    /// At most one entry per criterion, ordered by criterion
    #[serde(default)]
    pub test_results: Vec<ApiTestResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiTest {
    pub fn new(api_identity: ApiIdentity) -> Self {
        Self {
            api_identity,
            api_type: ApiType::OpenApi,
            test_results: Vec::new(),
            error: None,
        }
    }

    /// Upsert scorer results by criterion.
    ///
    /// `gate_criteria` decides `included_in_quality_gate` at merge time.
    /// Applying the same results twice leaves the test unchanged. A test that
    /// already ended with an error keeps it; returns false in that case.
    pub fn apply_results(
        &mut self,
        results: &[OpenApiTestResult],
        gate_criteria: &BTreeSet<OpenApiCriterion>,
    ) -> bool {
        if self.error.is_some() {
            return false;
        }

        let mut merged: BTreeMap<OpenApiCriterion, ApiTestResult> = self
            .test_results
            .drain(..)
            .map(|result| (result.criterion, result))
            .collect();

        for result in results {
            merged.insert(
                result.criterion,
                ApiTestResult {
                    criterion: result.criterion,
                    coverage: result.coverage.clamp(0.0, 1.0),
                    included_in_quality_gate: gate_criteria.contains(&result.criterion),
                    additional_info: result.additional_info.clone(),
                },
            );
        }

        self.test_results = merged.into_values().collect();
        true
    }

    /// Attach a terminal error, unless results already arrived
    pub fn apply_error(&mut self, error: impl Into<String>) -> bool {
        if !self.test_results.is_empty() {
            return false;
        }
        self.error = Some(error.into());
        true
    }

    /// Whether the scorer has answered for this API
    pub fn is_finished(&self) -> bool {
        !self.test_results.is_empty() || self.error.is_some()
    }

    /// An errored test cannot demonstrate coverage and never passes.
    pub fn passed(&self) -> bool {
        self.error.is_none() && self.test_results.iter().all(ApiTestResult::is_met)
    }
}

/// Aggregate view of a completed report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageSummary {
    pub passed: bool,
    pub api_test_count: usize,
    pub failed_api_tests: Vec<ApiIdentity>,
    pub criteria: Vec<CriterionSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CriterionSummary {
    pub criterion: OpenApiCriterion,
    pub included_in_quality_gate: bool,
    pub minimum_coverage: f64,
    pub average_coverage: f64,
}

/// The persisted saga aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityGateReport {
    pub calculation_id: Uuid,
    pub quality_gate_config_name: String,
    pub report_parameters: ReportParameters,
    pub api_tests: Vec<ApiTest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage_summary: Option<CoverageSummary>,
    pub status: ReportStatus,
    pub created_at: DateTime<Utc>,
    pub deadline_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl QualityGateReport {
    /// Create a report with one `ApiTest` per distinct requested API.
    pub fn new(
        quality_gate_config_name: impl Into<String>,
        apis: &[ApiIdentity],
        report_parameters: ReportParameters,
        deadline: Duration,
    ) -> Self {
        let mut api_tests: Vec<ApiTest> = Vec::with_capacity(apis.len());
        for identity in apis {
            if !api_tests.iter().any(|test| &test.api_identity == identity) {
                api_tests.push(ApiTest::new(identity.clone()));
            }
        }

        let created_at = Utc::now();
        let deadline_at = created_at
            + chrono::Duration::from_std(deadline).unwrap_or_else(|_| chrono::Duration::days(1));

        Self {
            calculation_id: Uuid::new_v4(),
            quality_gate_config_name: quality_gate_config_name.into(),
            report_parameters,
            api_tests,
            coverage_summary: None,
            status: ReportStatus::Created,
            created_at,
            deadline_at,
            completed_at: None,
        }
    }

    /// Find the test a scorer result belongs to.
    pub fn api_test_mut(&mut self, identity: &ApiIdentity) -> Option<&mut ApiTest> {
        self.api_tests
            .iter_mut()
            .find(|test| test.api_identity.matches(identity))
    }

    pub fn is_complete(&self) -> bool {
        self.status == ReportStatus::Complete
    }

    /// Move to `COMPLETE` once every test is finished. Never regresses.
    ///
    /// Returns true when this call completed the report.
    pub fn refresh_status(&mut self) -> bool {
        if self.is_complete() {
            // Late duplicates may still rewrite identical results
            self.coverage_summary = Some(self.summarize());
            return false;
        }

        if self.api_tests.iter().all(ApiTest::is_finished) {
            self.status = ReportStatus::Complete;
            self.completed_at = Some(Utc::now());
            self.coverage_summary = Some(self.summarize());
            true
        } else {
            self.status = ReportStatus::InProgress;
            false
        }
    }

    /// Gate verdict, available once the report is complete
    pub fn passed(&self) -> Option<bool> {
        self.is_complete()
            .then(|| self.api_tests.iter().all(ApiTest::passed))
    }

    fn summarize(&self) -> CoverageSummary {
        let mut per_criterion: BTreeMap<OpenApiCriterion, (bool, Vec<f64>)> = BTreeMap::new();
        for result in self.api_tests.iter().flat_map(|test| &test.test_results) {
            let entry = per_criterion
                .entry(result.criterion)
                .or_insert((false, Vec::new()));
            entry.0 |= result.included_in_quality_gate;
            entry.1.push(result.coverage);
        }

        let criteria = per_criterion
            .into_iter()
            .map(|(criterion, (included, values))| {
                let minimum = values.iter().copied().fold(1.0_f64, f64::min);
                let average = values.iter().sum::<f64>() / values.len() as f64;
                CriterionSummary {
                    criterion,
                    included_in_quality_gate: included,
                    minimum_coverage: minimum,
                    average_coverage: average,
                }
            })
            .collect();

        CoverageSummary {
            passed: self.api_tests.iter().all(ApiTest::passed),
            api_test_count: self.api_tests.len(),
            failed_api_tests: self
                .api_tests
                .iter()
                .filter(|test| !test.passed())
                .map(|test| test.api_identity.clone())
                .collect(),
            criteria,
        }
    }
}
