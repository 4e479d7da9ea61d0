//! Payloads carried on the coverage topics.
//!
//! Both payloads travel keyed by the report's `calculationId`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::api::{ApiIdentity, ApiType, AttributeFilter};
use super::criterion::OpenApiTestResult;

/// `coverage.request` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageRequest {
    pub api_identity: ApiIdentity,
    #[serde(with = "humantime_serde")]
    pub lookback_window: Duration,
    #[serde(default)]
    pub attribute_filters: Vec<AttributeFilter>,
}

/// `coverage.response` payload
///
/// Exactly one of `results` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageResponse {
    pub api_type: ApiType,
    pub api_identity: ApiIdentity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<OpenApiTestResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CoverageResponse {
    pub fn success(api_identity: ApiIdentity, results: Vec<OpenApiTestResult>) -> Self {
        Self {
            api_type: ApiType::OpenApi,
            api_identity,
            results: Some(results),
            error: None,
        }
    }

    pub fn failure(api_identity: ApiIdentity, error: impl Into<String>) -> Self {
        Self {
            api_type: ApiType::OpenApi,
            api_identity,
            results: None,
            error: Some(error.into()),
        }
    }
}
