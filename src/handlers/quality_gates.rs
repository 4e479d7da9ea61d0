use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use super::AppState;
use crate::config::QualityGateDefinition;
use crate::error::AppError;
use crate::models::{ApiIdentity, ApiTest, AttributeFilter, ReportParameters, ReportStatus};

/// Body of `POST /quality-gates/{name}/calculate`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculateRequest {
    pub include_apis: Vec<ApiIdentity>,
    #[serde(default, with = "humantime_serde")]
    pub lookback_window: Option<Duration>,
    #[serde(default)]
    pub attribute_filters: Vec<AttributeFilter>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculationAccepted {
    pub calculation_id: Uuid,
    pub status: ReportStatus,
    pub api_tests: Vec<ApiTest>,
    pub deadline_at: DateTime<Utc>,
}

/// Start a quality gate calculation
///
/// Answers 202 with the pre-created API tests; results are polled from
/// `GET /reports/{calculationId}`.
pub async fn calculate(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Response, AppError> {
    let request: CalculateRequest = serde_json::from_slice(&body)?;
    let parameters = ReportParameters {
        lookback_window: request.lookback_window.unwrap_or(state.default_lookback_window),
        attribute_filters: request.attribute_filters,
    };

    let report = state
        .orchestrator
        .initialize(&name, request.include_apis, parameters)
        .await?;

    let location = format!("/reports/{}", report.calculation_id);
    let accepted = CalculationAccepted {
        calculation_id: report.calculation_id,
        status: report.status,
        api_tests: report.api_tests,
        deadline_at: report.deadline_at,
    };

    Ok((
        StatusCode::ACCEPTED,
        [(header::LOCATION, location)],
        Json(accepted),
    )
        .into_response())
}

/// List configured quality gates
pub async fn list_quality_gates(
    State(state): State<AppState>,
) -> Result<Json<Vec<QualityGateDefinition>>, AppError> {
    let gates = state.orchestrator.gates().list().await?;
    Ok(Json(gates))
}
