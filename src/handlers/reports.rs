use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use uuid::Uuid;

use super::AppState;
use crate::error::AppError;
use crate::models::QualityGateReport;

/// Report with its verdict, `passed` is absent until complete
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportView {
    #[serde(flatten)]
    pub report: QualityGateReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passed: Option<bool>,
}

/// `GET /reports/{calculationId}`: 202 while in progress, 200 once complete
pub async fn get_report(
    State(state): State<AppState>,
    Path(calculation_id): Path<String>,
) -> Result<Response, AppError> {
    // A malformed id cannot name a report
    let id = Uuid::parse_str(&calculation_id)
        .map_err(|_| AppError::ReportNotFound(calculation_id.clone()))?;

    let report = state.orchestrator.get_report(id).await?;
    let status = if report.is_complete() {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    let passed = report.passed();

    Ok((status, Json(ReportView { report, passed })).into_response())
}
