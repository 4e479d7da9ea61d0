use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

use crate::coverage::CoverageError;
use crate::report::OrchestratorError;

/// Errors surfaced through the HTTP API
#[derive(Debug)]
pub enum AppError {
    /// Named quality gate is not configured
    QualityGateNotFound(String),
    /// No report exists for the calculation id
    ReportNotFound(String),
    /// Malformed client input
    BadRequest(String),
    /// Storage failure
    StorageError(String),
    /// Internal server error
    InternalError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QualityGateNotFound(name) => write!(f, "Quality gate not found: {}", name),
            Self::ReportNotFound(id) => write!(f, "Report not found: {}", id),
            Self::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            Self::StorageError(msg) => write!(f, "Storage error: {}", msg),
            Self::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::QualityGateNotFound(_) | Self::ReportNotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::StorageError(_) | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": error_type_name(&self),
            }
        }));

        (status, body).into_response()
    }
}

fn error_type_name(error: &AppError) -> &'static str {
    match error {
        AppError::QualityGateNotFound(_) => "quality_gate_not_found",
        AppError::ReportNotFound(_) => "report_not_found",
        AppError::BadRequest(_) => "bad_request",
        AppError::StorageError(_) => "storage_error",
        AppError::InternalError(_) => "internal_error",
    }
}

impl From<OrchestratorError> for AppError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::QualityGateNotFound(name) => Self::QualityGateNotFound(name),
            OrchestratorError::ReportNotFound(id) => Self::ReportNotFound(id.to_string()),
            OrchestratorError::InvalidRequest(msg) => Self::BadRequest(msg),
            OrchestratorError::Storage(e) => Self::StorageError(e.to_string()),
            other => Self::InternalError(other.to_string()),
        }
    }
}

impl From<CoverageError> for AppError {
    fn from(err: CoverageError) -> Self {
        match err {
            CoverageError::InvalidQuery(msg) => Self::BadRequest(msg),
            CoverageError::Store(e) => Self::StorageError(e.to_string()),
            other => Self::InternalError(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}
