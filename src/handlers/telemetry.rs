use axum::{body::Bytes, extract::State, response::Json};
use serde_json::{json, Value};

use super::AppState;
use crate::error::AppError;
use crate::models::TracesData;

/// OTLP/HTTP JSON trace receiver
///
/// Publishes the batch to `telemetry.inbound` under a fresh message id.
pub async fn receive_traces(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let batch: TracesData = serde_json::from_slice(&body)?;
    let message_id = uuid::Uuid::new_v4().to_string();
    let spans = batch.span_count();

    state
        .telemetry_inbound
        .publish(message_id.clone(), batch)
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?;

    tracing::debug!(message_key = %message_id, spans = spans, "Accepted trace batch");
    Ok(Json(json!({})))
}
