//! Report persistence with a transactional outbox

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::OrchestratorError;
use crate::models::{CoverageRequest, QualityGateReport};

/// Outbox row not yet published to `coverage.request`
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    pub id: i64,
    pub calculation_id: Uuid,
    pub request: CoverageRequest,
}

#[derive(Clone)]
pub struct ReportRepository {
    pool: SqlitePool,
}

impl ReportRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Persist a new report and its coverage requests atomically
    pub async fn create(
        &self,
        report: &QualityGateReport,
        requests: &[CoverageRequest],
    ) -> Result<(), OrchestratorError> {
        let body = serde_json::to_string(report)?;
        let now = Utc::now().timestamp_millis();
        let calculation_id = report.calculation_id.to_string();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO reports (
                calculation_id, quality_gate_config_name, status, body,
                created_at, deadline_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&calculation_id)
        .bind(&report.quality_gate_config_name)
        .bind(report.status.as_str())
        .bind(body)
        .bind(report.created_at.timestamp_millis())
        .bind(report.deadline_at.timestamp_millis())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for request in requests {
            sqlx::query(
                "INSERT INTO report_outbox (calculation_id, payload, created_at) VALUES (?1, ?2, ?3)",
            )
            .bind(&calculation_id)
            .bind(serde_json::to_string(request)?)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    pub async fn load(&self, calculation_id: Uuid) -> Result<Option<QualityGateReport>, OrchestratorError> {
        let body: Option<String> = sqlx::query_scalar("SELECT body FROM reports WHERE calculation_id = ?")
            .bind(calculation_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    /// Overwrite a report. Callers hold the report's lock.
    pub async fn save(&self, report: &QualityGateReport) -> Result<(), OrchestratorError> {
        let result = sqlx::query(
            "UPDATE reports SET status = ?1, body = ?2, updated_at = ?3 WHERE calculation_id = ?4",
        )
        .bind(report.status.as_str())
        .bind(serde_json::to_string(report)?)
        .bind(Utc::now().timestamp_millis())
        .bind(report.calculation_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::ReportNotFound(report.calculation_id));
        }
        Ok(())
    }

    /// Unfinished reports whose deadline is at or before `now`
    pub async fn overdue(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, OrchestratorError> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT calculation_id FROM reports
            WHERE status != 'COMPLETE' AND deadline_at <= ?
            ORDER BY deadline_at ASC
            "#,
        )
        .bind(now.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;

        Ok(ids
            .iter()
            .filter_map(|id| match Uuid::parse_str(id) {
                Ok(id) => Some(id),
                Err(e) => {
                    tracing::warn!(calculation_id = %id, error = %e, "Skipping report with malformed id");
                    None
                }
            })
            .collect())
    }

    /// Oldest unpublished outbox rows first
    pub async fn unpublished(&self, limit: i64) -> Result<Vec<PendingRequest>, OrchestratorError> {
        let rows = sqlx::query(
            r#"
            SELECT id, calculation_id, payload FROM report_outbox
            WHERE published_at IS NULL
            ORDER BY id ASC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut pending = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.get("id");
            let raw_id: String = row.get("calculation_id");
            let calculation_id = match Uuid::parse_str(&raw_id) {
                Ok(calculation_id) => calculation_id,
                Err(e) => {
                    tracing::warn!(outbox_id = id, error = %e, "Skipping outbox row with malformed calculation id");
                    continue;
                }
            };
            let payload: String = row.get("payload");
            pending.push(PendingRequest {
                id,
                calculation_id,
                request: serde_json::from_str(&payload)?,
            });
        }

        Ok(pending)
    }

    pub async fn mark_published(&self, id: i64) -> Result<(), OrchestratorError> {
        sqlx::query("UPDATE report_outbox SET published_at = ?1 WHERE id = ?2")
            .bind(Utc::now().timestamp_millis())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
