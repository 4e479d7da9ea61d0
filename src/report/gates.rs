//! Quality gate configuration store

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::BTreeSet;

use super::OrchestratorError;
use crate::config::QualityGateDefinition;
use crate::models::OpenApiCriterion;

#[async_trait]
pub trait QualityGateStore: Send + Sync {
    /// Criteria required by the named gate, `None` when it does not exist
    async fn criteria(&self, name: &str) -> Result<Option<BTreeSet<OpenApiCriterion>>, OrchestratorError>;

    async fn upsert(&self, gate: &QualityGateDefinition) -> Result<(), OrchestratorError>;

    async fn list(&self) -> Result<Vec<QualityGateDefinition>, OrchestratorError>;
}

#[derive(Clone)]
pub struct SqliteQualityGateStore {
    pool: SqlitePool,
}

impl SqliteQualityGateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Write the configured gates, replacing stored definitions of the same name
    pub async fn seed(&self, gates: &[QualityGateDefinition]) -> Result<(), OrchestratorError> {
        for gate in gates {
            self.upsert(gate).await?;
        }
        if !gates.is_empty() {
            tracing::info!(gates = gates.len(), "Seeded quality gates from configuration");
        }
        Ok(())
    }
}

#[async_trait]
impl QualityGateStore for SqliteQualityGateStore {
    async fn criteria(&self, name: &str) -> Result<Option<BTreeSet<OpenApiCriterion>>, OrchestratorError> {
        let raw: Option<String> = sqlx::query_scalar("SELECT criteria FROM quality_gates WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        match raw {
            Some(raw) => {
                let criteria: Vec<OpenApiCriterion> = serde_json::from_str(&raw)?;
                Ok(Some(criteria.into_iter().collect()))
            }
            None => Ok(None),
        }
    }

    async fn upsert(&self, gate: &QualityGateDefinition) -> Result<(), OrchestratorError> {
        sqlx::query(
            r#"
            INSERT INTO quality_gates (name, criteria, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(name) DO UPDATE SET
                criteria = excluded.criteria,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&gate.name)
        .bind(serde_json::to_string(&gate.criteria)?)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<QualityGateDefinition>, OrchestratorError> {
        #[derive(sqlx::FromRow)]
        struct GateRow {
            name: String,
            criteria: String,
        }

        let rows = sqlx::query_as::<_, GateRow>("SELECT name, criteria FROM quality_gates ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| {
                Ok(QualityGateDefinition {
                    name: row.name,
                    criteria: serde_json::from_str(&row.criteria)?,
                })
            })
            .collect()
    }
}
