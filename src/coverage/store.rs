//! Coverage store: admitted spans, queryable by API, window and attributes

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{Row, SqlitePool};

use super::query::{SqlParam, StoreQuery};
use super::CoverageError;
use crate::models::ApiIdentity;

/// One admitted span with its flattened, underscore-keyed attributes
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSpan {
    pub trace_id: String,
    pub span_id: String,
    pub name: String,
    pub identity: ApiIdentity,
    pub start_time_ms: i64,
    pub attributes: Map<String, Value>,
}

impl StoredSpan {
    pub fn attribute(&self, field: &str) -> Option<&str> {
        self.attributes.get(field).and_then(Value::as_str)
    }
}

#[async_trait]
pub trait CoverageStore: Send + Sync {
    /// Persist spans, returning how many were written
    async fn insert(&self, spans: &[StoredSpan]) -> Result<usize, CoverageError>;

    async fn query(&self, query: &StoreQuery) -> Result<Vec<StoredSpan>, CoverageError>;
}

#[derive(Clone)]
pub struct SqliteCoverageStore {
    pool: SqlitePool,
}

impl SqliteCoverageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CoverageStore for SqliteCoverageStore {
    async fn insert(&self, spans: &[StoredSpan]) -> Result<usize, CoverageError> {
        if spans.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        for span in spans {
            let attributes = serde_json::to_string(&span.attributes)?;
            sqlx::query(
                r#"
                INSERT INTO telemetry_spans (
                    trace_id, span_id, name, service_name, api_name, api_version,
                    start_time_ms, attributes
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(&span.trace_id)
            .bind(&span.span_id)
            .bind(&span.name)
            .bind(&span.identity.service_name)
            .bind(&span.identity.api_name)
            .bind(span.identity.api_version.as_deref().unwrap_or_default())
            .bind(span.start_time_ms)
            .bind(attributes)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(spans.len())
    }

    async fn query(&self, query: &StoreQuery) -> Result<Vec<StoredSpan>, CoverageError> {
        let (where_clause, params) = query.to_sql_where()?;
        let sql = format!(
            r#"
            SELECT trace_id, span_id, name, service_name, api_name, api_version,
                   start_time_ms, attributes
            FROM telemetry_spans
            WHERE {}
            ORDER BY start_time_ms ASC
            "#,
            where_clause
        );

        let mut statement = sqlx::query(&sql);
        for param in params {
            statement = match param {
                SqlParam::Text(value) => statement.bind(value),
                SqlParam::Int(value) => statement.bind(value),
            };
        }

        let rows = statement.fetch_all(&self.pool).await?;
        let mut spans = Vec::with_capacity(rows.len());
        for row in rows {
            let raw: String = row.get("attributes");
            let attributes = match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(map)) => map,
                _ => {
                    tracing::warn!(span_id = %row.get::<String, _>("span_id"), "Skipping span with malformed attributes");
                    continue;
                }
            };
            spans.push(StoredSpan {
                trace_id: row.get("trace_id"),
                span_id: row.get("span_id"),
                name: row.get("name"),
                identity: ApiIdentity::new(
                    row.get::<String, _>("service_name"),
                    row.get::<String, _>("api_name"),
                    row.get::<String, _>("api_version"),
                ),
                start_time_ms: row.get("start_time_ms"),
                attributes,
            });
        }

        Ok(spans)
    }
}
