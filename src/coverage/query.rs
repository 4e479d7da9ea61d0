//! Coverage store query compiler

use chrono::{DateTime, Utc};

use super::CoverageError;
use crate::models::{ApiIdentity, AttributeFilter, FilterOperator};

/// Positional SQL parameter
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Int(i64),
}

/// Telemetry selection for one API over a time window
#[derive(Debug, Clone)]
pub struct StoreQuery {
    pub identity: ApiIdentity,
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
    pub filters: Vec<AttributeFilter>,
}

impl StoreQuery {
    /// Query covering `lookback` up to now
    pub fn lookback(
        identity: ApiIdentity,
        lookback: std::time::Duration,
        filters: Vec<AttributeFilter>,
    ) -> Self {
        let until = Utc::now();
        let since = chrono::Duration::from_std(lookback)
            .ok()
            .and_then(|window| until.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self {
            identity,
            since,
            until,
            filters,
        }
    }

    pub fn validate(&self) -> Result<(), CoverageError> {
        if self.since > self.until {
            return Err(CoverageError::InvalidQuery(
                "window start is after window end".to_string(),
            ));
        }
        for filter in &self.filters {
            if !filter.is_addressable() {
                return Err(CoverageError::InvalidQuery(format!(
                    "attribute filter key '{}' is not addressable",
                    filter.key
                )));
            }
        }
        Ok(())
    }

    /// Compile to a `WHERE` clause body and its positional parameters
    pub fn to_sql_where(&self) -> Result<(String, Vec<SqlParam>), CoverageError> {
        self.validate()?;

        let mut conditions = vec![
            "service_name = ?".to_string(),
            "api_name = ?".to_string(),
        ];
        let mut params = vec![
            SqlParam::Text(self.identity.service_name.clone()),
            SqlParam::Text(self.identity.api_name.clone()),
        ];

        // Absent version matches every version
        if let Some(version) = &self.identity.api_version {
            conditions.push("api_version = ?".to_string());
            params.push(SqlParam::Text(version.clone()));
        }

        conditions.push("start_time_ms >= ?".to_string());
        params.push(SqlParam::Int(self.since.timestamp_millis()));
        conditions.push("start_time_ms <= ?".to_string());
        params.push(SqlParam::Int(self.until.timestamp_millis()));

        for filter in &self.filters {
            match filter.operator {
                FilterOperator::StringEquals => {
                    conditions.push(format!(
                        "json_extract(attributes, '$.{}') = ?",
                        filter.field_name()
                    ));
                    params.push(SqlParam::Text(filter.value.clone()));
                }
            }
        }

        Ok((conditions.join(" AND "), params))
    }
}
