use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a tracked API: the correlation key shared by every subsystem.
///
/// `api_version` may be absent when the identity is used for matching, in
/// which case any version matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiIdentity {
    pub service_name: String,
    pub api_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

impl ApiIdentity {
    pub fn new(
        service_name: impl Into<String>,
        api_name: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            api_name: api_name.into(),
            api_version: Some(api_version.into()),
        }
    }

    /// Identity without a version, matching every version of the API
    pub fn any_version(service_name: impl Into<String>, api_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            api_name: api_name.into(),
            api_version: None,
        }
    }

    /// Whether `other` (a concrete identity) is matched by `self`.
    ///
    /// Service and API names must be equal; the version must be equal unless
    /// either side leaves it open.
    pub fn matches(&self, other: &ApiIdentity) -> bool {
        if self.service_name != other.service_name || self.api_name != other.api_name {
            return false;
        }
        match (&self.api_version, &other.api_version) {
            (Some(mine), Some(theirs)) => mine == theirs,
            _ => true,
        }
    }

    /// Membership cache key: `"{service}:{api}:{version}"`.
    ///
    /// All three components must be present and non-blank.
    pub fn cache_key(&self) -> Result<String, InvalidApiIdentity> {
        let version = self.api_version.as_deref().unwrap_or("");
        for (field, value) in [
            ("serviceName", self.service_name.as_str()),
            ("apiName", self.api_name.as_str()),
            ("apiVersion", version),
        ] {
            if value.trim().is_empty() {
                return Err(InvalidApiIdentity { field });
            }
        }
        Ok(format!("{}:{}:{}", self.service_name, self.api_name, version))
    }
}

impl fmt::Display for ApiIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.api_version {
            Some(version) => write!(f, "{}/{}@{}", self.service_name, self.api_name, version),
            None => write!(f, "{}/{}@*", self.service_name, self.api_name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("API identity component '{field}' is blank")]
pub struct InvalidApiIdentity {
    pub field: &'static str,
}

/// Kind of API a test was run against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiType {
    OpenApi,
}

/// Predicate operator for attribute filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterOperator {
    StringEquals,
}

/// Declarative attribute predicate narrowing the telemetry a calculation looks at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeFilter {
    pub key: String,
    pub operator: FilterOperator,
    pub value: String,
}

impl AttributeFilter {
    pub fn string_equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            operator: FilterOperator::StringEquals,
            value: value.into(),
        }
    }

    /// Field name addressing the flattened attribute payload
    pub fn field_name(&self) -> String {
        normalize_attribute_key(&self.key)
    }

    /// Whether the field name can address a stored attribute (`[A-Za-z0-9_]+`)
    pub fn is_addressable(&self) -> bool {
        let field = self.field_name();
        !field.is_empty() && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    }
}

/// Dotted attribute keys are stored underscore-joined in flattened payloads.
pub fn normalize_attribute_key(key: &str) -> String {
    key.replace('.', "_")
}
