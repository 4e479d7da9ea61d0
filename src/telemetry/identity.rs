use crate::config::TelemetryConfig;
use crate::models::telemetry::KeyValue;
use crate::models::ApiIdentity;

/// Reads an `ApiIdentity` out of inherited attribute levels
#[derive(Debug, Clone)]
pub struct IdentityExtractor {
    api_name_key: String,
    api_version_key: String,
    service_name_key: String,
}

impl IdentityExtractor {
    pub fn new(
        api_name_key: impl Into<String>,
        api_version_key: impl Into<String>,
        service_name_key: impl Into<String>,
    ) -> Self {
        Self {
            api_name_key: api_name_key.into(),
            api_version_key: api_version_key.into(),
            service_name_key: service_name_key.into(),
        }
    }

    pub fn from_config(config: &TelemetryConfig) -> Self {
        Self::new(
            &config.api_name_key,
            &config.api_version_key,
            &config.service_name_key,
        )
    }

    /// Extract a complete identity from `levels`, innermost level first.
    ///
    /// A key found at an inner level shadows the same key further out.
    /// Returns `None` unless all three components are present and non-blank.
    pub fn extract(&self, levels: &[&[KeyValue]]) -> Option<ApiIdentity> {
        let api_name = lookup(levels, &self.api_name_key)?;
        let api_version = lookup(levels, &self.api_version_key)?;
        let service_name = lookup(levels, &self.service_name_key)?;
        Some(ApiIdentity::new(service_name, api_name, api_version))
    }
}

fn lookup(levels: &[&[KeyValue]], key: &str) -> Option<String> {
    levels
        .iter()
        .flat_map(|attributes| attributes.iter())
        .filter(|kv| kv.key == key)
        .filter_map(|kv| kv.value.render())
        .find(|value| !value.trim().is_empty())
}
