use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::models::OpenApiCriterion;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub coverage: CoverageConfig,
    #[serde(default)]
    pub spec_index: SpecIndexConfig,
    #[serde(default)]
    pub reports: ReportsConfig,
    #[serde(default)]
    pub topics: TopicsConfig,
    /// Gate definitions loaded into the gate store at startup
    #[serde(default)]
    pub quality_gates: Vec<QualityGateDefinition>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
        }
    }
}

/// Attribute keys used to extract an API identity from trace data
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_api_name_key")]
    pub api_name_key: String,
    #[serde(default = "default_api_version_key")]
    pub api_version_key: String,
    #[serde(default = "default_service_name_key")]
    pub service_name_key: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            api_name_key: default_api_name_key(),
            api_version_key: default_api_version_key(),
            service_name_key: default_service_name_key(),
        }
    }
}

fn default_api_name_key() -> String {
    "api.name".to_string()
}

fn default_api_version_key() -> String {
    "api.version".to_string()
}

fn default_service_name_key() -> String {
    "service.name".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CoverageConfig {
    /// SQLite database path (default: "./data/quality-gate.db")
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Lookback used when a calculation request does not name one
    #[serde(default = "default_lookback_window", with = "humantime_serde")]
    pub default_lookback_window: Duration,

    /// Maximum coverage requests scored concurrently
    #[serde(default = "default_scorer_concurrency")]
    pub scorer_concurrency: usize,

    /// Span attributes read when turning stored telemetry into observed calls
    #[serde(default)]
    pub http_attributes: HttpAttributeKeys,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            default_lookback_window: default_lookback_window(),
            scorer_concurrency: default_scorer_concurrency(),
            http_attributes: HttpAttributeKeys::default(),
        }
    }
}

fn default_database_path() -> String {
    "./data/quality-gate.db".to_string()
}

fn default_lookback_window() -> Duration {
    Duration::from_secs(24 * 3600)
}

fn default_scorer_concurrency() -> usize {
    8
}

/// Candidate attribute keys per HTTP property, first present wins
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpAttributeKeys {
    #[serde(default = "default_method_keys")]
    pub method: Vec<String>,
    #[serde(default = "default_path_keys")]
    pub path: Vec<String>,
    #[serde(default = "default_status_keys")]
    pub status_code: Vec<String>,
    #[serde(default = "default_query_keys")]
    pub query: Vec<String>,
    #[serde(default = "default_body_keys")]
    pub response_body: Vec<String>,
}

impl Default for HttpAttributeKeys {
    fn default() -> Self {
        Self {
            method: default_method_keys(),
            path: default_path_keys(),
            status_code: default_status_keys(),
            query: default_query_keys(),
            response_body: default_body_keys(),
        }
    }
}

fn keys(list: &[&str]) -> Vec<String> {
    list.iter().map(|k| k.to_string()).collect()
}

fn default_method_keys() -> Vec<String> {
    keys(&["http.request.method", "http.method"])
}

fn default_path_keys() -> Vec<String> {
    keys(&["url.path", "http.target", "http.route"])
}

fn default_status_keys() -> Vec<String> {
    keys(&["http.response.status_code", "http.status_code"])
}

fn default_query_keys() -> Vec<String> {
    keys(&["url.query"])
}

fn default_body_keys() -> Vec<String> {
    keys(&["http.response.body"])
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SpecIndexConfig {
    /// API index service; when unset, only `apis` below are resolvable
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_spec_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Retries for transient index/spec fetch failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub apis: Vec<IndexedApi>,
}

impl Default for SpecIndexConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_seconds: default_spec_timeout_seconds(),
            max_retries: default_max_retries(),
            apis: Vec::new(),
        }
    }
}

fn default_spec_timeout_seconds() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

/// Statically indexed API; also registered in the membership cache
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexedApi {
    pub service_name: String,
    pub api_name: String,
    pub api_version: String,
    pub spec_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportsConfig {
    /// Time after which unfinished API tests are failed as timed out
    #[serde(default = "default_report_deadline", with = "humantime_serde")]
    pub deadline: Duration,

    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// Backstop poll for unpublished outbox rows
    #[serde(default = "default_outbox_poll_interval", with = "humantime_serde")]
    pub outbox_poll_interval: Duration,
}

impl Default for ReportsConfig {
    fn default() -> Self {
        Self {
            deadline: default_report_deadline(),
            sweep_interval: default_sweep_interval(),
            outbox_poll_interval: default_outbox_poll_interval(),
        }
    }
}

fn default_report_deadline() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_outbox_poll_interval() -> Duration {
    Duration::from_secs(5)
}

/// Logical topic names and in-process channel capacity
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TopicsConfig {
    #[serde(default = "default_telemetry_inbound")]
    pub telemetry_inbound: String,
    #[serde(default = "default_telemetry_outbound")]
    pub telemetry_outbound: String,
    #[serde(default = "default_coverage_request")]
    pub coverage_request: String,
    #[serde(default = "default_coverage_response")]
    pub coverage_response: String,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            telemetry_inbound: default_telemetry_inbound(),
            telemetry_outbound: default_telemetry_outbound(),
            coverage_request: default_coverage_request(),
            coverage_response: default_coverage_response(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_telemetry_inbound() -> String {
    "telemetry.inbound".to_string()
}

fn default_telemetry_outbound() -> String {
    "telemetry.outbound".to_string()
}

fn default_coverage_request() -> String {
    "coverage.request".to_string()
}

fn default_coverage_response() -> String {
    "coverage.response".to_string()
}

fn default_channel_capacity() -> usize {
    1024
}

/// Named set of required criteria
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct QualityGateDefinition {
    pub name: String,
    pub criteria: Vec<OpenApiCriterion>,
}

/// Load configuration from `path` (optional) and `QUALITY_GATE__*` env vars
pub fn load_config_from(path: &Path) -> anyhow::Result<Config> {
    let config = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(config::Environment::with_prefix("QUALITY_GATE").separator("__"))
        .build()?;

    let cfg: Config = config.try_deserialize()?;
    validate_config(&cfg)?;

    Ok(cfg)
}

fn validate_config(cfg: &Config) -> anyhow::Result<()> {
    for (name, value) in [
        ("telemetry.api_name_key", &cfg.telemetry.api_name_key),
        ("telemetry.api_version_key", &cfg.telemetry.api_version_key),
        ("telemetry.service_name_key", &cfg.telemetry.service_name_key),
    ] {
        if value.trim().is_empty() {
            anyhow::bail!("{} cannot be empty", name);
        }
    }

    if cfg.coverage.database_path.trim().is_empty() {
        anyhow::bail!("coverage.database_path cannot be empty");
    }

    if cfg.coverage.scorer_concurrency == 0 {
        anyhow::bail!("coverage.scorer_concurrency must be >= 1");
    }

    if cfg.topics.channel_capacity == 0 {
        anyhow::bail!("topics.channel_capacity must be >= 1");
    }

    if cfg.reports.deadline.is_zero() {
        anyhow::bail!("reports.deadline must be greater than zero");
    }

    if let Some(base_url) = &cfg.spec_index.base_url {
        url::Url::parse(base_url)
            .map_err(|e| anyhow::anyhow!("spec_index.base_url '{}' is invalid: {}", base_url, e))?;
    }

    for api in &cfg.spec_index.apis {
        if api.service_name.trim().is_empty()
            || api.api_name.trim().is_empty()
            || api.api_version.trim().is_empty()
        {
            anyhow::bail!(
                "spec_index.apis entry for spec '{}' has a blank identity component",
                api.spec_url
            );
        }
    }

    let mut names = HashSet::new();
    for gate in &cfg.quality_gates {
        if gate.name.trim().is_empty() {
            anyhow::bail!("Quality gate name cannot be empty");
        }
        if !names.insert(gate.name.as_str()) {
            anyhow::bail!("Quality gate '{}' is duplicated", gate.name);
        }
    }

    Ok(())
}
