//! Spec Resolver: API identity → specification document

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

use super::CoverageError;
use crate::config::{IndexedApi, SpecIndexConfig};
use crate::models::ApiIdentity;
use crate::retry::{execute_with_retry, FetchError};

#[async_trait]
pub trait SpecResolver: Send + Sync {
    /// Source URL of the API's specification
    async fn resolve(&self, identity: &ApiIdentity) -> Result<Url, CoverageError>;
}

fn not_indexed(identity: &ApiIdentity, reason: impl Into<String>) -> CoverageError {
    CoverageError::OpenApiNotIndexed {
        identity: identity.clone(),
        reason: reason.into(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexEntry {
    spec_url: String,
}

/// Resolver backed by the API index service
pub struct HttpSpecResolver {
    client: Client,
    base_url: Url,
    timeout: Duration,
    max_retries: u32,
}

impl HttpSpecResolver {
    pub fn new(client: Client, base_url: Url, timeout: Duration, max_retries: u32) -> Self {
        Self {
            client,
            base_url,
            timeout,
            max_retries,
        }
    }

    /// `{base}/apis/{service}/{api}/{version|latest}`
    fn lookup_url(&self, identity: &ApiIdentity) -> Result<Url, CoverageError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| not_indexed(identity, "index base URL cannot carry a path"))?
            .pop_if_empty()
            .extend([
                "apis",
                identity.service_name.as_str(),
                identity.api_name.as_str(),
                identity.api_version.as_deref().unwrap_or("latest"),
            ]);
        Ok(url)
    }
}

#[async_trait]
impl SpecResolver for HttpSpecResolver {
    async fn resolve(&self, identity: &ApiIdentity) -> Result<Url, CoverageError> {
        let lookup = self.lookup_url(identity)?;

        let client = &self.client;
        let target = &lookup;
        let entry = execute_with_retry("spec_index_lookup", self.max_retries, self.timeout, move || async move {
            let response = client.get(target.clone()).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status(status));
            }
            Ok(response.json::<IndexEntry>().await?)
        })
        .await
        .map_err(|e| match e.status() {
            Some(StatusCode::NOT_FOUND) => not_indexed(identity, "unknown to the API index"),
            _ => not_indexed(identity, format!("index lookup failed: {}", e)),
        })?;

        // Relative spec URLs are relative to the index
        lookup
            .join(&entry.spec_url)
            .map_err(|e| not_indexed(identity, format!("invalid spec URL '{}': {}", entry.spec_url, e)))
    }
}

/// Resolver over statically configured APIs
#[derive(Debug, Default)]
pub struct StaticSpecResolver {
    entries: HashMap<(String, String), Vec<(String, Url)>>,
}

impl StaticSpecResolver {
    pub fn new(apis: &[IndexedApi]) -> anyhow::Result<Self> {
        let mut entries: HashMap<(String, String), Vec<(String, Url)>> = HashMap::new();
        for api in apis {
            let url = Url::parse(&api.spec_url)
                .map_err(|e| anyhow::anyhow!("Invalid spec_url '{}': {}", api.spec_url, e))?;
            entries
                .entry((api.service_name.clone(), api.api_name.clone()))
                .or_default()
                .push((api.api_version.clone(), url));
        }
        Ok(Self { entries })
    }

    pub fn identities(&self) -> Vec<ApiIdentity> {
        self.entries
            .iter()
            .flat_map(|((service, api), versions)| {
                versions
                    .iter()
                    .map(move |(version, _)| ApiIdentity::new(service, api, version))
            })
            .collect()
    }
}

#[async_trait]
impl SpecResolver for StaticSpecResolver {
    async fn resolve(&self, identity: &ApiIdentity) -> Result<Url, CoverageError> {
        let versions = self
            .entries
            .get(&(identity.service_name.clone(), identity.api_name.clone()))
            .ok_or_else(|| not_indexed(identity, "not configured"))?;

        let found = match &identity.api_version {
            Some(version) => versions.iter().find(|(v, _)| v == version),
            // Without a version the most recently configured entry wins
            None => versions.last(),
        };
        found
            .map(|(_, url)| url.clone())
            .ok_or_else(|| not_indexed(identity, "version not configured"))
    }
}

/// Tries each resolver in order, returning the first hit
pub struct ChainedSpecResolver {
    resolvers: Vec<Box<dyn SpecResolver>>,
}

impl ChainedSpecResolver {
    pub fn new(resolvers: Vec<Box<dyn SpecResolver>>) -> Self {
        Self { resolvers }
    }

    /// Static entries first, then the index service when configured
    pub fn from_config(config: &SpecIndexConfig, client: Client) -> anyhow::Result<Self> {
        let mut resolvers: Vec<Box<dyn SpecResolver>> =
            vec![Box::new(StaticSpecResolver::new(&config.apis)?)];
        if let Some(base_url) = &config.base_url {
            resolvers.push(Box::new(HttpSpecResolver::new(
                client,
                Url::parse(base_url)?,
                Duration::from_secs(config.timeout_seconds),
                config.max_retries,
            )));
        }
        Ok(Self::new(resolvers))
    }
}

#[async_trait]
impl SpecResolver for ChainedSpecResolver {
    async fn resolve(&self, identity: &ApiIdentity) -> Result<Url, CoverageError> {
        let mut last_error = not_indexed(identity, "no resolver configured");
        for resolver in &self.resolvers {
            match resolver.resolve(identity).await {
                Ok(url) => return Ok(url),
                Err(e) => last_error = e,
            }
        }
        Err(last_error)
    }
}

/// Downloads specification documents
#[derive(Clone)]
pub struct SpecFetcher {
    client: Client,
    timeout: Duration,
    max_retries: u32,
}

impl SpecFetcher {
    pub fn new(client: Client, timeout: Duration, max_retries: u32) -> Self {
        Self {
            client,
            timeout,
            max_retries,
        }
    }

    pub fn from_config(config: &SpecIndexConfig, client: Client) -> Self {
        Self::new(
            client,
            Duration::from_secs(config.timeout_seconds),
            config.max_retries,
        )
    }

    /// Fetch the document body. `file://` URLs are read from disk.
    pub async fn fetch(&self, identity: &ApiIdentity, url: &Url) -> Result<String, CoverageError> {
        if url.scheme() == "file" {
            let path = url
                .to_file_path()
                .map_err(|_| not_indexed(identity, format!("invalid file URL '{}'", url)))?;
            return tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| not_indexed(identity, format!("cannot read {}: {}", path.display(), e)));
        }

        let client = &self.client;
        execute_with_retry("spec_fetch", self.max_retries, self.timeout, move || async move {
            let response = client.get(url.clone()).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status(status));
            }
            Ok(response.text().await?)
        })
        .await
        .map_err(|e| not_indexed(identity, format!("specification fetch from {} failed: {}", url, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn static_resolver() -> StaticSpecResolver {
        StaticSpecResolver::new(&[
            IndexedApi {
                service_name: "orders".to_string(),
                api_name: "Orders API".to_string(),
                api_version: "1.0".to_string(),
                spec_url: "https://specs.example.com/orders-1.yaml".to_string(),
            },
            IndexedApi {
                service_name: "orders".to_string(),
                api_name: "Orders API".to_string(),
                api_version: "2.0".to_string(),
                spec_url: "https://specs.example.com/orders-2.yaml".to_string(),
            },
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_static_resolver() {
        let resolver = static_resolver();

        let v1 = resolver
            .resolve(&ApiIdentity::new("orders", "Orders API", "1.0"))
            .await
            .unwrap();
        assert_eq!(v1.as_str(), "https://specs.example.com/orders-1.yaml");

        let latest = resolver
            .resolve(&ApiIdentity::any_version("orders", "Orders API"))
            .await
            .unwrap();
        assert_eq!(latest.as_str(), "https://specs.example.com/orders-2.yaml");

        let missing = resolver
            .resolve(&ApiIdentity::new("billing", "Payments", "2"))
            .await;
        assert!(matches!(missing, Err(CoverageError::OpenApiNotIndexed { .. })));
        assert_eq!(resolver.identities().len(), 2);
    }

    #[test]
    fn test_lookup_url_escapes_segments() {
        let resolver = HttpSpecResolver::new(
            Client::new(),
            Url::parse("http://index.local/catalog/").unwrap(),
            Duration::from_secs(1),
            0,
        );
        let url = resolver
            .lookup_url(&ApiIdentity::any_version("orders", "Orders API"))
            .unwrap();
        assert_eq!(url.as_str(), "http://index.local/catalog/apis/orders/Orders%20API/latest");
    }

    #[tokio::test]
    async fn test_fetch_file_url() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"openapi: 3.0.0\npaths: {}\n").unwrap();
        let url = Url::from_file_path(file.path()).unwrap();

        let fetcher = SpecFetcher::new(Client::new(), Duration::from_secs(1), 0);
        let body = fetcher
            .fetch(&ApiIdentity::new("orders", "Orders API", "1.0"), &url)
            .await
            .unwrap();
        assert!(body.starts_with("openapi"));
    }
}
