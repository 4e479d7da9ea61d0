use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::broadcast;

use super::store::{CoverageStore, StoredSpan};
use super::CoverageError;
use crate::bus::{Envelope, Subscription};
use crate::models::api::normalize_attribute_key;
use crate::models::telemetry::KeyValue;
use crate::models::TracesData;
use crate::signals::ShutdownSignal;
use crate::telemetry::IdentityExtractor;

/// Writes admitted spans from `telemetry.outbound` into the coverage store
pub struct SpanIngestor {
    extractor: IdentityExtractor,
    store: Arc<dyn CoverageStore>,
}

impl SpanIngestor {
    pub fn new(extractor: IdentityExtractor, store: Arc<dyn CoverageStore>) -> Self {
        Self { extractor, store }
    }

    /// Flatten a batch into stored spans
    ///
    /// A span is stored under the identity of the outermost level where that
    /// identity is complete, the level the admission filter decided at.
    /// Spans whose identity cannot be read are skipped.
    pub fn flatten(&self, batch: &TracesData) -> Vec<StoredSpan> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut spans = Vec::new();

        for resource in &batch.resource_spans {
            let resource_identity = self.extractor.extract(&[resource.attributes()]);
            for scope in &resource.scope_spans {
                let scope_identity = resource_identity
                    .clone()
                    .or_else(|| self.extractor.extract(&[scope.attributes(), resource.attributes()]));
                for span in &scope.spans {
                    let levels = [span.attributes.as_slice(), scope.attributes(), resource.attributes()];
                    let Some(identity) = scope_identity
                        .clone()
                        .or_else(|| self.extractor.extract(&levels))
                    else {
                        continue;
                    };
                    spans.push(StoredSpan {
                        trace_id: span.trace_id.clone(),
                        span_id: span.span_id.clone(),
                        name: span.name.clone(),
                        identity,
                        start_time_ms: span.start_time_millis().unwrap_or(now_ms),
                        attributes: flatten_attributes(&levels),
                    });
                }
            }
        }

        spans
    }

    pub async fn ingest(&self, envelope: Envelope<TracesData>) -> Result<usize, CoverageError> {
        let spans = self.flatten(&envelope.payload);
        let written = self.store.insert(&spans).await?;
        crate::metrics::record_spans_ingested(written);
        tracing::debug!(message_key = %envelope.key, spans = written, "Stored admitted spans");
        Ok(written)
    }

    pub async fn run(
        self,
        mut outbound: Subscription<TracesData>,
        mut shutdown: broadcast::Receiver<ShutdownSignal>,
    ) {
        tracing::info!(topic = outbound.name(), "Span ingestor started");
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                message = outbound.recv() => match message {
                    Some(envelope) => {
                        let key = envelope.key.clone();
                        if let Err(e) = self.ingest(envelope).await {
                            tracing::error!(message_key = %key, error = %e, "Failed to store spans");
                        }
                    }
                    None => break,
                },
            }
        }
    }
}

/// Merge attribute levels (innermost first) into one underscore-keyed map
fn flatten_attributes(levels: &[&[KeyValue]]) -> Map<String, Value> {
    let mut flat = Map::new();
    for attributes in levels.iter().rev() {
        for kv in attributes.iter() {
            if let Some(value) = kv.value.render() {
                flat.insert(normalize_attribute_key(&kv.key), Value::String(value));
            }
        }
    }
    flat
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelemetryConfig;
    use crate::coverage::query::StoreQuery;
    use crate::coverage::store::SqliteCoverageStore;
    use crate::models::telemetry::{InstrumentationScope, Resource, ResourceSpans, ScopeSpans, Span};
    use crate::models::ApiIdentity;
    use crate::server::test_pool;
    use serde_json::json;
    use std::time::Duration;

    fn batch() -> TracesData {
        TracesData {
            resource_spans: vec![ResourceSpans {
                resource: Some(Resource {
                    attributes: vec![
                        KeyValue::string("service.name", "orders"),
                        KeyValue::string("deployment.environment", "prod"),
                    ],
                    ..Default::default()
                }),
                scope_spans: vec![ScopeSpans {
                    scope: Some(InstrumentationScope {
                        attributes: vec![
                            KeyValue::string("api.name", "Orders API"),
                            KeyValue::string("api.version", "1.0"),
                        ],
                        ..Default::default()
                    }),
                    spans: vec![
                        Span {
                            trace_id: "t1".to_string(),
                            span_id: "s1".to_string(),
                            name: "GET /orders".to_string(),
                            start_time_unix_nano: Some(json!("1700000000000000000")),
                            attributes: vec![
                                KeyValue::string("http.request.method", "GET"),
                                KeyValue::string("deployment.environment", "canary"),
                            ],
                            ..Default::default()
                        },
                        Span {
                            span_id: "s2".to_string(),
                            ..Default::default()
                        },
                    ],
                    ..Default::default()
                }],
                ..Default::default()
            }],
        }
    }

    fn ingestor(store: Arc<dyn CoverageStore>) -> SpanIngestor {
        SpanIngestor::new(IdentityExtractor::from_config(&TelemetryConfig::default()), store)
    }

    #[tokio::test]
    async fn test_flatten_merges_levels_inner_first() {
        let store = Arc::new(SqliteCoverageStore::new(test_pool().await));
        let spans = ingestor(store).flatten(&batch());
        assert_eq!(spans.len(), 2);

        let first = &spans[0];
        assert_eq!(first.identity, ApiIdentity::new("orders", "Orders API", "1.0"));
        assert_eq!(first.start_time_ms, 1_700_000_000_000);
        assert_eq!(first.attribute("http_request_method"), Some("GET"));
        assert_eq!(first.attribute("deployment_environment"), Some("canary"));
        assert_eq!(first.attribute("api_name"), Some("Orders API"));

        assert_eq!(spans[1].attribute("deployment_environment"), Some("prod"));
        assert!(spans[1].start_time_ms > 1_700_000_000_000);
    }

    #[tokio::test]
    async fn test_ingest_writes_to_store() {
        let store = Arc::new(SqliteCoverageStore::new(test_pool().await));
        let ingestor = ingestor(store.clone());

        let written = ingestor
            .ingest(Envelope {
                key: "msg-1".to_string(),
                payload: batch(),
            })
            .await
            .unwrap();
        assert_eq!(written, 2);

        // Only the span without an explicit start time falls in the window
        let recent = store
            .query(&StoreQuery::lookback(
                ApiIdentity::new("orders", "Orders API", "1.0"),
                Duration::from_secs(60),
                vec![],
            ))
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].span_id, "s2");
    }

    #[tokio::test]
    async fn test_span_stored_under_identity_the_filter_admitted() {
        use crate::telemetry::{AdmissionFilter, InMemoryMembershipCache, MembershipCache};

        let batch = TracesData {
            resource_spans: vec![ResourceSpans {
                resource: Some(Resource {
                    attributes: vec![
                        KeyValue::string("service.name", "orders"),
                        KeyValue::string("api.name", "Orders API"),
                        KeyValue::string("api.version", "1.0"),
                    ],
                    ..Default::default()
                }),
                scope_spans: vec![ScopeSpans {
                    spans: vec![Span {
                        span_id: "s1".to_string(),
                        attributes: vec![KeyValue::string("api.version", "2.0")],
                        ..Default::default()
                    }],
                    ..Default::default()
                }],
                ..Default::default()
            }],
        };

        let membership = InMemoryMembershipCache::new();
        membership
            .register(&ApiIdentity::new("orders", "Orders API", "1.0"))
            .await
            .unwrap();
        let filter = AdmissionFilter::new(
            IdentityExtractor::from_config(&TelemetryConfig::default()),
            Arc::new(membership),
        );
        let (admitted, stats) = filter.filter(batch).await.unwrap();
        assert_eq!(stats.admitted, 1);

        let store = Arc::new(SqliteCoverageStore::new(test_pool().await));
        let spans = ingestor(store).flatten(&admitted);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].identity, ApiIdentity::new("orders", "Orders API", "1.0"));
        // The span's own attribute is still kept for querying
        assert_eq!(spans[0].attribute("api_version"), Some("2.0"));
    }
}
