/// Integration tests for the telemetry admission filter
use quality_gate::bus::{topic, Envelope};
use quality_gate::config::TelemetryConfig;
use quality_gate::models::telemetry::{InstrumentationScope, KeyValue, Resource, ResourceSpans, ScopeSpans, Span};
use quality_gate::models::{ApiIdentity, TracesData};
use quality_gate::telemetry::{
    AdmissionFilter, IdentityExtractor, InMemoryMembershipCache, MembershipCache, MessageOutcome,
    TelemetryProcessor,
};
use std::sync::Arc;

fn span(name: &str, attributes: Vec<KeyValue>) -> Span {
    Span {
        span_id: name.to_string(),
        name: name.to_string(),
        attributes,
        ..Default::default()
    }
}

fn identity(service: &str, api: &str, version: &str) -> Vec<KeyValue> {
    vec![
        KeyValue::string("service.name", service),
        KeyValue::string("api.name", api),
        KeyValue::string("api.version", version),
    ]
}

async fn filter_with(tracked: &[ApiIdentity]) -> AdmissionFilter {
    let cache = InMemoryMembershipCache::new();
    for api in tracked {
        cache.register(api).await.unwrap();
    }
    AdmissionFilter::new(
        IdentityExtractor::from_config(&TelemetryConfig::default()),
        Arc::new(cache),
    )
}

fn span_names(batch: &TracesData) -> Vec<String> {
    batch
        .resource_spans
        .iter()
        .flat_map(|r| &r.scope_spans)
        .flat_map(|s| &s.spans)
        .map(|s| s.name.clone())
        .collect()
}

/// Batch mixing every level at which identity can become complete
fn mixed_batch() -> TracesData {
    TracesData {
        resource_spans: vec![
            // Complete at resource level, tracked
            ResourceSpans {
                resource: Some(Resource {
                    attributes: identity("orders", "Orders API", "1.0"),
                    ..Default::default()
                }),
                scope_spans: vec![ScopeSpans {
                    spans: vec![span("orders-1", vec![]), span("orders-2", vec![])],
                    ..Default::default()
                }],
                ..Default::default()
            },
            // Complete at resource level, untracked; children carry other identities
            ResourceSpans {
                resource: Some(Resource {
                    attributes: identity("svc", "Payments", "2"),
                    ..Default::default()
                }),
                scope_spans: vec![ScopeSpans {
                    spans: vec![span(
                        "payments-1",
                        identity("orders", "Orders API", "1.0"),
                    )],
                    ..Default::default()
                }],
                ..Default::default()
            },
            // Service at resource level, api name at scope, version per span
            ResourceSpans {
                resource: Some(Resource {
                    attributes: vec![KeyValue::string("service.name", "shipping")],
                    ..Default::default()
                }),
                scope_spans: vec![ScopeSpans {
                    scope: Some(InstrumentationScope {
                        name: "http".to_string(),
                        attributes: vec![KeyValue::string("api.name", "Shipping API")],
                        ..Default::default()
                    }),
                    spans: vec![
                        span("shipping-v3", vec![KeyValue::string("api.version", "3")]),
                        span("shipping-v4", vec![KeyValue::string("api.version", "4")]),
                        span("shipping-anonymous", vec![]),
                    ],
                    ..Default::default()
                }],
                ..Default::default()
            },
        ],
    }
}

#[tokio::test]
async fn test_output_only_holds_tracked_spans() {
    let filter = filter_with(&[
        ApiIdentity::new("orders", "Orders API", "1.0"),
        ApiIdentity::new("shipping", "Shipping API", "3"),
    ])
    .await;

    let (filtered, stats) = filter.filter(mixed_batch()).await.unwrap();

    assert_eq!(span_names(&filtered), vec!["orders-1", "orders-2", "shipping-v3"]);
    assert_eq!(stats.admitted, 3);
    assert_eq!(stats.dropped, 3);
    // Structure is kept, only emptied
    assert_eq!(filtered.resource_spans.len(), 3);
}

#[tokio::test]
async fn test_untracked_resource_drops_whole_subtree() {
    // Child span carries a tracked identity, but the resource decides first
    let filter = filter_with(&[ApiIdentity::new("orders", "Orders API", "1.0")]).await;
    let batch = TracesData {
        resource_spans: vec![mixed_batch().resource_spans.remove(1)],
    };

    let (filtered, stats) = filter.filter(batch).await.unwrap();
    assert!(!filtered.has_spans());
    assert_eq!(stats.dropped, 1);
}

#[tokio::test]
async fn test_unidentifiable_spans_are_never_admitted() {
    // Even with every API tracked, a span without a complete identity is dropped
    let filter = filter_with(&[
        ApiIdentity::new("orders", "Orders API", "1.0"),
        ApiIdentity::new("svc", "Payments", "2"),
        ApiIdentity::new("shipping", "Shipping API", "3"),
        ApiIdentity::new("shipping", "Shipping API", "4"),
    ])
    .await;

    let (filtered, _) = filter.filter(mixed_batch()).await.unwrap();
    let names = span_names(&filtered);
    assert!(!names.contains(&"shipping-anonymous".to_string()));
    assert_eq!(names.len(), 5);
}

#[tokio::test]
async fn test_fully_filtered_batch_is_not_forwarded() {
    let (outbound, mut subscription) = topic("telemetry.outbound", 4);
    let processor = TelemetryProcessor::new(filter_with(&[]).await, outbound);

    let outcome = processor
        .process(Envelope {
            key: "message-1".to_string(),
            payload: mixed_batch(),
        })
        .await;
    assert_eq!(outcome, MessageOutcome::Suppressed);

    drop(processor);
    assert!(subscription.recv().await.is_none());
}

#[tokio::test]
async fn test_partially_tracked_batch_is_forwarded_pruned() {
    let (outbound, mut subscription) = topic("telemetry.outbound", 4);
    let processor = TelemetryProcessor::new(
        filter_with(&[ApiIdentity::new("shipping", "Shipping API", "4")]).await,
        outbound,
    );

    let outcome = processor
        .process(Envelope {
            key: "message-2".to_string(),
            payload: mixed_batch(),
        })
        .await;
    assert_eq!(outcome, MessageOutcome::Forwarded { spans: 1 });

    let forwarded = subscription.recv().await.unwrap();
    assert_eq!(forwarded.key, "message-2");
    assert_eq!(span_names(&forwarded.payload), vec!["shipping-v4"]);
}
