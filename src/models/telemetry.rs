//! OTLP/JSON trace tree
//!
//! Mirrors `opentelemetry/proto/trace/v1/trace.proto` in its JSON mapping.
//! Only the fields the filter and the store look at are modelled; everything
//! else is carried through untouched in the flattened `extra` maps.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// `ExportTraceServiceRequest` / `TracesData`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracesData {
    #[serde(default)]
    pub resource_spans: Vec<ResourceSpans>,
}

impl TracesData {
    /// True when at least one resource holds a scope holding a span
    pub fn has_spans(&self) -> bool {
        self.resource_spans.iter().any(ResourceSpans::has_spans)
    }

    pub fn span_count(&self) -> usize {
        self.resource_spans.iter().map(ResourceSpans::span_count).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    #[serde(default)]
    pub attributes: Vec<KeyValue>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpans {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Resource>,
    #[serde(default)]
    pub scope_spans: Vec<ScopeSpans>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ResourceSpans {
    pub fn attributes(&self) -> &[KeyValue] {
        self.resource
            .as_ref()
            .map(|resource| resource.attributes.as_slice())
            .unwrap_or_default()
    }

    pub fn has_spans(&self) -> bool {
        self.scope_spans.iter().any(|scope| !scope.spans.is_empty())
    }

    pub fn span_count(&self) -> usize {
        self.scope_spans.iter().map(|scope| scope.spans.len()).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentationScope {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default)]
    pub attributes: Vec<KeyValue>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeSpans {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<InstrumentationScope>,
    #[serde(default)]
    pub spans: Vec<Span>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ScopeSpans {
    pub fn attributes(&self) -> &[KeyValue] {
        self.scope
            .as_ref()
            .map(|scope| scope.attributes.as_slice())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    #[serde(default)]
    pub trace_id: String,
    #[serde(default)]
    pub span_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent_span_id: String,
    #[serde(default)]
    pub name: String,
    /// 64-bit integers are strings in OTLP/JSON, but numbers are accepted too
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time_unix_nano: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time_unix_nano: Option<Value>,
    #[serde(default)]
    pub attributes: Vec<KeyValue>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Span {
    /// Start time in Unix milliseconds, if present and well formed
    pub fn start_time_millis(&self) -> Option<i64> {
        let nanos: u64 = match self.start_time_unix_nano.as_ref()? {
            Value::String(s) => s.parse().ok()?,
            Value::Number(n) => n.as_u64()?,
            _ => return None,
        };
        if nanos == 0 {
            return None;
        }
        i64::try_from(nanos / 1_000_000).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    #[serde(default)]
    pub value: AnyValue,
}

impl KeyValue {
    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: AnyValue {
                string_value: Some(value.into()),
                ..Default::default()
            },
        }
    }
}

/// OTLP `AnyValue`. Arrays, kvlists and bytes stay in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnyValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bool_value: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub int_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub double_value: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AnyValue {
    /// Scalar value rendered as a string; `None` for composite values
    pub fn render(&self) -> Option<String> {
        if let Some(s) = &self.string_value {
            return Some(s.clone());
        }
        if let Some(i) = &self.int_value {
            return match i {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            };
        }
        if let Some(d) = self.double_value {
            return Some(d.to_string());
        }
        self.bool_value.map(|b| b.to_string())
    }
}
