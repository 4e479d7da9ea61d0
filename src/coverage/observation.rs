//! Observed HTTP calls and their match against declared path templates

use serde_json::{Map, Value};
use std::collections::BTreeSet;

use super::openapi::ApiSpecification;
use super::store::StoredSpan;
use crate::config::HttpAttributeKeys;
use crate::models::api::normalize_attribute_key;

/// HTTP exchange reconstructed from one stored span
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedCall {
    /// Upper-case method
    pub method: String,
    /// Request path without query string
    pub path: String,
    pub status: Option<u16>,
    /// Query parameter names that carried a value
    pub query_params: BTreeSet<String>,
    /// Response payload, when it was recorded as a JSON object
    pub body: Option<Map<String, Value>>,
}

impl ObservedCall {
    /// Read a call from a span; `None` without method or path
    pub fn from_span(span: &StoredSpan, keys: &HttpAttributeKeys) -> Option<Self> {
        let method = first(span, &keys.method)?.trim().to_ascii_uppercase();
        let raw_path = first(span, &keys.path)?;
        if method.is_empty() || raw_path.is_empty() {
            return None;
        }

        let (path, inline_query) = match raw_path.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query)),
            None => (raw_path.to_string(), None),
        };

        let query = first(span, &keys.query).or(inline_query).unwrap_or_default();
        let query_params = query
            .split('&')
            .filter_map(|pair| {
                let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
                (!name.is_empty() && !value.is_empty()).then(|| name.to_string())
            })
            .collect();

        let status = first(span, &keys.status_code).and_then(|s| s.trim().parse::<u16>().ok());

        let body = first(span, &keys.response_body).and_then(|raw| {
            match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(map)) => Some(map),
                _ => None,
            }
        });

        Some(Self {
            method,
            path,
            status,
            query_params,
            body,
        })
    }
}

fn first<'a>(span: &'a StoredSpan, keys: &[String]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| span.attribute(&normalize_attribute_key(key)))
        .filter(|value| !value.trim().is_empty())
}

/// An observed call attributed to a declared path template
#[derive(Debug, Clone, Copy)]
pub struct MatchedCall<'a> {
    pub template: &'a str,
    pub call: &'a ObservedCall,
}

/// Attribute calls to declared templates. Calls matching nothing are dropped.
pub fn match_calls<'a>(spec: &'a ApiSpecification, calls: &'a [ObservedCall]) -> Vec<MatchedCall<'a>> {
    let templates: Vec<(&str, Vec<Segment<'_>>)> = spec
        .paths
        .iter()
        .map(|template| (template.as_str(), segments(template)))
        .collect();

    calls
        .iter()
        .filter_map(|call| {
            let path = strip_base_path(&spec.base_paths, &call.path);
            let observed: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
            templates
                .iter()
                .filter(|(_, pattern)| matches(pattern, &observed))
                .max_by_key(|(_, pattern)| pattern.iter().filter(|s| matches!(s, Segment::Literal(_))).count())
                .map(|(template, _)| MatchedCall {
                    template: *template,
                    call,
                })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment<'a> {
    Literal(&'a str),
    Param,
}

fn segments(template: &str) -> Vec<Segment<'_>> {
    template
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| {
            if s.starts_with('{') && s.ends_with('}') {
                Segment::Param
            } else {
                Segment::Literal(s)
            }
        })
        .collect()
}

fn matches(pattern: &[Segment<'_>], observed: &[&str]) -> bool {
    pattern.len() == observed.len()
        && pattern.iter().zip(observed).all(|(segment, value)| match segment {
            Segment::Literal(literal) => literal == value,
            Segment::Param => !value.is_empty(),
        })
}

fn strip_base_path<'p>(base_paths: &[String], path: &'p str) -> &'p str {
    for base in base_paths {
        if let Some(rest) = path.strip_prefix(base.as_str()) {
            if rest.is_empty() || rest.starts_with('/') {
                return rest;
            }
        }
    }
    path
}
