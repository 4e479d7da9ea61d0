//! Criterion table
//!
//! Every criterion is a pure function from the parsed specification and the
//! matched calls to a set of declared items and the subset of them observed.

use std::collections::BTreeSet;

use super::observation::MatchedCall;
use super::openapi::{ApiSpecification, ParameterLocation};
use crate::models::OpenApiCriterion;

const MAX_LISTED: usize = 20;

/// Declared and covered items of one criterion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Measurement {
    pub declared: BTreeSet<String>,
    pub covered: BTreeSet<String>,
}

impl Measurement {
    fn record(&mut self, item: String, observed: bool) {
        if observed {
            self.covered.insert(item.clone());
        }
        self.declared.insert(item);
    }

    pub fn uncovered(&self) -> impl Iterator<Item = &String> {
        self.declared.difference(&self.covered)
    }

    /// Human-readable summary of what is missing
    pub fn info(&self) -> Option<String> {
        if self.declared.is_empty() {
            return Some("nothing declared".to_string());
        }
        let missing = self.declared.len() - self.covered.len();
        if missing == 0 {
            return None;
        }
        let listed: Vec<&str> = self.uncovered().take(MAX_LISTED).map(String::as_str).collect();
        let mut info = format!("uncovered: {}", listed.join(", "));
        if missing > MAX_LISTED {
            info.push_str(&format!(" (+{} more)", missing - MAX_LISTED));
        }
        Some(info)
    }
}

/// Compute one criterion
pub fn measure(criterion: OpenApiCriterion, spec: &ApiSpecification, calls: &[MatchedCall<'_>]) -> Measurement {
    match criterion {
        OpenApiCriterion::PathCoverage => path_coverage(spec, calls),
        OpenApiCriterion::HttpMethodCoverage => method_coverage(spec, calls),
        OpenApiCriterion::ResponseCodeCoverage => response_code_coverage(spec, calls, false),
        OpenApiCriterion::ErrorResponseCodeCoverage => response_code_coverage(spec, calls, true),
        OpenApiCriterion::ParameterCoverage => parameter_coverage(spec, calls, false),
        OpenApiCriterion::RequiredParameterCoverage => parameter_coverage(spec, calls, true),
        OpenApiCriterion::RequiredErrorFields => required_error_fields(spec, calls),
    }
}

fn calls_to<'c>(
    calls: &'c [MatchedCall<'c>],
    path: &'c str,
    method: &'c str,
) -> impl Iterator<Item = &'c MatchedCall<'c>> + 'c {
    calls
        .iter()
        .filter(move |m| m.template == path && m.call.method == method)
}

fn path_coverage(spec: &ApiSpecification, calls: &[MatchedCall<'_>]) -> Measurement {
    let mut measurement = Measurement::default();
    for path in &spec.paths {
        let observed = calls.iter().any(|m| m.template == path.as_str());
        measurement.record(path.clone(), observed);
    }
    measurement
}

fn method_coverage(spec: &ApiSpecification, calls: &[MatchedCall<'_>]) -> Measurement {
    let mut measurement = Measurement::default();
    for op in &spec.operations {
        let observed = calls_to(calls, &op.path, &op.method).next().is_some();
        measurement.record(op.label(), observed);
    }
    measurement
}

fn response_code_coverage(spec: &ApiSpecification, calls: &[MatchedCall<'_>], errors_only: bool) -> Measurement {
    let mut measurement = Measurement::default();
    for op in &spec.operations {
        for response in op.responses.iter().filter(|r| !errors_only || r.is_error()) {
            let observed = calls_to(calls, &op.path, &op.method)
                .any(|m| m.call.status == Some(response.status));
            measurement.record(format!("{} {}", op.label(), response.status), observed);
        }
    }
    measurement
}

/// Path parameters are supplied by every matched call; query parameters
/// when the call carried a value for them.
fn parameter_coverage(spec: &ApiSpecification, calls: &[MatchedCall<'_>], required_only: bool) -> Measurement {
    let mut measurement = Measurement::default();
    for op in &spec.operations {
        for param in op.parameters.iter().filter(|p| !required_only || p.required) {
            let observed = match param.location {
                ParameterLocation::Path => calls_to(calls, &op.path, &op.method).next().is_some(),
                ParameterLocation::Query => calls_to(calls, &op.path, &op.method)
                    .any(|m| m.call.query_params.contains(&param.name)),
                ParameterLocation::Header | ParameterLocation::Cookie => continue,
            };
            measurement.record(
                format!("{} {}:{}", op.label(), param.location.as_str(), param.name),
                observed,
            );
        }
    }
    measurement
}

fn required_error_fields(spec: &ApiSpecification, calls: &[MatchedCall<'_>]) -> Measurement {
    let mut measurement = Measurement::default();
    for op in &spec.operations {
        for response in op.responses.iter().filter(|r| r.is_error()) {
            for field in &response.required_fields {
                let observed = calls_to(calls, &op.path, &op.method)
                    .filter(|m| m.call.status == Some(response.status))
                    .any(|m| m.call.body.as_ref().is_some_and(|body| body.contains_key(field)));
                measurement.record(
                    format!("{} {} field:{}", op.label(), response.status, field),
                    observed,
                );
            }
        }
    }
    measurement
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::observation::{match_calls, ObservedCall};
    use serde_json::json;

    const SPEC: &str = r#"{
        "openapi": "3.0.0",
        "paths": {
            "/orders": {
                "get": {
                    "parameters": [
                        {"name": "limit", "in": "query"},
                        {"name": "status", "in": "query", "required": true},
                        {"name": "X-Tenant", "in": "header", "required": true}
                    ],
                    "responses": {"200": {}, "400": {
                        "content": {"application/json": {"schema": {"required": ["code", "message"]}}}
                    }}
                },
                "post": {"responses": {"201": {}, "409": {}}}
            },
            "/orders/{id}": {
                "get": {
                    "parameters": [{"name": "id", "in": "path"}],
                    "responses": {"200": {}, "404": {}}
                }
            }
        }
    }"#;

    fn call(method: &str, path: &str, status: u16, query: &[&str], body: Option<serde_json::Value>) -> ObservedCall {
        ObservedCall {
            method: method.to_string(),
            path: path.to_string(),
            status: Some(status),
            query_params: query.iter().map(|q| q.to_string()).collect(),
            body: body.and_then(|b| b.as_object().cloned()),
        }
    }

    fn ratio(m: &Measurement) -> (usize, usize) {
        (m.covered.len(), m.declared.len())
    }

    #[test]
    fn test_criterion_table() {
        let spec = ApiSpecification::parse(SPEC).unwrap();
        let calls = vec![
            call("GET", "/orders", 200, &["status"], None),
            call("GET", "/orders", 400, &[], Some(json!({"code": "BAD"}))),
            call("GET", "/orders/7", 200, &[], None),
            call("GET", "/unknown", 200, &[], None),
        ];
        let matched = match_calls(&spec, &calls);

        let paths = measure(OpenApiCriterion::PathCoverage, &spec, &matched);
        assert_eq!(ratio(&paths), (2, 2));
        assert_eq!(paths.info(), None);

        let methods = measure(OpenApiCriterion::HttpMethodCoverage, &spec, &matched);
        assert_eq!(ratio(&methods), (2, 3));
        assert_eq!(methods.info().unwrap(), "uncovered: POST /orders");

        let codes = measure(OpenApiCriterion::ResponseCodeCoverage, &spec, &matched);
        assert_eq!(ratio(&codes), (3, 6));

        let error_codes = measure(OpenApiCriterion::ErrorResponseCodeCoverage, &spec, &matched);
        assert_eq!(ratio(&error_codes), (1, 3));
        assert!(error_codes.info().unwrap().contains("GET /orders/{id} 404"));

        let params = measure(OpenApiCriterion::ParameterCoverage, &spec, &matched);
        assert_eq!(ratio(&params), (2, 3), "header parameters are not measured");

        let required = measure(OpenApiCriterion::RequiredParameterCoverage, &spec, &matched);
        assert_eq!(ratio(&required), (2, 2));

        let fields = measure(OpenApiCriterion::RequiredErrorFields, &spec, &matched);
        assert_eq!(ratio(&fields), (1, 2));
        assert_eq!(fields.info().unwrap(), "uncovered: GET /orders 400 field:message");
    }

    #[test]
    fn test_subset_criteria_never_exceed_parent_items() {
        let spec = ApiSpecification::parse(SPEC).unwrap();
        let matched = Vec::new();
        let error_codes = measure(OpenApiCriterion::ErrorResponseCodeCoverage, &spec, &matched);
        let codes = measure(OpenApiCriterion::ResponseCodeCoverage, &spec, &matched);
        assert!(error_codes.declared.is_subset(&codes.declared));
    }

    #[test]
    fn test_nothing_declared() {
        let spec = ApiSpecification::parse(r#"{"openapi": "3.0.0", "paths": {}}"#).unwrap();
        let m = measure(OpenApiCriterion::PathCoverage, &spec, &[]);
        assert_eq!(m.info().as_deref(), Some("nothing declared"));
    }

    #[test]
    fn test_info_truncates_long_lists() {
        let mut m = Measurement::default();
        for i in 0..25 {
            m.record(format!("item{:02}", i), false);
        }
        let info = m.info().unwrap();
        assert!(info.ends_with("(+5 more)"));
        assert!(info.contains("item19"));
        assert!(!info.contains("item20"));
    }
}
