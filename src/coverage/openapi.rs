//! OpenAPI 3.x document model
//!
//! Only what the coverage criteria need is kept: operations keyed by path
//! template and method, their path/query parameters, declared response codes
//! and the required fields of each JSON response schema.

use serde_json::{Map, Value};
use std::collections::BTreeSet;

use super::CoverageError;

const METHODS: [&str; 8] = ["get", "put", "post", "delete", "options", "head", "patch", "trace"];
const MAX_REF_DEPTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ParameterLocation {
    Path,
    Query,
    Header,
    Cookie,
}

impl ParameterLocation {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "path" => Some(Self::Path),
            "query" => Some(Self::Query),
            "header" => Some(Self::Header),
            "cookie" => Some(Self::Cookie),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Path => "path",
            Self::Query => "query",
            Self::Header => "header",
            Self::Cookie => "cookie",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub location: ParameterLocation,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredResponse {
    pub status: u16,
    /// Top-level required properties of the JSON body schema
    pub required_fields: BTreeSet<String>,
}

impl DeclaredResponse {
    pub fn is_error(&self) -> bool {
        self.status >= 400
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub path: String,
    /// Upper-case HTTP method
    pub method: String,
    pub parameters: Vec<Parameter>,
    pub responses: Vec<DeclaredResponse>,
}

impl Operation {
    pub fn label(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// Parsed specification
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiSpecification {
    pub title: Option<String>,
    /// Path prefixes taken from `servers[].url`, without trailing slash
    pub base_paths: Vec<String>,
    /// Declared path templates in document order
    pub paths: Vec<String>,
    pub operations: Vec<Operation>,
}

impl ApiSpecification {
    /// Parse a JSON or YAML document
    pub fn parse(document: &str) -> Result<Self, CoverageError> {
        let root = parse_document(document)?;
        Self::from_value(&root)
    }

    pub fn from_value(root: &Value) -> Result<Self, CoverageError> {
        // YAML reads an unquoted `3.0` as a number
        let version = match root.get("openapi") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err(unparseable("missing 'openapi' version field")),
        };
        if !version.starts_with("3.") {
            return Err(unparseable(format!("unsupported OpenAPI version '{}'", version)));
        }

        let paths = root
            .get("paths")
            .and_then(Value::as_object)
            .ok_or_else(|| unparseable("missing 'paths' object"))?;

        let title = root
            .pointer("/info/title")
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut spec = ApiSpecification {
            title,
            base_paths: base_paths(root),
            ..Default::default()
        };

        for (template, item) in paths {
            let item = resolve(root, item)?;
            let Some(item) = item.as_object() else {
                return Err(unparseable(format!("path item '{}' is not an object", template)));
            };
            spec.paths.push(template.clone());

            let shared = parameters(root, item.get("parameters"))?;
            for method in METHODS {
                let Some(operation) = item.get(method) else {
                    continue;
                };
                let operation = operation
                    .as_object()
                    .ok_or_else(|| unparseable(format!("operation {} {} is not an object", method, template)))?;

                spec.operations.push(Operation {
                    path: template.clone(),
                    method: method.to_ascii_uppercase(),
                    parameters: merge_parameters(&shared, parameters(root, operation.get("parameters"))?),
                    responses: responses(root, operation.get("responses"))?,
                });
            }
        }

        Ok(spec)
    }

    pub fn operation(&self, path: &str, method: &str) -> Option<&Operation> {
        self.operations
            .iter()
            .find(|op| op.path == path && op.method == method)
    }
}

fn unparseable(reason: impl Into<String>) -> CoverageError {
    CoverageError::SpecificationUnparseable(reason.into())
}

fn parse_document(document: &str) -> Result<Value, CoverageError> {
    let trimmed = document.trim_start();
    if trimmed.is_empty() {
        return Err(unparseable("empty document"));
    }
    if trimmed.starts_with('{') {
        return serde_json::from_str(trimmed).map_err(|e| unparseable(format!("invalid JSON: {}", e)));
    }
    let yaml: serde_norway::Value =
        serde_norway::from_str(document).map_err(|e| unparseable(format!("invalid YAML: {}", e)))?;
    Ok(yaml_to_json(yaml))
}

/// YAML allows non-string keys (`200:`); JSON keys are their string form.
fn yaml_to_json(value: serde_norway::Value) -> Value {
    use serde_norway::Value as Yaml;
    match value {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Bool(b),
        Yaml::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                n.as_f64().map(Value::from).unwrap_or(Value::Null)
            }
        }
        Yaml::String(s) => Value::String(s),
        Yaml::Sequence(items) => Value::Array(items.into_iter().map(yaml_to_json).collect()),
        Yaml::Mapping(mapping) => {
            let mut map = Map::new();
            for (key, value) in mapping {
                let key = match key {
                    Yaml::String(s) => s,
                    Yaml::Number(n) => n.to_string(),
                    Yaml::Bool(b) => b.to_string(),
                    _ => continue,
                };
                map.insert(key, yaml_to_json(value));
            }
            Value::Object(map)
        }
        Yaml::Tagged(tagged) => yaml_to_json(tagged.value),
    }
}

fn base_paths(root: &Value) -> Vec<String> {
    let mut paths: Vec<String> = root
        .get("servers")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|server| server.get("url").and_then(Value::as_str))
        .filter_map(|raw| {
            let path = if raw.starts_with('/') {
                raw.to_string()
            } else {
                url::Url::parse(raw).ok()?.path().to_string()
            };
            let path = path.trim_end_matches('/').to_string();
            (!path.is_empty()).then_some(path)
        })
        .collect();
    // Longest prefix first so stripping picks the most specific one
    paths.sort_by(|a, b| b.len().cmp(&a.len()));
    paths.dedup();
    paths
}

/// Follow local `$ref`s until a non-reference value is reached
fn resolve<'a>(root: &'a Value, value: &'a Value) -> Result<&'a Value, CoverageError> {
    let mut current = value;
    for _ in 0..MAX_REF_DEPTH {
        let Some(reference) = current.get("$ref").and_then(Value::as_str) else {
            return Ok(current);
        };
        let pointer = reference
            .strip_prefix('#')
            .ok_or_else(|| unparseable(format!("external reference '{}' is not supported", reference)))?;
        current = root
            .pointer(pointer)
            .ok_or_else(|| unparseable(format!("dangling reference '{}'", reference)))?;
    }
    Err(unparseable("reference chain too deep"))
}

fn parameters(root: &Value, value: Option<&Value>) -> Result<Vec<Parameter>, CoverageError> {
    let Some(list) = value else {
        return Ok(Vec::new());
    };
    let list = list
        .as_array()
        .ok_or_else(|| unparseable("'parameters' is not an array"))?;

    let mut parsed = Vec::with_capacity(list.len());
    for entry in list {
        let entry = resolve(root, entry)?;
        let name = entry
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| unparseable("parameter without a name"))?;
        let location = entry
            .get("in")
            .and_then(Value::as_str)
            .and_then(ParameterLocation::parse)
            .ok_or_else(|| unparseable(format!("parameter '{}' has no valid 'in'", name)))?;
        // Path parameters are always required
        let required = location == ParameterLocation::Path
            || entry.get("required").and_then(Value::as_bool).unwrap_or(false);
        parsed.push(Parameter {
            name: name.to_string(),
            location,
            required,
        });
    }
    Ok(parsed)
}

/// Operation-level parameters override path-level ones with the same name and location
fn merge_parameters(shared: &[Parameter], own: Vec<Parameter>) -> Vec<Parameter> {
    let mut merged: Vec<Parameter> = shared
        .iter()
        .filter(|p| !own.iter().any(|o| o.name == p.name && o.location == p.location))
        .cloned()
        .collect();
    merged.extend(own);
    merged
}

fn responses(root: &Value, value: Option<&Value>) -> Result<Vec<DeclaredResponse>, CoverageError> {
    let Some(responses) = value.and_then(Value::as_object) else {
        return Ok(Vec::new());
    };

    let mut declared = Vec::new();
    for (code, response) in responses {
        // `default` and range keys such as `4XX` name no concrete code
        let Some(status) = code.parse::<u16>().ok().filter(|s| (100..=599).contains(s)) else {
            continue;
        };
        let response = resolve(root, response)?;
        let required_fields = match json_schema(response) {
            Some(schema) => required_fields(root, schema, 0)?,
            None => BTreeSet::new(),
        };
        declared.push(DeclaredResponse {
            status,
            required_fields,
        });
    }
    declared.sort_by_key(|r| r.status);
    Ok(declared)
}

fn json_schema(response: &Value) -> Option<&Value> {
    let content = response.get("content")?.as_object()?;
    content
        .get("application/json")
        .or_else(|| {
            content
                .iter()
                .find(|(media_type, _)| media_type.ends_with("+json"))
                .map(|(_, media)| media)
        })?
        .get("schema")
}

fn required_fields(root: &Value, schema: &Value, depth: usize) -> Result<BTreeSet<String>, CoverageError> {
    if depth > MAX_REF_DEPTH {
        return Err(unparseable("schema composition too deep"));
    }
    let schema = resolve(root, schema)?;

    let mut fields: BTreeSet<String> = schema
        .get("required")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect();

    if let Some(members) = schema.get("allOf").and_then(Value::as_array) {
        for member in members {
            fields.extend(required_fields(root, member, depth + 1)?);
        }
    }

    Ok(fields)
}
