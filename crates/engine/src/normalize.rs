//! Request descriptor normalization.
//!
//! A descriptor is either a bare path string or a map of options. Both forms
//! are canonicalized into a [`RequestSpec`] with a rooted path and an
//! upper-cased method. A method that is itself a placeholder is kept as
//! written so the handler can substitute it.

use mergereq_types::RequestSpec;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::{config::EngineConfig, error::ConfigurationError, templates::Placeholder};

/// Option map accepted for a field.
///
/// The aliases (`route`, `get`, `post`, `parameter`) are the option names used
/// by earlier versions of the descriptor format.
#[derive(Debug, Default, Deserialize)]
struct RequestDescriptor {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default, rename = "routeParams", alias = "route_params", alias = "route")]
    route_params: Option<Map<String, Value>>,
    #[serde(default, alias = "get")]
    query: Option<Map<String, Value>>,
    #[serde(default, alias = "post")]
    body: Option<Map<String, Value>>,
    #[serde(default)]
    files: Option<Map<String, Value>>,
    #[serde(default, alias = "parameter")]
    attributes: Option<Map<String, Value>>,
    #[serde(flatten)]
    unrecognized: Map<String, Value>,
}

/// Normalizes a raw descriptor for `field` into a [`RequestSpec`].
///
/// # Errors
///
/// Returns a [`ConfigurationError`] when the descriptor is neither a string
/// nor a map, or when one of its options has the wrong shape (for example a
/// `query` that is not a map).
pub fn normalize_request(field: &str, raw: &Value, config: &EngineConfig) -> Result<RequestSpec, ConfigurationError> {
    let descriptor = match raw {
        Value::String(path) => RequestDescriptor {
            path: Some(path.clone()),
            ..Default::default()
        },
        Value::Object(_) => RequestDescriptor::deserialize(raw).map_err(|error| ConfigurationError::new(field, error.to_string()))?,
        other => {
            return Err(ConfigurationError::new(
                field,
                format!("expected a path string or a request descriptor map, got {}", json_kind(other)),
            ));
        }
    };

    if !descriptor.unrecognized.is_empty() {
        let options: Vec<&str> = descriptor.unrecognized.keys().map(String::as_str).collect();
        debug!(field, options = ?options, "ignoring unrecognized request options");
    }

    let method = descriptor
        .method
        .map(|method| canonical_method(method.trim()))
        .filter(|method| !method.is_empty())
        .unwrap_or_else(|| config.default_method.clone());

    Ok(RequestSpec {
        path: root_path(descriptor.path.unwrap_or_default()),
        method,
        route_params: descriptor.route_params,
        query: descriptor.query,
        body: descriptor.body,
        files: descriptor.files,
        attributes: descriptor.attributes,
    })
}

fn canonical_method(method: &str) -> String {
    if Placeholder::parse(method).is_some() {
        method.to_string()
    } else {
        method.to_ascii_uppercase()
    }
}

/// Prefixes relative paths with `/`. An empty path stays empty and will not
/// match any route.
fn root_path(path: String) -> String {
    if path.is_empty() || path.starts_with('/') {
        path
    } else {
        format!("/{path}")
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "map",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn normalize(raw: Value) -> Result<RequestSpec, ConfigurationError> {
        normalize_request("field", &raw, &EngineConfig::default())
    }

    #[test]
    fn bare_path_is_rooted_and_uses_default_method() {
        let spec = normalize(json!("users/42")).expect("spec");
        assert_eq!(spec.path, "/users/42");
        assert_eq!(spec.method, "GET");
        assert!(spec.query.is_none());
    }

    #[test]
    fn descriptor_keeps_sections_and_uppercases_method() {
        let spec = normalize(json!({
            "path": "/orders",
            "method": "post",
            "routeParams": {"id": 1},
            "query": {"expand": "items"},
            "body": {"sku": "A-1"},
            "files": {},
            "attributes": {"tenant": "acme"}
        }))
        .expect("spec");

        assert_eq!(spec.path, "/orders");
        assert_eq!(spec.method, "POST");
        assert_eq!(spec.route_params.expect("route params")["id"], json!(1));
        assert_eq!(spec.query.expect("query")["expand"], json!("items"));
        assert_eq!(spec.body.expect("body")["sku"], json!("A-1"));
        assert!(spec.files.expect("files").is_empty());
        assert_eq!(spec.attributes.expect("attributes")["tenant"], json!("acme"));
    }

    #[test]
    fn legacy_option_names_are_accepted() {
        let spec = normalize(json!({
            "path": "users/{id}",
            "route": {"id": 7},
            "get": {"page": 2},
            "post": {"name": "x"},
            "parameter": {"locale": "fr"}
        }))
        .expect("spec");

        assert_eq!(spec.path, "/users/{id}");
        assert_eq!(spec.route_params.expect("route params")["id"], json!(7));
        assert_eq!(spec.query.expect("query")["page"], json!(2));
        assert_eq!(spec.body.expect("body")["name"], json!("x"));
        assert_eq!(spec.attributes.expect("attributes")["locale"], json!("fr"));
    }

    #[test]
    fn missing_path_stays_empty_and_null_method_uses_default() {
        let spec = normalize(json!({"method": null, "query": {"q": 1}})).expect("spec");
        assert_eq!(spec.path, "");
        assert_eq!(spec.method, "GET");
    }

    #[test]
    fn configured_default_method_applies() {
        let config = EngineConfig::default().with_default_method("post");
        let spec = normalize_request("field", &json!("/things"), &config).expect("spec");
        assert_eq!(spec.method, "POST");
    }

    #[test]
    fn placeholder_method_is_kept_verbatim() {
        let spec = normalize(json!({"path": "/a", "method": " ${mr:user.verb} "})).expect("spec");
        assert_eq!(spec.method, "${mr:user.verb}");
    }

    #[test]
    fn unrecognized_options_are_ignored() {
        let spec = normalize(json!({"path": "/a", "cache": true})).expect("spec");
        assert_eq!(spec.path, "/a");
    }

    #[test]
    fn non_string_non_map_descriptor_is_rejected() {
        let error = normalize(json!(42)).expect_err("number descriptor");
        assert_eq!(error.field, "field");
        assert!(error.reason.contains("got number"), "unexpected reason: {}", error.reason);

        let error = normalize(json!(["/a"])).expect_err("array descriptor");
        assert!(error.reason.contains("got array"), "unexpected reason: {}", error.reason);
    }

    #[test]
    fn malformed_section_is_rejected() {
        let error = normalize(json!({"path": "/a", "query": "page=2"})).expect_err("string query");
        assert!(error.reason.contains("invalid type"), "unexpected reason: {}", error.reason);
    }
}
