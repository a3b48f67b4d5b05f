//! Path template expansion and query-string flattening for forwarded sub-requests.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde_json::{Map, Value};

/// Bytes escaped inside a path placeholder value; RFC3986 unreserved bytes pass through.
const PATH_PLACEHOLDER: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

/// Expands `{key}` placeholders in a path template from `variables`.
///
/// String values are inserted verbatim (then percent-encoded); other JSON
/// values use their JSON rendering, so `null` expands to `null`. Placeholders
/// without a matching variable are left untouched.
///
/// # Examples
/// ```rust
/// use mergereq_util::build_path;
/// use serde_json::{Map, json};
///
/// let mut variables = Map::new();
/// variables.insert("user".into(), json!(42));
/// assert_eq!(build_path("/users/{user}/posts", &variables), "/users/42/posts");
/// ```
pub fn build_path(template: &str, variables: &Map<String, Value>) -> String {
    let mut path = template.to_string();
    for (key, value) in variables {
        let raw = match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        let encoded = utf8_percent_encode(&raw, PATH_PLACEHOLDER).to_string();
        path = path.replace(&format!("{{{key}}}"), &encoded);
    }
    path
}

/// Flattens a query map into key/value pairs, repeating keys for array values.
pub fn build_query_pairs(query_parameters: &Map<String, Value>) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (key, value) in query_parameters {
        match value {
            Value::Array(items) => {
                for item in items {
                    pairs.push((key.clone(), query_value_to_string(item)));
                }
            }
            Value::Null => {}
            other => pairs.push((key.clone(), query_value_to_string(other))),
        }
    }
    pairs
}

fn query_value_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{build_path, build_query_pairs};
    use serde_json::{Map, Value, json};

    #[test]
    fn build_path_preserves_unreserved_identifier_bytes() {
        let mut variables = Map::new();
        variables.insert("order_id".to_string(), Value::String("ord-d5f6a7b8".to_string()));

        let path = build_path("/v1/orders/{order_id}", &variables);
        assert_eq!(path, "/v1/orders/ord-d5f6a7b8");
    }

    #[test]
    fn build_path_encodes_reserved_bytes_for_placeholder_values() {
        let mut variables = Map::new();
        variables.insert("team".to_string(), Value::String("ops/on call".to_string()));

        let path = build_path("/v1/teams/{team}", &variables);
        assert_eq!(path, "/v1/teams/ops%2Fon%20call");
    }

    #[test]
    fn build_path_leaves_unknown_placeholders() {
        let path = build_path("/users/{id}", &Map::new());
        assert_eq!(path, "/users/{id}");
    }

    #[test]
    fn build_query_pairs_repeats_arrays_and_skips_nulls() {
        let query = Map::from_iter([
            ("tag".to_string(), json!(["new", "sale"])),
            ("limit".to_string(), json!(10)),
            ("cursor".to_string(), Value::Null),
        ]);

        let pairs = build_query_pairs(&query);
        assert_eq!(
            pairs,
            vec![
                ("tag".to_string(), "new".to_string()),
                ("tag".to_string(), "sale".to_string()),
                ("limit".to_string(), "10".to_string()),
            ]
        );
    }
}
