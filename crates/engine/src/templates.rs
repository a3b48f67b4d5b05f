//! Placeholder parsing and lookup.
//!
//! A placeholder is a leaf whose trimmed text is exactly `${mr:<dot.path>}`,
//! where the dot path is one or more word segments. Its first segment names
//! the field whose result it reads. Placeholders embedded inside longer
//! strings are plain text.

use mergereq_types::{MergeResult, PathSegment, RequestSpec, SpecSection, TreeLocation};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static PLACEHOLDER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\$\{mr:(\w+(?:\.\w+)*)\}$").expect("placeholder pattern is valid"));

/// Parsed `${mr:...}` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    /// Dot path without delimiters, e.g. `user.id`.
    pub reference: String,
    /// `reference` split on `.`; never empty.
    pub segments: Vec<String>,
}

impl Placeholder {
    /// Parses a leaf value. Returns `None` unless the trimmed text is exactly a placeholder.
    pub fn parse(raw: &str) -> Option<Self> {
        let captures = PLACEHOLDER_PATTERN.captures(raw.trim())?;
        let reference = captures.get(1)?.as_str().to_string();
        let segments = reference.split('.').map(str::to_string).collect();
        Some(Self { reference, segments })
    }

    /// Field whose result this placeholder reads.
    pub fn field(&self) -> &str {
        self.segments.first().map(String::as_str).unwrap_or_default()
    }
}

/// A placeholder found while scanning a spec, with its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderSite {
    pub location: TreeLocation,
    pub placeholder: Placeholder,
}

/// Collects every placeholder leaf of `spec`: the method, then each
/// parameter section at any depth.
///
/// Sections are scanned in [`SpecSection::ALL`] order and entries within a
/// section in document order. The path is never scanned.
pub fn collect_placeholders(spec: &RequestSpec) -> Vec<PlaceholderSite> {
    let mut sites = Vec::new();
    if let Some(placeholder) = Placeholder::parse(&spec.method) {
        sites.push(PlaceholderSite {
            location: TreeLocation::Method,
            placeholder,
        });
    }
    for section in SpecSection::ALL {
        let Some(map) = spec.section(section) else {
            continue;
        };
        for (key, value) in map {
            let mut segments = vec![PathSegment::Key(key.clone())];
            visit_value(value, section, &mut segments, &mut sites);
        }
    }
    sites
}

fn visit_value(value: &Value, section: SpecSection, segments: &mut Vec<PathSegment>, sites: &mut Vec<PlaceholderSite>) {
    match value {
        Value::String(text) => {
            if let Some(placeholder) = Placeholder::parse(text) {
                sites.push(PlaceholderSite {
                    location: TreeLocation::new(section, segments.clone()),
                    placeholder,
                });
            }
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                segments.push(PathSegment::Index(index));
                visit_value(item, section, segments, sites);
                segments.pop();
            }
        }
        Value::Object(map) => {
            for (key, nested) in map {
                segments.push(PathSegment::Key(key.clone()));
                visit_value(nested, section, segments, sites);
                segments.pop();
            }
        }
        _ => {}
    }
}

/// Walks `segments` through the snapshot, starting with the field name.
///
/// Any missing key, out-of-range index, or descent into a scalar yields `null`.
pub fn resolve_reference(snapshot: &MergeResult, segments: &[String]) -> Value {
    let Some((field, rest)) = segments.split_first() else {
        return Value::Null;
    };
    let Some(mut current) = snapshot.get(field) else {
        return Value::Null;
    };
    for segment in rest {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|index| items.get(index)),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return Value::Null,
        }
    }
    current.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_accepts_exact_placeholders_with_surrounding_whitespace() {
        let placeholder = Placeholder::parse("  ${mr:user.profile.id} ").expect("placeholder");
        assert_eq!(placeholder.reference, "user.profile.id");
        assert_eq!(placeholder.segments, vec!["user", "profile", "id"]);
        assert_eq!(placeholder.field(), "user");

        assert_eq!(Placeholder::parse("${mr:user}").expect("single segment").field(), "user");
    }

    #[test]
    fn parse_rejects_partial_and_malformed_placeholders() {
        assert!(Placeholder::parse("id=${mr:user.id}").is_none());
        assert!(Placeholder::parse("${mr:user.id} and more").is_none());
        assert!(Placeholder::parse("${mr:}").is_none());
        assert!(Placeholder::parse("${mr:user..id}").is_none());
        assert!(Placeholder::parse("${mr:user.id.}").is_none());
        assert!(Placeholder::parse("${{ steps.user.id }}").is_none());
        assert!(Placeholder::parse("${mr:user-id}").is_none());
    }

    #[test]
    fn collect_finds_nested_placeholders_in_every_section() {
        let mut spec = RequestSpec::new("/orders", "POST");
        spec.route_params = json!({"id": "${mr:user.id}"}).as_object().cloned();
        spec.body = json!({
            "note": "literal ${mr:user.id}",
            "lines": [{"sku": "${mr:cart.items.0.sku}"}, {"sku": "fixed"}]
        })
        .as_object()
        .cloned();

        let sites = collect_placeholders(&spec);
        let found: Vec<(String, &str)> = sites
            .iter()
            .map(|site| (site.location.to_string(), site.placeholder.reference.as_str()))
            .collect();

        assert_eq!(
            found,
            vec![
                ("routeParams.id".to_string(), "user.id"),
                ("body.lines[0].sku".to_string(), "cart.items.0.sku"),
            ]
        );
    }

    #[test]
    fn collect_reports_the_method_before_sections() {
        let mut spec = RequestSpec::new("/orders", "${mr:flow.verb}");
        spec.query = json!({"id": "${mr:user.id}"}).as_object().cloned();

        let locations: Vec<String> = collect_placeholders(&spec)
            .iter()
            .map(|site| site.location.to_string())
            .collect();
        assert_eq!(locations, vec!["method", "query.id"]);

        assert!(collect_placeholders(&RequestSpec::new("/orders", "GET")).is_empty());
    }

    #[test]
    fn resolve_reference_walks_objects_and_arrays() {
        let mut snapshot = MergeResult::new();
        snapshot.insert("cart".into(), json!({"items": [{"sku": "A-1"}, {"sku": "B-2"}]}));
        snapshot.insert("user".into(), json!({"id": 42}));

        let lookup = |path: &str| resolve_reference(&snapshot, &path.split('.').map(str::to_string).collect::<Vec<_>>());

        assert_eq!(lookup("user.id"), json!(42));
        assert_eq!(lookup("user"), json!({"id": 42}));
        assert_eq!(lookup("cart.items.1.sku"), json!("B-2"));
        assert_eq!(lookup("cart.items.9.sku"), Value::Null);
        assert_eq!(lookup("user.id.deeper"), Value::Null);
        assert_eq!(lookup("missing.id"), Value::Null);
    }
}
