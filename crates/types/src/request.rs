//! Canonical sub-request descriptors and addressing into their leaves.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Normalized description of one sub-request.
///
/// `path` is always rooted (starts with `/`) unless it is empty, and `method`
/// is upper-cased unless it still holds a placeholder. The parameter sections
/// are arbitrary JSON trees whose leaves may also hold unresolved
/// `${mr:...}` placeholders until the owning handler substitutes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSpec {
    /// Rooted request path, or a route name prefixed with `/`.
    pub path: String,
    /// Upper-cased HTTP method, or a pending `${mr:...}` placeholder.
    pub method: String,
    /// Values used to expand `{param}` segments of the route.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_params: Option<Map<String, Value>>,
    /// Query string parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Map<String, Value>>,
    /// Request body parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Map<String, Value>>,
    /// Uploaded file descriptors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Map<String, Value>>,
    /// Server-side request attributes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Map<String, Value>>,
}

impl RequestSpec {
    /// Creates a spec with no parameter sections.
    pub fn new(path: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: method.into(),
            route_params: None,
            query: None,
            body: None,
            files: None,
            attributes: None,
        }
    }

    /// Returns the parameter section, if the descriptor declared it.
    pub fn section(&self, section: SpecSection) -> Option<&Map<String, Value>> {
        match section {
            SpecSection::RouteParams => self.route_params.as_ref(),
            SpecSection::Query => self.query.as_ref(),
            SpecSection::Body => self.body.as_ref(),
            SpecSection::Files => self.files.as_ref(),
            SpecSection::Attributes => self.attributes.as_ref(),
        }
    }

    fn section_mut(&mut self, section: SpecSection) -> Option<&mut Map<String, Value>> {
        match section {
            SpecSection::RouteParams => self.route_params.as_mut(),
            SpecSection::Query => self.query.as_mut(),
            SpecSection::Body => self.body.as_mut(),
            SpecSection::Files => self.files.as_mut(),
            SpecSection::Attributes => self.attributes.as_mut(),
        }
    }

    /// Overwrites the value stored at `location`.
    ///
    /// The method only accepts a non-blank string, which is upper-cased.
    /// Returns `false` when the location no longer exists in the tree or the
    /// value cannot be stored there; the spec is then left unchanged.
    pub fn set_value_at(&mut self, location: &TreeLocation, value: Value) -> bool {
        let (section, segments) = match location {
            TreeLocation::Method => {
                let Some(method) = value.as_str().map(str::trim).filter(|method| !method.is_empty()) else {
                    return false;
                };
                self.method = method.to_ascii_uppercase();
                return true;
            }
            TreeLocation::Section { section, segments } => (*section, segments),
        };
        let Some((first, rest)) = segments.split_first() else {
            return false;
        };
        let PathSegment::Key(key) = first else {
            return false;
        };
        let Some(mut current) = self.section_mut(section).and_then(|map| map.get_mut(key)) else {
            return false;
        };
        for segment in rest {
            let next = match (segment, current) {
                (PathSegment::Key(key), Value::Object(map)) => map.get_mut(key),
                (PathSegment::Index(index), Value::Array(items)) => items.get_mut(*index),
                _ => None,
            };
            match next {
                Some(next) => current = next,
                None => return false,
            }
        }
        *current = value;
        true
    }
}

/// Parameter sections of a [`RequestSpec`], in scan order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SpecSection {
    RouteParams,
    Query,
    Body,
    Files,
    Attributes,
}

impl SpecSection {
    /// Every section in the order placeholders are scanned.
    pub const ALL: [SpecSection; 5] = [
        SpecSection::RouteParams,
        SpecSection::Query,
        SpecSection::Body,
        SpecSection::Files,
        SpecSection::Attributes,
    ];

    /// Descriptor key naming this section.
    pub fn as_str(&self) -> &'static str {
        match self {
            SpecSection::RouteParams => "routeParams",
            SpecSection::Query => "query",
            SpecSection::Body => "body",
            SpecSection::Files => "files",
            SpecSection::Attributes => "attributes",
        }
    }
}

impl fmt::Display for SpecSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step into a JSON tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Position of a leaf inside a [`RequestSpec`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TreeLocation {
    Method,
    /// A leaf of a parameter section; `segments` starts with a key.
    Section { section: SpecSection, segments: Vec<PathSegment> },
}

impl TreeLocation {
    pub fn new(section: SpecSection, segments: Vec<PathSegment>) -> Self {
        Self::Section { section, segments }
    }
}

impl fmt::Display for TreeLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (section, segments) = match self {
            TreeLocation::Method => return f.write_str("method"),
            TreeLocation::Section { section, segments } => (section, segments),
        };
        write!(f, "{section}")?;
        for segment in segments {
            match segment {
                PathSegment::Key(key) => write!(f, ".{key}")?,
                PathSegment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}
