//! Ambient request context shared by every sub-request of a batch.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::SpecSection;

/// State of the enclosing call that sub-requests inherit.
///
/// Sub-requests borrow this context read-only for the duration of a batch.
/// When a sub-request omits one of the `query`, `body`, `files`, or
/// `attributes` sections, the enclosing call's section is used instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Server variables of the enclosing call (host, scheme, remote address...).
    #[serde(default)]
    pub server: IndexMap<String, String>,
    /// Headers forwarded to every sub-request.
    #[serde(default)]
    pub headers: IndexMap<String, String>,
    /// Cookies forwarded to every sub-request.
    #[serde(default)]
    pub cookies: IndexMap<String, String>,
    /// Authenticated principal, if any.
    #[serde(default)]
    pub user: Option<Value>,
    #[serde(default)]
    pub query: Map<String, Value>,
    #[serde(default)]
    pub body: Map<String, Value>,
    #[serde(default)]
    pub files: Map<String, Value>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl RequestContext {
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    pub fn with_server_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.server.insert(name.into(), value.into());
        self
    }

    pub fn with_user(mut self, user: Value) -> Self {
        self.user = Some(user);
        self
    }

    /// Returns the inherited section for `section`.
    ///
    /// Route parameters are never inherited; they belong to a single route.
    pub fn section(&self, section: SpecSection) -> Option<&Map<String, Value>> {
        match section {
            SpecSection::RouteParams => None,
            SpecSection::Query => Some(&self.query),
            SpecSection::Body => Some(&self.body),
            SpecSection::Files => Some(&self.files),
            SpecSection::Attributes => Some(&self.attributes),
        }
    }

    /// Renders the cookies as a single `Cookie` header value.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        let pairs: Vec<String> = self.cookies.iter().map(|(name, value)| format!("{name}={value}")).collect();
        Some(pairs.join("; "))
    }
}

/// Structured response returned by a dispatcher.
///
/// The engine keeps only `content`; status and headers are available to
/// dispatchers and listeners that need them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub status: u16,
    #[serde(default)]
    pub headers: IndexMap<String, String>,
    pub content: Value,
}

impl ResponseEnvelope {
    pub fn new(status: u16, content: Value) -> Self {
        Self {
            status,
            headers: IndexMap::new(),
            content,
        }
    }

    /// Unwraps the envelope into the content it carries.
    pub fn into_content(self) -> Value {
        self.content
    }
}
