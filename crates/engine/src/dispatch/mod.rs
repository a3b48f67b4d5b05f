//! Sub-request dispatch.
//!
//! A [`Dispatcher`] turns a fully-substituted [`SubRequest`] into a value.
//! Engines are agnostic to how that happens; implementations may route to
//! in-process handlers ([`RouteTable`]), forward over HTTP
//! ([`HttpDispatcher`]), or echo the request back ([`EchoDispatcher`]).

use anyhow::Result;
use mergereq_types::{RequestContext, RequestSpec, ResponseEnvelope, SpecSection};
use serde_json::{Map, Value};

pub mod http;
pub mod routes;

pub use http::HttpDispatcher;
pub use routes::{RouteCall, RouteTable, RouteTableError};

/// Result of dispatching one sub-request.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// No endpoint matched. The field resolves to `null`; this is not an error.
    NotFound,
    /// A structured response; the engine keeps only its content.
    Response(ResponseEnvelope),
    /// A raw value, kept unchanged.
    Value(Value),
}

impl From<Value> for DispatchOutcome {
    fn from(value: Value) -> Self {
        DispatchOutcome::Value(value)
    }
}

impl From<ResponseEnvelope> for DispatchOutcome {
    fn from(envelope: ResponseEnvelope) -> Self {
        DispatchOutcome::Response(envelope)
    }
}

/// A resolved sub-request together with the ambient context of the enclosing call.
///
/// The context is passed explicitly instead of being swapped into shared
/// state, so a dispatcher sees exactly one sub-request's view at a time.
#[derive(Debug, Clone, Copy)]
pub struct SubRequest<'a> {
    /// Field that owns this sub-request.
    pub field: &'a str,
    pub spec: &'a RequestSpec,
    pub context: &'a RequestContext,
}

impl<'a> SubRequest<'a> {
    pub fn new(field: &'a str, spec: &'a RequestSpec, context: &'a RequestContext) -> Self {
        Self { field, spec, context }
    }

    pub fn method(&self) -> &'a str {
        &self.spec.method
    }

    pub fn path(&self) -> &'a str {
        &self.spec.path
    }

    pub fn route_params(&self) -> Option<&'a Map<String, Value>> {
        self.spec.route_params.as_ref()
    }

    /// Returns the section declared by the spec, or the enclosing call's
    /// section when the spec omitted it.
    pub fn section(&self, section: SpecSection) -> Option<&'a Map<String, Value>> {
        self.spec.section(section).or_else(|| self.context.section(section))
    }

    /// Renders the effective request (inherited sections included) as JSON.
    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        object.insert("field".into(), Value::String(self.field.to_string()));
        object.insert("method".into(), Value::String(self.method().to_string()));
        object.insert("path".into(), Value::String(self.path().to_string()));
        for section in SpecSection::ALL {
            if let Some(map) = self.section(section) {
                object.insert(section.as_str().into(), Value::Object(map.clone()));
            }
        }
        Value::Object(object)
    }
}

/// Execute a single fully-resolved sub-request.
///
/// Returning `Err` is a hard failure that aborts the whole batch; a missing
/// endpoint should be reported as [`DispatchOutcome::NotFound`] instead.
pub trait Dispatcher {
    fn dispatch(&self, request: &SubRequest<'_>) -> Result<DispatchOutcome>;
}

impl<F> Dispatcher for F
where
    F: Fn(&SubRequest<'_>) -> Result<DispatchOutcome>,
{
    fn dispatch(&self, request: &SubRequest<'_>) -> Result<DispatchOutcome> {
        self(request)
    }
}

/// A dispatcher that returns the resolved request as its result. This allows
/// previews and tests without external side effects.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoDispatcher;

impl Dispatcher for EchoDispatcher {
    fn dispatch(&self, request: &SubRequest<'_>) -> Result<DispatchOutcome> {
        Ok(DispatchOutcome::Value(request.to_value()))
    }
}
