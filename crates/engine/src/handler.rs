//! Per-field sub-request state.
//!
//! A [`Handler`] owns one normalized [`RequestSpec`] and the placeholder sites
//! inside it that still wait on other fields. Each convergence round the
//! engine asks the handler to [`replace`](Handler::replace) whatever it can
//! against the current result snapshot; once nothing is pending the handler
//! is dispatched exactly once.

use std::collections::BTreeSet;

use anyhow::{Result, bail};
use mergereq_types::{MergeResult, RequestContext, RequestSpec, TreeLocation};
use serde_json::Value;
use tracing::{debug, trace};

use crate::{
    config::EngineConfig,
    dispatch::{DispatchOutcome, Dispatcher, SubRequest},
    error::ConfigurationError,
    normalize::normalize_request,
    templates::{collect_placeholders, resolve_reference},
};

/// A placeholder leaf waiting on another field's result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSubstitution {
    /// Field whose result is needed.
    pub field: String,
    /// Full dot path, e.g. `user.profile.id`.
    pub reference: String,
    pub segments: Vec<String>,
    /// Leaf inside the owning spec that receives the value.
    pub location: TreeLocation,
}

#[derive(Debug, Clone)]
pub struct Handler {
    field: String,
    spec: RequestSpec,
    pending: Vec<PendingSubstitution>,
    loaded: bool,
    value: Option<Value>,
    /// Used when a method placeholder resolves to something other than a verb.
    default_method: String,
}

impl Handler {
    /// Normalizes `raw` and scans it for placeholders.
    ///
    /// `declared` reports whether a field name belongs to the batch. A
    /// placeholder naming an undeclared field, or the owning field itself, is
    /// replaced by `null` right away and never tracked.
    pub fn new(
        field: impl Into<String>,
        raw: &Value,
        declared: impl Fn(&str) -> bool,
        config: &EngineConfig,
    ) -> Result<Self, ConfigurationError> {
        let field = field.into();
        let mut spec = normalize_request(&field, raw, config)?;
        let mut pending = Vec::new();

        for site in collect_placeholders(&spec) {
            let referenced = site.placeholder.field().to_string();
            if referenced != field && declared(&referenced) {
                pending.push(PendingSubstitution {
                    field: referenced,
                    reference: site.placeholder.reference,
                    segments: site.placeholder.segments,
                    location: site.location,
                });
                continue;
            }

            let reason = if referenced == field { "self reference" } else { "unknown field" };
            debug!(
                field = %field,
                location = %site.location,
                reference = %site.placeholder.reference,
                reason,
                "placeholder cannot be satisfied; using null"
            );
            store(&mut spec, &site.location, Value::Null, &config.default_method);
        }

        Ok(Self {
            field,
            spec,
            pending,
            loaded: false,
            value: None,
            default_method: config.default_method.clone(),
        })
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// The spec with every substitution applied so far.
    pub fn spec(&self) -> &RequestSpec {
        &self.spec
    }

    pub fn pending(&self) -> &[PendingSubstitution] {
        &self.pending
    }

    /// True while at least one placeholder is still unresolved.
    pub fn is_deferred(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Value produced by the dispatcher, or `None` before dispatch or when no endpoint matched.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Fields this handler is still waiting on.
    pub fn blocking_fields(&self) -> BTreeSet<&str> {
        self.pending.iter().map(|entry| entry.field.as_str()).collect()
    }

    /// Substitutes every pending placeholder whose field has already dispatched.
    ///
    /// Values are read from `snapshot`; a missing key anywhere along the dot
    /// path writes `null`. Substituted entries are dropped and never revisited.
    /// Returns the number of placeholders resolved.
    pub fn replace(&mut self, snapshot: &MergeResult, is_dispatched: impl Fn(&str) -> bool) -> usize {
        if snapshot.is_empty() || self.pending.is_empty() {
            return 0;
        }

        let before = self.pending.len();
        let owner = self.field.as_str();
        let default_method = self.default_method.as_str();
        let spec = &mut self.spec;
        self.pending.retain(|entry| {
            if !is_dispatched(&entry.field) {
                return true;
            }
            let value = resolve_reference(snapshot, &entry.segments);
            trace!(field = owner, location = %entry.location, reference = %entry.reference, "placeholder resolved");
            store(spec, &entry.location, value, default_method);
            false
        });
        before - self.pending.len()
    }

    /// Sends the fully-substituted spec to `dispatcher`.
    ///
    /// The handler is marked loaded before the dispatcher runs, so it is never
    /// dispatched twice even when the dispatcher fails. Returns `None` when no
    /// endpoint matched.
    pub fn dispatch(&mut self, dispatcher: &dyn Dispatcher, context: &RequestContext) -> Result<Option<Value>> {
        if self.loaded {
            bail!("field '{}' has already been dispatched", self.field);
        }
        if self.is_deferred() {
            let blocking: Vec<&str> = self.blocking_fields().into_iter().collect();
            bail!("field '{}' is still waiting on {}", self.field, blocking.join(", "));
        }

        self.loaded = true;
        let outcome = dispatcher.dispatch(&SubRequest::new(&self.field, &self.spec, context))?;
        self.value = match outcome {
            DispatchOutcome::NotFound => None,
            DispatchOutcome::Response(envelope) => Some(envelope.into_content()),
            DispatchOutcome::Value(value) => Some(value),
        };
        Ok(self.value.clone())
    }
}

fn store(spec: &mut RequestSpec, location: &TreeLocation, value: Value, default_method: &str) {
    if !spec.set_value_at(location, value) && *location == TreeLocation::Method {
        debug!(method = %spec.method, default_method, "method placeholder did not resolve to a verb; using default");
        spec.method = default_method.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::EchoDispatcher;
    use mergereq_types::ResponseEnvelope;
    use serde_json::json;

    fn handler(field: &str, raw: Value, declared: &[&str]) -> Handler {
        Handler::new(field, &raw, |name| declared.contains(&name), &EngineConfig::default()).expect("handler")
    }

    fn snapshot(entries: &[(&str, Value)]) -> MergeResult {
        entries.iter().map(|(field, value)| (field.to_string(), value.clone())).collect()
    }

    #[test]
    fn scan_tracks_declared_references_and_nulls_the_rest() {
        let handler = handler(
            "posts",
            json!({
                "path": "/posts",
                "query": {
                    "author": "${mr:user.id}",
                    "own": "${mr:posts.count}",
                    "ghost": "${mr:nonexistent.y}",
                    "text": "by ${mr:user.id}"
                }
            }),
            &["user", "posts"],
        );

        assert!(handler.is_deferred());
        assert_eq!(handler.blocking_fields(), BTreeSet::from(["user"]));
        let query = handler.spec().query.as_ref().expect("query");
        assert_eq!(query["author"], json!("${mr:user.id}"));
        assert_eq!(query["own"], Value::Null);
        assert_eq!(query["ghost"], Value::Null);
        assert_eq!(query["text"], json!("by ${mr:user.id}"));
    }

    #[test]
    fn replace_waits_for_the_referenced_field_to_dispatch() {
        let mut handler = handler(
            "posts",
            json!({"path": "/users/{id}/posts", "routeParams": {"id": "${mr:user.id}"}}),
            &["user", "posts"],
        );
        let snapshot = snapshot(&[("user", json!({"id": 42}))]);

        assert_eq!(handler.replace(&snapshot, |_| false), 0);
        assert!(handler.is_deferred());

        assert_eq!(handler.replace(&snapshot, |field| field == "user"), 1);
        assert!(!handler.is_deferred());
        assert_eq!(handler.spec().route_params.as_ref().expect("route params")["id"], json!(42));
    }

    #[test]
    fn replace_is_a_no_op_on_an_empty_snapshot() {
        let mut handler = handler("b", json!({"path": "/b", "query": {"a": "${mr:a.id}"}}), &["a", "b"]);
        assert_eq!(handler.replace(&MergeResult::new(), |_| true), 0);
        assert!(handler.is_deferred());
    }

    #[test]
    fn missing_keys_along_the_path_resolve_to_null() {
        let mut handler = handler(
            "b",
            json!({"path": "/b", "body": {"items": [{"sku": "${mr:a.cart.first.sku}"}]}}),
            &["a", "b"],
        );
        handler.replace(&snapshot(&[("a", json!({"cart": []}))]), |_| true);
        assert!(!handler.is_deferred());
        assert_eq!(handler.spec().body.as_ref().expect("body")["items"][0]["sku"], Value::Null);
    }

    #[test]
    fn method_placeholder_is_substituted_and_upper_cased() {
        let mut handler = handler("b", json!({"path": "/b", "method": "${mr:a.verb}"}), &["a", "b"]);
        assert!(handler.is_deferred());
        assert_eq!(handler.blocking_fields(), BTreeSet::from(["a"]));

        handler.replace(&snapshot(&[("a", json!({"verb": "post"}))]), |_| true);
        assert!(!handler.is_deferred());
        assert_eq!(handler.spec().method, "POST");
    }

    #[test]
    fn unresolvable_method_placeholder_falls_back_to_the_default() {
        let own = handler("b", json!({"path": "/b", "method": "${mr:b.verb}"}), &["b"]);
        assert!(!own.is_deferred());
        assert_eq!(own.spec().method, "GET");

        let mut missing = handler("b", json!({"path": "/b", "method": "${mr:a.verb}"}), &["a", "b"]);
        missing.replace(&snapshot(&[("a", json!({"id": 1}))]), |_| true);
        assert_eq!(missing.spec().method, "GET");
    }

    #[test]
    fn dispatch_happens_at_most_once() {
        let mut handler = handler("a", json!("/a"), &["a"]);
        let context = RequestContext::default();

        let value = handler.dispatch(&EchoDispatcher, &context).expect("first dispatch").expect("value");
        assert_eq!(value["path"], json!("/a"));
        assert!(handler.is_loaded());

        let error = handler.dispatch(&EchoDispatcher, &context).expect_err("second dispatch");
        assert!(error.to_string().contains("already been dispatched"));
    }

    #[test]
    fn dispatch_unwraps_envelopes_and_maps_not_found_to_none() {
        let envelope = |_: &SubRequest<'_>| -> Result<DispatchOutcome> { Ok(ResponseEnvelope::new(201, json!({"id": 7})).into()) };
        let missing = |_: &SubRequest<'_>| -> Result<DispatchOutcome> { Ok(DispatchOutcome::NotFound) };
        let context = RequestContext::default();

        let mut created = handler("created", json!("/things"), &[]);
        assert_eq!(created.dispatch(&envelope, &context).expect("dispatch"), Some(json!({"id": 7})));
        assert_eq!(created.value(), Some(&json!({"id": 7})));

        let mut unknown = handler("unknown", json!("/nowhere"), &[]);
        assert_eq!(unknown.dispatch(&missing, &context).expect("dispatch"), None);
        assert!(unknown.is_loaded());
        assert!(unknown.value().is_none());
    }

    #[test]
    fn deferred_handlers_refuse_to_dispatch() {
        let mut handler = handler("b", json!({"path": "/b", "query": {"a": "${mr:a}"}}), &["a", "b"]);
        let error = handler
            .dispatch(&EchoDispatcher, &RequestContext::default())
            .expect_err("deferred");
        assert!(error.to_string().contains("waiting on a"), "unexpected error: {error}");
        assert!(!handler.is_loaded());
    }

    #[test]
    fn failed_dispatch_still_marks_the_handler_loaded() {
        let failing = |_: &SubRequest<'_>| -> Result<DispatchOutcome> { bail!("connection refused") };
        let mut handler = handler("a", json!("/a"), &[]);
        handler
            .dispatch(&failing, &RequestContext::default())
            .expect_err("failure");
        assert!(handler.is_loaded());
    }
}
