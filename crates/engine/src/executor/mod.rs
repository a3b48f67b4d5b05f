//! Convergence loop: runs every field of a batch until each has a value or
//! can no longer make progress.
//!
//! - Handlers are visited in declaration order each round
//! - A handler substitutes against the snapshot as it stands when visited,
//!   then dispatches immediately if nothing is pending
//! - A round that dispatches nothing finalizes the remaining fields to `null`
//!
//! The loop never builds a dependency graph. Longer cycles (`a` needs `b`,
//! `b` needs `a`) are caught only by the no-progress rule.

use std::collections::HashSet;

use indexmap::IndexMap;
use mergereq_types::{MergeResult, RequestContext};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::{
    config::EngineConfig,
    dispatch::Dispatcher,
    error::MergeError,
    handler::Handler,
    listener::MergeListener,
    telemetry::{FieldEventKind, MergeTelemetry},
};

/// Lifecycle of a [`MergeEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Idle,
    Running,
    /// Complete; `run` returns the cached result.
    Loaded,
    /// A dispatcher raised; the batch cannot be resumed.
    Failed,
}

/// Counters for one pass over the handlers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundSummary {
    pub round: usize,
    pub dispatched: usize,
    pub deferred: usize,
}

/// Orchestrates one batch of named sub-requests.
///
/// # Examples
///
/// ```rust
/// use mergereq_engine::{EchoDispatcher, MergeEngine};
/// use indexmap::IndexMap;
/// use serde_json::json;
///
/// let rules: IndexMap<String, serde_json::Value> = [
///     ("user".to_string(), json!("/users/42")),
///     ("posts".to_string(), json!({"path": "/posts", "query": {"author": "${mr:user.path}"}})),
/// ]
/// .into_iter()
/// .collect();
///
/// let mut engine = MergeEngine::new(rules)?;
/// let result = engine.run(&EchoDispatcher)?;
/// assert_eq!(result["posts"]["query"]["author"], json!("/users/42"));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct MergeEngine {
    config: EngineConfig,
    handlers: IndexMap<String, Handler>,
    result: MergeResult,
    /// Fields whose handler has been dispatched, successfully or not.
    dispatched: HashSet<String>,
    listeners: Vec<Box<dyn MergeListener>>,
    context: RequestContext,
    state: BatchState,
    failed_field: Option<String>,
    rounds: usize,
    history: Vec<RoundSummary>,
    telemetry: MergeTelemetry,
}

impl MergeEngine {
    /// Builds an engine with the default configuration.
    pub fn new<I, K>(rules: I) -> Result<Self, MergeError>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self::with_config(rules, EngineConfig::default())
    }

    /// Builds one handler per rule.
    ///
    /// Every field is declared before any handler is scanned, so a
    /// placeholder may name a field that appears later in `rules`.
    ///
    /// # Errors
    ///
    /// Returns [`MergeError::Configuration`] listing every malformed descriptor.
    pub fn with_config<I, K>(rules: I, config: EngineConfig) -> Result<Self, MergeError>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let rules: Vec<(String, Value)> = rules.into_iter().map(|(field, raw)| (field.into(), raw)).collect();
        let declared: HashSet<&str> = rules.iter().map(|(field, _)| field.as_str()).collect();

        let mut handlers = IndexMap::with_capacity(rules.len());
        let mut failures = Vec::new();
        for (field, raw) in &rules {
            match Handler::new(field.as_str(), raw, |name| declared.contains(name), &config) {
                Ok(handler) => {
                    handlers.insert(field.clone(), handler);
                }
                Err(failure) => failures.push(failure),
            }
        }
        if !failures.is_empty() {
            return Err(MergeError::Configuration(failures));
        }

        debug!(fields = handlers.len(), "merge batch declared");
        Ok(Self {
            config,
            handlers,
            result: MergeResult::new(),
            dispatched: HashSet::new(),
            listeners: Vec::new(),
            context: RequestContext::default(),
            state: BatchState::Idle,
            failed_field: None,
            rounds: 0,
            history: Vec::new(),
            telemetry: MergeTelemetry::default(),
        })
    }

    /// Sets the ambient context shared by every sub-request.
    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    pub fn set_context(&mut self, context: RequestContext) {
        self.context = context;
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Declares a field after construction, replacing any field of the same name.
    ///
    /// A replaced field keeps its position and will be dispatched again. Only
    /// fields already declared can be referenced by the new descriptor, and
    /// existing handlers are not rescanned. Adding to a loaded batch reopens
    /// it so the next `run` dispatches the new field.
    ///
    /// # Errors
    ///
    /// Returns [`MergeError::Configuration`] when the descriptor is malformed;
    /// the batch is left unchanged.
    pub fn add(&mut self, field: impl Into<String>, raw: Value) -> Result<&mut Self, MergeError> {
        let field = field.into();
        let handler = Handler::new(field.as_str(), &raw, |name| self.handlers.contains_key(name), &self.config)
            .map_err(|failure| MergeError::Configuration(vec![failure]))?;

        if self.handlers.insert(field.clone(), handler).is_some() {
            debug!(field = %field, "field redeclared");
            self.dispatched.remove(&field);
            self.result.shift_remove(&field);
        }
        if self.state == BatchState::Loaded {
            self.state = BatchState::Idle;
        }
        Ok(self)
    }

    pub fn contains_field(&self, field: &str) -> bool {
        self.handlers.contains_key(field)
    }

    pub fn handler(&self, field: &str) -> Option<&Handler> {
        self.handlers.get(field)
    }

    /// Declared field names in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Registers a listener. Listeners are notified in registration order.
    pub fn observe(&mut self, listener: impl MergeListener + 'static) -> &mut Self {
        self.listeners.push(Box::new(listener));
        self
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    /// Number of convergence rounds executed so far.
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    /// Counters for every completed round, oldest first.
    pub fn round_summaries(&self) -> &[RoundSummary] {
        &self.history
    }

    pub fn telemetry(&self) -> &MergeTelemetry {
        &self.telemetry
    }

    /// Result accumulated so far. Complete once the batch is loaded.
    pub fn result(&self) -> &MergeResult {
        &self.result
    }

    /// Runs the batch to completion.
    ///
    /// Calling `run` again after it succeeded returns the same map without
    /// touching the dispatcher.
    ///
    /// # Errors
    ///
    /// A dispatcher error aborts the batch with [`MergeError::Dispatch`] and no
    /// partial result. Later calls return [`MergeError::BatchAborted`].
    pub fn run(&mut self, dispatcher: &dyn Dispatcher) -> Result<&MergeResult, MergeError> {
        match self.state {
            BatchState::Loaded => return Ok(&self.result),
            BatchState::Failed => {
                return Err(MergeError::BatchAborted {
                    field: self.failed_field.clone().unwrap_or_default(),
                });
            }
            BatchState::Idle | BatchState::Running => {}
        }

        self.state = BatchState::Running;
        while self.handlers.values().any(|handler| !handler.is_loaded()) {
            let summary = self.run_round(dispatcher)?;
            debug!(
                round = summary.round,
                dispatched = summary.dispatched,
                deferred = summary.deferred,
                "round complete"
            );
            self.history.push(summary);
            if summary.dispatched == 0 {
                self.finalize_stragglers(summary.round);
                break;
            }
            if summary.deferred == 0 {
                break;
            }
        }

        self.finish();
        Ok(&self.result)
    }

    fn run_round(&mut self, dispatcher: &dyn Dispatcher) -> Result<RoundSummary, MergeError> {
        self.rounds += 1;
        let mut summary = RoundSummary {
            round: self.rounds,
            ..RoundSummary::default()
        };

        let fields: Vec<String> = self.handlers.keys().cloned().collect();
        for field in fields {
            let Some(handler) = self.handlers.get_mut(&field) else {
                continue;
            };
            if handler.is_loaded() {
                continue;
            }

            let dispatched = &self.dispatched;
            handler.replace(&self.result, |name| dispatched.contains(name));
            if handler.is_deferred() {
                let blocked_on: Vec<String> = handler.blocking_fields().into_iter().map(str::to_string).collect();
                debug!(field = %field, blocked_on = ?blocked_on, round = summary.round, "field deferred");
                self.telemetry
                    .record(&field, FieldEventKind::Deferred { blocked_on }, summary.round);
                summary.deferred += 1;
                continue;
            }

            self.dispatch_field(&field, dispatcher, summary.round)?;
            summary.dispatched += 1;
        }
        Ok(summary)
    }

    fn dispatch_field(&mut self, field: &str, dispatcher: &dyn Dispatcher, round: usize) -> Result<(), MergeError> {
        for listener in &mut self.listeners {
            listener.executing(field, &mut self.result);
        }

        let Some(handler) = self.handlers.get_mut(field) else {
            return Ok(());
        };
        self.dispatched.insert(field.to_string());
        let value = match handler.dispatch(dispatcher, &self.context) {
            Ok(Some(value)) => {
                self.telemetry.record(field, FieldEventKind::Dispatched, round);
                value
            }
            Ok(None) => {
                warn!(
                    field,
                    method = %handler.spec().method,
                    path = %handler.spec().path,
                    "no endpoint matched sub-request"
                );
                self.telemetry.record(field, FieldEventKind::RouteNotFound, round);
                Value::Null
            }
            Err(source) => {
                error!(field, error = %source, "sub-request failed; aborting batch");
                self.telemetry.record(
                    field,
                    FieldEventKind::Failed {
                        reason: format!("{source:#}"),
                    },
                    round,
                );
                self.state = BatchState::Failed;
                self.failed_field = Some(field.to_string());
                return Err(MergeError::Dispatch {
                    field: field.to_string(),
                    source,
                });
            }
        };

        self.result.insert(field.to_string(), value.clone());
        for listener in &mut self.listeners {
            listener.executed(&value, field, &mut self.result);
        }
        Ok(())
    }

    fn finalize_stragglers(&mut self, round: usize) {
        for (field, handler) in &self.handlers {
            if handler.is_loaded() {
                continue;
            }
            let blocked_on: Vec<&str> = handler.blocking_fields().into_iter().collect();
            warn!(field = %field, blocked_on = ?blocked_on, "dependencies never resolved; using null");
            self.telemetry.record(field, FieldEventKind::Unresolved, round);
        }
    }

    /// Lists declared fields first, in declaration order, then any keys
    /// listeners added, and notifies `loaded`.
    fn finish(&mut self) {
        let mut ordered = MergeResult::with_capacity(self.result.len().max(self.handlers.len()));
        for field in self.handlers.keys() {
            let value = self.result.shift_remove(field).unwrap_or(Value::Null);
            ordered.insert(field.clone(), value);
        }
        ordered.extend(self.result.drain(..));
        self.result = ordered;
        self.state = BatchState::Loaded;

        let unresolved = self.result.values().filter(|value| value.is_null()).count();
        info!(fields = self.handlers.len(), rounds = self.rounds, unresolved, "merge batch loaded");
        for listener in &mut self.listeners {
            listener.loaded(&mut self.result);
        }
    }
}

impl std::fmt::Debug for MergeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeEngine")
            .field("fields", &self.handlers.keys().collect::<Vec<_>>())
            .field("state", &self.state)
            .field("rounds", &self.rounds)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{DispatchOutcome, EchoDispatcher, SubRequest};
    use serde_json::json;

    fn engine(rules: Value) -> MergeEngine {
        let rules = rules.as_object().cloned().expect("rules map");
        MergeEngine::new(rules).expect("engine")
    }

    #[test]
    fn later_fields_resolve_in_the_same_round_as_earlier_ones() {
        let mut engine = engine(json!({
            "user": "/users/42",
            "posts": {"path": "/posts", "query": {"author": "${mr:user.path}"}}
        }));
        let result = engine.run(&EchoDispatcher).expect("run").clone();
        assert_eq!(result["posts"]["query"]["author"], json!("/users/42"));
        assert_eq!(engine.rounds(), 1);
    }

    #[test]
    fn earlier_fields_waiting_on_later_ones_take_a_second_round() {
        let mut engine = engine(json!({
            "posts": {"path": "/posts", "query": {"author": "${mr:user.path}"}},
            "user": "/users/42"
        }));
        let result = engine.run(&EchoDispatcher).expect("run").clone();
        assert_eq!(result["posts"]["query"]["author"], json!("/users/42"));
        assert_eq!(engine.rounds(), 2);
        assert_eq!(
            engine.round_summaries(),
            &[
                RoundSummary { round: 1, dispatched: 1, deferred: 1 },
                RoundSummary { round: 2, dispatched: 1, deferred: 0 },
            ]
        );
        let keys: Vec<&str> = result.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["posts", "user"]);
        assert!(matches!(
            engine.telemetry().events_for("posts").next().map(|event| &event.kind),
            Some(FieldEventKind::Deferred { blocked_on }) if blocked_on == &vec!["user".to_string()]
        ));
    }

    #[test]
    fn configuration_errors_are_collected_for_every_field() {
        let rules = json!({"a": 1, "b": "/b", "c": {"path": "/c", "query": "x"}});
        let error = MergeEngine::new(rules.as_object().cloned().expect("rules")).expect_err("invalid rules");
        match error {
            MergeError::Configuration(failures) => {
                let fields: Vec<&str> = failures.iter().map(|failure| failure.field.as_str()).collect();
                assert_eq!(fields, vec!["a", "c"]);
            }
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn add_redeclares_in_place_and_reopens_a_loaded_batch() {
        let mut engine = engine(json!({"a": "/a", "b": "/b"}));
        engine.run(&EchoDispatcher).expect("first run");

        engine.add("a", json!("/a2")).expect("redeclare");
        engine.add("c", json!({"path": "/c", "query": {"from": "${mr:a.path}"}})).expect("add");
        assert_eq!(engine.state(), BatchState::Idle);
        assert!(engine.contains_field("c"));

        let result = engine.run(&EchoDispatcher).expect("second run");
        let keys: Vec<&str> = result.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(result["a"]["path"], json!("/a2"));
        assert_eq!(result["c"]["query"]["from"], json!("/a2"));
    }

    #[test]
    fn empty_batch_loads_without_rounds() {
        let mut engine = MergeEngine::new(Vec::<(String, Value)>::new()).expect("engine");
        assert!(engine.run(&EchoDispatcher).expect("run").is_empty());
        assert_eq!(engine.rounds(), 0);
        assert_eq!(engine.state(), BatchState::Loaded);
    }

    #[test]
    fn context_sections_reach_the_dispatcher() {
        let mut context = RequestContext::default().with_header("x-tenant", "acme");
        context.query.insert("locale".into(), json!("fr"));
        let mut engine = engine(json!({"a": "/a"})).with_context(context);

        let seen = |request: &SubRequest<'_>| -> anyhow::Result<DispatchOutcome> {
            Ok(json!({
                "tenant": request.context.headers.get("x-tenant"),
                "locale": request.section(mergereq_types::SpecSection::Query).and_then(|query| query.get("locale")),
            })
            .into())
        };
        let result = engine.run(&seen).expect("run");
        assert_eq!(result["a"], json!({"tenant": "acme", "locale": "fr"}));
    }
}
