//! In-process route table.
//!
//! Routes are registered per method with `{param}` path templates and matched
//! with `matchit`. A route may also carry a name: a sub-request whose path
//! (without the leading `/`) equals that name selects the route directly, and
//! the route template is expanded with the sub-request's `routeParams`.
//! Any other path has its `{param}` segments expanded the same way before
//! it is matched.

use std::collections::HashMap;

use anyhow::Result;
use matchit::{InsertError, Router as MatchRouter};
use mergereq_util::build_path;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use super::{DispatchOutcome, Dispatcher, SubRequest};

type RouteAction = Box<dyn Fn(&RouteCall<'_>) -> Result<DispatchOutcome>>;

/// Errors raised while registering routes.
#[derive(Debug, Error)]
pub enum RouteTableError {
    #[error("cannot register {method} {template}: {source}")]
    Insert {
        method: String,
        template: String,
        #[source]
        source: InsertError,
    },
    #[error("route name '{0}' is already registered")]
    DuplicateName(String),
}

/// A matched sub-request handed to a route action.
pub struct RouteCall<'a> {
    pub request: &'a SubRequest<'a>,
    /// Concrete path the route was invoked with.
    pub path: String,
    /// Captured path parameters overlaid with the sub-request's `routeParams`.
    pub params: Map<String, Value>,
    pub route_name: Option<&'a str>,
}

impl RouteCall<'_> {
    /// Convenience accessor for a single route parameter.
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }
}

struct Route {
    method: String,
    template: String,
    name: Option<String>,
    action: RouteAction,
}

/// In-memory dispatcher mapping `(method, path template)` pairs to actions.
#[derive(Default)]
pub struct RouteTable {
    routes: Vec<Route>,
    by_method: HashMap<String, MatchRouter<usize>>,
    names: HashMap<String, usize>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an anonymous route.
    pub fn route<F>(&mut self, method: &str, template: &str, action: F) -> Result<&mut Self, RouteTableError>
    where
        F: Fn(&RouteCall<'_>) -> Result<DispatchOutcome> + 'static,
    {
        self.insert(method, template, None, Box::new(action))
    }

    /// Registers a route that can also be selected by `name`.
    pub fn named<F>(&mut self, name: &str, method: &str, template: &str, action: F) -> Result<&mut Self, RouteTableError>
    where
        F: Fn(&RouteCall<'_>) -> Result<DispatchOutcome> + 'static,
    {
        if self.names.contains_key(name) {
            return Err(RouteTableError::DuplicateName(name.to_string()));
        }
        self.insert(method, template, Some(name.to_string()), Box::new(action))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    fn insert(&mut self, method: &str, template: &str, name: Option<String>, action: RouteAction) -> Result<&mut Self, RouteTableError> {
        let method = method.trim().to_ascii_uppercase();
        let index = self.routes.len();
        self.by_method
            .entry(method.clone())
            .or_default()
            .insert(template, index)
            .map_err(|source| RouteTableError::Insert {
                method: method.clone(),
                template: template.to_string(),
                source,
            })?;
        if let Some(name) = &name {
            self.names.insert(name.clone(), index);
        }
        self.routes.push(Route {
            method,
            template: template.to_string(),
            name,
            action,
        });
        Ok(self)
    }

    /// Finds the route for `request`, returning its index, concrete path, and parameters.
    fn resolve(&self, request: &SubRequest<'_>) -> Option<(usize, String, Map<String, Value>)> {
        let empty = Map::new();
        let route_params = request.route_params().unwrap_or(&empty);

        let name = request.path().trim_start_matches('/');
        if let Some(&index) = self.names.get(name) {
            let path = build_path(&self.routes[index].template, route_params);
            return Some((index, path, route_params.clone()));
        }

        let raw_path = request.path().split_once('?').map_or(request.path(), |(path, _)| path);
        let path = build_path(raw_path, route_params);
        let matched = self.by_method.get(request.method())?.at(&path).ok()?;
        let mut params: Map<String, Value> = matched
            .params
            .iter()
            .map(|(key, value)| (key.to_string(), Value::String(value.to_string())))
            .collect();
        let index = *matched.value;
        params.extend(route_params.clone());
        Some((index, path, params))
    }
}

impl Dispatcher for RouteTable {
    fn dispatch(&self, request: &SubRequest<'_>) -> Result<DispatchOutcome> {
        let Some((index, path, params)) = self.resolve(request) else {
            debug!(field = request.field, method = request.method(), path = request.path(), "no route matched");
            return Ok(DispatchOutcome::NotFound);
        };
        let route = &self.routes[index];
        debug!(
            field = request.field,
            method = %route.method,
            template = %route.template,
            path = %path,
            "route matched"
        );
        let call = RouteCall {
            request,
            path,
            params,
            route_name: route.name.as_deref(),
        };
        (route.action)(&call)
    }
}
