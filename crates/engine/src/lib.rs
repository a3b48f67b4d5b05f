//! # Mergereq Engine
//!
//! Fans one call out into several named sub-requests and merges their
//! results. A sub-request may reference another field's result with a
//! `${mr:field.path}` placeholder; the engine works out the order by running
//! repeated rounds over the batch instead of building a dependency graph.
//!
//! ## Usage
//!
//! ```rust
//! use mergereq_engine::{MergeEngine, RouteTable, parse_rules_str};
//! use serde_json::json;
//!
//! let mut routes = RouteTable::new();
//! routes.route("GET", "/users/{id}", |call| Ok(json!({"id": call.param("id").cloned(), "name": "Ada"}).into()))?;
//! routes.route("GET", "/users/{id}/posts", |call| Ok(json!([{"author": call.param("id").cloned()}]).into()))?;
//!
//! let document = parse_rules_str(r#"
//! rules:
//!   user: /users/42
//!   posts:
//!     path: /users/{id}/posts
//!     routeParams:
//!       id: ${mr:user.id}
//! "#)?;
//!
//! let mut engine = MergeEngine::new(document.rules)?.with_context(document.context);
//! let result = engine.run(&routes)?;
//! assert_eq!(result["posts"][0]["author"], json!("42"));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`normalize`**: turns raw descriptors into [`RequestSpec`](mergereq_types::RequestSpec)s
//! - **`templates`**: placeholder parsing and snapshot lookup
//! - **`handler`**: per-field substitution and one-shot dispatch
//! - **`executor`**: the convergence loop ([`MergeEngine`])
//! - **`dispatch`**: the [`Dispatcher`] seam and its echo, route-table, and HTTP implementations
//! - **`listener`** / **`telemetry`**: lifecycle notifications and recorded events

use std::{fs, path::Path};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use mergereq_types::RequestContext;
use serde::Deserialize;
use serde_json::Value;

pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod handler;
pub mod listener;
pub mod normalize;
pub mod telemetry;
pub mod templates;

pub use config::EngineConfig;
pub use dispatch::{DispatchOutcome, Dispatcher, EchoDispatcher, HttpDispatcher, RouteCall, RouteTable, RouteTableError, SubRequest};
pub use error::{ConfigurationError, MergeError};
pub use executor::{BatchState, MergeEngine, RoundSummary};
pub use handler::{Handler, PendingSubstitution};
pub use listener::{MergeListener, TracingListener};
pub use normalize::normalize_request;
pub use telemetry::{FieldEvent, FieldEventKind, MergeTelemetry};
pub use templates::Placeholder;

/// A batch of rules as stored on disk.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RulesDocument {
    /// Field name to descriptor (path string or option map), in declaration order.
    pub rules: IndexMap<String, Value>,
    /// Ambient context shared by every sub-request.
    #[serde(default)]
    pub context: RequestContext,
}

/// Parses a YAML or JSON rules document.
///
/// # Errors
///
/// Fails when the text is not valid YAML/JSON, has no `rules` mapping, or
/// carries top-level keys other than `rules` and `context`.
pub fn parse_rules_str(text: &str) -> Result<RulesDocument> {
    serde_yaml::from_str(text).context("invalid rules document; expected a 'rules' mapping and an optional 'context'")
}

/// Loads a rules document from the filesystem. JSON documents are accepted
/// as well since JSON is valid YAML.
///
/// # Examples
///
/// ```rust
/// use mergereq_engine::parse_rules_file;
///
/// let temp_dir = tempfile::tempdir()?;
/// let rules_path = temp_dir.path().join("batch.yaml");
/// std::fs::write(&rules_path, "rules:\n  user: /users/42\n")?;
///
/// let document = parse_rules_file(&rules_path)?;
/// assert_eq!(document.rules.len(), 1);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn parse_rules_file(file_path: impl AsRef<Path>) -> Result<RulesDocument> {
    let file_path = file_path.as_ref();
    let content = fs::read_to_string(file_path).with_context(|| format!("failed to read rules file: {}", file_path.display()))?;
    parse_rules_str(&content).with_context(|| format!("failed to parse rules file: {}", file_path.display()))
}
