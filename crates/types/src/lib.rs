//! Shared type definitions for merged sub-request batches.
//!
//! The engine, the dispatchers, and the CLI all exchange the types defined
//! here. Ordering is preserved everywhere (via `IndexMap` and
//! `serde_json::Map`) so merged results render fields in the order they were
//! declared.

pub mod context;
pub mod request;

pub use context::{RequestContext, ResponseEnvelope};
pub use request::{PathSegment, RequestSpec, SpecSection, TreeLocation};

use indexmap::IndexMap;
use serde_json::Value;

/// HTTP method applied when a request descriptor does not name one.
pub const DEFAULT_METHOD: &str = "GET";

/// Aggregate result of a merge batch keyed by field name.
///
/// A `null` value stands for "could not resolve" (unknown route, deadlocked
/// dependency, or a dependency that never produced a value).
pub type MergeResult = IndexMap<String, Value>;
