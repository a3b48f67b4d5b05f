//! Per-field lifecycle events recorded while a batch runs.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// What happened to a field during a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldEventKind {
    /// Placeholders still wait on the listed fields.
    Deferred { blocked_on: Vec<String> },
    /// The dispatcher produced a value.
    Dispatched,
    /// No endpoint matched; the field is `null`.
    RouteNotFound,
    /// The round made no progress, so the field was finalized to `null`.
    Unresolved,
    /// The dispatcher raised and the batch was aborted.
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldEvent {
    pub field: String,
    #[serde(flatten)]
    pub kind: FieldEventKind,
    /// One-based convergence round.
    pub round: usize,
    pub recorded_at: DateTime<Utc>,
}

/// Events collected during a merge batch, in the order they occurred.
#[derive(Debug, Default, Clone)]
pub struct MergeTelemetry {
    events: Vec<FieldEvent>,
}

impl MergeTelemetry {
    pub(crate) fn record(&mut self, field: &str, kind: FieldEventKind, round: usize) {
        self.events.push(FieldEvent {
            field: field.to_string(),
            kind,
            round,
            recorded_at: Utc::now(),
        });
    }

    pub fn events(&self) -> &[FieldEvent] {
        &self.events
    }

    /// Events for a single field.
    pub fn events_for<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a FieldEvent> + 'a {
        self.events.iter().filter(move |event| event.field == field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_kept_in_order_and_filterable() {
        let mut telemetry = MergeTelemetry::default();
        telemetry.record(
            "posts",
            FieldEventKind::Deferred {
                blocked_on: vec!["user".into()],
            },
            1,
        );
        telemetry.record("user", FieldEventKind::Dispatched, 1);
        telemetry.record("posts", FieldEventKind::Dispatched, 2);

        let kinds: Vec<(&str, usize)> = telemetry.events().iter().map(|event| (event.field.as_str(), event.round)).collect();
        assert_eq!(kinds, vec![("posts", 1), ("user", 1), ("posts", 2)]);
        assert_eq!(telemetry.events_for("posts").count(), 2);
    }

    #[test]
    fn events_serialize_with_a_flat_kind_tag() {
        let mut telemetry = MergeTelemetry::default();
        telemetry.record("a", FieldEventKind::Unresolved, 3);
        let value = serde_json::to_value(&telemetry.events()[0]).expect("serialize");
        assert_eq!(value["field"], "a");
        assert_eq!(value["kind"], "unresolved");
        assert_eq!(value["round"], 3);
        assert!(value["recorded_at"].is_string());
    }
}
