//! Lifecycle notifications.

use mergereq_types::MergeResult;
use serde_json::Value;
use tracing::debug;

/// Observer of a merge batch.
///
/// Every hook is optional. The snapshot passed to `executing` and `executed`
/// is the live result map; changes made there are visible to fields
/// substituted later in the same run.
pub trait MergeListener {
    /// Called right before `field` is dispatched.
    fn executing(&mut self, _field: &str, _snapshot: &mut MergeResult) {}

    /// Called after `field` produced `value` (already stored in the snapshot).
    fn executed(&mut self, _value: &Value, _field: &str, _snapshot: &mut MergeResult) {}

    /// Called once when the batch is complete.
    fn loaded(&mut self, _result: &mut MergeResult) {}
}

/// Logs every notification at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

impl MergeListener for TracingListener {
    fn executing(&mut self, field: &str, snapshot: &mut MergeResult) {
        debug!(field, resolved = snapshot.len(), "executing sub-request");
    }

    fn executed(&mut self, value: &Value, field: &str, _snapshot: &mut MergeResult) {
        debug!(field, null = value.is_null(), "sub-request executed");
    }

    fn loaded(&mut self, result: &mut MergeResult) {
        let unresolved = result.values().filter(|value| value.is_null()).count();
        debug!(fields = result.len(), unresolved, "merge batch loaded");
    }
}
