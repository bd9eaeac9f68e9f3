//! Shared test fixtures for crates that depend on `tactus-contract`.
//!
//! Gated behind the `test-support` cargo feature so production builds are
//! unaffected. Enable via `[dev-dependencies] tactus-contract = { ...,
//! features = ["test-support"] }`.

use crate::event::EventRecord;
use crate::procedure::{InvocationRecord, InvocationStatus};
use serde_json::json;

/// A fresh invocation record in `running` status.
pub fn running_record(id: &str) -> InvocationRecord {
    InvocationRecord {
        id: id.into(),
        definition_ref: format!("{id}-def@0.1.0"),
        params: json!({}),
        status: InvocationStatus::Running,
        created_at: crate::event::now_ms(),
        completed_at: None,
        result: None,
        error: None,
    }
}

/// Assert that event sequence numbers form a dense series starting at 1.
pub fn assert_dense_seqs(events: &[EventRecord]) {
    for (idx, event) in events.iter().enumerate() {
        assert_eq!(
            event.seq,
            idx as u64 + 1,
            "event {idx} has seq {} (payload {})",
            event.seq,
            event.payload.type_label()
        );
    }
}

/// Project events to `(type, payload-without-timing)` values for
/// byte-identity comparisons between runs. Wall-clock fields
/// (`duration_ms`) are stripped along with the envelope timestamps.
pub fn comparable_payloads(events: &[EventRecord]) -> Vec<serde_json::Value> {
    fn strip_timing(value: &mut serde_json::Value) {
        if let serde_json::Value::Object(map) = value {
            map.remove("duration_ms");
            for nested in map.values_mut() {
                strip_timing(nested);
            }
        }
    }
    events
        .iter()
        .map(|e| {
            let mut payload =
                serde_json::to_value(&e.payload).expect("event payload serializes");
            strip_timing(&mut payload);
            payload
        })
        .collect()
}
