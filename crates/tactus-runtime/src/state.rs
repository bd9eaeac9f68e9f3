//! Scoped key/value state for one invocation.
//!
//! Values are JSON shapes so every mutation can be journalled. Event emission
//! happens at the bridge layer; this store is plain data.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Mutex;

use tactus_contract::ScriptError;

/// Per-invocation key/value store.
#[derive(Default)]
pub struct StateStore {
    entries: Mutex<BTreeMap<String, Value>>,
}

impl StateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a value. Reads do not produce events.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries
            .lock()
            .expect("state lock poisoned")
            .get(key)
            .cloned()
    }

    /// Write a value, returning the previous one.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.entries
            .lock()
            .expect("state lock poisoned")
            .insert(key.into(), value)
    }

    /// Increment a numeric value by `delta`, creating it at `delta` when
    /// absent. Returns the resulting number.
    pub fn incr(&self, key: &str, delta: f64) -> Result<Value, ScriptError> {
        let mut entries = self.entries.lock().expect("state lock poisoned");
        let current = match entries.get(key) {
            None => 0.0,
            Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            Some(other) => {
                return Err(ScriptError::validation(format!(
                    "state key '{key}' holds non-numeric value {other}"
                )))
            }
        };
        let next = current + delta;
        let value = if next.fract() == 0.0 && next.abs() < (i64::MAX as f64) {
            Value::from(next as i64)
        } else {
            Value::from(next)
        };
        entries.insert(key.to_string(), value.clone());
        Ok(value)
    }

    /// Whether a key is present.
    pub fn has(&self, key: &str) -> bool {
        self.entries
            .lock()
            .expect("state lock poisoned")
            .contains_key(key)
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.entries.lock().expect("state lock poisoned").clear();
    }

    /// Snapshot the full map in key order.
    pub fn dump(&self) -> Map<String, Value> {
        self.entries
            .lock()
            .expect("state lock poisoned")
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Keys currently present, in order.
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .lock()
            .expect("state lock poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn incr_creates_and_accumulates() {
        let state = StateStore::new();
        assert_eq!(state.incr("n", 1.0).unwrap(), json!(1));
        assert_eq!(state.incr("n", 2.0).unwrap(), json!(3));
        assert_eq!(state.get("n"), Some(json!(3)));
    }

    #[test]
    fn incr_rejects_non_numeric() {
        let state = StateStore::new();
        state.set("s", json!("text"));
        assert!(state.incr("s", 1.0).is_err());
    }

    #[test]
    fn dump_is_key_ordered() {
        let state = StateStore::new();
        state.set("b", json!(2));
        state.set("a", json!(1));
        let keys: Vec<_> = state.dump().keys().cloned().collect();
        assert_eq!(keys, vec!["a", "b"]);
    }
}
