//! Checkpoint journal: deterministic step ids plus read-through storage.
//!
//! Step ids have the form `<designator>:<ordinal>`, where the designator is a
//! stable name for the lexical call site (supplied by the script bridge; the
//! Lua front end uses `line:col`, native scripts use the capability path) and
//! the ordinal counts invocations of that designator within this procedure
//! invocation. Deterministic scripts therefore produce identical step ids
//! run-to-run.
//!
//! Replay is monotonic: the journal is consulted until the first miss, after
//! which the invocation is live and no further lookups hit. This matches the
//! contract that a deterministic script never interleaves un-journalled steps
//! before journalled ones.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tactus_contract::storage::{StorageBackend, StorageError};
use tactus_contract::ScriptError;

/// Journal for one invocation.
pub struct Journal {
    invocation_id: String,
    storage: Arc<dyn StorageBackend>,
    /// Per-designator ordinal counters.
    counters: Mutex<HashMap<String, u64>>,
    /// Set after the first lookup miss; later lookups never consult storage.
    live: AtomicBool,
}

impl Journal {
    /// Create a journal. `replaying` is true when the invocation may hold
    /// prior checkpoints (resume); a fresh invocation starts live.
    pub fn new(
        invocation_id: impl Into<String>,
        storage: Arc<dyn StorageBackend>,
        replaying: bool,
    ) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            storage,
            counters: Mutex::new(HashMap::new()),
            live: AtomicBool::new(!replaying),
        }
    }

    /// Assign the next step id for a call-site designator.
    pub fn step_id(&self, designator: &str) -> String {
        let mut counters = self.counters.lock().expect("journal lock poisoned");
        let ordinal = counters.entry(designator.to_string()).or_insert(0);
        let id = format!("{designator}:{ordinal}");
        *ordinal += 1;
        id
    }

    /// Whether this invocation has left replay mode.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Look up a journalled value for a step.
    ///
    /// Returns `None` once the invocation is live. The first miss flips the
    /// journal to live mode.
    pub async fn lookup(&self, step_id: &str) -> Result<Option<Value>, ScriptError> {
        if self.is_live() {
            return Ok(None);
        }
        match self
            .storage
            .read_checkpoint(&self.invocation_id, step_id)
            .await
        {
            Ok(Some(value)) => Ok(Some(value)),
            Ok(None) => {
                self.live.store(true, Ordering::SeqCst);
                Ok(None)
            }
            Err(err) => Err(storage_error(err)),
        }
    }

    /// Look up and decode a journalled value. A value that no longer
    /// deserialises for the requesting primitive is a checkpoint conflict.
    pub async fn lookup_as<T: DeserializeOwned>(
        &self,
        step_id: &str,
    ) -> Result<Option<T>, ScriptError> {
        match self.lookup(step_id).await? {
            None => Ok(None),
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                ScriptError::checkpoint_conflict(format!(
                    "journalled value for step {step_id} does not match current code: {e}"
                ))
            }),
        }
    }

    /// Commit a step outcome. Once written, a step's value is immutable.
    pub async fn commit<T: Serialize>(&self, step_id: &str, value: &T) -> Result<(), ScriptError> {
        let value = serde_json::to_value(value)
            .map_err(|e| ScriptError::internal(format!("unjournallable step value: {e}")))?;
        self.storage
            .write_checkpoint(&self.invocation_id, step_id, &value)
            .await
            .map_err(storage_error)
    }
}

fn storage_error(err: StorageError) -> ScriptError {
    match err {
        StorageError::Conflict(msg) => ScriptError::checkpoint_conflict(msg),
        other => ScriptError::internal(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tactus_contract::MemoryStorage;

    #[test]
    fn step_ids_count_per_designator() {
        let journal = Journal::new("inv", Arc::new(MemoryStorage::new()), false);
        assert_eq!(journal.step_id("state.set:n"), "state.set:n:0");
        assert_eq!(journal.step_id("state.set:n"), "state.set:n:1");
        assert_eq!(journal.step_id("stage.set"), "stage.set:0");
    }

    #[tokio::test]
    async fn fresh_journal_is_live() {
        let journal = Journal::new("inv", Arc::new(MemoryStorage::new()), false);
        assert!(journal.is_live());
        assert_eq!(journal.lookup("x:0").await.unwrap(), None);
    }

    #[tokio::test]
    async fn replay_hits_until_first_miss() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .write_checkpoint("inv", "a:0", &json!(1))
            .await
            .unwrap();
        storage
            .write_checkpoint("inv", "c:0", &json!(3))
            .await
            .unwrap();

        let journal = Journal::new("inv", storage, true);
        assert_eq!(journal.lookup("a:0").await.unwrap(), Some(json!(1)));
        // Miss flips to live; the later checkpoint is never consulted.
        assert_eq!(journal.lookup("b:0").await.unwrap(), None);
        assert!(journal.is_live());
        assert_eq!(journal.lookup("c:0").await.unwrap(), None);
    }

    #[tokio::test]
    async fn decode_mismatch_is_checkpoint_conflict() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .write_checkpoint("inv", "a:0", &json!("text"))
            .await
            .unwrap();
        let journal = Journal::new("inv", storage, true);
        let err = journal.lookup_as::<u64>("a:0").await.unwrap_err();
        assert_eq!(err.kind, tactus_contract::ErrorKind::CheckpointConflict);
    }
}
