//! Storage backend contract plus the in-memory implementation.
//!
//! All operations are expected to be durable; atomicity is required only per
//! individual call. The in-memory backend is the CLI default and the test
//! backbone; file and database backends implement the same trait elsewhere.

use crate::event::EventRecord;
use crate::procedure::InvocationRecord;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use thiserror::Error;

/// Storage failures.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("invocation not found: {0}")]
    NotFound(String),

    /// A write conflicted with an existing immutable record.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Durable storage consumed by the runtime.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Create or update the invocation record.
    async fn save_invocation(&self, record: &InvocationRecord) -> Result<(), StorageError>;

    /// Load an invocation record.
    async fn load_invocation(&self, id: &str) -> Result<Option<InvocationRecord>, StorageError>;

    /// List known invocation ids.
    async fn list_invocations(&self) -> Result<Vec<String>, StorageError>;

    /// Append one event to an invocation's log.
    async fn append_event(&self, id: &str, event: &EventRecord) -> Result<(), StorageError>;

    /// Read events with `seq > since_seq`, in order.
    async fn read_events(&self, id: &str, since_seq: u64) -> Result<Vec<EventRecord>, StorageError>;

    /// Write one checkpoint value. Once written, a step's value is immutable.
    async fn write_checkpoint(
        &self,
        id: &str,
        step_id: &str,
        value: &Value,
    ) -> Result<(), StorageError>;

    /// Read one checkpoint value.
    async fn read_checkpoint(&self, id: &str, step_id: &str)
        -> Result<Option<Value>, StorageError>;

    /// Delete an invocation with its events and checkpoints.
    async fn delete_invocation(&self, id: &str) -> Result<(), StorageError>;
}

#[derive(Default)]
struct MemoryInner {
    invocations: HashMap<String, InvocationRecord>,
    events: HashMap<String, Vec<EventRecord>>,
    checkpoints: HashMap<String, BTreeMap<String, Value>>,
}

/// In-memory storage backend.
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<MemoryInner>,
}

impl MemoryStorage {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn save_invocation(&self, record: &InvocationRecord) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("storage lock poisoned");
        inner.invocations.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn load_invocation(&self, id: &str) -> Result<Option<InvocationRecord>, StorageError> {
        let inner = self.inner.lock().expect("storage lock poisoned");
        Ok(inner.invocations.get(id).cloned())
    }

    async fn list_invocations(&self) -> Result<Vec<String>, StorageError> {
        let inner = self.inner.lock().expect("storage lock poisoned");
        let mut ids: Vec<String> = inner.invocations.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    async fn append_event(&self, id: &str, event: &EventRecord) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("storage lock poisoned");
        inner
            .events
            .entry(id.to_string())
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn read_events(
        &self,
        id: &str,
        since_seq: u64,
    ) -> Result<Vec<EventRecord>, StorageError> {
        let inner = self.inner.lock().expect("storage lock poisoned");
        Ok(inner
            .events
            .get(id)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| e.seq > since_seq)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn write_checkpoint(
        &self,
        id: &str,
        step_id: &str,
        value: &Value,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("storage lock poisoned");
        let checkpoints = inner.checkpoints.entry(id.to_string()).or_default();
        if let Some(existing) = checkpoints.get(step_id) {
            if existing != value {
                return Err(StorageError::Conflict(format!(
                    "checkpoint {step_id} of {id} already written with a different value"
                )));
            }
            return Ok(());
        }
        checkpoints.insert(step_id.to_string(), value.clone());
        Ok(())
    }

    async fn read_checkpoint(
        &self,
        id: &str,
        step_id: &str,
    ) -> Result<Option<Value>, StorageError> {
        let inner = self.inner.lock().expect("storage lock poisoned");
        Ok(inner
            .checkpoints
            .get(id)
            .and_then(|c| c.get(step_id))
            .cloned())
    }

    async fn delete_invocation(&self, id: &str) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("storage lock poisoned");
        inner.invocations.remove(id);
        inner.events.remove(id);
        inner.checkpoints.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventPayload, LogLevel};
    use crate::procedure::InvocationStatus;
    use serde_json::json;

    fn record(id: &str) -> InvocationRecord {
        InvocationRecord {
            id: id.into(),
            definition_ref: "demo@1".into(),
            params: json!({}),
            status: InvocationStatus::Running,
            created_at: 0,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn checkpoints_are_immutable_once_written() {
        let storage = MemoryStorage::new();
        storage
            .write_checkpoint("inv", "step:0", &json!({"n": 1}))
            .await
            .unwrap();
        // Idempotent re-write of the same value is accepted.
        storage
            .write_checkpoint("inv", "step:0", &json!({"n": 1}))
            .await
            .unwrap();
        let err = storage
            .write_checkpoint("inv", "step:0", &json!({"n": 2}))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[tokio::test]
    async fn read_events_filters_by_seq() {
        let storage = MemoryStorage::new();
        for seq in 1..=3 {
            let event = EventRecord::new(
                "inv",
                seq,
                EventPayload::Log {
                    level: LogLevel::Info,
                    message: format!("e{seq}"),
                },
            );
            storage.append_event("inv", &event).await.unwrap();
        }
        let tail = storage.read_events("inv", 1).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].seq, 2);
    }

    #[tokio::test]
    async fn delete_removes_everything() {
        let storage = MemoryStorage::new();
        storage.save_invocation(&record("inv")).await.unwrap();
        storage
            .write_checkpoint("inv", "s", &json!(1))
            .await
            .unwrap();
        storage.delete_invocation("inv").await.unwrap();
        assert!(storage.load_invocation("inv").await.unwrap().is_none());
        assert!(storage.read_checkpoint("inv", "s").await.unwrap().is_none());
    }
}
