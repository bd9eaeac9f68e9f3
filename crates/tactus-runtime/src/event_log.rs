//! Per-invocation append-only event log with a durable storage mirror.
//!
//! Sequence numbers reflect program order within the invocation. External
//! subscribers (CLI, IDE) receive events through a broadcast channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tactus_contract::storage::StorageBackend;
use tactus_contract::{EventPayload, EventRecord};
use tokio::sync::broadcast;

const SUBSCRIBER_BUFFER: usize = 1024;

/// Append-only event log owned by one invocation.
pub struct EventLog {
    invocation_id: String,
    /// Last assigned sequence number.
    seq: AtomicU64,
    events: Mutex<Vec<EventRecord>>,
    tx: broadcast::Sender<EventRecord>,
    storage: Arc<dyn StorageBackend>,
}

impl EventLog {
    /// Create a log starting after `last_seq` (0 for a fresh invocation).
    pub fn new(
        invocation_id: impl Into<String>,
        storage: Arc<dyn StorageBackend>,
        last_seq: u64,
    ) -> Self {
        let (tx, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        Self {
            invocation_id: invocation_id.into(),
            seq: AtomicU64::new(last_seq),
            events: Mutex::new(Vec::new()),
            tx,
            storage,
        }
    }

    /// Append one event, returning the assigned record.
    ///
    /// Total-ordered per invocation. A storage rejection (e.g. append after
    /// terminal status) is non-fatal: it is logged and the in-memory record
    /// stands.
    pub async fn append(&self, payload: EventPayload) -> EventRecord {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let record = EventRecord::new(self.invocation_id.clone(), seq, payload);
        self.events
            .lock()
            .expect("event log lock poisoned")
            .push(record.clone());
        if let Err(err) = self.storage.append_event(&self.invocation_id, &record).await {
            tracing::warn!(
                invocation = %self.invocation_id,
                seq,
                %err,
                "event mirror rejected append"
            );
        }
        let _ = self.tx.send(record.clone());
        record
    }

    /// All events appended by this log instance, in order.
    pub fn snapshot(&self) -> Vec<EventRecord> {
        self.events.lock().expect("event log lock poisoned").clone()
    }

    /// Events with `seq > since_seq` appended by this log instance.
    pub fn since(&self, since_seq: u64) -> Vec<EventRecord> {
        self.events
            .lock()
            .expect("event log lock poisoned")
            .iter()
            .filter(|e| e.seq > since_seq)
            .cloned()
            .collect()
    }

    /// Subscribe to events appended after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.tx.subscribe()
    }

    /// Clone of the broadcast sender, letting handles mint receivers after
    /// the log has moved into its invocation task.
    pub(crate) fn broadcaster(&self) -> broadcast::Sender<EventRecord> {
        self.tx.clone()
    }

    /// Last assigned sequence number.
    pub fn last_seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tactus_contract::{LogLevel, MemoryStorage};

    fn log_payload(message: &str) -> EventPayload {
        EventPayload::Log {
            level: LogLevel::Info,
            message: message.into(),
        }
    }

    #[tokio::test]
    async fn seqs_are_dense_and_mirrored() {
        let storage = Arc::new(MemoryStorage::new());
        let log = EventLog::new("inv", storage.clone(), 0);
        log.append(log_payload("a")).await;
        log.append(log_payload("b")).await;

        tactus_contract::testing::assert_dense_seqs(&log.snapshot());
        let mirrored = storage.read_events("inv", 0).await.unwrap();
        assert_eq!(mirrored.len(), 2);
        assert_eq!(log.last_seq(), 2);
    }

    #[tokio::test]
    async fn resume_continues_sequence() {
        let storage = Arc::new(MemoryStorage::new());
        let log = EventLog::new("inv", storage.clone(), 7);
        let record = log.append(log_payload("resumed")).await;
        assert_eq!(record.seq, 8);
    }

    #[tokio::test]
    async fn subscribers_see_appends() {
        let storage = Arc::new(MemoryStorage::new());
        let log = EventLog::new("inv", storage, 0);
        let mut rx = log.subscribe();
        log.append(log_payload("x")).await;
        let seen = rx.recv().await.unwrap();
        assert_eq!(seen.seq, 1);
    }
}
