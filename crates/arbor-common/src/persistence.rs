//! Persistence collaborator interfaces
//!
//! The core consumes durability through two narrow traits: a key-value
//! store for profile records and an append-only event log for the trust
//! event mirror. Implementations are injected at construction; the
//! in-memory variants here back tests and single-process deployments.
//!
//! Durability contract: at-least-once append, exactly-once per
//! `(stream_id, event_id)` — duplicate ids within a stream are rejected.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::error::{ArborError, Result};

/// Durable event envelope, the shape the event log stores.
///
/// Trust events persist with `stream_id = trust:{agent_id}` and
/// `event_type = arbor.trust.{event_type}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEvent {
    /// Unique event id within the stream
    pub id: String,

    /// Stream the event belongs to
    pub stream_id: String,

    /// Namespaced type string
    pub event_type: String,

    /// Event timestamp (Unix milliseconds)
    pub timestamp: i64,

    /// Event body
    pub data: Value,

    /// Envelope metadata
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Key-value store collaborator
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn put(&self, store_name: &str, key: &str, value: Value) -> Result<()>;
    async fn get(&self, store_name: &str, key: &str) -> Result<Option<Value>>;
    async fn delete(&self, store_name: &str, key: &str) -> Result<()>;
    async fn list_keys(&self, store_name: &str) -> Result<Vec<String>>;
    async fn exists(&self, store_name: &str, key: &str) -> Result<bool>;
}

/// Append-only event log collaborator
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append one event; returns the stream version after the append.
    /// A duplicate `(stream_id, event.id)` is rejected with `AlreadyExists`.
    async fn append(&self, stream_id: &str, event: PersistedEvent) -> Result<u64>;

    /// All events of one stream in append order
    async fn read_stream(&self, stream_id: &str) -> Result<Vec<PersistedEvent>>;

    /// All events across streams, ordered by `(timestamp, id)`
    async fn read_all(&self) -> Result<Vec<PersistedEvent>>;

    /// Number of events appended to the stream
    async fn version(&self, stream_id: &str) -> Result<u64>;
}

/// In-memory key-value store
#[derive(Default)]
pub struct MemoryKeyValueStore {
    stores: RwLock<HashMap<String, HashMap<String, Value>>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn put(&self, store_name: &str, key: &str, value: Value) -> Result<()> {
        self.stores
            .write()
            .entry(store_name.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, store_name: &str, key: &str) -> Result<Option<Value>> {
        Ok(self
            .stores
            .read()
            .get(store_name)
            .and_then(|store| store.get(key))
            .cloned())
    }

    async fn delete(&self, store_name: &str, key: &str) -> Result<()> {
        if let Some(store) = self.stores.write().get_mut(store_name) {
            store.remove(key);
        }
        Ok(())
    }

    async fn list_keys(&self, store_name: &str) -> Result<Vec<String>> {
        Ok(self
            .stores
            .read()
            .get(store_name)
            .map(|store| store.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn exists(&self, store_name: &str, key: &str) -> Result<bool> {
        Ok(self
            .stores
            .read()
            .get(store_name)
            .is_some_and(|store| store.contains_key(key)))
    }
}

/// In-memory append-only event log
#[derive(Default)]
pub struct MemoryEventLog {
    streams: RwLock<HashMap<String, Vec<PersistedEvent>>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, stream_id: &str, event: PersistedEvent) -> Result<u64> {
        let mut streams = self.streams.write();
        let stream = streams.entry(stream_id.to_string()).or_default();
        if stream.iter().any(|existing| existing.id == event.id) {
            return Err(ArborError::AlreadyExists(format!(
                "event {} in stream {}",
                event.id, stream_id
            )));
        }
        stream.push(event);
        Ok(stream.len() as u64)
    }

    async fn read_stream(&self, stream_id: &str) -> Result<Vec<PersistedEvent>> {
        Ok(self
            .streams
            .read()
            .get(stream_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn read_all(&self) -> Result<Vec<PersistedEvent>> {
        let mut all: Vec<PersistedEvent> = self
            .streams
            .read()
            .values()
            .flat_map(|stream| stream.iter().cloned())
            .collect();
        all.sort_by(|a, b| (a.timestamp, &a.id).cmp(&(b.timestamp, &b.id)));
        Ok(all)
    }

    async fn version(&self, stream_id: &str) -> Result<u64> {
        Ok(self
            .streams
            .read()
            .get(stream_id)
            .map(|stream| stream.len() as u64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(stream: &str, id: &str, ts: i64) -> PersistedEvent {
        PersistedEvent {
            id: id.to_string(),
            stream_id: stream.to_string(),
            event_type: "arbor.trust.action_success".to_string(),
            timestamp: ts,
            data: json!({"agent_id": "a"}),
            metadata: Map::new(),
        }
    }

    #[tokio::test]
    async fn test_kv_round_trip() {
        let store = MemoryKeyValueStore::new();
        store.put("profiles", "agent-001", json!({"score": 42})).await.unwrap();
        assert!(store.exists("profiles", "agent-001").await.unwrap());
        let value = store.get("profiles", "agent-001").await.unwrap().unwrap();
        assert_eq!(value["score"], 42);
        store.delete("profiles", "agent-001").await.unwrap();
        assert!(!store.exists("profiles", "agent-001").await.unwrap());
    }

    #[tokio::test]
    async fn test_kv_list_keys() {
        let store = MemoryKeyValueStore::new();
        store.put("profiles", "a", json!(1)).await.unwrap();
        store.put("profiles", "b", json!(2)).await.unwrap();
        let mut keys = store.list_keys("profiles").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);
        assert!(store.list_keys("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_log_append_and_version() {
        let log = MemoryEventLog::new();
        assert_eq!(log.version("trust:a").await.unwrap(), 0);
        log.append("trust:a", event("trust:a", "e1", 1)).await.unwrap();
        let version = log.append("trust:a", event("trust:a", "e2", 2)).await.unwrap();
        assert_eq!(version, 2);
        assert_eq!(log.read_stream("trust:a").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_log_rejects_duplicate_id() {
        let log = MemoryEventLog::new();
        log.append("trust:a", event("trust:a", "e1", 1)).await.unwrap();
        let err = log.append("trust:a", event("trust:a", "e1", 9)).await;
        assert!(matches!(err, Err(ArborError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_read_all_global_order() {
        let log = MemoryEventLog::new();
        log.append("trust:b", event("trust:b", "e2", 5)).await.unwrap();
        log.append("trust:a", event("trust:a", "e1", 3)).await.unwrap();
        log.append("trust:a", event("trust:a", "e3", 5)).await.unwrap();
        let all = log.read_all().await.unwrap();
        let ids: Vec<&str> = all.iter().map(|e| e.id.as_str()).collect();
        // Timestamp order, ties broken by id
        assert_eq!(ids, vec!["e1", "e2", "e3"]);
    }
}
