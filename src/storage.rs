//! In-memory record store with a single-writer task in front of it.
//!
//! Interception callbacks run on the engine's event path and must not
//! block, so they never touch the store directly. They hand records to
//! a channel; one spawned task owns the store and applies writes in
//! arrival order. Reads go through the same task, which makes every
//! query a consistent snapshot.

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};

use crate::error::CollectError;
use crate::metrics::METRICS;
use crate::schema::{RecordKind, KEY_FIELD};

const TABLE_KINDS: &[RecordKind] = &[
    RecordKind::Event,
    RecordKind::Team,
    RecordKind::League,
    RecordKind::Incident,
];

/// Keyed tables of normalized records, one per `RecordKind`.
pub struct EventStore {
    tables: HashMap<RecordKind, HashMap<i64, Map<String, Value>>>,
}

impl EventStore {
    pub fn new() -> Self {
        let mut tables = HashMap::new();
        for kind in TABLE_KINDS {
            tables.insert(*kind, HashMap::new());
        }
        Self { tables }
    }

    /// Insert or merge one record.
    ///
    /// GUARANTEES:
    /// - Projection: keys outside the kind's allowed-field set are
    ///   dropped, so callers may pass payloads with extra attributes.
    /// - Merge: fields absent from `record` keep their stored value;
    ///   fields present overwrite it.
    /// - Idempotence: re-applying an identical record changes nothing.
    ///
    /// Fails only when the record is not an object or has no usable
    /// key field.
    pub fn upsert(&mut self, kind: RecordKind, record: &Value) -> Result<(), CollectError> {
        let fields = record.as_object().ok_or_else(|| {
            CollectError::MalformedPayload(format!("{} record is not an object", kind.name()))
        })?;
        let id = fields.get(KEY_FIELD).and_then(Value::as_i64).ok_or_else(|| {
            CollectError::MalformedPayload(format!(
                "{} record has no numeric '{}'",
                kind.name(),
                KEY_FIELD
            ))
        })?;

        let allowed = kind.allowed_fields();
        let row = self
            .tables
            .get_mut(&kind)
            .map(|t| t.entry(id).or_default())
            .ok_or_else(|| CollectError::MalformedPayload("unknown record kind".into()))?;

        for (key, value) in fields {
            if value.is_null() || !allowed.contains(&key.as_str()) {
                continue;
            }
            row.insert(key.clone(), value.clone());
        }

        METRICS.records_upserted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn get(&self, kind: RecordKind, id: i64) -> Option<&Map<String, Value>> {
        self.tables.get(&kind)?.get(&id)
    }

    pub fn count(&self, kind: RecordKind) -> usize {
        self.tables.get(&kind).map(HashMap::len).unwrap_or(0)
    }
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

enum StoreCommand {
    Upsert {
        kind: RecordKind,
        record: Value,
    },
    Get {
        kind: RecordKind,
        id: i64,
        reply: oneshot::Sender<Option<Map<String, Value>>>,
    },
    Count {
        kind: RecordKind,
        reply: oneshot::Sender<usize>,
    },
}

/// Cheaply cloneable front door to the store task.
///
/// `upsert` is fire-and-forget by design: the calling side is an
/// interception callback that must not wait on persistence.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::UnboundedSender<StoreCommand>,
}

impl StoreHandle {
    /// Spawn the writer task over a fresh store.
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut store = EventStore::new();
            while let Some(command) = rx.recv().await {
                match command {
                    StoreCommand::Upsert { kind, record } => {
                        if let Err(e) = store.upsert(kind, &record) {
                            METRICS.handler_errors.fetch_add(1, Ordering::Relaxed);
                            log::warn!("dropping {} record: {}", kind.name(), e);
                        }
                    }
                    StoreCommand::Get { kind, id, reply } => {
                        let _ = reply.send(store.get(kind, id).cloned());
                    }
                    StoreCommand::Count { kind, reply } => {
                        let _ = reply.send(store.count(kind));
                    }
                }
            }
            log::debug!("store task draining complete");
        });
        Self { tx }
    }

    pub fn upsert(&self, kind: RecordKind, record: Value) {
        let _ = self.tx.send(StoreCommand::Upsert { kind, record });
    }

    pub async fn get(&self, kind: RecordKind, id: i64) -> Option<Map<String, Value>> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(StoreCommand::Get { kind, id, reply }).ok()?;
        rx.await.ok().flatten()
    }

    pub async fn count(&self, kind: RecordKind) -> usize {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(StoreCommand::Count { kind, reply }).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn upsert_filters_unknown_fields() {
        let mut store = EventStore::new();
        store
            .upsert(
                RecordKind::Event,
                &json!({
                    "sofascore_id": 9001,
                    "sport": "football",
                    "home_score": 1,
                    "venue_capacity": 60000,
                    "broadcast": {"channel": "x"}
                }),
            )
            .unwrap();

        let row = store.get(RecordKind::Event, 9001).unwrap();
        assert_eq!(row.get("home_score"), Some(&json!(1)));
        assert!(!row.contains_key("venue_capacity"));
        assert!(!row.contains_key("broadcast"));
    }

    #[test]
    fn upsert_merges_partial_updates() {
        let mut store = EventStore::new();
        store
            .upsert(
                RecordKind::Event,
                &json!({"sofascore_id": 9001, "sport": "football", "home_team": "Arsenal", "home_score": 0}),
            )
            .unwrap();
        // Score update carries only the fields that changed.
        store
            .upsert(
                RecordKind::Event,
                &json!({"sofascore_id": 9001, "home_score": 1, "status_type": "inprogress"}),
            )
            .unwrap();

        let row = store.get(RecordKind::Event, 9001).unwrap();
        assert_eq!(row.get("home_team"), Some(&json!("Arsenal")));
        assert_eq!(row.get("home_score"), Some(&json!(1)));
        assert_eq!(row.get("status_type"), Some(&json!("inprogress")));
        assert_eq!(store.count(RecordKind::Event), 1);
    }

    #[test]
    fn upsert_is_idempotent() {
        let mut store = EventStore::new();
        let record = json!({"sofascore_id": 42, "name": "Arsenal", "slug": "arsenal"});
        store.upsert(RecordKind::Team, &record).unwrap();
        let before = store.get(RecordKind::Team, 42).unwrap().clone();

        store.upsert(RecordKind::Team, &record).unwrap();
        assert_eq!(store.get(RecordKind::Team, 42), Some(&before));
        assert_eq!(store.count(RecordKind::Team), 1);
    }

    #[test]
    fn upsert_rejects_keyless_records() {
        let mut store = EventStore::new();
        let err = store
            .upsert(RecordKind::Event, &json!({"sport": "football"}))
            .unwrap_err();
        assert!(matches!(err, CollectError::MalformedPayload(_)));

        let err = store.upsert(RecordKind::Event, &json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, CollectError::MalformedPayload(_)));
    }

    #[test]
    fn null_values_do_not_erase_stored_fields() {
        let mut store = EventStore::new();
        store
            .upsert(
                RecordKind::Event,
                &json!({"sofascore_id": 1, "sport": "football", "status": "1st half"}),
            )
            .unwrap();
        store
            .upsert(RecordKind::Event, &json!({"sofascore_id": 1, "status": null}))
            .unwrap();

        let row = store.get(RecordKind::Event, 1).unwrap();
        assert_eq!(row.get("status"), Some(&json!("1st half")));
    }

    #[tokio::test]
    async fn store_task_serializes_writes() {
        let handle = StoreHandle::spawn();
        handle.upsert(
            RecordKind::Event,
            json!({"sofascore_id": 7, "sport": "tennis", "home_score": 0}),
        );
        handle.upsert(RecordKind::Event, json!({"sofascore_id": 7, "home_score": 1}));

        let row = handle.get(RecordKind::Event, 7).await.unwrap();
        assert_eq!(row.get("home_score"), Some(&json!(1)));
        assert_eq!(handle.count(RecordKind::Event).await, 1);
        assert_eq!(handle.count(RecordKind::Team).await, 0);
    }
}
