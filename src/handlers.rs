//! Bridges interception to persistence.
//!
//! The dispatcher and stream interceptor deal in closures; this module
//! manufactures those closures. Each one parses its payload with the
//! pure functions in [`crate::parsers`] and hands the resulting
//! records to the store task. Handlers never block and never fail the
//! interception path: a payload that yields nothing is logged and
//! dropped.

use std::sync::Arc;

use serde_json::Value;

use crate::dispatch::PatternHandler;
use crate::intercept::FrameHandler;
use crate::parsers;
use crate::schema::RecordKind;
use crate::storage::StoreHandle;

/// Factory for interception handlers bound to one store.
#[derive(Clone)]
pub struct DataHandler {
    store: StoreHandle,
}

impl DataHandler {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    /// Handler for event-summary responses (scheduled, live,
    /// featured, inverse).
    ///
    /// When `expected_sport` is set, payloads whose URL matched a
    /// different sport are skipped. Collectors are per-sport; the
    /// shared dispatcher may still fan a match out to them all.
    pub fn event_batch_handler(&self, expected_sport: Option<String>) -> PatternHandler {
        let store = self.store.clone();
        Arc::new(move |event| {
            let sport = event.groups.first().map(String::as_str).filter(|s| !s.is_empty());
            if let (Some(expected), Some(actual)) = (expected_sport.as_deref(), sport) {
                if expected != actual {
                    log::debug!(
                        "skipping '{}' payload for foreign sport '{}'",
                        event.pattern,
                        actual
                    );
                    return;
                }
            }

            let batch = parsers::parse_event_summaries(&event.body, sport);
            if batch.skipped > 0 {
                log::warn!(
                    "'{}' payload had {} entries without an id",
                    event.pattern,
                    batch.skipped
                );
            }
            log::debug!(
                "'{}' payload yielded {} events, {} teams, {} leagues",
                event.pattern,
                batch.events.len(),
                batch.teams.len(),
                batch.leagues.len()
            );

            for team in batch.teams {
                upsert(&store, RecordKind::Team, &team);
            }
            for league in batch.leagues {
                upsert(&store, RecordKind::League, &league);
            }
            for record in batch.events {
                upsert(&store, RecordKind::Event, &record);
            }
        })
    }

    /// Handler for score-change frames. Applies the update as a
    /// partial event record, relying on the store's merge semantics.
    pub fn score_handler(&self) -> FrameHandler {
        let store = self.store.clone();
        Arc::new(move |frame: &Value| {
            let Some(update) = parsers::parse_score_update(frame) else {
                log::debug!("score frame without an event id dropped");
                return;
            };
            let partial = serde_json::json!({
                "sofascore_id": update.event_id,
                "home_score": update.home_score,
                "away_score": update.away_score,
                "status_type": update.status_type,
            });
            store.upsert(RecordKind::Event, partial);
        })
    }

    /// Handler for incident frames.
    pub fn incident_handler(&self) -> FrameHandler {
        let store = self.store.clone();
        Arc::new(move |frame: &Value| {
            let Some(incident) = parsers::parse_incident(frame) else {
                log::debug!("incident frame without stable ids dropped");
                return;
            };
            upsert(&store, RecordKind::Incident, &incident);
        })
    }
}

fn upsert<T: serde::Serialize>(store: &StoreHandle, kind: RecordKind, record: &T) {
    match serde_json::to_value(record) {
        Ok(value) => store.upsert(kind, value),
        Err(e) => {
            // Serializing our own schema types cannot realistically
            // fail; log rather than unwind the interception path.
            log::error!("failed to serialize {} record: {}", kind.name(), e);
        }
    }
}
