use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::{
    dao::document_store::{Change, Document, keys},
    dto::{
        encounter::{LogEntrySnapshot, ResourceSnapshot, SessionSnapshot},
        sse::{EncounterClosedEvent, ServerEvent},
    },
    state::session::{BattleLogEntry, ResourceRecord, SessionRecord},
};

const EVENT_SESSION: &str = "session";
const EVENT_RESOURCE: &str = "resource";
const EVENT_LOG: &str = "log";
const EVENT_CLOSED: &str = "closed";

/// Session Record snapshot event.
pub fn session_event(session: &SessionRecord) -> Option<ServerEvent> {
    json_event(EVENT_SESSION, &SessionSnapshot::from(session))
}

/// Resource record event.
pub fn resource_event(record: &ResourceRecord) -> Option<ServerEvent> {
    json_event(EVENT_RESOURCE, &ResourceSnapshot::from(record))
}

/// Battle log append event.
pub fn log_event(entry: &BattleLogEntry) -> Option<ServerEvent> {
    json_event(EVENT_LOG, &LogEntrySnapshot::from(entry))
}

/// Map a committed change to the event pushed to the encounter's subscribers.
/// Answers and ability requests stay private and produce nothing.
pub fn change_event(encounter_id: Uuid, change: &Change) -> Option<ServerEvent> {
    match &change.document {
        Some(Document::Session(session)) => session_event(session),
        Some(Document::Resource(record)) => resource_event(record),
        Some(Document::LogEntry(entry)) => log_event(entry),
        None if is_session_key(encounter_id, &change.key) => {
            json_event(EVENT_CLOSED, &EncounterClosedEvent { encounter_id })
        }
        _ => None,
    }
}

/// Whether `change` deletes the Session Record itself.
pub fn is_teardown(encounter_id: Uuid, change: &Change) -> bool {
    change.document.is_none() && is_session_key(encounter_id, &change.key)
}

fn is_session_key(encounter_id: Uuid, key: &str) -> bool {
    key == keys::session(encounter_id)
}

fn json_event<T: Serialize>(name: &str, payload: &T) -> Option<ServerEvent> {
    match ServerEvent::json(Some(name.to_string()), payload) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(event = name, error = %err, "failed to serialize SSE payload");
            None
        }
    }
}
