//! Transaction helpers shared by the services mutating an encounter.

use std::{collections::BTreeMap, time::SystemTime};

use uuid::Uuid;

use crate::{
    dao::document_store::{Transaction, keys},
    error::ServiceError,
    state::session::{BattleLogEntry, ResourceRecord, SessionRecord},
};

/// Read the Session Record, failing when the encounter does not exist.
pub(crate) fn load_session(
    tx: &mut Transaction<'_>,
    encounter_id: Uuid,
) -> Result<SessionRecord, ServiceError> {
    tx.get::<SessionRecord>(&keys::session(encounter_id))?
        .ok_or_else(|| not_found(encounter_id))
}

/// Read every resource record of the encounter, keyed by participant.
pub(crate) fn load_resources(
    tx: &mut Transaction<'_>,
    encounter_id: Uuid,
) -> Result<BTreeMap<Uuid, ResourceRecord>, ServiceError> {
    Ok(tx
        .list::<ResourceRecord>(&keys::resources(encounter_id))?
        .into_iter()
        .map(|(_, record)| (record.participant_id, record))
        .collect())
}

/// Buffer a resource record write.
pub(crate) fn save_resource(tx: &mut Transaction<'_>, encounter_id: Uuid, record: ResourceRecord) {
    tx.set(keys::resource(encounter_id, record.participant_id), record);
}

/// Buffer the Session Record write, stamping `updated_at`.
pub(crate) fn save_session(tx: &mut Transaction<'_>, mut session: SessionRecord, now: SystemTime) {
    session.updated_at = now;
    tx.set(keys::session(session.id), session);
}

/// Append a line to the battle log. The sequence number comes from the record
/// read in this transaction, so concurrent appends conflict instead of
/// overwriting each other.
pub(crate) fn append_log(
    tx: &mut Transaction<'_>,
    session: &mut SessionRecord,
    actor_id: Option<Uuid>,
    text: impl Into<String>,
    now: SystemTime,
) {
    let seq = session.log_length;
    tx.set(
        keys::log_entry(session.id, seq),
        BattleLogEntry {
            seq,
            round_index: session.round_index,
            actor_id,
            text: text.into(),
            at: now,
        },
    );
    session.log_length += 1;
}

/// Reject callers other than the encounter host.
pub(crate) fn require_host(session: &SessionRecord, caller: Uuid) -> Result<(), ServiceError> {
    if session.host_id != caller {
        return Err(ServiceError::Unauthorized(
            "only the host can drive the encounter".into(),
        ));
    }
    Ok(())
}

/// Reject callers that did not join the encounter.
pub(crate) fn require_participant(
    session: &SessionRecord,
    caller: Uuid,
) -> Result<(), ServiceError> {
    if !session.is_participant(&caller) {
        return Err(ServiceError::Unauthorized(format!(
            "participant `{caller}` is not registered in this encounter"
        )));
    }
    Ok(())
}

pub(crate) fn not_found(encounter_id: Uuid) -> ServiceError {
    ServiceError::NotFound(format!("encounter `{encounter_id}` not found"))
}

/// Prefix of every advisory timer belonging to an encounter.
pub(crate) fn timer_prefix(encounter_id: Uuid) -> String {
    format!("encounter:{encounter_id}:")
}
