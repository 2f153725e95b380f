use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::document_store::keys,
    dto::encounter::{CreateEncounterRequest, JoinRequest, QuestionInput},
    error::ServiceError,
    services::records::{
        append_log, load_session, not_found, require_host, save_resource, save_session,
        timer_prefix,
    },
    state::{
        SharedState,
        session::{
            ArchiveState, BattleLogEntry, Boss, HostBinding, Question, ResourceRecord,
            SessionRecord,
        },
        state_machine::EncounterStatus,
    },
};

/// Create an encounter hosted by `host_id`. A host runs at most one encounter
/// at a time; a previous one must be archived first.
pub async fn create_encounter(
    state: &SharedState,
    host_id: Uuid,
    request: CreateEncounterRequest,
) -> Result<SessionRecord, ServiceError> {
    let CreateEncounterRequest {
        name,
        boss,
        questions,
    } = request;

    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(ServiceError::InvalidInput(
            "encounter name must not be empty".into(),
        ));
    }
    if questions.is_empty() {
        return Err(ServiceError::InvalidInput(
            "an encounter requires at least one question".into(),
        ));
    }
    let questions = build_questions(questions)?;
    let boss = Boss {
        name: boss.name.trim().to_string(),
        max_hp: boss.max_hp,
    };

    let encounter_id = Uuid::new_v4();
    let now = state.now();
    let session = state
        .documents()
        .run_transaction(|tx| -> Result<_, ServiceError> {
            let active = match tx.get::<HostBinding>(&keys::host(host_id))? {
                Some(binding) => tx
                    .get::<SessionRecord>(&keys::session(binding.encounter_id))?
                    .filter(|existing| existing.archive != Some(ArchiveState::Archived)),
                None => None,
            };
            if let Some(existing) = active {
                return Err(ServiceError::InvalidState(format!(
                    "host already runs encounter `{}`",
                    existing.id
                )));
            }

            let mut session = SessionRecord::new(
                encounter_id,
                name.clone(),
                host_id,
                boss.clone(),
                questions.clone(),
                now,
            );
            let text = format!("{} blocks the way", session.boss.name);
            append_log(tx, &mut session, Some(host_id), text, now);
            save_session(tx, session.clone(), now);
            tx.set(keys::host(host_id), HostBinding { encounter_id });
            Ok(session)
        })
        .await?;

    info!(%encounter_id, %host_id, rounds = session.questions.len(), "encounter created");
    Ok(session)
}

fn build_questions(questions: Vec<QuestionInput>) -> Result<Vec<Question>, ServiceError> {
    questions
        .into_iter()
        .enumerate()
        .map(|(index, question)| {
            if question.choices.len() < 2 {
                return Err(ServiceError::InvalidInput(format!(
                    "question {index} needs at least two choices"
                )));
            }
            if question.correct_choice >= question.choices.len() {
                return Err(ServiceError::InvalidInput(format!(
                    "question {index} points at a missing correct choice"
                )));
            }
            Ok(Question {
                prompt: question.prompt,
                choices: question.choices,
                correct_choice: question.correct_choice,
            })
        })
        .collect()
}

/// Register a participant while the encounter is waiting. Their resource record
/// is built from their profile, or from level 1 defaults when the archive is
/// unreachable. Joining twice returns the existing record.
pub async fn join_encounter(
    state: &SharedState,
    encounter_id: Uuid,
    participant_id: Uuid,
    request: JoinRequest,
) -> Result<ResourceRecord, ServiceError> {
    let profile = match state.archive_store().await {
        Some(store) => match store.find_profile(participant_id).await {
            Ok(profile) => profile,
            Err(err) => {
                warn!(%participant_id, error = %err, "profile lookup failed; using defaults");
                None
            }
        },
        None => {
            debug!(%participant_id, "degraded mode; using default profile");
            None
        }
    };

    let level = profile.as_ref().map_or(1, |profile| profile.level);
    let display_name = request
        .display_name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .or_else(|| profile.map(|profile| profile.display_name))
        .unwrap_or_else(|| format!("adventurer-{}", &participant_id.simple().to_string()[..6]));
    let (max_hp, max_mp) = state.config().resources.for_level(level);
    let now = state.now();

    let (record, joined) = state
        .documents()
        .run_transaction(|tx| -> Result<_, ServiceError> {
            let mut session = load_session(tx, encounter_id)?;
            if session.host_id == participant_id {
                return Err(ServiceError::InvalidState(
                    "the host cannot join as a participant".into(),
                ));
            }
            let resource_key = keys::resource(encounter_id, participant_id);
            if session.is_participant(&participant_id) {
                if let Some(existing) = tx.get::<ResourceRecord>(&resource_key)? {
                    return Ok((existing, false));
                }
            }
            if session.status != EncounterStatus::Waiting {
                return Err(ServiceError::InvalidState(
                    "the encounter already started".into(),
                ));
            }

            let record = ResourceRecord {
                participant_id,
                display_name: display_name.clone(),
                hp: max_hp,
                max_hp,
                mp: max_mp,
                max_mp,
                level,
            };
            session
                .participants
                .insert(participant_id, display_name.clone());
            let text = format!("{display_name} joined the party");
            append_log(tx, &mut session, Some(participant_id), text, now);
            save_resource(tx, encounter_id, record.clone());
            save_session(tx, session, now);
            Ok((record, true))
        })
        .await?;

    if joined {
        info!(%encounter_id, %participant_id, level, "participant joined");
    }
    Ok(record)
}

/// Current Session Record.
pub fn snapshot(state: &SharedState, encounter_id: Uuid) -> Result<SessionRecord, ServiceError> {
    state
        .documents()
        .get::<SessionRecord>(&keys::session(encounter_id))?
        .ok_or_else(|| not_found(encounter_id))
}

/// Resource records in join order.
pub fn participants(
    state: &SharedState,
    encounter_id: Uuid,
) -> Result<Vec<ResourceRecord>, ServiceError> {
    let session = snapshot(state, encounter_id)?;
    let mut records = state
        .documents()
        .list::<ResourceRecord>(&keys::resources(encounter_id))?;
    records.sort_by_key(|record| {
        session
            .participants
            .get_index_of(&record.participant_id)
            .unwrap_or(usize::MAX)
    });
    Ok(records)
}

/// Full battle log, oldest first.
pub fn battle_log(
    state: &SharedState,
    encounter_id: Uuid,
) -> Result<Vec<BattleLogEntry>, ServiceError> {
    snapshot(state, encounter_id)?;
    Ok(state
        .documents()
        .list::<BattleLogEntry>(&keys::log(encounter_id))?)
}

/// Delete every live document of an archived encounter.
pub async fn teardown(
    state: &SharedState,
    encounter_id: Uuid,
    caller: Uuid,
) -> Result<(), ServiceError> {
    state
        .documents()
        .run_transaction(|tx| -> Result<_, ServiceError> {
            let session = load_session(tx, encounter_id)?;
            require_host(&session, caller)?;
            if session.archive != Some(ArchiveState::Archived) {
                return Err(ServiceError::InvalidState(
                    "only archived encounters can be torn down".into(),
                ));
            }

            for key in tx.keys(&keys::encounter_children(encounter_id)) {
                tx.delete(key);
            }
            tx.delete(keys::session(encounter_id));
            let host_key = keys::host(session.host_id);
            if tx
                .get::<HostBinding>(&host_key)?
                .is_some_and(|binding| binding.encounter_id == encounter_id)
            {
                tx.delete(host_key);
            }
            Ok(())
        })
        .await?;

    state.cancel_timers(&timer_prefix(encounter_id));
    info!(%encounter_id, "encounter torn down");
    Ok(())
}
