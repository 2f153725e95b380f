//! Round lifecycle: every transition re-reads the Session Record inside its own
//! transaction and turns into a no-op when a concurrent actor got there first.

use std::{collections::BTreeMap, time::SystemTime};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::document_store::{Transaction, keys},
    error::ServiceError,
    services::{
        finalize_service,
        notice_service::{self, PostedNotice, post_broadcast},
        records::{
            append_log, load_resources, load_session, require_host, save_resource, save_session,
            timer_prefix,
        },
    },
    state::{
        SharedState,
        damage::{ResolutionMode, resolve_round},
        session::{AnswerSubmission, ArchiveState, SessionRecord},
        state_machine::{EncounterStatus, LifecycleEvent, Plan, PlanError, plan},
    },
};

/// Result of a lifecycle request.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    /// False when the transition had already been performed by someone else.
    pub applied: bool,
    /// Session Record after the request.
    pub session: SessionRecord,
}

enum Step {
    Applied(SessionRecord, Vec<PostedNotice>),
    Stale(SessionRecord),
}

/// Validate `event` against the record. `Ok(None)` means the record already
/// moved past the requested transition.
fn check(
    session: &SessionRecord,
    event: LifecycleEvent,
    expected_round: u32,
) -> Result<Option<Plan>, ServiceError> {
    match plan(session.status, session.round_index, event, expected_round) {
        Ok(plan) => Ok(Some(plan)),
        Err(PlanError::Stale {
            status,
            round_index,
        }) => {
            debug!(
                encounter_id = %session.id,
                ?event,
                ?status,
                round_index,
                "stale lifecycle transition ignored"
            );
            Ok(None)
        }
        Err(PlanError::InvalidTransition(err)) => Err(err.into()),
    }
}

fn finish(state: &SharedState, encounter_id: Uuid, step: Step) -> TransitionOutcome {
    match step {
        Step::Applied(session, notices) => {
            notice_service::schedule_clears(state, encounter_id, &notices);
            info!(
                %encounter_id,
                status = ?session.status,
                round_index = session.round_index,
                "encounter transitioned"
            );
            TransitionOutcome {
                applied: true,
                session,
            }
        }
        Step::Stale(session) => TransitionOutcome {
            applied: false,
            session,
        },
    }
}

/// Start round 0.
pub async fn start(
    state: &SharedState,
    encounter_id: Uuid,
    caller: Uuid,
) -> Result<TransitionOutcome, ServiceError> {
    let now = state.now();
    let step = state
        .documents()
        .run_transaction(|tx| -> Result<_, ServiceError> {
            let mut session = load_session(tx, encounter_id)?;
            require_host(&session, caller)?;
            let Some(plan) = check(&session, LifecycleEvent::Start, 0)? else {
                return Ok(Step::Stale(session));
            };
            if session.participants.is_empty() {
                return Err(ServiceError::InvalidState(
                    "nobody joined the encounter yet".into(),
                ));
            }

            session.reset_for_start();
            session.status = plan.to;
            session.round_index = plan.round_index;
            let text = format!("The battle against {} begins", session.boss.name);
            append_log(tx, &mut session, Some(caller), text, now);
            let notice = post_broadcast(state, &mut session, "Round 1 begins!", now);
            save_session(tx, session.clone(), now);
            Ok(Step::Applied(session, vec![notice]))
        })
        .await?;
    Ok(finish(state, encounter_id, step))
}

/// Close the current round early and open the grace window.
pub async fn end_round(
    state: &SharedState,
    encounter_id: Uuid,
    caller: Uuid,
    expected_round: Option<u32>,
) -> Result<TransitionOutcome, ServiceError> {
    let now = state.now();
    let grace = state.config().round_grace;
    let step = state
        .documents()
        .run_transaction(|tx| -> Result<_, ServiceError> {
            let mut session = load_session(tx, encounter_id)?;
            require_host(&session, caller)?;
            let expected = expected_round.unwrap_or(session.round_index);
            let Some(plan) = check(&session, LifecycleEvent::EndRound, expected)? else {
                return Ok(Step::Stale(session));
            };

            session.status = plan.to;
            session.round_deadline = Some(now + grace);
            let text = format!("Round {} is ending", session.round_index + 1);
            append_log(tx, &mut session, Some(caller), text, now);
            let notice = post_broadcast(
                state,
                &mut session,
                format!("Last call! {} seconds left", grace.as_secs()),
                now,
            );
            save_session(tx, session.clone(), now);
            Ok(Step::Applied(session, vec![notice]))
        })
        .await?;

    if let Step::Applied(session, _) = &step {
        schedule_round_timer(state, encounter_id, session.round_index);
    }
    Ok(finish(state, encounter_id, step))
}

/// Server-side copy of the round timer every client runs.
fn schedule_round_timer(state: &SharedState, encounter_id: Uuid, round_index: u32) {
    let key = format!("{}round:{round_index}", timer_prefix(encounter_id));
    let task_state = state.clone();
    state.schedule_timer(key, state.config().round_grace, async move {
        match expire_round(&task_state, encounter_id, round_index).await {
            Ok(outcome) if outcome.applied => {
                debug!(%encounter_id, round_index, "round resolved by server timer")
            }
            Ok(_) => debug!(%encounter_id, round_index, "round already resolved"),
            Err(err) => warn!(%encounter_id, round_index, error = %err, "round timer failed"),
        }
    });
}

/// Round timer fired: resolve the round once its deadline passed.
pub async fn expire_round(
    state: &SharedState,
    encounter_id: Uuid,
    round_index: u32,
) -> Result<TransitionOutcome, ServiceError> {
    let now = state.now();
    let step = state
        .documents()
        .run_transaction(|tx| -> Result<_, ServiceError> {
            let mut session = load_session(tx, encounter_id)?;
            let Some(plan) = check(&session, LifecycleEvent::ExpireRound, round_index)? else {
                return Ok(Step::Stale(session));
            };
            if session.round_deadline.is_some_and(|deadline| now < deadline) {
                return Err(ServiceError::InvalidState(
                    "round deadline not reached yet".into(),
                ));
            }

            resolve_round_in_tx(state, tx, &mut session, ResolutionMode::Played, now)?;
            session.status = plan.to;
            let text = format!(
                "Round {} results: {} damage",
                session.round_index + 1,
                session.round_damage.total
            );
            let notice = post_broadcast(state, &mut session, text, now);
            save_session(tx, session.clone(), now);
            Ok(Step::Applied(session, vec![notice]))
        })
        .await?;
    Ok(finish(state, encounter_id, step))
}

/// Run the round damage resolver against the data read by `tx` and fold the
/// result into `session`. The caller performs the status change in the same
/// transaction.
pub(crate) fn resolve_round_in_tx(
    state: &SharedState,
    tx: &mut Transaction<'_>,
    session: &mut SessionRecord,
    mode: ResolutionMode,
    now: SystemTime,
) -> Result<(), ServiceError> {
    let encounter_id = session.id;
    let round_index = session.round_index;
    let answers: BTreeMap<Uuid, usize> = tx
        .list::<AnswerSubmission>(&keys::answers(encounter_id, round_index))?
        .into_iter()
        .filter(|(_, answer)| answer.round_index == round_index)
        .map(|(_, answer)| (answer.participant_id, answer.choice))
        .collect();
    let resources = load_resources(tx, encounter_id)?;

    let was_standing = session.boss_hp_remaining() > 0;
    let resolution = resolve_round(
        session,
        &answers,
        &resources,
        state.config().round_damage_penalty,
        mode,
    );
    for record in resolution.resource_updates.iter().cloned() {
        save_resource(tx, encounter_id, record);
    }
    for line in &resolution.log {
        append_log(tx, session, None, line.clone(), now);
    }
    resolution.apply(session);
    if was_standing && session.boss_hp_remaining() == 0 {
        let text = format!("{} has been defeated!", session.boss.name);
        append_log(tx, session, None, text, now);
    }

    info!(
        %encounter_id,
        round_index,
        ?mode,
        damage = resolution.damage.total,
        fallen = resolution.newly_fallen.len(),
        "round resolved"
    );
    Ok(())
}

/// Move on to the next question.
pub async fn advance(
    state: &SharedState,
    encounter_id: Uuid,
    caller: Uuid,
    expected_round: Option<u32>,
) -> Result<TransitionOutcome, ServiceError> {
    let now = state.now();
    let step = state
        .documents()
        .run_transaction(|tx| -> Result<_, ServiceError> {
            let mut session = load_session(tx, encounter_id)?;
            require_host(&session, caller)?;
            let expected = expected_round.unwrap_or(session.round_index);
            let Some(plan) = check(&session, LifecycleEvent::Advance, expected)? else {
                return Ok(Step::Stale(session));
            };
            if plan.round_index as usize >= session.questions.len() {
                return Err(ServiceError::InvalidState(
                    "no question left, finalize the encounter instead".into(),
                ));
            }

            for key in tx.keys(&keys::answers(encounter_id, session.round_index)) {
                tx.delete(key);
            }
            for key in tx.keys(&keys::requests(encounter_id)) {
                tx.delete(key);
            }
            session.clear_round_state();
            session.status = plan.to;
            session.round_index = plan.round_index;
            let text = format!("Round {} begins", session.round_index + 1);
            append_log(tx, &mut session, Some(caller), text.clone(), now);
            let notice = post_broadcast(state, &mut session, text, now);
            save_session(tx, session.clone(), now);
            Ok(Step::Applied(session, vec![notice]))
        })
        .await?;
    Ok(finish(state, encounter_id, step))
}

/// End the encounter and archive it. A round still inside its grace window is
/// resolved first; an unfinished round is dropped. Calling it again on an
/// ended encounter whose archive write failed retries the write.
pub async fn finalize(
    state: &SharedState,
    encounter_id: Uuid,
    caller: Uuid,
) -> Result<TransitionOutcome, ServiceError> {
    let now = state.now();
    let step = state
        .documents()
        .run_transaction(|tx| -> Result<_, ServiceError> {
            let mut session = load_session(tx, encounter_id)?;
            require_host(&session, caller)?;
            let Some(plan) = check(&session, LifecycleEvent::Finalize, session.round_index)?
            else {
                return Ok(Step::Stale(session));
            };

            match session.status {
                EncounterStatus::RoundEnding => {
                    resolve_round_in_tx(state, tx, &mut session, ResolutionMode::Played, now)?;
                }
                EncounterStatus::InProgress => {
                    let text = format!("Round {} was abandoned", session.round_index + 1);
                    append_log(tx, &mut session, Some(caller), text, now);
                }
                _ => {}
            }
            session.round_deadline = None;
            session.vote_state = None;
            session.queued_ability_effects.clear();
            session.ability_users_this_round.clear();
            session.status = plan.to;
            session.archive = Some(ArchiveState::Pending);
            session.ended_at = Some(now);
            let text = if session.boss_hp_remaining() == 0 {
                format!("Victory! {} was defeated", session.boss.name)
            } else {
                format!("The encounter against {} has ended", session.boss.name)
            };
            append_log(tx, &mut session, Some(caller), text.clone(), now);
            let notice = post_broadcast(state, &mut session, text, now);
            save_session(tx, session.clone(), now);
            Ok(Step::Applied(session, vec![notice]))
        })
        .await?;

    let outcome = finish(state, encounter_id, step);
    let archive_pending = outcome.session.status == EncounterStatus::Ended
        && outcome.session.archive == Some(ArchiveState::Pending);
    if !archive_pending {
        return Ok(outcome);
    }

    finalize_service::archive(state, encounter_id).await?;
    let session = state
        .documents()
        .get::<SessionRecord>(&keys::session(encounter_id))?
        .unwrap_or(outcome.session);
    Ok(TransitionOutcome {
        applied: outcome.applied,
        session,
    })
}
