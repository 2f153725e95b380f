//! Aggregation and rewards for ended encounters. Every step is idempotent so a
//! failed archive can simply be retried.

use std::{collections::BTreeMap, time::SystemTime};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        document_store::keys,
        models::{
            DamageEntity, EncounterSummaryEntity, LogLineEntity, OutcomeEntity, RewardCredit,
            RewardEntity, RoundAnswerEntity, RoundSummaryEntity,
        },
    },
    error::ServiceError,
    services::records::{load_session, not_found, save_session},
    state::{
        SharedState,
        rewards::{Reward, compute_rewards},
        session::{
            ArchiveState, BattleLogEntry, DamageTally, RoundOutcome, RoundRecord, SessionRecord,
        },
        state_machine::EncounterStatus,
    },
};

/// Credit rewards, write the encounter summary and mark the record archived.
pub async fn archive(state: &SharedState, encounter_id: Uuid) -> Result<(), ServiceError> {
    let session = state
        .documents()
        .get::<SessionRecord>(&keys::session(encounter_id))?
        .ok_or_else(|| not_found(encounter_id))?;
    if session.status != EncounterStatus::Ended {
        return Err(ServiceError::InvalidState(
            "only ended encounters can be archived".into(),
        ));
    }
    if session.archive == Some(ArchiveState::Archived) {
        return Ok(());
    }

    let Some(store) = state.archive_store().await else {
        warn!(%encounter_id, "archive unavailable (degraded mode); encounter stays pending");
        return Err(ServiceError::Degraded);
    };

    let rewards = compute_rewards(&session, state.config().rewards);
    for (participant_id, reward) in &rewards {
        let display_name = session
            .participants
            .get(participant_id)
            .cloned()
            .unwrap_or_default();
        let credit = RewardCredit {
            participant_id: *participant_id,
            display_name,
            encounter_id,
            xp: reward.xp,
            gold: reward.gold,
        };
        if !store.credit_reward(credit).await? {
            debug!(%encounter_id, %participant_id, "reward already credited");
        }
    }

    let log = state
        .documents()
        .list::<BattleLogEntry>(&keys::log(encounter_id))?;
    let ended_at = session.ended_at.unwrap_or(session.updated_at);
    let summary = build_summary(&session, &rewards, log, ended_at);
    store.save_summary(summary).await?;

    let now = state.now();
    state
        .documents()
        .run_transaction(|tx| -> Result<_, ServiceError> {
            let mut session = load_session(tx, encounter_id)?;
            if session.archive != Some(ArchiveState::Archived) {
                session.archive = Some(ArchiveState::Archived);
                save_session(tx, session, now);
            }
            Ok(())
        })
        .await?;

    info!(
        %encounter_id,
        participants = rewards.len(),
        "encounter archived"
    );
    Ok(())
}

fn build_summary(
    session: &SessionRecord,
    rewards: &BTreeMap<Uuid, Reward>,
    log: Vec<BattleLogEntry>,
    ended_at: SystemTime,
) -> EncounterSummaryEntity {
    EncounterSummaryEntity {
        id: session.id,
        name: session.name.clone(),
        host_id: session.host_id,
        boss_name: session.boss.name.clone(),
        boss_max_hp: session.boss.max_hp,
        defeated: session.boss_hp_remaining() == 0,
        created_at: session.created_at,
        ended_at,
        rounds: session.round_history.iter().map(round_summary).collect(),
        log: log
            .into_iter()
            .map(|entry| LogLineEntity {
                seq: entry.seq,
                round_index: entry.round_index,
                actor_id: entry.actor_id,
                text: entry.text,
                at: entry.at,
            })
            .collect(),
        rewards: rewards
            .iter()
            .map(|(participant_id, reward)| RewardEntity {
                participant_id: *participant_id,
                display_name: session
                    .participants
                    .get(participant_id)
                    .cloned()
                    .unwrap_or_default(),
                xp: reward.xp,
                gold: reward.gold,
                correct_answers: reward.correct_answers,
                rounds_participated: reward.rounds_participated,
            })
            .collect(),
        final_damage: damage_entity(session.total_damage),
    }
}

fn round_summary(record: &RoundRecord) -> RoundSummaryEntity {
    RoundSummaryEntity {
        round_index: record.round_index,
        prompt: record.prompt.clone(),
        choices: record.choices.clone(),
        correct_choice: record.correct_choice,
        skipped: record.skipped,
        damage: damage_entity(record.damage),
        answers: record
            .outcomes
            .iter()
            .map(|(participant_id, outcome)| RoundAnswerEntity {
                participant_id: *participant_id,
                choice: record.answers.get(participant_id).copied(),
                outcome: match outcome {
                    RoundOutcome::Correct => OutcomeEntity::Correct,
                    RoundOutcome::Incorrect => OutcomeEntity::Incorrect,
                    RoundOutcome::Missing => OutcomeEntity::Missing,
                    RoundOutcome::Excluded => OutcomeEntity::Excluded,
                },
            })
            .collect(),
    }
}

fn damage_entity(tally: DamageTally) -> DamageEntity {
    DamageEntity {
        base: tally.base,
        from_abilities: tally.from_abilities,
        total: tally.total,
    }
}
