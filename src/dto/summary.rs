use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::models::{
        EncounterSummaryEntity, LogLineEntity, OutcomeEntity, RewardEntity, RoundSummaryEntity,
        SummaryListItemEntity,
    },
    dto::{encounter::DamageSnapshot, format_system_time},
    state::session::RoundOutcome,
};

/// Entry of the archived encounters listing.
#[derive(Debug, Serialize, ToSchema)]
pub struct SummaryListItem {
    pub id: Uuid,
    pub name: String,
    pub defeated: bool,
    pub ended_at: String,
}

impl From<SummaryListItemEntity> for SummaryListItem {
    fn from(item: SummaryListItemEntity) -> Self {
        Self {
            id: item.id,
            name: item.name,
            defeated: item.defeated,
            ended_at: format_system_time(item.ended_at),
        }
    }
}

/// How one participant fared in an archived round.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoundAnswerResponse {
    pub participant_id: Uuid,
    pub choice: Option<usize>,
    pub outcome: RoundOutcome,
}

/// Archived round: question, damage and per-participant outcomes.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoundSummaryResponse {
    pub round_index: u32,
    pub prompt: String,
    pub choices: Vec<String>,
    pub correct_choice: usize,
    pub skipped: bool,
    pub damage: DamageSnapshot,
    pub answers: Vec<RoundAnswerResponse>,
}

impl From<RoundSummaryEntity> for RoundSummaryResponse {
    fn from(round: RoundSummaryEntity) -> Self {
        Self {
            round_index: round.round_index,
            prompt: round.prompt,
            choices: round.choices,
            correct_choice: round.correct_choice,
            skipped: round.skipped,
            damage: round.damage.into(),
            answers: round
                .answers
                .into_iter()
                .map(|answer| RoundAnswerResponse {
                    participant_id: answer.participant_id,
                    choice: answer.choice,
                    outcome: match answer.outcome {
                        OutcomeEntity::Correct => RoundOutcome::Correct,
                        OutcomeEntity::Incorrect => RoundOutcome::Incorrect,
                        OutcomeEntity::Missing => RoundOutcome::Missing,
                        OutcomeEntity::Excluded => RoundOutcome::Excluded,
                    },
                })
                .collect(),
        }
    }
}

/// Rewards granted to a participant at finalize.
#[derive(Debug, Serialize, ToSchema)]
pub struct RewardResponse {
    pub participant_id: Uuid,
    pub display_name: String,
    pub xp: u32,
    pub gold: u32,
    pub correct_answers: u32,
    pub rounds_participated: u32,
}

impl From<RewardEntity> for RewardResponse {
    fn from(reward: RewardEntity) -> Self {
        Self {
            participant_id: reward.participant_id,
            display_name: reward.display_name,
            xp: reward.xp,
            gold: reward.gold,
            correct_answers: reward.correct_answers,
            rounds_participated: reward.rounds_participated,
        }
    }
}

/// Battle log line.
#[derive(Debug, Serialize, ToSchema)]
pub struct LogLineResponse {
    pub seq: u64,
    pub round_index: u32,
    pub actor_id: Option<Uuid>,
    pub text: String,
    pub at: String,
}

impl From<LogLineEntity> for LogLineResponse {
    fn from(line: LogLineEntity) -> Self {
        Self {
            seq: line.seq,
            round_index: line.round_index,
            actor_id: line.actor_id,
            text: line.text,
            at: format_system_time(line.at),
        }
    }
}

/// Archived record of a finished encounter.
#[derive(Debug, Serialize, ToSchema)]
pub struct EncounterSummaryResponse {
    pub id: Uuid,
    pub name: String,
    pub host_id: Uuid,
    pub boss_name: String,
    pub boss_max_hp: u32,
    pub defeated: bool,
    pub created_at: String,
    pub ended_at: String,
    pub final_damage: DamageSnapshot,
    pub rounds: Vec<RoundSummaryResponse>,
    pub rewards: Vec<RewardResponse>,
    pub log: Vec<LogLineResponse>,
}

impl From<EncounterSummaryEntity> for EncounterSummaryResponse {
    fn from(summary: EncounterSummaryEntity) -> Self {
        Self {
            id: summary.id,
            name: summary.name,
            host_id: summary.host_id,
            boss_name: summary.boss_name,
            boss_max_hp: summary.boss_max_hp,
            defeated: summary.defeated,
            created_at: format_system_time(summary.created_at),
            ended_at: format_system_time(summary.ended_at),
            final_damage: summary.final_damage.into(),
            rounds: summary
                .rounds
                .into_iter()
                .map(RoundSummaryResponse::from)
                .collect(),
            rewards: summary
                .rewards
                .into_iter()
                .map(RewardResponse::from)
                .collect(),
            log: summary.log.into_iter().map(LogLineResponse::from).collect(),
        }
    }
}
