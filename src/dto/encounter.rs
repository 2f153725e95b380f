use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    dao::models::DamageEntity,
    dto::{
        format_system_time,
        phase::VisibleStatus,
        validation::{validate_choices, validate_display_name},
    },
    state::{
        abilities::AbilityName,
        session::{
            BattleLogEntry, DamageTally, Notice, Question, ResourceRecord, RoundOutcome,
            RoundRecord, SessionRecord, TargetedNotice, VoteState,
        },
        state_machine::EncounterStatus,
    },
};

/// Payload used to open a new encounter. The caller becomes its host.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateEncounterRequest {
    #[validate(custom(function = "validate_display_name"))]
    pub name: String,
    #[validate(nested)]
    pub boss: BossInput,
    /// One question per round, played in order.
    #[validate(length(min = 1), nested)]
    pub questions: Vec<QuestionInput>,
}

/// Target the party fights.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct BossInput {
    #[validate(custom(function = "validate_display_name"))]
    pub name: String,
    #[validate(range(min = 1))]
    pub max_hp: u32,
}

/// Question asked during one round.
#[derive(Debug, Serialize, Deserialize, ToSchema, Validate)]
#[validate(schema(function = "validate_correct_choice"))]
pub struct QuestionInput {
    #[validate(length(min = 1))]
    pub prompt: String,
    #[validate(custom(function = "validate_choices"))]
    pub choices: Vec<String>,
    /// Index into `choices`.
    pub correct_choice: usize,
}

fn validate_correct_choice(question: &QuestionInput) -> Result<(), ValidationError> {
    if question.correct_choice >= question.choices.len() {
        let mut err = ValidationError::new("correct_choice_range");
        err.message = Some(
            format!(
                "correct_choice {} is out of range for {} choices",
                question.correct_choice,
                question.choices.len()
            )
            .into(),
        );
        return Err(err);
    }
    Ok(())
}

/// Payload sent when joining an encounter.
#[derive(Debug, Default, Deserialize, ToSchema, Validate)]
pub struct JoinRequest {
    /// Overrides the profile name for this encounter.
    #[serde(default)]
    #[validate(custom(function = "validate_display_name"))]
    pub display_name: Option<String>,
}

/// Damage split by origin.
#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
pub struct DamageSnapshot {
    pub base: u32,
    pub from_abilities: u32,
    pub total: u32,
}

impl From<DamageTally> for DamageSnapshot {
    fn from(value: DamageTally) -> Self {
        Self {
            base: value.base,
            from_abilities: value.from_abilities,
            total: value.total,
        }
    }
}

impl From<DamageEntity> for DamageSnapshot {
    fn from(value: DamageEntity) -> Self {
        Self {
            base: value.base,
            from_abilities: value.from_abilities,
            total: value.total,
        }
    }
}

/// Boss state as seen by clients.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BossSnapshot {
    pub name: String,
    pub max_hp: u32,
    pub hp_remaining: u32,
    pub defeated: bool,
}

/// Question of the current round. The correct choice stays hidden until the
/// round has been resolved.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QuestionSnapshot {
    pub prompt: String,
    pub choices: Vec<String>,
    pub correct_choice: Option<usize>,
}

impl QuestionSnapshot {
    fn new(question: &Question, reveal: bool) -> Self {
        Self {
            prompt: question.prompt.clone(),
            choices: question.choices.clone(),
            correct_choice: reveal.then_some(question.correct_choice),
        }
    }
}

/// Registered participant and its round flags.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ParticipantSnapshot {
    pub id: Uuid,
    pub display_name: String,
    pub fallen: bool,
    /// Abilities used during the current round.
    pub abilities_used: Vec<AbilityName>,
    pub buffed: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct NoticeSnapshot {
    pub id: Uuid,
    pub text: String,
    pub expires_at: String,
}

impl From<&Notice> for NoticeSnapshot {
    fn from(notice: &Notice) -> Self {
        Self {
            id: notice.id,
            text: notice.text.clone(),
            expires_at: format_system_time(notice.expires_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TargetedNoticeSnapshot {
    pub id: Uuid,
    pub target_id: Uuid,
    pub text: String,
    pub expires_at: String,
}

impl From<&TargetedNotice> for TargetedNoticeSnapshot {
    fn from(notice: &TargetedNotice) -> Self {
        Self {
            id: notice.id,
            target_id: notice.target_id,
            text: notice.text.clone(),
            expires_at: format_system_time(notice.expires_at),
        }
    }
}

/// Running skip-the-round vote.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct VoteSnapshot {
    pub id: Uuid,
    pub initiator_id: Uuid,
    pub round_index: u32,
    pub votes_for: Vec<Uuid>,
    pub votes_against: Vec<Uuid>,
    pub eligible_voter_ids: Vec<Uuid>,
    pub eligible_voter_count: u32,
    pub deadline: String,
}

impl From<&VoteState> for VoteSnapshot {
    fn from(vote: &VoteState) -> Self {
        Self {
            id: vote.id,
            initiator_id: vote.initiator_id,
            round_index: vote.round_index,
            votes_for: vote.votes_for.iter().copied().collect(),
            votes_against: vote.votes_against.iter().copied().collect(),
            eligible_voter_ids: vote.eligible_voter_ids.iter().copied().collect(),
            eligible_voter_count: vote.eligible_voter_count,
            deadline: format_system_time(vote.deadline),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ParticipantOutcome {
    pub participant_id: Uuid,
    pub choice: Option<usize>,
    pub outcome: RoundOutcome,
}

/// Resolved round.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RoundResultSnapshot {
    pub round_index: u32,
    pub correct_choice: usize,
    pub skipped: bool,
    pub damage: DamageSnapshot,
    pub outcomes: Vec<ParticipantOutcome>,
}

impl From<&RoundRecord> for RoundResultSnapshot {
    fn from(record: &RoundRecord) -> Self {
        Self {
            round_index: record.round_index,
            correct_choice: record.correct_choice,
            skipped: record.skipped,
            damage: record.damage.into(),
            outcomes: record
                .outcomes
                .iter()
                .map(|(participant_id, outcome)| ParticipantOutcome {
                    participant_id: *participant_id,
                    choice: record.answers.get(participant_id).copied(),
                    outcome: *outcome,
                })
                .collect(),
        }
    }
}

/// Client view of the Session Record.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub name: String,
    pub host_id: Uuid,
    pub status: VisibleStatus,
    pub round_index: u32,
    pub round_count: usize,
    pub round_deadline: Option<String>,
    pub boss: BossSnapshot,
    pub question: Option<QuestionSnapshot>,
    pub removed_answer_choices: Vec<usize>,
    pub participants: Vec<ParticipantSnapshot>,
    pub round_damage: DamageSnapshot,
    pub total_damage: DamageSnapshot,
    /// Ability effects waiting for the round to resolve.
    pub queued_effects: usize,
    pub group_ability_uses: u32,
    pub broadcast_event: Option<NoticeSnapshot>,
    pub targeted_event: Option<TargetedNoticeSnapshot>,
    pub vote: Option<VoteSnapshot>,
    pub rounds: Vec<RoundResultSnapshot>,
    pub log_length: u64,
    pub created_at: String,
    pub updated_at: String,
    /// Set once the encounter ended.
    pub ended_at: Option<String>,
}

impl From<&SessionRecord> for SessionSnapshot {
    fn from(session: &SessionRecord) -> Self {
        let reveal = matches!(
            session.status,
            EncounterStatus::ShowingResults | EncounterStatus::Ended
        );
        let hp_remaining = session.boss_hp_remaining();
        Self {
            id: session.id,
            name: session.name.clone(),
            host_id: session.host_id,
            status: VisibleStatus::from(session),
            round_index: session.round_index,
            round_count: session.questions.len(),
            round_deadline: session.round_deadline.map(format_system_time),
            boss: BossSnapshot {
                name: session.boss.name.clone(),
                max_hp: session.boss.max_hp,
                hp_remaining,
                defeated: hp_remaining == 0,
            },
            question: session
                .current_question()
                .map(|question| QuestionSnapshot::new(question, reveal)),
            removed_answer_choices: session.removed_answer_choices.iter().copied().collect(),
            participants: session
                .participants
                .iter()
                .map(|(id, display_name)| ParticipantSnapshot {
                    id: *id,
                    display_name: display_name.clone(),
                    fallen: session.is_fallen(id),
                    abilities_used: session
                        .ability_users_this_round
                        .get(id)
                        .map(|used| used.iter().copied().collect())
                        .unwrap_or_default(),
                    buffed: session.buffed_participant_ids.contains(id),
                })
                .collect(),
            round_damage: session.round_damage.into(),
            total_damage: session.total_damage.into(),
            queued_effects: session.queued_ability_effects.len(),
            group_ability_uses: session.group_ability_uses,
            broadcast_event: session.broadcast_event.as_ref().map(NoticeSnapshot::from),
            targeted_event: session
                .targeted_event
                .as_ref()
                .map(TargetedNoticeSnapshot::from),
            vote: session.vote_state.as_ref().map(VoteSnapshot::from),
            rounds: session
                .round_history
                .iter()
                .map(RoundResultSnapshot::from)
                .collect(),
            log_length: session.log_length,
            created_at: format_system_time(session.created_at),
            updated_at: format_system_time(session.updated_at),
            ended_at: session.ended_at.map(format_system_time),
        }
    }
}

/// HP/MP pool of one participant.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ResourceSnapshot {
    pub participant_id: Uuid,
    pub display_name: String,
    pub hp: u32,
    pub max_hp: u32,
    pub mp: u32,
    pub max_mp: u32,
    pub level: u32,
}

impl From<&ResourceRecord> for ResourceSnapshot {
    fn from(record: &ResourceRecord) -> Self {
        Self {
            participant_id: record.participant_id,
            display_name: record.display_name.clone(),
            hp: record.hp,
            max_hp: record.max_hp,
            mp: record.mp,
            max_mp: record.max_mp,
            level: record.level,
        }
    }
}

/// One battle log line.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LogEntrySnapshot {
    pub seq: u64,
    pub round_index: u32,
    pub actor_id: Option<Uuid>,
    pub text: String,
    pub at: String,
}

impl From<&BattleLogEntry> for LogEntrySnapshot {
    fn from(entry: &BattleLogEntry) -> Self {
        Self {
            seq: entry.seq,
            round_index: entry.round_index,
            actor_id: entry.actor_id,
            text: entry.text.clone(),
            at: format_system_time(entry.at),
        }
    }
}
