//! Documents shared by every participant of an encounter: the Session Record
//! itself plus the small sibling records that live next to it in the store.

use std::{
    collections::{BTreeMap, BTreeSet},
    time::SystemTime,
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::{abilities::AbilityName, state_machine::EncounterStatus};

/// Shared target every correct answer and damaging ability hits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Boss {
    /// Display name of the encounter target.
    pub name: String,
    /// Hit points the party has to chew through.
    pub max_hp: u32,
}

/// Question asked during one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// Text shown to the participants.
    pub prompt: String,
    /// Answer choices, addressed by index.
    pub choices: Vec<String>,
    /// Index of the correct entry in `choices`.
    pub correct_choice: usize,
}

impl Question {
    /// Indices of the incorrect choices.
    pub fn incorrect_choices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.choices.len()).filter(move |index| *index != self.correct_choice)
    }
}

/// Damage split by origin. Stored per round and as running encounter totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamageTally {
    /// Damage coming from correct answers.
    pub base: u32,
    /// Damage coming from confirmed ability effects.
    pub from_abilities: u32,
    /// `base + from_abilities`.
    pub total: u32,
}

impl DamageTally {
    /// Build a tally from its two components.
    pub fn new(base: u32, from_abilities: u32) -> Self {
        Self {
            base,
            from_abilities,
            total: base + from_abilities,
        }
    }

    /// Fold another tally into this one.
    pub fn accumulate(&mut self, other: DamageTally) {
        self.base += other.base;
        self.from_abilities += other.from_abilities;
        self.total += other.total;
    }
}

/// How a queued ability effect is confirmed at round resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuedEffectKind {
    /// Counts only when the caster answered the round correctly.
    ContingentOnAnswer,
}

/// Ability damage waiting for round resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedEffect {
    /// Participant that cast the ability.
    pub caster_id: Uuid,
    /// Ability that produced the effect.
    pub ability: AbilityName,
    /// Confirmation rule.
    pub kind: QueuedEffectKind,
    /// Damage added to the round when confirmed.
    pub magnitude: u32,
}

/// Ephemeral notice shown to everyone until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    /// Identity used by the deferred clear-write.
    pub id: Uuid,
    /// Text to display.
    pub text: String,
    /// Wall clock time after which clients hide the notice.
    pub expires_at: SystemTime,
}

/// Ephemeral notice addressed to one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetedNotice {
    /// Identity used by the deferred clear-write.
    pub id: Uuid,
    /// Participant the notice is meant for.
    pub target_id: Uuid,
    /// Text to display.
    pub text: String,
    /// Wall clock time after which clients hide the notice.
    pub expires_at: SystemTime,
}

/// Group decision opened by the `rally` family of abilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteState {
    /// Identity of this vote, used by deadline timers.
    pub id: Uuid,
    /// Participant whose ability opened the vote.
    pub initiator_id: Uuid,
    /// Round the vote belongs to.
    pub round_index: u32,
    /// Voters in favour of skipping the round.
    pub votes_for: BTreeSet<Uuid>,
    /// Voters against skipping the round.
    pub votes_against: BTreeSet<Uuid>,
    /// Participants allowed to vote, frozen when the vote opened.
    pub eligible_voter_ids: BTreeSet<Uuid>,
    /// Size of the frozen electorate.
    pub eligible_voter_count: u32,
    /// Moment the vote is tallied.
    pub deadline: SystemTime,
}

/// Per participant result of one resolved round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RoundOutcome {
    /// Submitted the correct choice.
    Correct,
    /// Submitted a wrong choice.
    Incorrect,
    /// Did not submit anything.
    Missing,
    /// Was fallen when the round resolved.
    Excluded,
}

/// Frozen record of a resolved round, kept for the encounter summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundRecord {
    /// Round the record belongs to.
    pub round_index: u32,
    /// Question prompt.
    pub prompt: String,
    /// Choices offered.
    pub choices: Vec<String>,
    /// Index of the correct choice.
    pub correct_choice: usize,
    /// True when the round was skipped by a vote instead of played.
    pub skipped: bool,
    /// Damage dealt during the round.
    pub damage: DamageTally,
    /// Submitted choices keyed by participant.
    pub answers: BTreeMap<Uuid, usize>,
    /// Outcome for every registered participant.
    pub outcomes: BTreeMap<Uuid, RoundOutcome>,
}

/// Persistence progress of an ended encounter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveState {
    /// Summary not written yet (or the last write failed).
    Pending,
    /// Summary and rewards persisted; the record may be torn down.
    Archived,
}

/// The single shared document describing one encounter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Encounter identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Participant driving the lifecycle.
    pub host_id: Uuid,
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// Last committed mutation.
    pub updated_at: SystemTime,
    /// Lifecycle status.
    pub status: EncounterStatus,
    /// 0-based round counter.
    pub round_index: u32,
    /// End of the grace window, only while the round is ending.
    pub round_deadline: Option<SystemTime>,
    /// Shared target.
    pub boss: Boss,
    /// Ordered question list, one per round.
    pub questions: Vec<Question>,
    /// Registered participants and their display names, in join order.
    pub participants: IndexMap<Uuid, String>,
    /// Damage dealt in the current round, final once the round resolves.
    pub round_damage: DamageTally,
    /// Damage accumulated over the encounter.
    pub total_damage: DamageTally,
    /// Choices invalidated for the current round.
    pub removed_answer_choices: BTreeSet<usize>,
    /// Abilities used by each participant during the current round.
    pub ability_users_this_round: BTreeMap<Uuid, BTreeSet<AbilityName>>,
    /// Ability effects waiting for round resolution.
    pub queued_ability_effects: Vec<QueuedEffect>,
    /// Ability request ids already consumed during the current round.
    pub consumed_request_ids: BTreeSet<Uuid>,
    /// Participants at zero HP.
    pub fallen_participant_ids: BTreeSet<Uuid>,
    /// Participants revived since the current round started.
    pub revived_since_round: BTreeSet<Uuid>,
    /// Participants that already received a stat buff this encounter.
    pub buffed_participant_ids: BTreeSet<Uuid>,
    /// Number of group-vote abilities used this encounter.
    pub group_ability_uses: u32,
    /// Notice shown to everybody.
    pub broadcast_event: Option<Notice>,
    /// Notice shown to one participant.
    pub targeted_event: Option<TargetedNotice>,
    /// Vote in progress, if any.
    pub vote_state: Option<VoteState>,
    /// Resolved rounds, oldest first.
    pub round_history: Vec<RoundRecord>,
    /// Number of battle log entries appended so far.
    pub log_length: u64,
    /// Archive progress, set once the encounter ended.
    pub archive: Option<ArchiveState>,
    /// When the encounter ended.
    #[serde(default)]
    pub ended_at: Option<SystemTime>,
}

impl SessionRecord {
    /// Build a fresh record in the waiting state.
    pub fn new(
        id: Uuid,
        name: String,
        host_id: Uuid,
        boss: Boss,
        questions: Vec<Question>,
        now: SystemTime,
    ) -> Self {
        Self {
            id,
            name,
            host_id,
            created_at: now,
            updated_at: now,
            status: EncounterStatus::Waiting,
            round_index: 0,
            round_deadline: None,
            boss,
            questions,
            participants: IndexMap::new(),
            round_damage: DamageTally::default(),
            total_damage: DamageTally::default(),
            removed_answer_choices: BTreeSet::new(),
            ability_users_this_round: BTreeMap::new(),
            queued_ability_effects: Vec::new(),
            consumed_request_ids: BTreeSet::new(),
            fallen_participant_ids: BTreeSet::new(),
            revived_since_round: BTreeSet::new(),
            buffed_participant_ids: BTreeSet::new(),
            group_ability_uses: 0,
            broadcast_event: None,
            targeted_event: None,
            vote_state: None,
            round_history: Vec::new(),
            log_length: 0,
            archive: None,
            ended_at: None,
        }
    }

    /// Question asked in the current round.
    pub fn current_question(&self) -> Option<&Question> {
        self.questions.get(self.round_index as usize)
    }

    /// Whether the participant is registered in this encounter.
    pub fn is_participant(&self, participant_id: &Uuid) -> bool {
        self.participants.contains_key(participant_id)
    }

    /// Whether the participant currently sits at zero HP.
    pub fn is_fallen(&self, participant_id: &Uuid) -> bool {
        self.fallen_participant_ids.contains(participant_id)
    }

    /// Whether answers and abilities are accepted for the current round.
    pub fn accepts_round_input(&self) -> bool {
        matches!(
            self.status,
            EncounterStatus::InProgress | EncounterStatus::RoundEnding
        )
    }

    /// Registered participants that are still standing.
    pub fn standing_participants(&self) -> BTreeSet<Uuid> {
        self.participants
            .keys()
            .filter(|id| !self.is_fallen(id))
            .copied()
            .collect()
    }

    /// HP left on the shared target.
    pub fn boss_hp_remaining(&self) -> u32 {
        self.boss.max_hp.saturating_sub(self.total_damage.total)
    }

    /// Reset everything scoped to a single round.
    pub fn clear_round_state(&mut self) {
        self.round_deadline = None;
        self.removed_answer_choices.clear();
        self.ability_users_this_round.clear();
        self.queued_ability_effects.clear();
        self.consumed_request_ids.clear();
        self.revived_since_round.clear();
        self.round_damage = DamageTally::default();
        self.vote_state = None;
    }

    /// Reset the encounter scoped sets when round 0 starts.
    pub fn reset_for_start(&mut self) {
        self.clear_round_state();
        self.fallen_participant_ids.clear();
        self.buffed_participant_ids.clear();
        self.group_ability_uses = 0;
    }
}

/// HP/MP pool of one participant, owned by the profile system and mutated here
/// only through ability and round resolution transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Participant the pool belongs to.
    pub participant_id: Uuid,
    /// Name shown in logs and notices.
    pub display_name: String,
    /// Current hit points.
    pub hp: u32,
    /// Maximum hit points.
    pub max_hp: u32,
    /// Current mana.
    pub mp: u32,
    /// Maximum mana.
    pub max_mp: u32,
    /// Character level.
    pub level: u32,
}

impl ResourceRecord {
    /// True when HP is below its maximum.
    pub fn is_damaged(&self) -> bool {
        self.hp < self.max_hp
    }
}

/// One participant's answer for one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerSubmission {
    /// Participant that answered.
    pub participant_id: Uuid,
    /// Round the answer belongs to.
    pub round_index: u32,
    /// Chosen index.
    pub choice: usize,
    /// Submission time.
    pub submitted_at: SystemTime,
}

/// Queued intent to trigger an ability. Created once, consumed once, deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbilityRequest {
    /// Idempotency key.
    pub request_id: Uuid,
    /// Participant casting the ability.
    pub caster_id: Uuid,
    /// Requested ability.
    pub ability: AbilityName,
    /// Explicit targets, possibly empty.
    pub targets: Vec<Uuid>,
    /// MP price captured when the request was queued.
    pub cost: u32,
    /// Round the caster saw when casting.
    pub round_index: u32,
    /// Queue time, used to drain in order.
    pub created_at: SystemTime,
}

/// Append-only, human readable battle log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleLogEntry {
    /// Position in the log.
    pub seq: u64,
    /// Round the entry was written in.
    pub round_index: u32,
    /// Participant responsible for the entry, if any.
    pub actor_id: Option<Uuid>,
    /// Rendered text.
    pub text: String,
    /// Append time.
    pub at: SystemTime,
}

/// Marker binding a host to its single active encounter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostBinding {
    /// Encounter the host is running.
    pub encounter_id: Uuid,
}
