use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

/// Damage split as persisted in summaries.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DamageEntity {
    /// Damage from correct answers.
    pub base: u32,
    /// Damage from confirmed abilities.
    pub from_abilities: u32,
    /// Sum of both.
    pub total: u32,
}

/// How a participant fared in one archived round.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeEntity {
    /// Answered correctly.
    Correct,
    /// Answered incorrectly.
    Incorrect,
    /// Did not answer.
    Missing,
    /// Was fallen.
    Excluded,
}

/// One participant's line inside an archived round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoundAnswerEntity {
    /// Participant.
    pub participant_id: Uuid,
    /// Submitted choice, if any.
    pub choice: Option<usize>,
    /// Judged outcome.
    pub outcome: OutcomeEntity,
}

/// Question and answer data of one resolved round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoundSummaryEntity {
    /// Round position.
    pub round_index: u32,
    /// Question prompt.
    pub prompt: String,
    /// Choices offered.
    pub choices: Vec<String>,
    /// Index of the correct choice.
    pub correct_choice: usize,
    /// Whether a vote skipped the round.
    pub skipped: bool,
    /// Damage dealt in the round.
    pub damage: DamageEntity,
    /// Per participant answers and outcomes.
    pub answers: Vec<RoundAnswerEntity>,
}

/// Battle log line as archived.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogLineEntity {
    /// Position in the log.
    pub seq: u64,
    /// Round the line was written in.
    pub round_index: u32,
    /// Participant responsible for the line.
    pub actor_id: Option<Uuid>,
    /// Rendered text.
    pub text: String,
    /// Append time.
    pub at: SystemTime,
}

/// Rewards computed for one participant at finalize.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RewardEntity {
    /// Participant rewarded.
    pub participant_id: Uuid,
    /// Name at the time of the encounter.
    pub display_name: String,
    /// XP granted.
    pub xp: u32,
    /// Gold granted.
    pub gold: u32,
    /// Rounds answered correctly.
    pub correct_answers: u32,
    /// Rounds the participant was not excluded from.
    pub rounds_participated: u32,
}

/// Archived record of a finished encounter, written once at finalize.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncounterSummaryEntity {
    /// Encounter identifier.
    pub id: Uuid,
    /// Encounter name.
    pub name: String,
    /// Host that ran the encounter.
    pub host_id: Uuid,
    /// Name of the encounter target.
    pub boss_name: String,
    /// HP of the encounter target.
    pub boss_max_hp: u32,
    /// Whether the party brought the target down.
    pub defeated: bool,
    /// Creation time of the encounter.
    pub created_at: SystemTime,
    /// Finalize time.
    pub ended_at: SystemTime,
    /// Resolved rounds, oldest first.
    pub rounds: Vec<RoundSummaryEntity>,
    /// Full battle log.
    pub log: Vec<LogLineEntity>,
    /// Rewards per participant.
    pub rewards: Vec<RewardEntity>,
    /// Aggregate damage over the encounter.
    pub final_damage: DamageEntity,
}

/// Lightweight listing entry for archived encounters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SummaryListItemEntity {
    /// Encounter identifier.
    pub id: Uuid,
    /// Encounter name.
    pub name: String,
    /// Whether the target was defeated.
    pub defeated: bool,
    /// Finalize time.
    pub ended_at: SystemTime,
}

impl From<&EncounterSummaryEntity> for SummaryListItemEntity {
    fn from(summary: &EncounterSummaryEntity) -> Self {
        Self {
            id: summary.id,
            name: summary.name.clone(),
            defeated: summary.defeated,
            ended_at: summary.ended_at,
        }
    }
}

/// Persistent player profile read at join and credited at finalize.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileEntity {
    /// Participant identifier from the identity provider.
    pub participant_id: Uuid,
    /// Display name.
    pub display_name: String,
    /// Character level, starting at 1.
    pub level: u32,
    /// XP accumulated towards the next level.
    pub xp: u32,
    /// Gold owned.
    pub gold: u32,
    /// Encounters already credited to this profile.
    #[serde(default)]
    pub rewarded_encounters: Vec<Uuid>,
}

/// Reward of one encounter, credited to a profile at most once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardCredit {
    /// Profile to credit.
    pub participant_id: Uuid,
    /// Name used when the profile does not exist yet.
    pub display_name: String,
    /// Encounter paying the reward.
    pub encounter_id: Uuid,
    /// XP earned.
    pub xp: u32,
    /// Gold earned.
    pub gold: u32,
}

/// XP needed to leave `level`.
pub fn xp_for_level(level: u32) -> u32 {
    100 * level.max(1)
}

impl ProfileEntity {
    /// Fresh level 1 profile.
    pub fn new(participant_id: Uuid, display_name: String) -> Self {
        Self {
            participant_id,
            display_name,
            level: 1,
            xp: 0,
            gold: 0,
            rewarded_encounters: Vec::new(),
        }
    }

    /// Credit an encounter's reward and recompute the level. Returns `false`
    /// without touching the profile when the encounter was already credited.
    pub fn apply_reward(&mut self, encounter_id: Uuid, xp: u32, gold: u32) -> bool {
        if self.rewarded_encounters.contains(&encounter_id) {
            return false;
        }
        self.rewarded_encounters.push(encounter_id);
        self.gold += gold;
        self.xp += xp;
        while self.xp >= xp_for_level(self.level) {
            self.xp -= xp_for_level(self.level);
            self.level += 1;
        }
        true
    }

    /// [`Self::apply_reward`] for a credit addressed to this profile.
    pub fn credit(&mut self, credit: &RewardCredit) -> bool {
        self.apply_reward(credit.encounter_id, credit.xp, credit.gold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reward_levels_up_and_carries_remainder() {
        let mut profile = ProfileEntity::new(Uuid::new_v4(), "ada".into());
        assert!(profile.apply_reward(Uuid::new_v4(), 350, 7));
        assert_eq!(profile.level, 3);
        assert_eq!(profile.xp, 50);
        assert_eq!(profile.gold, 7);
    }

    #[test]
    fn reward_is_applied_once_per_encounter() {
        let mut profile = ProfileEntity::new(Uuid::new_v4(), "ada".into());
        let encounter = Uuid::new_v4();
        assert!(profile.apply_reward(encounter, 10, 1));
        assert!(!profile.apply_reward(encounter, 10, 1));
        assert_eq!((profile.xp, profile.gold), (10, 1));
    }
}
