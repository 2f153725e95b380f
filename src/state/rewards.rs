//! XP and gold earned over an encounter, derived from the round history.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::session::{RoundOutcome, SessionRecord};

/// Reward rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardRules {
    /// XP per correct answer.
    pub xp_per_correct: u32,
    /// Gold per correct answer.
    pub gold_per_correct: u32,
    /// Gold for every round the participant took part in.
    pub participation_gold: u32,
}

/// What one participant earned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reward {
    /// XP gained.
    pub xp: u32,
    /// Gold gained.
    pub gold: u32,
    /// Rounds answered correctly.
    pub correct_answers: u32,
    /// Rounds not excluded.
    pub rounds_participated: u32,
}

/// Rewards for every registered participant. Rounds in which a participant was
/// fallen earn nothing.
pub fn compute_rewards(session: &SessionRecord, rules: RewardRules) -> BTreeMap<Uuid, Reward> {
    let mut rewards: BTreeMap<Uuid, Reward> = session
        .participants
        .keys()
        .map(|id| (*id, Reward::default()))
        .collect();

    for round in &session.round_history {
        for (id, outcome) in &round.outcomes {
            let Some(reward) = rewards.get_mut(id) else {
                continue;
            };
            match outcome {
                RoundOutcome::Excluded => continue,
                RoundOutcome::Correct => {
                    reward.correct_answers += 1;
                    reward.xp += rules.xp_per_correct;
                    reward.gold += rules.gold_per_correct;
                }
                RoundOutcome::Incorrect | RoundOutcome::Missing => {}
            }
            reward.rounds_participated += 1;
            reward.gold += rules.participation_gold;
        }
    }

    rewards
}
