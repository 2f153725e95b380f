//! Round damage resolution. Pure: the lifecycle service feeds it the answers and
//! resource records read in the resolving transaction and writes the result back
//! together with the status change.

use std::collections::{BTreeMap, BTreeSet};

use uuid::Uuid;

use crate::state::session::{
    DamageTally, QueuedEffectKind, ResourceRecord, RoundOutcome, RoundRecord, SessionRecord,
};

/// How the round ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionMode {
    /// Played to the end: penalties and base damage apply.
    Played,
    /// Skipped by a vote: penalties and base damage are suppressed.
    Skipped,
}

/// Everything a round resolution changes.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundResolution {
    /// Resource records whose HP changed.
    pub resource_updates: Vec<ResourceRecord>,
    /// Participants that dropped to zero HP this round.
    pub newly_fallen: BTreeSet<Uuid>,
    /// Damage dealt to the encounter target.
    pub damage: DamageTally,
    /// Frozen history entry.
    pub record: RoundRecord,
    /// Battle log lines, in order.
    pub log: Vec<String>,
}

impl RoundResolution {
    /// Fold the round aggregates into the Session Record. Damage already
    /// dealt during the round by immediate abilities is kept.
    pub fn apply(&self, session: &mut SessionRecord) {
        session.round_damage.accumulate(self.damage);
        session.total_damage.accumulate(self.damage);
        session
            .fallen_participant_ids
            .extend(self.newly_fallen.iter().copied());
        let mut record = self.record.clone();
        record.damage = session.round_damage;
        session.round_history.push(record);
        session.round_deadline = None;
        session.vote_state = None;
    }
}

/// Compute the outcome of the current round.
///
/// Participants already fallen when the round resolves are excluded from both
/// damage and rewards. A missing answer counts as incorrect.
pub fn resolve_round(
    session: &SessionRecord,
    answers: &BTreeMap<Uuid, usize>,
    resources: &BTreeMap<Uuid, ResourceRecord>,
    penalty: u32,
    mode: ResolutionMode,
) -> RoundResolution {
    let correct_choice = session.current_question().map(|q| q.correct_choice);
    let name = |id: &Uuid| {
        session
            .participants
            .get(id)
            .cloned()
            .unwrap_or_else(|| id.to_string())
    };

    let outcomes: BTreeMap<Uuid, RoundOutcome> = session
        .participants
        .keys()
        .map(|id| {
            let outcome = if session.is_fallen(id) {
                RoundOutcome::Excluded
            } else {
                match answers.get(id) {
                    Some(choice) if Some(*choice) == correct_choice => RoundOutcome::Correct,
                    Some(_) => RoundOutcome::Incorrect,
                    None => RoundOutcome::Missing,
                }
            };
            (*id, outcome)
        })
        .collect();

    let mut log = Vec::new();
    let mut resource_updates = Vec::new();
    let mut newly_fallen = BTreeSet::new();
    let mut base = 0;

    if mode == ResolutionMode::Played {
        for (id, outcome) in &outcomes {
            match outcome {
                RoundOutcome::Correct => base += 1,
                RoundOutcome::Incorrect | RoundOutcome::Missing => {
                    let Some(record) = resources.get(id) else {
                        continue;
                    };
                    let mut record = record.clone();
                    let taken = record.hp.min(penalty);
                    record.hp -= taken;
                    let verb = if *outcome == RoundOutcome::Missing {
                        "did not answer"
                    } else {
                        "answered incorrectly"
                    };
                    log.push(format!("{} {verb} and took {taken} damage", name(id)));
                    if record.hp == 0 {
                        newly_fallen.insert(*id);
                        log.push(format!("{} has fallen!", name(id)));
                    }
                    resource_updates.push(record);
                }
                RoundOutcome::Excluded => {}
            }
        }
    } else {
        log.push("The round was skipped by vote".to_string());
    }

    let mut from_abilities = 0;
    for effect in &session.queued_ability_effects {
        let confirmed = match effect.kind {
            QueuedEffectKind::ContingentOnAnswer => {
                outcomes.get(&effect.caster_id) == Some(&RoundOutcome::Correct)
            }
        };
        if confirmed {
            from_abilities += effect.magnitude;
            log.push(format!(
                "{}'s {} hit for {} damage",
                name(&effect.caster_id),
                effect.ability,
                effect.magnitude
            ));
        } else {
            log.push(format!(
                "{}'s {} fizzled",
                name(&effect.caster_id),
                effect.ability
            ));
        }
    }

    let damage = DamageTally::new(base, from_abilities);
    log.push(format!(
        "The party dealt {} damage to {} ({} from answers, {} from abilities)",
        damage.total, session.boss.name, damage.base, damage.from_abilities
    ));

    let question = session.current_question();
    let record = RoundRecord {
        round_index: session.round_index,
        prompt: question.map(|q| q.prompt.clone()).unwrap_or_default(),
        choices: question.map(|q| q.choices.clone()).unwrap_or_default(),
        correct_choice: correct_choice.unwrap_or_default(),
        skipped: mode == ResolutionMode::Skipped,
        damage,
        answers: answers
            .iter()
            .filter(|(id, _)| session.is_participant(id))
            .map(|(id, choice)| (*id, *choice))
            .collect(),
        outcomes,
    };

    RoundResolution {
        resource_updates,
        newly_fallen,
        damage,
        record,
        log,
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;
    use crate::state::{
        abilities::AbilityName,
        session::{Boss, QueuedEffect, Question},
        state_machine::EncounterStatus,
    };

    fn setup(hps: &[u32]) -> (SessionRecord, BTreeMap<Uuid, ResourceRecord>, Vec<Uuid>) {
        let mut session = SessionRecord::new(
            Uuid::new_v4(),
            "raid".into(),
            Uuid::new_v4(),
            Boss {
                name: "Golem".into(),
                max_hp: 50,
            },
            vec![Question {
                prompt: "capital of France?".into(),
                choices: vec!["Paris".into(), "Lyon".into()],
                correct_choice: 0,
            }],
            SystemTime::UNIX_EPOCH,
        );
        session.status = EncounterStatus::RoundEnding;
        let mut resources = BTreeMap::new();
        let mut ids = Vec::new();
        for (index, hp) in hps.iter().enumerate() {
            let id = Uuid::new_v4();
            session.participants.insert(id, format!("p{index}"));
            resources.insert(
                id,
                ResourceRecord {
                    participant_id: id,
                    display_name: format!("p{index}"),
                    hp: *hp,
                    max_hp: 20,
                    mp: 0,
                    max_mp: 10,
                    level: 1,
                },
            );
            ids.push(id);
        }
        (session, resources, ids)
    }

    #[test]
    fn incorrect_answer_clamps_hp_and_marks_fallen() {
        let (session, resources, ids) = setup(&[2]);
        let answers = BTreeMap::from([(ids[0], 1)]);
        let resolution = resolve_round(&session, &answers, &resources, 3, ResolutionMode::Played);

        assert_eq!(resolution.resource_updates[0].hp, 0);
        assert!(resolution.newly_fallen.contains(&ids[0]));
        assert_eq!(resolution.damage.base, 0);
    }

    #[test]
    fn missing_answer_counts_as_incorrect() {
        let (session, resources, ids) = setup(&[10, 10]);
        let answers = BTreeMap::from([(ids[0], 0)]);
        let resolution = resolve_round(&session, &answers, &resources, 3, ResolutionMode::Played);

        assert_eq!(resolution.damage, DamageTally::new(1, 0));
        assert_eq!(resolution.resource_updates.len(), 1);
        assert_eq!(resolution.resource_updates[0].participant_id, ids[1]);
        assert_eq!(resolution.resource_updates[0].hp, 7);
        assert_eq!(resolution.record.outcomes[&ids[1]], RoundOutcome::Missing);
    }

    #[test]
    fn fallen_participants_are_excluded() {
        let (mut session, resources, ids) = setup(&[0, 10]);
        session.fallen_participant_ids.insert(ids[0]);
        let answers = BTreeMap::from([(ids[0], 0), (ids[1], 0)]);
        let resolution = resolve_round(&session, &answers, &resources, 3, ResolutionMode::Played);

        assert_eq!(resolution.damage.base, 1);
        assert_eq!(resolution.record.outcomes[&ids[0]], RoundOutcome::Excluded);
        assert!(resolution.resource_updates.is_empty());
    }

    #[test]
    fn contingent_effect_fizzles_on_incorrect_answer() {
        let (mut session, resources, ids) = setup(&[10, 10]);
        session.queued_ability_effects = vec![
            QueuedEffect {
                caster_id: ids[0],
                ability: AbilityName::Smite,
                kind: QueuedEffectKind::ContingentOnAnswer,
                magnitude: 7,
            },
            QueuedEffect {
                caster_id: ids[1],
                ability: AbilityName::Smite,
                kind: QueuedEffectKind::ContingentOnAnswer,
                magnitude: 5,
            },
        ];
        let answers = BTreeMap::from([(ids[0], 1), (ids[1], 0)]);
        let resolution = resolve_round(&session, &answers, &resources, 3, ResolutionMode::Played);

        assert_eq!(resolution.damage, DamageTally::new(1, 5));
        assert!(resolution.log.iter().any(|line| line == "p0's smite fizzled"));
    }

    #[test]
    fn skipped_round_suppresses_penalty_and_base() {
        let (mut session, resources, ids) = setup(&[1, 10]);
        session.queued_ability_effects.push(QueuedEffect {
            caster_id: ids[1],
            ability: AbilityName::Smite,
            kind: QueuedEffectKind::ContingentOnAnswer,
            magnitude: 4,
        });
        let answers = BTreeMap::from([(ids[1], 0)]);
        let resolution = resolve_round(&session, &answers, &resources, 3, ResolutionMode::Skipped);

        assert!(resolution.resource_updates.is_empty());
        assert!(resolution.newly_fallen.is_empty());
        assert_eq!(resolution.damage, DamageTally::new(0, 4));
        assert!(resolution.record.skipped);
    }

    #[test]
    fn apply_accumulates_totals_and_clears_vote() {
        let (mut session, resources, ids) = setup(&[2, 10]);
        session.total_damage = DamageTally::new(4, 2);
        let answers = BTreeMap::from([(ids[1], 0)]);
        let resolution = resolve_round(&session, &answers, &resources, 3, ResolutionMode::Played);
        resolution.apply(&mut session);

        assert_eq!(session.round_damage, DamageTally::new(1, 0));
        assert_eq!(session.total_damage, DamageTally::new(5, 2));
        assert!(session.is_fallen(&ids[0]));
        assert_eq!(session.round_history.len(), 1);
        assert!(session.vote_state.is_none());
    }

    #[test]
    fn apply_keeps_damage_dealt_during_the_round() {
        let (mut session, resources, ids) = setup(&[10, 10]);
        session.round_damage = DamageTally::new(0, 5);
        session.total_damage = DamageTally::new(2, 5);
        let answers = BTreeMap::from([(ids[0], 0), (ids[1], 0)]);
        let resolution = resolve_round(&session, &answers, &resources, 3, ResolutionMode::Played);
        assert_eq!(resolution.damage, DamageTally::new(2, 0));
        resolution.apply(&mut session);

        assert_eq!(session.round_damage, DamageTally::new(2, 5));
        assert_eq!(session.total_damage, DamageTally::new(4, 5));
        assert_eq!(session.round_history[0].damage, DamageTally::new(2, 5));
    }
}
