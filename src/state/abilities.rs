//! Closed ability catalog and the pure effect functions behind it.
//!
//! Every ability is one of a handful of shapes ([`AbilityEffect`]). Resolving an
//! ability never touches the store: [`resolve_ability`] validates the cast
//! against a snapshot read inside a transaction and returns the deltas the
//! caller writes back in that same transaction.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    time::{Duration, SystemTime},
};

use rand::{
    Rng,
    seq::{IndexedRandom, SliceRandom},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::session::{
    DamageTally, QueuedEffect, QueuedEffectKind, ResourceRecord, SessionRecord, VoteState,
};

/// Names of the abilities a participant can request.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum AbilityName {
    /// Restore HP on up to a few allies.
    Heal,
    /// Restore MP on up to a few allies.
    Replenish,
    /// Small heal on every standing, damaged participant.
    Mend,
    /// Damage confirmed only when the caster answers correctly.
    Smite,
    /// Remove one incorrect choice from the current question.
    Insight,
    /// Bring a fallen participant back.
    Revive,
    /// Raise max and current resource on a few allies, once per encounter each.
    Fortify,
    /// Bonus damage plus a vote to skip the rest of the round.
    Rally,
}

impl fmt::Display for AbilityName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AbilityName::Heal => "heal",
            AbilityName::Replenish => "replenish",
            AbilityName::Mend => "mend",
            AbilityName::Smite => "smite",
            AbilityName::Insight => "insight",
            AbilityName::Revive => "revive",
            AbilityName::Fortify => "fortify",
            AbilityName::Rally => "rally",
        };
        f.write_str(name)
    }
}

/// Resource pool an effect touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Hit points.
    Hp,
    /// Mana.
    Mp,
}

/// `count`d`sides` roll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dice {
    /// Number of dice rolled.
    pub count: u32,
    /// Faces per die.
    pub sides: u32,
}

impl Dice {
    /// Sum of `count` rolls.
    pub fn roll<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        if self.sides == 0 {
            return 0;
        }
        (0..self.count).map(|_| rng.random_range(1..=self.sides)).sum()
    }
}

/// Effect shapes. Abilities are configured as one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum AbilityEffect {
    /// Immediate restore split across up to `max_targets` participants.
    Restore {
        /// Pool restored.
        resource: ResourceKind,
        /// Random part of the magnitude; the caster level is added on top.
        dice: Dice,
        /// Maximum number of targets.
        max_targets: usize,
    },
    /// Immediate heal of every standing, damaged participant.
    PartyHeal {
        /// Fraction of the caster level restored to each participant.
        level_fraction: f64,
    },
    /// Damage queued until round resolution, contingent on the caster's answer.
    DeferredDamage {
        /// Random part of the magnitude; the caster level is added on top.
        dice: Dice,
    },
    /// Remove one incorrect choice for the rest of the round.
    RemoveChoice,
    /// Bring a fallen participant back with a fraction of max HP.
    Revive {
        /// Fraction of max HP restored.
        hp_fraction: f64,
    },
    /// Raise max and current resource of participants not yet buffed.
    Buff {
        /// Pool buffed.
        resource: ResourceKind,
        /// Random part of the magnitude; the caster level is added on top.
        dice: Dice,
        /// Minimum number of eligible targets for the cast to be legal.
        required_targets: usize,
        /// Maximum number of targets.
        max_targets: usize,
    },
    /// Unconditional bonus damage plus a skip-the-round vote.
    GroupVote {
        /// Damage added to the round.
        bonus_damage: u32,
    },
}

/// Catalog entry for one ability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbilitySpec {
    /// MP price.
    pub cost: u32,
    /// Effect applied on success.
    pub effect: AbilityEffect,
}

/// Encounter wide limits consulted while resolving abilities.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AbilityRules {
    /// Group-vote abilities allowed per encounter.
    pub group_ability_cap: u32,
    /// Lifetime of a vote opened by a group-vote ability.
    pub vote_window: Duration,
}

/// Everything a cast is validated against, read inside one transaction.
pub struct CastContext<'a> {
    /// Ability requested.
    pub ability: AbilityName,
    /// Catalog entry of the ability.
    pub spec: &'a AbilitySpec,
    /// Caster identity.
    pub caster_id: Uuid,
    /// Targets named in the request.
    pub requested_targets: &'a [Uuid],
    /// Session Record at read time.
    pub session: &'a SessionRecord,
    /// Resource records of every registered participant.
    pub resources: &'a BTreeMap<Uuid, ResourceRecord>,
    /// Encounter limits.
    pub rules: AbilityRules,
    /// Current time.
    pub now: SystemTime,
}

/// Reasons a cast is dropped without effect or cost.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Caster cannot afford the ability.
    #[error("not enough MP: {needed} needed, {available} available")]
    InsufficientMana {
        /// Ability cost.
        needed: u32,
        /// Caster MP.
        available: u32,
    },
    /// Caster already used an ability this round.
    #[error("you already used an ability this round")]
    AlreadyCastThisRound,
    /// Caster is fallen and the cast is not a revival of someone else.
    #[error("fallen participants can only revive others")]
    CasterFallen,
    /// Target list does not fit the ability.
    #[error("invalid targets: {0}")]
    InvalidTargets(String),
    /// Every target is already at full health.
    #[error("target is already at full health")]
    TargetAtFullHealth,
    /// Party heal found nobody to heal.
    #[error("nobody needs healing")]
    NothingToHeal,
    /// No incorrect choice is left to remove.
    #[error("no incorrect choice left to remove")]
    NoChoicesLeft,
    /// Revival target is standing.
    #[error("target is not fallen")]
    TargetNotFallen,
    /// Too few participants can still receive a buff.
    #[error("needs {required} eligible targets, only {available} available")]
    NotEnoughEligibleTargets {
        /// Minimum targets.
        required: usize,
        /// Eligible participants.
        available: usize,
    },
    /// Group-vote abilities exhausted for this encounter.
    #[error("group ability limit of {cap} reached")]
    GroupCapReached {
        /// Configured cap.
        cap: u32,
    },
    /// A vote is already running.
    #[error("a vote is already in progress")]
    VoteAlreadyActive,
    /// The round no longer accepts abilities.
    #[error("the round is closed")]
    RoundClosed,
}

/// Gains applied to one resource record. Max values grow first, current values
/// are clamped to the new max.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceDelta {
    /// Participant receiving the gains.
    pub participant_id: Uuid,
    /// HP restored.
    pub hp: u32,
    /// MP restored.
    pub mp: u32,
    /// Max HP added.
    pub max_hp: u32,
    /// Max MP added.
    pub max_mp: u32,
}

impl ResourceDelta {
    fn new(participant_id: Uuid) -> Self {
        Self {
            participant_id,
            ..Self::default()
        }
    }

    fn restore(participant_id: Uuid, kind: ResourceKind, amount: u32) -> Self {
        let mut delta = Self::new(participant_id);
        match kind {
            ResourceKind::Hp => delta.hp = amount,
            ResourceKind::Mp => delta.mp = amount,
        }
        delta
    }

    /// Write the gains into `record`.
    pub fn apply(&self, record: &mut ResourceRecord) {
        record.max_hp += self.max_hp;
        record.max_mp += self.max_mp;
        record.hp = (record.hp + self.hp).min(record.max_hp);
        record.mp = (record.mp + self.mp).min(record.max_mp);
    }
}

/// Changes an ability makes to the Session Record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionDelta {
    /// Choice index removed for the round.
    pub removed_choice: Option<usize>,
    /// Participant brought back.
    pub revived: Option<Uuid>,
    /// Effect waiting for round resolution.
    pub queued_effect: Option<QueuedEffect>,
    /// Participants buffed by this cast.
    pub buffed: Vec<Uuid>,
    /// Vote opened by this cast.
    pub vote: Option<VoteState>,
    /// Whether this cast counts against the group ability cap.
    pub group_use: bool,
    /// Damage added to the round as soon as the cast lands.
    pub bonus_damage: u32,
}

impl SessionDelta {
    /// Write the delta into `session`.
    pub fn apply(self, session: &mut SessionRecord) {
        if let Some(choice) = self.removed_choice {
            session.removed_answer_choices.insert(choice);
        }
        if let Some(revived) = self.revived {
            session.fallen_participant_ids.remove(&revived);
            session.revived_since_round.insert(revived);
        }
        if let Some(effect) = self.queued_effect {
            session.queued_ability_effects.push(effect);
        }
        session.buffed_participant_ids.extend(self.buffed);
        if let Some(vote) = self.vote {
            session.vote_state = Some(vote);
        }
        if self.group_use {
            session.group_ability_uses += 1;
        }
        if self.bonus_damage > 0 {
            let bonus = DamageTally::new(0, self.bonus_damage);
            session.round_damage.accumulate(bonus);
            session.total_damage.accumulate(bonus);
        }
    }
}

/// Result of a successful cast.
#[derive(Debug, Clone, PartialEq)]
pub struct AbilityOutcome {
    /// Resource gains, computed on top of the caster's post-cost MP.
    pub resource_deltas: Vec<ResourceDelta>,
    /// Session Record changes.
    pub session_delta: SessionDelta,
    /// Battle log line.
    pub log: String,
    /// Broadcast notice text.
    pub notice: String,
}

/// Validate a cast and compute its effect.
pub fn resolve_ability<R: Rng + ?Sized>(
    ctx: &CastContext<'_>,
    rng: &mut R,
) -> Result<AbilityOutcome, Rejection> {
    if !ctx.session.accepts_round_input() {
        return Err(Rejection::RoundClosed);
    }
    let caster = ctx
        .resources
        .get(&ctx.caster_id)
        .ok_or_else(|| Rejection::InvalidTargets("caster is not registered".into()))?;

    if caster.mp < ctx.spec.cost {
        return Err(Rejection::InsufficientMana {
            needed: ctx.spec.cost,
            available: caster.mp,
        });
    }
    if ctx
        .session
        .ability_users_this_round
        .get(&ctx.caster_id)
        .is_some_and(|used| !used.is_empty())
    {
        return Err(Rejection::AlreadyCastThisRound);
    }
    if ctx.session.is_fallen(&ctx.caster_id) && !matches!(ctx.spec.effect, AbilityEffect::Revive { .. })
    {
        return Err(Rejection::CasterFallen);
    }

    // Effects are computed against the caster as it will be once charged.
    let mut charged = ctx.resources.clone();
    if let Some(record) = charged.get_mut(&ctx.caster_id) {
        record.mp -= ctx.spec.cost;
    }
    let caster_name = caster.display_name.as_str();
    let level = caster.level;

    match &ctx.spec.effect {
        AbilityEffect::Restore {
            resource,
            dice,
            max_targets,
        } => restore(ctx, &charged, *resource, *dice, *max_targets, level, caster_name, rng),
        AbilityEffect::PartyHeal { level_fraction } => {
            party_heal(ctx, &charged, *level_fraction, level, caster_name)
        }
        AbilityEffect::DeferredDamage { dice } => Ok(deferred_damage(ctx, *dice, level, caster_name, rng)),
        AbilityEffect::RemoveChoice => remove_choice(ctx, caster_name, rng),
        AbilityEffect::Revive { hp_fraction } => revive(ctx, &charged, *hp_fraction, caster_name),
        AbilityEffect::Buff {
            resource,
            dice,
            required_targets,
            max_targets,
        } => buff(
            ctx,
            *resource,
            *dice,
            *required_targets,
            *max_targets,
            level,
            caster_name,
            rng,
        ),
        AbilityEffect::GroupVote { bonus_damage } => group_vote(ctx, *bonus_damage, caster_name),
    }
}

fn display_name(resources: &BTreeMap<Uuid, ResourceRecord>, id: &Uuid) -> String {
    resources
        .get(id)
        .map(|record| record.display_name.clone())
        .unwrap_or_else(|| id.to_string())
}

fn distinct_targets(requested: &[Uuid], max: usize) -> Result<Vec<Uuid>, Rejection> {
    let mut seen = BTreeSet::new();
    let targets: Vec<Uuid> = requested
        .iter()
        .copied()
        .filter(|id| seen.insert(*id))
        .collect();
    if targets.len() > max {
        return Err(Rejection::InvalidTargets(format!(
            "at most {max} targets allowed"
        )));
    }
    Ok(targets)
}

/// Split `total` evenly across `parts`, handing the remainder out round-robin
/// from the front.
fn split_evenly(total: u32, parts: usize) -> Vec<u32> {
    if parts == 0 {
        return Vec::new();
    }
    let parts_u32 = parts as u32;
    let share = total / parts_u32;
    let remainder = (total % parts_u32) as usize;
    (0..parts)
        .map(|index| share + u32::from(index < remainder))
        .collect()
}

/// Split `total` unevenly at random; every part receives at least one unit.
fn split_unevenly<R: Rng + ?Sized>(total: u32, parts: usize, rng: &mut R) -> Vec<u32> {
    if parts == 0 {
        return Vec::new();
    }
    let mut split = vec![1u32; parts];
    for _ in 0..total.saturating_sub(parts as u32) {
        let index = rng.random_range(0..parts);
        split[index] += 1;
    }
    split
}

#[allow(clippy::too_many_arguments)]
fn restore<R: Rng + ?Sized>(
    ctx: &CastContext<'_>,
    resources: &BTreeMap<Uuid, ResourceRecord>,
    kind: ResourceKind,
    dice: Dice,
    max_targets: usize,
    level: u32,
    caster_name: &str,
    rng: &mut R,
) -> Result<AbilityOutcome, Rejection> {
    let mut targets = distinct_targets(ctx.requested_targets, max_targets.max(1))?;
    if targets.is_empty() {
        targets.push(ctx.caster_id);
    }

    let mut records = Vec::with_capacity(targets.len());
    for target in &targets {
        let record = resources
            .get(target)
            .ok_or_else(|| Rejection::InvalidTargets(format!("{target} is not in this encounter")))?;
        if ctx.session.is_fallen(target) {
            return Err(Rejection::InvalidTargets(format!(
                "{} is fallen and needs a revive",
                record.display_name
            )));
        }
        records.push(record);
    }

    let headroom = |record: &ResourceRecord| match kind {
        ResourceKind::Hp => record.max_hp - record.hp,
        ResourceKind::Mp => record.max_mp - record.mp,
    };
    if records.iter().all(|record| headroom(record) == 0) {
        return Err(Rejection::TargetAtFullHealth);
    }

    let magnitude = dice.roll(rng) + level;
    let shares = split_evenly(magnitude, records.len());
    let mut deltas = Vec::with_capacity(records.len());
    let mut parts = Vec::with_capacity(records.len());
    for (record, share) in records.iter().zip(shares) {
        let gained = share.min(headroom(record));
        deltas.push(ResourceDelta::restore(record.participant_id, kind, gained));
        parts.push(format!("{} +{gained}", record.display_name));
    }

    let pool = match kind {
        ResourceKind::Hp => "HP",
        ResourceKind::Mp => "MP",
    };
    Ok(AbilityOutcome {
        resource_deltas: deltas,
        session_delta: SessionDelta::default(),
        log: format!(
            "{caster_name} cast {} restoring {pool}: {}",
            ctx.ability,
            parts.join(", ")
        ),
        notice: format!("{caster_name} used {}!", ctx.ability),
    })
}

fn party_heal(
    ctx: &CastContext<'_>,
    resources: &BTreeMap<Uuid, ResourceRecord>,
    level_fraction: f64,
    level: u32,
    caster_name: &str,
) -> Result<AbilityOutcome, Rejection> {
    let amount = ((f64::from(level) * level_fraction).ceil() as u32).max(1);
    let deltas: Vec<ResourceDelta> = resources
        .values()
        .filter(|record| !ctx.session.is_fallen(&record.participant_id) && record.is_damaged())
        .map(|record| {
            ResourceDelta::restore(
                record.participant_id,
                ResourceKind::Hp,
                amount.min(record.max_hp - record.hp),
            )
        })
        .collect();
    if deltas.is_empty() {
        return Err(Rejection::NothingToHeal);
    }

    Ok(AbilityOutcome {
        log: format!(
            "{caster_name} cast {} healing {} allies for up to {amount} HP",
            ctx.ability,
            deltas.len()
        ),
        notice: format!("{caster_name} healed the party!"),
        resource_deltas: deltas,
        session_delta: SessionDelta::default(),
    })
}

fn deferred_damage<R: Rng + ?Sized>(
    ctx: &CastContext<'_>,
    dice: Dice,
    level: u32,
    caster_name: &str,
    rng: &mut R,
) -> AbilityOutcome {
    let magnitude = dice.roll(rng) + level;
    AbilityOutcome {
        resource_deltas: Vec::new(),
        session_delta: SessionDelta {
            queued_effect: Some(QueuedEffect {
                caster_id: ctx.caster_id,
                ability: ctx.ability,
                kind: QueuedEffectKind::ContingentOnAnswer,
                magnitude,
            }),
            ..SessionDelta::default()
        },
        log: format!(
            "{caster_name} readied {} for {magnitude} damage if their answer is correct",
            ctx.ability
        ),
        notice: format!("{caster_name} is charging {}!", ctx.ability),
    }
}

fn remove_choice<R: Rng + ?Sized>(
    ctx: &CastContext<'_>,
    caster_name: &str,
    rng: &mut R,
) -> Result<AbilityOutcome, Rejection> {
    let question = ctx
        .session
        .current_question()
        .ok_or(Rejection::RoundClosed)?;
    let candidates: Vec<usize> = question
        .incorrect_choices()
        .filter(|choice| !ctx.session.removed_answer_choices.contains(choice))
        .collect();
    let removed = *candidates.choose(rng).ok_or(Rejection::NoChoicesLeft)?;

    Ok(AbilityOutcome {
        resource_deltas: Vec::new(),
        session_delta: SessionDelta {
            removed_choice: Some(removed),
            ..SessionDelta::default()
        },
        log: format!(
            "{caster_name} cast {} and removed \"{}\"",
            ctx.ability, question.choices[removed]
        ),
        notice: format!("{caster_name} removed a wrong answer!"),
    })
}

fn revive(
    ctx: &CastContext<'_>,
    resources: &BTreeMap<Uuid, ResourceRecord>,
    hp_fraction: f64,
    caster_name: &str,
) -> Result<AbilityOutcome, Rejection> {
    let targets = distinct_targets(ctx.requested_targets, 1)?;
    let [target] = targets[..] else {
        return Err(Rejection::InvalidTargets("revive needs one target".into()));
    };
    if target == ctx.caster_id {
        return Err(if ctx.session.is_fallen(&ctx.caster_id) {
            Rejection::CasterFallen
        } else {
            Rejection::TargetNotFallen
        });
    }
    let record = resources
        .get(&target)
        .ok_or_else(|| Rejection::InvalidTargets(format!("{target} is not in this encounter")))?;
    if !ctx.session.is_fallen(&target) {
        return Err(Rejection::TargetNotFallen);
    }

    let restored = ((f64::from(record.max_hp) * hp_fraction).ceil() as u32)
        .clamp(1, record.max_hp.max(1));
    let gained = restored.saturating_sub(record.hp);
    Ok(AbilityOutcome {
        resource_deltas: vec![ResourceDelta::restore(target, ResourceKind::Hp, gained)],
        session_delta: SessionDelta {
            revived: Some(target),
            ..SessionDelta::default()
        },
        log: format!(
            "{caster_name} revived {} with {restored} HP",
            record.display_name
        ),
        notice: format!("{} is back in the fight!", record.display_name),
    })
}

#[allow(clippy::too_many_arguments)]
fn buff<R: Rng + ?Sized>(
    ctx: &CastContext<'_>,
    kind: ResourceKind,
    dice: Dice,
    required_targets: usize,
    max_targets: usize,
    level: u32,
    caster_name: &str,
    rng: &mut R,
) -> Result<AbilityOutcome, Rejection> {
    let eligible: Vec<Uuid> = ctx
        .session
        .standing_participants()
        .into_iter()
        .filter(|id| !ctx.session.buffed_participant_ids.contains(id))
        .collect();
    if eligible.len() < required_targets.max(1) {
        return Err(Rejection::NotEnoughEligibleTargets {
            required: required_targets.max(1),
            available: eligible.len(),
        });
    }

    let mut targets = distinct_targets(ctx.requested_targets, max_targets)?;
    if targets.is_empty() {
        targets = eligible.clone();
        targets.shuffle(rng);
        targets.truncate(max_targets.max(required_targets).max(1));
    } else {
        if let Some(bad) = targets.iter().find(|id| !eligible.contains(id)) {
            return Err(Rejection::InvalidTargets(format!(
                "{} cannot receive {}",
                display_name(ctx.resources, bad),
                ctx.ability
            )));
        }
        if targets.len() < required_targets {
            return Err(Rejection::InvalidTargets(format!(
                "{} needs {required_targets} targets",
                ctx.ability
            )));
        }
    }

    let magnitude = (dice.roll(rng) + level).max(targets.len() as u32);
    let split = split_unevenly(magnitude, targets.len(), rng);
    let mut deltas = Vec::with_capacity(targets.len());
    let mut parts = Vec::with_capacity(targets.len());
    for (target, amount) in targets.iter().zip(split) {
        let mut delta = ResourceDelta::new(*target);
        match kind {
            ResourceKind::Hp => {
                delta.max_hp = amount;
                delta.hp = amount;
            }
            ResourceKind::Mp => {
                delta.max_mp = amount;
                delta.mp = amount;
            }
        }
        deltas.push(delta);
        parts.push(format!("{} +{amount}", display_name(ctx.resources, target)));
    }

    Ok(AbilityOutcome {
        resource_deltas: deltas,
        session_delta: SessionDelta {
            buffed: targets,
            ..SessionDelta::default()
        },
        log: format!(
            "{caster_name} cast {}: {}",
            ctx.ability,
            parts.join(", ")
        ),
        notice: format!("{caster_name} fortified the party!"),
    })
}

fn group_vote(
    ctx: &CastContext<'_>,
    bonus_damage: u32,
    caster_name: &str,
) -> Result<AbilityOutcome, Rejection> {
    if ctx.session.group_ability_uses >= ctx.rules.group_ability_cap {
        return Err(Rejection::GroupCapReached {
            cap: ctx.rules.group_ability_cap,
        });
    }
    if ctx.session.vote_state.is_some() {
        return Err(Rejection::VoteAlreadyActive);
    }

    let eligible = ctx.session.standing_participants();
    let vote = VoteState {
        id: Uuid::new_v4(),
        initiator_id: ctx.caster_id,
        round_index: ctx.session.round_index,
        votes_for: BTreeSet::from([ctx.caster_id]),
        votes_against: BTreeSet::new(),
        eligible_voter_count: eligible.len() as u32,
        eligible_voter_ids: eligible,
        deadline: ctx.now + ctx.rules.vote_window,
    };

    Ok(AbilityOutcome {
        resource_deltas: Vec::new(),
        session_delta: SessionDelta {
            vote: Some(vote),
            group_use: true,
            bonus_damage,
            ..SessionDelta::default()
        },
        log: format!(
            "{caster_name} cast {} for {bonus_damage} bonus damage and called a vote to skip the round",
            ctx.ability
        ),
        notice: format!("{caster_name} rallies the party: vote to skip the round!"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{
        session::{Boss, Question},
        state_machine::EncounterStatus,
    };
    use rand::{SeedableRng, rngs::StdRng};

    const NOW: SystemTime = SystemTime::UNIX_EPOCH;

    struct Fixture {
        session: SessionRecord,
        resources: BTreeMap<Uuid, ResourceRecord>,
        ids: Vec<Uuid>,
    }

    fn fixture(players: usize) -> Fixture {
        let host = Uuid::new_v4();
        let mut session = SessionRecord::new(
            Uuid::new_v4(),
            "raid".into(),
            host,
            Boss {
                name: "Hydra".into(),
                max_hp: 100,
            },
            vec![Question {
                prompt: "2+2?".into(),
                choices: vec!["3".into(), "4".into(), "5".into(), "22".into()],
                correct_choice: 1,
            }],
            NOW,
        );
        session.status = EncounterStatus::InProgress;
        let mut resources = BTreeMap::new();
        let mut ids = Vec::new();
        for index in 0..players {
            let id = Uuid::new_v4();
            session.participants.insert(id, format!("p{index}"));
            resources.insert(
                id,
                ResourceRecord {
                    participant_id: id,
                    display_name: format!("p{index}"),
                    hp: 20,
                    max_hp: 20,
                    mp: 10,
                    max_mp: 10,
                    level: 2,
                },
            );
            ids.push(id);
        }
        Fixture {
            session,
            resources,
            ids,
        }
    }

    fn rules() -> AbilityRules {
        AbilityRules {
            group_ability_cap: 2,
            vote_window: Duration::from_secs(10),
        }
    }

    fn cast(
        fx: &Fixture,
        ability: AbilityName,
        spec: &AbilitySpec,
        caster: Uuid,
        targets: &[Uuid],
    ) -> Result<AbilityOutcome, Rejection> {
        let ctx = CastContext {
            ability,
            spec,
            caster_id: caster,
            requested_targets: targets,
            session: &fx.session,
            resources: &fx.resources,
            rules: rules(),
            now: NOW,
        };
        resolve_ability(&ctx, &mut StdRng::seed_from_u64(7))
    }

    fn heal_spec(cost: u32) -> AbilitySpec {
        AbilitySpec {
            cost,
            effect: AbilityEffect::Restore {
                resource: ResourceKind::Hp,
                dice: Dice { count: 2, sides: 4 },
                max_targets: 3,
            },
        }
    }

    #[test]
    fn rejects_when_mana_is_short() {
        let fx = fixture(2);
        let err = cast(&fx, AbilityName::Heal, &heal_spec(11), fx.ids[0], &[]).unwrap_err();
        assert_eq!(
            err,
            Rejection::InsufficientMana {
                needed: 11,
                available: 10
            }
        );
    }

    #[test]
    fn rejects_second_cast_in_same_round() {
        let mut fx = fixture(2);
        fx.session
            .ability_users_this_round
            .insert(fx.ids[0], BTreeSet::from([AbilityName::Smite]));
        let err = cast(&fx, AbilityName::Heal, &heal_spec(1), fx.ids[0], &[fx.ids[1]]).unwrap_err();
        assert_eq!(err, Rejection::AlreadyCastThisRound);
    }

    #[test]
    fn heal_on_full_health_is_rejected() {
        let fx = fixture(2);
        let err = cast(&fx, AbilityName::Heal, &heal_spec(1), fx.ids[0], &[fx.ids[1]]).unwrap_err();
        assert_eq!(err, Rejection::TargetAtFullHealth);
    }

    #[test]
    fn heal_is_split_and_clamped() {
        let mut fx = fixture(3);
        fx.resources.get_mut(&fx.ids[1]).unwrap().hp = 19;
        fx.resources.get_mut(&fx.ids[2]).unwrap().hp = 5;
        let outcome = cast(
            &fx,
            AbilityName::Heal,
            &heal_spec(1),
            fx.ids[0],
            &[fx.ids[1], fx.ids[2]],
        )
        .unwrap();
        assert_eq!(outcome.resource_deltas.len(), 2);
        assert_eq!(outcome.resource_deltas[0].hp, 1);
        assert!(outcome.resource_deltas[1].hp >= 2);
        assert!(outcome.resource_deltas[1].hp <= 15);
    }

    #[test]
    fn split_evenly_hands_remainder_round_robin() {
        assert_eq!(split_evenly(10, 3), vec![4, 3, 3]);
        assert_eq!(split_evenly(2, 3), vec![1, 1, 0]);
    }

    #[test]
    fn split_unevenly_preserves_total_and_minimum() {
        let mut rng = StdRng::seed_from_u64(3);
        let split = split_unevenly(9, 3, &mut rng);
        assert_eq!(split.iter().sum::<u32>(), 9);
        assert!(split.iter().all(|part| *part >= 1));
    }

    #[test]
    fn replenish_on_self_accounts_for_cost() {
        let fx = fixture(1);
        let spec = AbilitySpec {
            cost: 4,
            effect: AbilityEffect::Restore {
                resource: ResourceKind::Mp,
                dice: Dice { count: 5, sides: 6 },
                max_targets: 1,
            },
        };
        let outcome = cast(&fx, AbilityName::Replenish, &spec, fx.ids[0], &[]).unwrap();
        assert_eq!(outcome.resource_deltas[0].mp, 4);
    }

    #[test]
    fn fallen_caster_may_only_revive_others() {
        let mut fx = fixture(3);
        fx.session.fallen_participant_ids.insert(fx.ids[0]);
        fx.session.fallen_participant_ids.insert(fx.ids[1]);
        fx.resources.get_mut(&fx.ids[1]).unwrap().hp = 0;

        let err = cast(&fx, AbilityName::Heal, &heal_spec(1), fx.ids[0], &[fx.ids[2]]).unwrap_err();
        assert_eq!(err, Rejection::CasterFallen);

        let revive_spec = AbilitySpec {
            cost: 5,
            effect: AbilityEffect::Revive { hp_fraction: 0.5 },
        };
        let err = cast(&fx, AbilityName::Revive, &revive_spec, fx.ids[0], &[fx.ids[0]]).unwrap_err();
        assert_eq!(err, Rejection::CasterFallen);

        let outcome = cast(&fx, AbilityName::Revive, &revive_spec, fx.ids[0], &[fx.ids[1]]).unwrap();
        assert_eq!(outcome.session_delta.revived, Some(fx.ids[1]));
        assert_eq!(outcome.resource_deltas[0].hp, 10);
    }

    #[test]
    fn revive_on_standing_target_is_rejected() {
        let fx = fixture(2);
        let spec = AbilitySpec {
            cost: 5,
            effect: AbilityEffect::Revive { hp_fraction: 0.5 },
        };
        let err = cast(&fx, AbilityName::Revive, &spec, fx.ids[0], &[fx.ids[1]]).unwrap_err();
        assert_eq!(err, Rejection::TargetNotFallen);
    }

    #[test]
    fn party_heal_skips_fallen_and_healthy() {
        let mut fx = fixture(3);
        fx.resources.get_mut(&fx.ids[1]).unwrap().hp = 10;
        fx.resources.get_mut(&fx.ids[2]).unwrap().hp = 0;
        fx.session.fallen_participant_ids.insert(fx.ids[2]);
        let spec = AbilitySpec {
            cost: 3,
            effect: AbilityEffect::PartyHeal {
                level_fraction: 1.5,
            },
        };
        let outcome = cast(&fx, AbilityName::Mend, &spec, fx.ids[0], &[]).unwrap();
        assert_eq!(
            outcome.resource_deltas,
            vec![ResourceDelta::restore(fx.ids[1], ResourceKind::Hp, 3)]
        );
    }

    #[test]
    fn smite_is_queued_as_contingent() {
        let fx = fixture(1);
        let spec = AbilitySpec {
            cost: 2,
            effect: AbilityEffect::DeferredDamage {
                dice: Dice { count: 1, sides: 6 },
            },
        };
        let outcome = cast(&fx, AbilityName::Smite, &spec, fx.ids[0], &[]).unwrap();
        let effect = outcome.session_delta.queued_effect.unwrap();
        assert_eq!(effect.kind, QueuedEffectKind::ContingentOnAnswer);
        assert!((3..=8).contains(&effect.magnitude));
        assert!(outcome.resource_deltas.is_empty());
    }

    #[test]
    fn insight_removes_an_incorrect_choice_until_none_left() {
        let mut fx = fixture(1);
        let spec = AbilitySpec {
            cost: 1,
            effect: AbilityEffect::RemoveChoice,
        };
        let outcome = cast(&fx, AbilityName::Insight, &spec, fx.ids[0], &[]).unwrap();
        let removed = outcome.session_delta.removed_choice.unwrap();
        assert_ne!(removed, 1);

        fx.session.removed_answer_choices = BTreeSet::from([0, 2, 3]);
        let err = cast(&fx, AbilityName::Insight, &spec, fx.ids[0], &[]).unwrap_err();
        assert_eq!(err, Rejection::NoChoicesLeft);
    }

    #[test]
    fn fortify_needs_enough_unbuffed_targets() {
        let mut fx = fixture(3);
        let spec = AbilitySpec {
            cost: 2,
            effect: AbilityEffect::Buff {
                resource: ResourceKind::Hp,
                dice: Dice { count: 2, sides: 6 },
                required_targets: 2,
                max_targets: 2,
            },
        };
        let outcome = cast(&fx, AbilityName::Fortify, &spec, fx.ids[0], &[]).unwrap();
        assert_eq!(outcome.session_delta.buffed.len(), 2);
        for delta in &outcome.resource_deltas {
            assert_eq!(delta.max_hp, delta.hp);
            assert!(delta.max_hp >= 1);
        }

        fx.session.buffed_participant_ids = BTreeSet::from([fx.ids[0], fx.ids[1]]);
        let err = cast(&fx, AbilityName::Fortify, &spec, fx.ids[0], &[]).unwrap_err();
        assert_eq!(
            err,
            Rejection::NotEnoughEligibleTargets {
                required: 2,
                available: 1
            }
        );
    }

    #[test]
    fn rally_opens_vote_with_initiator_in_favour() {
        let mut fx = fixture(4);
        fx.session.fallen_participant_ids.insert(fx.ids[3]);
        let spec = AbilitySpec {
            cost: 5,
            effect: AbilityEffect::GroupVote { bonus_damage: 3 },
        };
        let outcome = cast(&fx, AbilityName::Rally, &spec, fx.ids[0], &[]).unwrap();
        let vote = outcome.session_delta.vote.clone().unwrap();
        assert_eq!(vote.eligible_voter_count, 3);
        assert!(vote.votes_for.contains(&fx.ids[0]));
        assert_eq!(vote.deadline, NOW + Duration::from_secs(10));
        assert!(outcome.session_delta.group_use);
        assert_eq!(outcome.session_delta.bonus_damage, 3);
        assert!(outcome.session_delta.queued_effect.is_none());

        let mut session = fx.session.clone();
        session.total_damage = DamageTally::new(4, 1);
        outcome.session_delta.clone().apply(&mut session);
        assert_eq!(session.round_damage, DamageTally::new(0, 3));
        assert_eq!(session.total_damage, DamageTally::new(4, 4));
        assert_eq!(session.group_ability_uses, 1);

        fx.session.vote_state = Some(vote);
        let err = cast(&fx, AbilityName::Rally, &spec, fx.ids[1], &[]).unwrap_err();
        assert_eq!(err, Rejection::VoteAlreadyActive);

        fx.session.vote_state = None;
        fx.session.group_ability_uses = 2;
        let err = cast(&fx, AbilityName::Rally, &spec, fx.ids[1], &[]).unwrap_err();
        assert_eq!(err, Rejection::GroupCapReached { cap: 2 });
    }

    #[test]
    fn closed_round_rejects_everything() {
        let mut fx = fixture(1);
        fx.session.status = EncounterStatus::ShowingResults;
        let spec = AbilitySpec {
            cost: 1,
            effect: AbilityEffect::RemoveChoice,
        };
        let err = cast(&fx, AbilityName::Insight, &spec, fx.ids[0], &[]).unwrap_err();
        assert_eq!(err, Rejection::RoundClosed);
    }

    #[test]
    fn delta_raises_max_before_clamping() {
        let mut record = ResourceRecord {
            participant_id: Uuid::new_v4(),
            display_name: "p".into(),
            hp: 18,
            max_hp: 20,
            mp: 0,
            max_mp: 5,
            level: 1,
        };
        ResourceDelta {
            participant_id: record.participant_id,
            hp: 5,
            max_hp: 4,
            ..ResourceDelta::default()
        }
        .apply(&mut record);
        assert_eq!((record.hp, record.max_hp), (23, 24));
    }
}
