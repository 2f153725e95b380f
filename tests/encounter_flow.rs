use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use raid_sync_back::{
    config::{AppConfig, ResourceDefaults},
    dao::archive_store::{ArchiveStore, memory::MemoryArchiveStore},
    dto::{
        actions::{AbilityCastRequest, SubmitAnswerRequest, VoteRequest},
        encounter::{BossInput, CreateEncounterRequest, JoinRequest, QuestionInput},
    },
    error::ServiceError,
    services::{
        ability_service::{self, RequestResolution},
        answer_service, encounter_service, finalize_service, lifecycle_service, summary_service,
        vote_service::{self, VoteResolution},
    },
    state::{
        AppState, SharedState,
        abilities::{AbilityEffect, AbilityName, Rejection},
        clock::ManualClock,
        session::{ArchiveState, DamageTally, RoundOutcome},
        state_machine::EncounterStatus,
        vote::{BallotStatus, VoteChoice},
    },
};
use uuid::Uuid;

fn encounter_request(questions: usize) -> CreateEncounterRequest {
    CreateEncounterRequest {
        name: "Crypt".into(),
        boss: BossInput {
            name: "Lich".into(),
            max_hp: 500,
        },
        questions: (0..questions)
            .map(|index| QuestionInput {
                prompt: format!("question {index}"),
                choices: vec!["right".into(), "wrong".into(), "worse".into()],
                correct_choice: 0,
            })
            .collect(),
    }
}

struct Harness {
    state: SharedState,
    clock: Arc<ManualClock>,
    encounter_id: Uuid,
    host: Uuid,
    players: Vec<Uuid>,
}

impl Harness {
    async fn new(config: AppConfig, players: usize, questions: usize) -> Self {
        let clock = Arc::new(ManualClock::new(SystemTime::now()));
        let state = AppState::with_clock(config, clock.clone());
        let host = Uuid::new_v4();
        let session = encounter_service::create_encounter(&state, host, encounter_request(questions))
            .await
            .unwrap();

        let mut ids = Vec::new();
        for index in 0..players {
            let id = Uuid::new_v4();
            encounter_service::join_encounter(
                &state,
                session.id,
                id,
                JoinRequest {
                    display_name: Some(format!("player-{index}")),
                },
            )
            .await
            .unwrap();
            ids.push(id);
        }

        Self {
            state,
            clock,
            encounter_id: session.id,
            host,
            players: ids,
        }
    }

    async fn start(&self) {
        let outcome = lifecycle_service::start(&self.state, self.encounter_id, self.host)
            .await
            .unwrap();
        assert!(outcome.applied);
    }

    async fn answer(&self, player: Uuid, choice: usize) -> bool {
        let round_index = self.session().round_index;
        answer_service::submit_answer(
            &self.state,
            self.encounter_id,
            player,
            SubmitAnswerRequest {
                round_index,
                choice,
            },
        )
        .await
        .unwrap()
    }

    async fn cast(
        &self,
        caster: Uuid,
        ability: AbilityName,
        targets: Vec<Uuid>,
    ) -> ability_service::CastOutcome {
        ability_service::submit_ability(
            &self.state,
            self.encounter_id,
            caster,
            AbilityCastRequest {
                request_id: None,
                ability,
                targets,
            },
        )
        .await
        .unwrap()
    }

    /// End the round and let its grace window run out.
    async fn close_round(&self) {
        let round_index = self.session().round_index;
        lifecycle_service::end_round(&self.state, self.encounter_id, self.host, None)
            .await
            .unwrap();
        self.clock
            .advance(self.state.config().round_grace + Duration::from_secs(1));
        let outcome = lifecycle_service::expire_round(&self.state, self.encounter_id, round_index)
            .await
            .unwrap();
        assert!(outcome.applied);
    }

    fn session(&self) -> raid_sync_back::state::session::SessionRecord {
        encounter_service::snapshot(&self.state, self.encounter_id).unwrap()
    }

    fn resource(&self, player: Uuid) -> raid_sync_back::state::session::ResourceRecord {
        encounter_service::participants(&self.state, self.encounter_id)
            .unwrap()
            .into_iter()
            .find(|record| record.participant_id == player)
            .unwrap()
    }
}

fn cast_on(
    state: &SharedState,
    encounter_id: Uuid,
    caster: Uuid,
    ability: AbilityName,
) -> tokio::task::JoinHandle<Result<ability_service::CastOutcome, ServiceError>> {
    let state = state.clone();
    tokio::spawn(async move {
        ability_service::submit_ability(
            &state,
            encounter_id,
            caster,
            AbilityCastRequest {
                request_id: None,
                ability,
                targets: Vec::new(),
            },
        )
        .await
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_casts_from_one_caster_apply_once() {
    let config = AppConfig {
        resources: ResourceDefaults {
            base_hp: 20,
            hp_per_level: 5,
            base_mp: 200,
            mp_per_level: 0,
        },
        ..AppConfig::default()
    };
    let cost = config.ability(AbilityName::Smite).unwrap().cost;

    for _ in 0..20 {
        let harness = Harness::new(config.clone(), 2, 1).await;
        harness.start().await;
        let caster = harness.players[0];

        let handles: Vec<_> = (0..8)
            .map(|_| cast_on(&harness.state, harness.encounter_id, caster, AbilityName::Smite))
            .collect();
        let mut applied = 0;
        for handle in handles {
            // No drainer runs here, so each handler resolves its own request.
            match handle.await.unwrap().unwrap().resolution {
                RequestResolution::Applied { .. } => applied += 1,
                RequestResolution::Rejected(reason) => {
                    assert_eq!(reason, Rejection::AlreadyCastThisRound)
                }
                RequestResolution::Gone => panic!("request consumed by someone else"),
            }
        }
        assert_eq!(applied, 1);

        assert_eq!(harness.resource(caster).mp, 200 - cost);
        let session = harness.session();
        assert_eq!(session.queued_ability_effects.len(), 1);
        assert_eq!(session.consumed_request_ids.len(), 8);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mp_for_a_single_cast_pays_for_exactly_one() {
    let mut config = AppConfig {
        resources: ResourceDefaults {
            base_hp: 20,
            hp_per_level: 5,
            base_mp: 8,
            mp_per_level: 2,
        },
        ..AppConfig::default()
    };
    config
        .abilities
        .get_mut(&AbilityName::Smite)
        .unwrap()
        .cost = 10;
    let harness = Harness::new(config, 2, 1).await;
    harness.start().await;
    let caster = harness.players[0];
    assert_eq!(harness.resource(caster).mp, 10);

    let first = cast_on(&harness.state, harness.encounter_id, caster, AbilityName::Smite);
    let second = cast_on(&harness.state, harness.encounter_id, caster, AbilityName::Smite);
    let outcomes = [first.await.unwrap().unwrap(), second.await.unwrap().unwrap()];
    let applied = outcomes
        .iter()
        .filter(|outcome| matches!(outcome.resolution, RequestResolution::Applied { .. }))
        .count();
    assert_eq!(applied, 1);

    assert_eq!(harness.resource(caster).mp, 0);
    assert_eq!(harness.session().queued_ability_effects.len(), 1);
}

#[tokio::test]
async fn duplicate_request_id_is_acknowledged_once() {
    let harness = Harness::new(AppConfig::default(), 2, 1).await;
    harness.start().await;
    let caster = harness.players[0];
    let request_id = Uuid::new_v4();

    let submit = || {
        ability_service::submit_ability(
            &harness.state,
            harness.encounter_id,
            caster,
            AbilityCastRequest {
                request_id: Some(request_id),
                ability: AbilityName::Smite,
                targets: Vec::new(),
            },
        )
    };
    let first = submit().await.unwrap();
    let second = submit().await.unwrap();

    assert!(!first.duplicate);
    assert!(matches!(first.resolution, RequestResolution::Applied { .. }));
    assert!(second.duplicate);
    assert_eq!(harness.session().queued_ability_effects.len(), 1);
}

#[tokio::test]
async fn round_resolves_once_when_timers_race() {
    let harness = Harness::new(AppConfig::default(), 3, 2).await;
    harness.start().await;
    for player in &harness.players {
        harness.answer(*player, 0).await;
    }
    lifecycle_service::end_round(&harness.state, harness.encounter_id, harness.host, Some(0))
        .await
        .unwrap();

    let early = lifecycle_service::expire_round(&harness.state, harness.encounter_id, 0).await;
    assert!(matches!(early, Err(ServiceError::InvalidState(_))));

    harness
        .clock
        .advance(harness.state.config().round_grace + Duration::from_secs(1));
    let (a, b, c) = tokio::join!(
        lifecycle_service::expire_round(&harness.state, harness.encounter_id, 0),
        lifecycle_service::expire_round(&harness.state, harness.encounter_id, 0),
        lifecycle_service::expire_round(&harness.state, harness.encounter_id, 0),
    );
    let applied = [a.unwrap(), b.unwrap(), c.unwrap()]
        .iter()
        .filter(|outcome| outcome.applied)
        .count();
    assert_eq!(applied, 1);

    let session = harness.session();
    assert_eq!(session.status, EncounterStatus::ShowingResults);
    assert_eq!(session.round_history.len(), 1);
    assert_eq!(session.total_damage.base, 3);

    // A second end-round for the same round is a stale no-op.
    let stale = lifecycle_service::end_round(&harness.state, harness.encounter_id, harness.host, Some(0))
        .await
        .unwrap();
    assert!(!stale.applied);
}

#[tokio::test]
async fn deferred_damage_fizzles_on_a_wrong_answer() {
    let harness = Harness::new(AppConfig::default(), 2, 1).await;
    harness.start().await;
    let (caster, other) = (harness.players[0], harness.players[1]);

    let outcome = harness.cast(caster, AbilityName::Smite, Vec::new()).await;
    assert!(matches!(outcome.resolution, RequestResolution::Applied { .. }));
    harness.answer(caster, 1).await;
    harness.answer(other, 0).await;
    harness.close_round().await;

    let session = harness.session();
    assert_eq!(session.round_damage.from_abilities, 0);
    assert_eq!(session.round_damage.base, 1);
    assert_eq!(session.round_damage.total, 1);
    let record = session.round_history.last().unwrap();
    assert_eq!(record.outcomes[&caster], RoundOutcome::Incorrect);
}

#[tokio::test]
async fn deferred_damage_lands_on_a_correct_answer() {
    let harness = Harness::new(AppConfig::default(), 1, 1).await;
    harness.start().await;
    let caster = harness.players[0];

    harness.cast(caster, AbilityName::Smite, Vec::new()).await;
    harness.answer(caster, 0).await;
    harness.close_round().await;

    let damage = harness.session().round_damage;
    // 2d6 plus the caster level.
    assert!((3..=13).contains(&damage.from_abilities));
    assert_eq!(damage.total, damage.base + damage.from_abilities);
}

#[tokio::test]
async fn revive_on_a_standing_target_changes_nothing() {
    let harness = Harness::new(AppConfig::default(), 2, 1).await;
    harness.start().await;
    let (caster, target) = (harness.players[0], harness.players[1]);
    let before = harness.resource(target);
    let caster_mp = harness.resource(caster).mp;

    let outcome = harness.cast(caster, AbilityName::Revive, vec![target]).await;

    assert_eq!(
        outcome.resolution,
        RequestResolution::Rejected(Rejection::TargetNotFallen)
    );
    assert_eq!(harness.resource(target), before);
    assert_eq!(harness.resource(caster).mp, caster_mp);
    let session = harness.session();
    assert!(session.ability_users_this_round.is_empty());
    let notice = session.targeted_event.unwrap();
    assert_eq!(notice.target_id, caster);
    assert!(notice.text.contains("not fallen"));
}

#[tokio::test]
async fn penalty_larger_than_hp_leaves_the_participant_fallen() {
    let config = AppConfig {
        round_damage_penalty: 3,
        resources: ResourceDefaults {
            base_hp: 0,
            hp_per_level: 2,
            base_mp: 10,
            mp_per_level: 0,
        },
        ..AppConfig::default()
    };
    let harness = Harness::new(config, 2, 2).await;
    harness.start().await;
    let (silent, answering) = (harness.players[0], harness.players[1]);
    harness.answer(answering, 0).await;
    harness.close_round().await;

    assert_eq!(harness.resource(silent).hp, 0);
    assert_eq!(harness.resource(answering).hp, 2);
    let session = harness.session();
    assert!(session.is_fallen(&silent));
    assert!(!session.is_fallen(&answering));

    // Fallen participants cannot answer the next round.
    lifecycle_service::advance(&harness.state, harness.encounter_id, harness.host, Some(0))
        .await
        .unwrap();
    let refused = answer_service::submit_answer(
        &harness.state,
        harness.encounter_id,
        silent,
        SubmitAnswerRequest {
            round_index: 1,
            choice: 0,
        },
    )
    .await;
    assert!(matches!(refused, Err(ServiceError::InvalidState(_))));
}

#[tokio::test]
async fn only_the_first_answer_counts() {
    let harness = Harness::new(AppConfig::default(), 1, 1).await;
    harness.start().await;
    let player = harness.players[0];

    assert!(harness.answer(player, 1).await);
    assert!(!harness.answer(player, 0).await);
    harness.close_round().await;

    let record = harness.session().round_history.pop().unwrap();
    assert_eq!(record.answers[&player], 1);
    assert_eq!(record.outcomes[&player], RoundOutcome::Incorrect);
}

#[tokio::test]
async fn passing_vote_skips_the_round() {
    let harness = Harness::new(AppConfig::default(), 3, 2).await;
    harness.start().await;
    let (initiator, ally) = (harness.players[0], harness.players[1]);

    let outcome = harness.cast(initiator, AbilityName::Rally, Vec::new()).await;
    assert!(matches!(outcome.resolution, RequestResolution::Applied { .. }));
    let vote_id = harness.session().vote_state.unwrap().id;

    let receipt = vote_service::cast_vote(
        &harness.state,
        harness.encounter_id,
        ally,
        VoteRequest {
            choice: VoteChoice::For,
        },
    )
    .await
    .unwrap();
    assert_eq!(receipt.status, BallotStatus::Recorded);

    let early = vote_service::resolve_vote(&harness.state, harness.encounter_id, vote_id).await;
    assert!(matches!(early, Err(ServiceError::InvalidState(_))));

    harness
        .clock
        .advance(harness.state.config().vote_window + Duration::from_secs(1));
    let resolution = vote_service::resolve_vote(&harness.state, harness.encounter_id, vote_id)
        .await
        .unwrap();
    assert_eq!(resolution, VoteResolution::Passed);

    let session = harness.session();
    assert_eq!(session.status, EncounterStatus::ShowingResults);
    assert!(session.vote_state.is_none());
    let record = session.round_history.last().unwrap();
    assert!(record.skipped);
    // Skipped rounds deal no base damage and no penalties, but the rally bonus lands.
    assert_eq!(session.round_damage.base, 0);
    assert!(session.round_damage.from_abilities > 0);
    for player in &harness.players {
        let resource = harness.resource(*player);
        assert_eq!(resource.hp, resource.max_hp);
    }

    let again = vote_service::resolve_vote(&harness.state, harness.encounter_id, vote_id)
        .await
        .unwrap();
    assert_eq!(again, VoteResolution::Stale);
}

#[tokio::test]
async fn failing_vote_is_cleared_and_the_round_goes_on() {
    let harness = Harness::new(AppConfig::default(), 3, 1).await;
    harness.start().await;
    let initiator = harness.players[0];

    harness.cast(initiator, AbilityName::Rally, Vec::new()).await;
    let vote_id = harness.session().vote_state.unwrap().id;
    vote_service::cast_vote(
        &harness.state,
        harness.encounter_id,
        harness.players[1],
        VoteRequest {
            choice: VoteChoice::Against,
        },
    )
    .await
    .unwrap();

    harness
        .clock
        .advance(harness.state.config().vote_window + Duration::from_secs(1));
    let resolution = vote_service::resolve_vote(&harness.state, harness.encounter_id, vote_id)
        .await
        .unwrap();
    assert_eq!(resolution, VoteResolution::Failed);

    let session = harness.session();
    assert_eq!(session.status, EncounterStatus::InProgress);
    assert!(session.vote_state.is_none());
    assert!(session.round_history.is_empty());
    assert!(
        session
            .broadcast_event
            .as_ref()
            .is_some_and(|notice| notice.text.contains("failed"))
    );
}

#[tokio::test]
async fn advancing_past_the_last_question_is_refused() {
    let harness = Harness::new(AppConfig::default(), 1, 1).await;
    harness.start().await;
    harness.close_round().await;

    let refused =
        lifecycle_service::advance(&harness.state, harness.encounter_id, harness.host, Some(0))
            .await;
    assert!(matches!(refused, Err(ServiceError::InvalidState(_))));
}

#[tokio::test]
async fn host_only_transitions_reject_other_callers() {
    let harness = Harness::new(AppConfig::default(), 1, 1).await;
    let refused =
        lifecycle_service::start(&harness.state, harness.encounter_id, harness.players[0]).await;
    assert!(matches!(refused, Err(ServiceError::Unauthorized(_))));
}

#[tokio::test]
async fn finalize_retries_the_archive_until_it_succeeds() {
    let harness = Harness::new(AppConfig::default(), 2, 1).await;
    let archive = MemoryArchiveStore::new();
    harness
        .state
        .set_archive_store(Arc::new(archive.clone()))
        .await;
    harness.start().await;
    for player in &harness.players {
        harness.answer(*player, 0).await;
    }
    lifecycle_service::end_round(&harness.state, harness.encounter_id, harness.host, None)
        .await
        .unwrap();

    archive.set_failing(true);
    let failed = lifecycle_service::finalize(&harness.state, harness.encounter_id, harness.host).await;
    assert!(matches!(failed, Err(ServiceError::Unavailable(_))));
    let session = harness.session();
    assert_eq!(session.status, EncounterStatus::Ended);
    assert_eq!(session.archive, Some(ArchiveState::Pending));
    // Finalizing from the grace window resolved the round first.
    assert_eq!(session.round_history.len(), 1);
    let ended_at = session.ended_at.unwrap();

    let refused =
        encounter_service::teardown(&harness.state, harness.encounter_id, harness.host).await;
    assert!(matches!(refused, Err(ServiceError::InvalidState(_))));

    archive.set_failing(false);
    harness.clock.advance(Duration::from_secs(90));
    let outcome = lifecycle_service::finalize(&harness.state, harness.encounter_id, harness.host)
        .await
        .unwrap();
    assert!(!outcome.applied);
    assert_eq!(outcome.session.archive, Some(ArchiveState::Archived));
    // The retry keeps the original end time.
    assert_eq!(outcome.session.ended_at, Some(ended_at));
    let stored = archive
        .find_summary(harness.encounter_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.ended_at, ended_at);

    // Archiving again pays nobody twice.
    finalize_service::archive(&harness.state, harness.encounter_id)
        .await
        .unwrap();
    let summary = summary_service::get_summary(&harness.state, harness.encounter_id)
        .await
        .unwrap();
    assert_eq!(summary.rounds.len(), 1);
    assert_eq!(summary.rewards.len(), 2);
    let rules = harness.state.config().rewards;
    let profile = archive
        .find_profile(harness.players[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(profile.gold, rules.gold_per_correct + rules.participation_gold);

    encounter_service::teardown(&harness.state, harness.encounter_id, harness.host)
        .await
        .unwrap();
    assert!(matches!(
        encounter_service::snapshot(&harness.state, harness.encounter_id),
        Err(ServiceError::NotFound(_))
    ));
}

#[tokio::test]
async fn degraded_mode_joins_with_default_resources() {
    let harness = Harness::new(AppConfig::default(), 1, 1).await;
    assert!(harness.state.is_degraded());

    let record = harness.resource(harness.players[0]);
    let (max_hp, max_mp) = harness.state.config().resources.for_level(1);
    assert_eq!((record.level, record.max_hp, record.max_mp), (1, max_hp, max_mp));

    let summaries = summary_service::list_summaries(&harness.state).await;
    assert!(matches!(summaries, Err(ServiceError::Degraded)));
}

#[tokio::test]
async fn rally_bonus_counts_even_when_the_round_is_abandoned() {
    let harness = Harness::new(AppConfig::default(), 2, 2).await;
    let archive = MemoryArchiveStore::new();
    harness
        .state
        .set_archive_store(Arc::new(archive.clone()))
        .await;
    harness.start().await;
    let bonus = match &harness.state.config().ability(AbilityName::Rally).unwrap().effect {
        AbilityEffect::GroupVote { bonus_damage } => *bonus_damage,
        _ => panic!("rally is a group vote"),
    };

    let outcome = harness.cast(harness.players[0], AbilityName::Rally, Vec::new()).await;
    assert!(matches!(outcome.resolution, RequestResolution::Applied { .. }));
    let session = harness.session();
    assert_eq!(session.round_damage, DamageTally::new(0, bonus));
    assert_eq!(session.total_damage, DamageTally::new(0, bonus));

    let outcome = lifecycle_service::finalize(&harness.state, harness.encounter_id, harness.host)
        .await
        .unwrap();
    assert!(outcome.applied);
    assert_eq!(outcome.session.status, EncounterStatus::Ended);
    assert!(outcome.session.round_history.is_empty());
    assert_eq!(outcome.session.total_damage, DamageTally::new(0, bonus));

    let summary = summary_service::get_summary(&harness.state, harness.encounter_id)
        .await
        .unwrap();
    assert_eq!(summary.final_damage.from_abilities, bonus);
}

#[tokio::test]
async fn resolved_round_adds_to_the_rally_bonus() {
    let harness = Harness::new(AppConfig::default(), 2, 1).await;
    harness.start().await;
    let caster = harness.players[0];
    harness.cast(caster, AbilityName::Rally, Vec::new()).await;
    let bonus = harness.session().round_damage.from_abilities;
    assert!(bonus > 0);

    for player in &harness.players {
        harness.answer(*player, 0).await;
    }
    harness.close_round().await;

    let session = harness.session();
    assert_eq!(session.round_damage, DamageTally::new(2, bonus));
    assert_eq!(session.total_damage, DamageTally::new(2, bonus));
    assert_eq!(session.round_history[0].damage, DamageTally::new(2, bonus));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_finalizes_credit_a_shared_player_once_each() {
    let harness = Harness::new(AppConfig::default(), 1, 1).await;
    let archive = MemoryArchiveStore::new();
    harness
        .state
        .set_archive_store(Arc::new(archive.clone()))
        .await;
    let state = harness.state.clone();
    let player = harness.players[0];

    let other_host = Uuid::new_v4();
    let other = encounter_service::create_encounter(&state, other_host, encounter_request(1))
        .await
        .unwrap();
    encounter_service::join_encounter(&state, other.id, player, JoinRequest::default())
        .await
        .unwrap();

    let encounters = [(harness.encounter_id, harness.host), (other.id, other_host)];
    for (encounter_id, host) in encounters {
        lifecycle_service::start(&state, encounter_id, host)
            .await
            .unwrap();
        answer_service::submit_answer(
            &state,
            encounter_id,
            player,
            SubmitAnswerRequest {
                round_index: 0,
                choice: 0,
            },
        )
        .await
        .unwrap();
        lifecycle_service::end_round(&state, encounter_id, host, None)
            .await
            .unwrap();
    }

    let handles: Vec<_> = encounters
        .iter()
        .map(|&(encounter_id, host)| {
            let state = state.clone();
            tokio::spawn(async move { lifecycle_service::finalize(&state, encounter_id, host).await })
        })
        .collect();
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.session.archive, Some(ArchiveState::Archived));
    }

    let rules = state.config().rewards;
    let profile = archive.find_profile(player).await.unwrap().unwrap();
    assert_eq!(profile.rewarded_encounters.len(), 2);
    assert_eq!(
        profile.gold,
        2 * (rules.gold_per_correct + rules.participation_gold)
    );
}
