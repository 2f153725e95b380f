//! Ability request queue and resolution engine.
//!
//! A cast is first queued as an [`AbilityRequest`] document, then consumed by a
//! single transaction that validates it against fresh data, applies its effect
//! and deletes it. A request that is already gone was consumed by another
//! resolver and is skipped, which makes resolution safe to trigger from the
//! submitting handler and from the background drainer at the same time.

use std::{
    collections::{BTreeSet, HashSet},
    time::Duration,
};

use rand::{Rng, SeedableRng, rngs::StdRng};
use tokio::{sync::broadcast::error::RecvError, time::sleep};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::document_store::{Document, keys},
    dto::actions::AbilityCastRequest,
    error::ServiceError,
    services::{
        notice_service::{self, post_broadcast, post_targeted},
        records::{
            append_log, load_resources, load_session, require_participant, save_resource,
            save_session,
        },
        vote_service,
    },
    state::{
        SharedState,
        abilities::{CastContext, Rejection, resolve_ability},
        session::{AbilityRequest, VoteState},
    },
};

/// Head start given to the submitting handler before the drainer looks at a
/// freshly queued request.
const DRAIN_SETTLE_DELAY: Duration = Duration::from_millis(250);

/// What happened to one queued request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestResolution {
    /// Effect applied, MP charged.
    Applied {
        /// Battle log line written for the cast.
        log: String,
    },
    /// Dropped without effect or cost.
    Rejected(Rejection),
    /// Already consumed by another resolver.
    Gone,
}

/// Result of a cast submitted by a participant.
#[derive(Debug, Clone, PartialEq)]
pub struct CastOutcome {
    /// Idempotency key of the request.
    pub request_id: Uuid,
    /// True when the same request id was already queued or consumed.
    pub duplicate: bool,
    /// Resolution observed by the submitting handler.
    pub resolution: RequestResolution,
}

/// Queue an ability request and try to resolve it right away.
pub async fn submit_ability(
    state: &SharedState,
    encounter_id: Uuid,
    caster_id: Uuid,
    request: AbilityCastRequest,
) -> Result<CastOutcome, ServiceError> {
    let request_id = request.request_id.unwrap_or_else(Uuid::new_v4);
    let spec = state.config().ability(request.ability).ok_or_else(|| {
        ServiceError::InvalidInput(format!("ability `{}` is not available", request.ability))
    })?;
    let now = state.now();

    let duplicate = state
        .documents()
        .run_transaction(|tx| -> Result<_, ServiceError> {
            let session = load_session(tx, encounter_id)?;
            require_participant(&session, caster_id)?;
            if session.consumed_request_ids.contains(&request_id)
                || tx
                    .get::<AbilityRequest>(&keys::request(encounter_id, request_id))?
                    .is_some()
            {
                return Ok(true);
            }
            if !session.accepts_round_input() {
                return Err(ServiceError::InvalidState(
                    "the round does not accept abilities".into(),
                ));
            }

            tx.set(
                keys::request(encounter_id, request_id),
                AbilityRequest {
                    request_id,
                    caster_id,
                    ability: request.ability,
                    targets: request.targets.clone(),
                    cost: spec.cost,
                    round_index: session.round_index,
                    created_at: now,
                },
            );
            Ok(false)
        })
        .await?;

    if duplicate {
        debug!(%encounter_id, %request_id, "duplicate ability request acknowledged");
        return Ok(CastOutcome {
            request_id,
            duplicate: true,
            resolution: RequestResolution::Gone,
        });
    }

    let resolution = resolve_request(state, encounter_id, request_id).await?;
    Ok(CastOutcome {
        request_id,
        duplicate: false,
        resolution,
    })
}

/// Consume one queued request with a freshly seeded generator.
pub async fn resolve_request(
    state: &SharedState,
    encounter_id: Uuid,
    request_id: Uuid,
) -> Result<RequestResolution, ServiceError> {
    let mut rng = StdRng::from_os_rng();
    resolve_request_with(state, encounter_id, request_id, &mut rng).await
}

/// Consume one queued request: validate, apply, log, notify and delete it in
/// a single transaction. A missing resource record aborts the transaction and
/// leaves the request queued.
pub async fn resolve_request_with<R: Rng + Send>(
    state: &SharedState,
    encounter_id: Uuid,
    request_id: Uuid,
    rng: &mut R,
) -> Result<RequestResolution, ServiceError> {
    let now = state.now();
    let rules = state.config().ability_rules();

    let (resolution, notices, opened_vote) = state
        .documents()
        .run_transaction(|tx| -> Result<_, ServiceError> {
            let request_key = keys::request(encounter_id, request_id);
            let Some(request) = tx.get::<AbilityRequest>(&request_key)? else {
                return Ok((RequestResolution::Gone, Vec::new(), None));
            };
            let mut session = load_session(tx, encounter_id)?;
            let spec = state.config().ability(request.ability).ok_or_else(|| {
                ServiceError::InvalidInput(format!(
                    "ability `{}` is not available",
                    request.ability
                ))
            })?;
            tx.delete(request_key);

            let verdict = if request.round_index != session.round_index
                || !session.accepts_round_input()
            {
                Err(Rejection::RoundClosed)
            } else {
                session.consumed_request_ids.insert(request_id);
                let resources = load_resources(tx, encounter_id)?;
                if !resources.contains_key(&request.caster_id) {
                    return Err(ServiceError::NotFound(format!(
                        "resource record of `{}` is missing",
                        request.caster_id
                    )));
                }
                let ctx = CastContext {
                    ability: request.ability,
                    spec,
                    caster_id: request.caster_id,
                    requested_targets: &request.targets,
                    session: &session,
                    resources: &resources,
                    rules,
                    now,
                };
                let verdict = resolve_ability(&ctx, &mut *rng);
                verdict.map(|outcome| (outcome, resources))
            };

            match verdict {
                Ok((outcome, mut resources)) => {
                    let mut touched = BTreeSet::from([request.caster_id]);
                    if let Some(caster) = resources.get_mut(&request.caster_id) {
                        caster.mp = caster.mp.saturating_sub(spec.cost);
                    }
                    for delta in &outcome.resource_deltas {
                        if let Some(record) = resources.get_mut(&delta.participant_id) {
                            delta.apply(record);
                            touched.insert(delta.participant_id);
                        }
                    }
                    for id in &touched {
                        if let Some(record) = resources.remove(id) {
                            save_resource(tx, encounter_id, record);
                        }
                    }

                    session
                        .ability_users_this_round
                        .entry(request.caster_id)
                        .or_default()
                        .insert(request.ability);
                    let opened_vote: Option<VoteState> = outcome.session_delta.vote.clone();
                    let was_standing = session.boss_hp_remaining() > 0;
                    outcome.session_delta.apply(&mut session);
                    append_log(
                        tx,
                        &mut session,
                        Some(request.caster_id),
                        outcome.log.clone(),
                        now,
                    );
                    if was_standing && session.boss_hp_remaining() == 0 {
                        let text = format!("{} has been defeated!", session.boss.name);
                        append_log(tx, &mut session, None, text, now);
                    }
                    let notice = post_broadcast(state, &mut session, outcome.notice, now);
                    save_session(tx, session, now);
                    Ok((
                        RequestResolution::Applied { log: outcome.log },
                        vec![notice],
                        opened_vote,
                    ))
                }
                Err(rejection) => {
                    let text = format!("{} failed: {rejection}", request.ability);
                    let notice = post_targeted(state, &mut session, request.caster_id, text, now);
                    save_session(tx, session, now);
                    Ok((RequestResolution::Rejected(rejection), vec![notice], None))
                }
            }
        })
        .await?;

    notice_service::schedule_clears(state, encounter_id, &notices);
    if let Some(vote) = opened_vote {
        vote_service::schedule_vote_timer(state, encounter_id, &vote);
    }
    match &resolution {
        RequestResolution::Applied { log } => {
            info!(%encounter_id, %request_id, log = %log, "ability applied")
        }
        RequestResolution::Rejected(rejection) => {
            info!(%encounter_id, %request_id, reason = %rejection, "ability rejected")
        }
        RequestResolution::Gone => debug!(%encounter_id, %request_id, "request already consumed"),
    }
    Ok(resolution)
}

/// Resolve every request still queued for an encounter, oldest first. Returns
/// how many this call consumed.
pub async fn drain_pending(state: &SharedState, encounter_id: Uuid) -> Result<usize, ServiceError> {
    let mut pending = state
        .documents()
        .list::<AbilityRequest>(&keys::requests(encounter_id))?;
    pending.sort_by_key(|request| request.created_at);

    let mut consumed = 0;
    for request in pending {
        match resolve_request(state, encounter_id, request.request_id).await {
            Ok(RequestResolution::Gone) => {}
            Ok(_) => consumed += 1,
            Err(err) => warn!(
                %encounter_id,
                request_id = %request.request_id,
                error = %err,
                "failed to resolve queued ability request"
            ),
        }
    }
    Ok(consumed)
}

/// Follow the change feed and resolve ability requests nobody resolved in
/// time. Runs for the lifetime of the process.
pub async fn run_request_drainer(state: SharedState) {
    let mut feed = state.documents().subscribe();
    info!("ability request drainer started");
    loop {
        match feed.recv().await {
            Ok(change) => {
                let Some(Document::AbilityRequest(request)) = change.document else {
                    continue;
                };
                let Some(encounter_id) = keys::encounter_of(&change.key) else {
                    continue;
                };
                let state = state.clone();
                tokio::spawn(async move {
                    sleep(DRAIN_SETTLE_DELAY).await;
                    if let Err(err) = resolve_request(&state, encounter_id, request.request_id).await
                    {
                        warn!(
                            %encounter_id,
                            request_id = %request.request_id,
                            error = %err,
                            "drainer failed to resolve ability request"
                        );
                    }
                });
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "drainer lagged behind the change feed; sweeping queues");
                for encounter_id in encounters_with_pending_requests(&state) {
                    let state = state.clone();
                    tokio::spawn(async move {
                        if let Err(err) = drain_pending(&state, encounter_id).await {
                            warn!(%encounter_id, error = %err, "queue sweep failed");
                        }
                    });
                }
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn encounters_with_pending_requests(state: &SharedState) -> HashSet<Uuid> {
    state
        .documents()
        .keys("encounters/")
        .iter()
        .filter(|key| key.contains("/requests/"))
        .filter_map(|key| keys::encounter_of(key))
        .collect()
}
