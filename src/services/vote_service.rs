//! Skip-the-round votes: ballots and deadline resolution.

use serde::Serialize;
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dto::actions::VoteRequest,
    error::ServiceError,
    services::{
        lifecycle_service::resolve_round_in_tx,
        notice_service::{self, post_broadcast},
        records::{append_log, load_session, require_participant, save_session, timer_prefix},
    },
    state::{
        SharedState,
        damage::ResolutionMode,
        session::{SessionRecord, VoteState},
        state_machine::{LifecycleEvent, PlanError, plan},
        vote::{BallotStatus, VoteOutcome, cast_ballot, tally},
    },
};

/// State of the vote after a ballot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BallotReceipt {
    /// What happened to the ballot.
    pub status: BallotStatus,
    /// Vote after the ballot.
    pub vote: VoteState,
}

/// What a deadline trigger did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum VoteResolution {
    /// Majority reached: the round was resolved as skipped.
    Passed,
    /// No majority: the vote was cleared.
    Failed,
    /// The vote was already resolved or replaced.
    Stale,
}

/// Cast one ballot on the running vote.
pub async fn cast_vote(
    state: &SharedState,
    encounter_id: Uuid,
    voter_id: Uuid,
    request: VoteRequest,
) -> Result<BallotReceipt, ServiceError> {
    let now = state.now();
    let receipt = state
        .documents()
        .run_transaction(|tx| -> Result<_, ServiceError> {
            let mut session = load_session(tx, encounter_id)?;
            require_participant(&session, voter_id)?;
            let Some(mut vote) = session.vote_state.clone() else {
                return Err(ServiceError::InvalidState("no vote in progress".into()));
            };
            if now >= vote.deadline {
                return Err(ServiceError::InvalidState("the vote is closed".into()));
            }

            let status = cast_ballot(&mut vote, voter_id, request.choice);
            if status == BallotStatus::Recorded {
                session.vote_state = Some(vote.clone());
                save_session(tx, session, now);
            }
            Ok(BallotReceipt { status, vote })
        })
        .await?;

    debug!(
        %encounter_id,
        participant_id = %voter_id,
        status = ?receipt.status,
        "ballot processed"
    );
    Ok(receipt)
}

/// Server-side copy of the vote timer every client runs.
pub(crate) fn schedule_vote_timer(state: &SharedState, encounter_id: Uuid, vote: &VoteState) {
    let key = format!("{}vote:{}", timer_prefix(encounter_id), vote.id);
    let delay = vote
        .deadline
        .duration_since(state.now())
        .unwrap_or_default();
    let vote_id = vote.id;
    let task_state = state.clone();
    state.schedule_timer(key, delay, async move {
        match resolve_vote(&task_state, encounter_id, vote_id).await {
            Ok(resolution) => debug!(%encounter_id, %vote_id, ?resolution, "vote timer fired"),
            Err(err) => warn!(%encounter_id, %vote_id, error = %err, "vote timer failed"),
        }
    });
}

/// Vote timer fired: tally the vote once its deadline passed. A passing vote
/// resolves the round as skipped in the same transaction; a failing one is
/// cleared with a notice and nothing else changes.
pub async fn resolve_vote(
    state: &SharedState,
    encounter_id: Uuid,
    vote_id: Uuid,
) -> Result<VoteResolution, ServiceError> {
    let now = state.now();
    let pass_ratio = state.config().vote_pass_ratio;
    let (resolution, notices) = state
        .documents()
        .run_transaction(|tx| -> Result<_, ServiceError> {
            let mut session = load_session(tx, encounter_id)?;
            let Some(vote) = session.vote_state.clone().filter(|vote| vote.id == vote_id) else {
                return Ok((VoteResolution::Stale, Vec::new()));
            };
            if now < vote.deadline {
                return Err(ServiceError::InvalidState(
                    "vote deadline not reached yet".into(),
                ));
            }

            match tally(&vote, pass_ratio) {
                VoteOutcome::Passed => {
                    let plan = match plan(
                        session.status,
                        session.round_index,
                        LifecycleEvent::SkipRound,
                        vote.round_index,
                    ) {
                        Ok(plan) => plan,
                        Err(PlanError::Stale { .. }) => {
                            return Ok((VoteResolution::Stale, Vec::new()));
                        }
                        Err(PlanError::InvalidTransition(err)) => return Err(err.into()),
                    };
                    let text = vote_text(&session, &vote, "passed");
                    append_log(tx, &mut session, None, text, now);
                    resolve_round_in_tx(state, tx, &mut session, ResolutionMode::Skipped, now)?;
                    session.status = plan.to;
                    let notice =
                        post_broadcast(state, &mut session, "The party voted to skip the round", now);
                    save_session(tx, session, now);
                    Ok((VoteResolution::Passed, vec![notice]))
                }
                VoteOutcome::Failed => {
                    session.vote_state = None;
                    let text = vote_text(&session, &vote, "failed");
                    append_log(tx, &mut session, None, text, now);
                    let notice = post_broadcast(state, &mut session, "The vote failed", now);
                    save_session(tx, session, now);
                    Ok((VoteResolution::Failed, vec![notice]))
                }
            }
        })
        .await?;

    notice_service::schedule_clears(state, encounter_id, &notices);
    if resolution != VoteResolution::Stale {
        info!(%encounter_id, %vote_id, ?resolution, "vote resolved");
    }
    Ok(resolution)
}

fn vote_text(session: &SessionRecord, vote: &VoteState, verdict: &str) -> String {
    let initiator = session
        .participants
        .get(&vote.initiator_id)
        .map(String::as_str)
        .unwrap_or("someone");
    format!(
        "{initiator}'s vote {verdict} ({} for, {} against, {} eligible)",
        vote.votes_for.len(),
        vote.votes_against.len(),
        vote.eligible_voter_count
    )
}
