use axum::{
    Json, Router,
    extract::{Path, State},
    routing::post,
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::actions::{RoundTimerRequest, TransitionResponse, VoteTimerRequest, VoteTimerResponse},
    error::AppError,
    services::{lifecycle_service, vote_service},
    state::SharedState,
};

/// Deadline triggers fired by client timers. Every client may call them; the
/// first call past the deadline does the work and the others are no-ops.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/encounters/{id}/timers/round", post(round_timer))
        .route("/encounters/{id}/timers/vote", post(vote_timer))
}

/// Grace window of a round elapsed.
#[utoipa::path(
    post,
    path = "/encounters/{id}/timers/round",
    tag = "timers",
    params(("id" = String, Path, description = "Encounter identifier")),
    request_body = RoundTimerRequest,
    responses(
        (status = 200, description = "Transition result", body = TransitionResponse),
        (status = 409, description = "Deadline not reached yet")
    )
)]
pub async fn round_timer(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<RoundTimerRequest>>,
) -> Result<Json<TransitionResponse>, AppError> {
    let outcome = lifecycle_service::expire_round(&state, id, payload.round_index).await?;
    Ok(Json(outcome.into()))
}

/// Deadline of a vote elapsed.
#[utoipa::path(
    post,
    path = "/encounters/{id}/timers/vote",
    tag = "timers",
    params(("id" = String, Path, description = "Encounter identifier")),
    request_body = VoteTimerRequest,
    responses(
        (status = 200, description = "Vote resolution", body = VoteTimerResponse),
        (status = 409, description = "Deadline not reached yet")
    )
)]
pub async fn vote_timer(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<VoteTimerRequest>>,
) -> Result<Json<VoteTimerResponse>, AppError> {
    let resolution = vote_service::resolve_vote(&state, id, payload.vote_id).await?;
    Ok(Json(VoteTimerResponse { resolution }))
}
