use axum::{
    Json, Router,
    extract::{Path, State},
    routing::post,
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::actions::{
        AbilityCastRequest, AbilityResponse, AnswerResponse, SubmitAnswerRequest, VoteRequest,
        VoteResponse,
    },
    error::AppError,
    routes::identity::ParticipantId,
    services::{ability_service, answer_service, vote_service},
    state::SharedState,
};

/// Participant actions during a round.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/encounters/{id}/answers", post(submit_answer))
        .route("/encounters/{id}/abilities", post(request_ability))
        .route("/encounters/{id}/votes", post(cast_vote))
}

/// Record the caller's answer for a round. Only the first answer counts.
#[utoipa::path(
    post,
    path = "/encounters/{id}/answers",
    tag = "round",
    params(
        ("X-Participant-Id" = String, Header, description = "Caller identity"),
        ("id" = String, Path, description = "Encounter identifier")
    ),
    request_body = SubmitAnswerRequest,
    responses(
        (status = 200, description = "Whether the answer was recorded", body = AnswerResponse),
        (status = 409, description = "Fallen participants cannot answer")
    )
)]
pub async fn submit_answer(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    ParticipantId(participant_id): ParticipantId,
    Valid(Json(payload)): Valid<Json<SubmitAnswerRequest>>,
) -> Result<Json<AnswerResponse>, AppError> {
    let recorded = answer_service::submit_answer(&state, id, participant_id, payload).await?;
    Ok(Json(AnswerResponse { recorded }))
}

/// Queue an ability and resolve it. Rejections are reported in the body and
/// as a notice addressed to the caller, never as an error status.
#[utoipa::path(
    post,
    path = "/encounters/{id}/abilities",
    tag = "round",
    params(
        ("X-Participant-Id" = String, Header, description = "Caller identity"),
        ("id" = String, Path, description = "Encounter identifier")
    ),
    request_body = AbilityCastRequest,
    responses(
        (status = 200, description = "Resolution of the cast", body = AbilityResponse),
        (status = 409, description = "The round does not accept abilities")
    )
)]
pub async fn request_ability(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    ParticipantId(caster_id): ParticipantId,
    Valid(Json(payload)): Valid<Json<AbilityCastRequest>>,
) -> Result<Json<AbilityResponse>, AppError> {
    let outcome = ability_service::submit_ability(&state, id, caster_id, payload).await?;
    Ok(Json(AbilityResponse::from(outcome)))
}

/// Cast a ballot on the running skip-the-round vote.
#[utoipa::path(
    post,
    path = "/encounters/{id}/votes",
    tag = "round",
    params(
        ("X-Participant-Id" = String, Header, description = "Caller identity"),
        ("id" = String, Path, description = "Encounter identifier")
    ),
    request_body = VoteRequest,
    responses(
        (status = 200, description = "Ballot receipt", body = VoteResponse),
        (status = 409, description = "No vote is open")
    )
)]
pub async fn cast_vote(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    ParticipantId(voter_id): ParticipantId,
    Valid(Json(payload)): Valid<Json<VoteRequest>>,
) -> Result<Json<VoteResponse>, AppError> {
    let receipt = vote_service::cast_vote(&state, id, voter_id, payload).await?;
    Ok(Json(VoteResponse::from(receipt)))
}
