use axum::{
    Json, Router,
    extract::{Path, State},
    routing::post,
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::actions::{HostActionRequest, TransitionResponse},
    error::AppError,
    routes::identity::ParticipantId,
    services::lifecycle_service,
    state::SharedState,
};

/// Lifecycle transitions driven by the host.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/encounters/{id}/host/start", post(start))
        .route("/encounters/{id}/host/end-round", post(end_round))
        .route("/encounters/{id}/host/advance", post(advance))
        .route("/encounters/{id}/host/finalize", post(finalize))
}

/// Start round 0.
#[utoipa::path(
    post,
    path = "/encounters/{id}/host/start",
    tag = "host",
    params(
        ("X-Participant-Id" = String, Header, description = "Host identity"),
        ("id" = String, Path, description = "Encounter identifier")
    ),
    responses(
        (status = 200, description = "Transition result", body = TransitionResponse),
        (status = 401, description = "Caller is not the host"),
        (status = 409, description = "Transition not allowed from the current status")
    )
)]
pub async fn start(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    ParticipantId(caller): ParticipantId,
) -> Result<Json<TransitionResponse>, AppError> {
    let outcome = lifecycle_service::start(&state, id, caller).await?;
    Ok(Json(outcome.into()))
}

/// Close the current round and open the grace window.
#[utoipa::path(
    post,
    path = "/encounters/{id}/host/end-round",
    tag = "host",
    params(
        ("X-Participant-Id" = String, Header, description = "Host identity"),
        ("id" = String, Path, description = "Encounter identifier")
    ),
    request_body = HostActionRequest,
    responses(
        (status = 200, description = "Transition result", body = TransitionResponse),
        (status = 409, description = "Transition not allowed from the current status")
    )
)]
pub async fn end_round(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    ParticipantId(caller): ParticipantId,
    Valid(Json(payload)): Valid<Json<HostActionRequest>>,
) -> Result<Json<TransitionResponse>, AppError> {
    let outcome = lifecycle_service::end_round(&state, id, caller, payload.round_index).await?;
    Ok(Json(outcome.into()))
}

/// Move on to the next question.
#[utoipa::path(
    post,
    path = "/encounters/{id}/host/advance",
    tag = "host",
    params(
        ("X-Participant-Id" = String, Header, description = "Host identity"),
        ("id" = String, Path, description = "Encounter identifier")
    ),
    request_body = HostActionRequest,
    responses(
        (status = 200, description = "Transition result", body = TransitionResponse),
        (status = 409, description = "Transition not allowed from the current status")
    )
)]
pub async fn advance(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    ParticipantId(caller): ParticipantId,
    Valid(Json(payload)): Valid<Json<HostActionRequest>>,
) -> Result<Json<TransitionResponse>, AppError> {
    let outcome = lifecycle_service::advance(&state, id, caller, payload.round_index).await?;
    Ok(Json(outcome.into()))
}

/// End the encounter and archive its summary. Calling it again on an ended
/// encounter retries a failed archive write.
#[utoipa::path(
    post,
    path = "/encounters/{id}/host/finalize",
    tag = "host",
    params(
        ("X-Participant-Id" = String, Header, description = "Host identity"),
        ("id" = String, Path, description = "Encounter identifier")
    ),
    responses(
        (status = 200, description = "Transition result", body = TransitionResponse),
        (status = 503, description = "Archive unreachable; the encounter stays pending")
    )
)]
pub async fn finalize(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    ParticipantId(caller): ParticipantId,
) -> Result<Json<TransitionResponse>, AppError> {
    let outcome = lifecycle_service::finalize(&state, id, caller).await?;
    Ok(Json(outcome.into()))
}
