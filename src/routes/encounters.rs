use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::encounter::{
        CreateEncounterRequest, JoinRequest, LogEntrySnapshot, ResourceSnapshot, SessionSnapshot,
    },
    error::AppError,
    routes::identity::ParticipantId,
    services::encounter_service,
    state::SharedState,
};

/// Encounter creation, membership and read-only projections.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/encounters", post(create_encounter))
        .route(
            "/encounters/{id}",
            get(get_encounter).delete(teardown_encounter),
        )
        .route("/encounters/{id}/join", post(join_encounter))
        .route("/encounters/{id}/participants", get(list_participants))
        .route("/encounters/{id}/log", get(battle_log))
}

/// Open a new encounter hosted by the caller.
#[utoipa::path(
    post,
    path = "/encounters",
    tag = "encounter",
    params(("X-Participant-Id" = String, Header, description = "Caller identity")),
    request_body = CreateEncounterRequest,
    responses(
        (status = 200, description = "Encounter created", body = SessionSnapshot),
        (status = 409, description = "The caller already hosts an active encounter")
    )
)]
pub async fn create_encounter(
    State(state): State<SharedState>,
    ParticipantId(host_id): ParticipantId,
    Valid(Json(payload)): Valid<Json<CreateEncounterRequest>>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let session = encounter_service::create_encounter(&state, host_id, payload).await?;
    Ok(Json(SessionSnapshot::from(&session)))
}

/// Register the caller as a participant.
#[utoipa::path(
    post,
    path = "/encounters/{id}/join",
    tag = "encounter",
    params(
        ("X-Participant-Id" = String, Header, description = "Caller identity"),
        ("id" = String, Path, description = "Encounter identifier")
    ),
    request_body = JoinRequest,
    responses(
        (status = 200, description = "Resource record of the caller", body = ResourceSnapshot),
        (status = 409, description = "The encounter no longer accepts participants")
    )
)]
pub async fn join_encounter(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    ParticipantId(participant_id): ParticipantId,
    Valid(Json(payload)): Valid<Json<JoinRequest>>,
) -> Result<Json<ResourceSnapshot>, AppError> {
    let record = encounter_service::join_encounter(&state, id, participant_id, payload).await?;
    Ok(Json(ResourceSnapshot::from(&record)))
}

/// Current Session Record.
#[utoipa::path(
    get,
    path = "/encounters/{id}",
    tag = "encounter",
    params(("id" = String, Path, description = "Encounter identifier")),
    responses(
        (status = 200, description = "Session snapshot", body = SessionSnapshot),
        (status = 404, description = "Unknown encounter")
    )
)]
pub async fn get_encounter(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let session = encounter_service::snapshot(&state, id)?;
    Ok(Json(SessionSnapshot::from(&session)))
}

/// Resource records of every participant, in join order.
#[utoipa::path(
    get,
    path = "/encounters/{id}/participants",
    tag = "encounter",
    params(("id" = String, Path, description = "Encounter identifier")),
    responses((status = 200, description = "Participants", body = [ResourceSnapshot]))
)]
pub async fn list_participants(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ResourceSnapshot>>, AppError> {
    let records = encounter_service::participants(&state, id)?;
    Ok(Json(records.iter().map(ResourceSnapshot::from).collect()))
}

/// Full battle log, oldest entry first.
#[utoipa::path(
    get,
    path = "/encounters/{id}/log",
    tag = "encounter",
    params(("id" = String, Path, description = "Encounter identifier")),
    responses((status = 200, description = "Battle log", body = [LogEntrySnapshot]))
)]
pub async fn battle_log(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<LogEntrySnapshot>>, AppError> {
    let entries = encounter_service::battle_log(&state, id)?;
    Ok(Json(entries.iter().map(LogEntrySnapshot::from).collect()))
}

/// Delete an archived encounter and everything stored under it.
#[utoipa::path(
    delete,
    path = "/encounters/{id}",
    tag = "encounter",
    params(
        ("X-Participant-Id" = String, Header, description = "Host identity"),
        ("id" = String, Path, description = "Encounter identifier")
    ),
    responses(
        (status = 204, description = "Encounter removed"),
        (status = 409, description = "The encounter is not archived yet")
    )
)]
pub async fn teardown_encounter(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    ParticipantId(caller): ParticipantId,
) -> Result<StatusCode, AppError> {
    encounter_service::teardown(&state, id, caller).await?;
    Ok(StatusCode::NO_CONTENT)
}
