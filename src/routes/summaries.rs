use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use uuid::Uuid;

use crate::{
    dto::summary::{EncounterSummaryResponse, SummaryListItem},
    error::AppError,
    services::summary_service,
    state::SharedState,
};

/// Archived encounters.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/summaries", get(list_summaries))
        .route("/summaries/{id}", get(get_summary))
}

#[utoipa::path(
    get,
    path = "/summaries",
    tag = "summary",
    responses(
        (status = 200, description = "Archived encounters, most recent first", body = [SummaryListItem]),
        (status = 503, description = "Archive unreachable")
    )
)]
/// List archived encounters.
pub async fn list_summaries(
    State(state): State<SharedState>,
) -> Result<Json<Vec<SummaryListItem>>, AppError> {
    Ok(Json(summary_service::list_summaries(&state).await?))
}

#[utoipa::path(
    get,
    path = "/summaries/{id}",
    tag = "summary",
    params(("id" = String, Path, description = "Encounter identifier")),
    responses(
        (status = 200, description = "Archived encounter", body = EncounterSummaryResponse),
        (status = 404, description = "No summary for this encounter")
    )
)]
/// Fetch one archived encounter.
pub async fn get_summary(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<EncounterSummaryResponse>, AppError> {
    Ok(Json(summary_service::get_summary(&state, id).await?))
}
