use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use uuid::Uuid;

use crate::{error::AppError, services::sse_service, state::SharedState};

#[utoipa::path(
    get,
    path = "/encounters/{id}/sse",
    tag = "encounter",
    params(("id" = String, Path, description = "Encounter identifier")),
    responses(
        (status = 200, description = "Encounter SSE stream (`session`, `resource`, `log`, `closed` events)", content_type = "text/event-stream", body = String),
        (status = 404, description = "Unknown encounter")
    )
)]
/// Stream every committed change of one encounter.
pub async fn encounter_stream(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    Ok(sse_service::subscribe_encounter(&state, id)?)
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/encounters/{id}/sse", get(encounter_stream))
}
