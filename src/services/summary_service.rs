//! Read-only access to archived encounter summaries.

use std::sync::Arc;

use uuid::Uuid;

use crate::{
    dao::archive_store::ArchiveStore,
    dto::summary::{EncounterSummaryResponse, SummaryListItem},
    error::ServiceError,
    state::SharedState,
};

async fn require_archive(state: &SharedState) -> Result<Arc<dyn ArchiveStore>, ServiceError> {
    state.archive_store().await.ok_or(ServiceError::Degraded)
}

/// Archived encounters, most recently ended first.
pub async fn list_summaries(state: &SharedState) -> Result<Vec<SummaryListItem>, ServiceError> {
    let store = require_archive(state).await?;
    let mut items = store.list_summaries().await?;
    items.sort_by(|a, b| b.ended_at.cmp(&a.ended_at));
    Ok(items.into_iter().map(SummaryListItem::from).collect())
}

/// One archived encounter.
pub async fn get_summary(
    state: &SharedState,
    encounter_id: Uuid,
) -> Result<EncounterSummaryResponse, ServiceError> {
    let store = require_archive(state).await?;
    store
        .find_summary(encounter_id)
        .await?
        .map(EncounterSummaryResponse::from)
        .ok_or_else(|| ServiceError::NotFound(format!("summary `{encounter_id}` not found")))
}
