use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Check the archive backend and report whether the service runs degraded.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.archive_store().await {
        Some(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "archive health check failed");
            }
        }
        None => warn!("archive unavailable (degraded mode)"),
    }

    let encounters = state
        .documents()
        .keys("encounters/")
        .iter()
        .filter(|key| key.matches('/').count() == 1)
        .count();
    if state.is_degraded() {
        HealthResponse::degraded(encounters)
    } else {
        HealthResponse::ok(encounters)
    }
}
