use serde::Serialize;
use utoipa::ToSchema;

/// Simple health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Encounters currently held in the live store.
    pub encounters: usize,
}

impl HealthResponse {
    /// Create a health response indicating the system is operational.
    pub fn ok(encounters: usize) -> Self {
        Self {
            status: "ok".to_string(),
            encounters,
        }
    }

    /// Create a health response indicating the archive is unreachable.
    pub fn degraded(encounters: usize) -> Self {
        Self {
            status: "degraded".to_string(),
            encounters,
        }
    }
}
