/// Ability request queue and resolution.
pub mod ability_service;
/// Answer submission.
pub mod answer_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// Encounter creation, membership, projections and tear-down.
pub mod encounter_service;
/// Archiving of ended encounters and reward crediting.
pub mod finalize_service;
/// Health check service.
pub mod health_service;
/// Round lifecycle transitions.
pub mod lifecycle_service;
/// Ephemeral notices and their deferred clear-writes.
pub mod notice_service;
mod records;
/// Server-Sent Events message generation.
pub mod sse_events;
/// Per-encounter Server-Sent Events streams.
pub mod sse_service;
/// Archive connection supervisor with reconnect backoff.
pub mod storage_supervisor;
/// Archived summaries.
pub mod summary_service;
/// Skip-the-round votes.
pub mod vote_service;
