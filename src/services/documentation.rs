use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Raid Sync Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::sse::encounter_stream,
        crate::routes::encounters::create_encounter,
        crate::routes::encounters::join_encounter,
        crate::routes::encounters::get_encounter,
        crate::routes::encounters::list_participants,
        crate::routes::encounters::battle_log,
        crate::routes::encounters::teardown_encounter,
        crate::routes::actions::submit_answer,
        crate::routes::actions::request_ability,
        crate::routes::actions::cast_vote,
        crate::routes::host::start,
        crate::routes::host::end_round,
        crate::routes::host::advance,
        crate::routes::host::finalize,
        crate::routes::timers::round_timer,
        crate::routes::timers::vote_timer,
        crate::routes::summaries::list_summaries,
        crate::routes::summaries::get_summary,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::phase::VisibleStatus,
            crate::dto::encounter::CreateEncounterRequest,
            crate::dto::encounter::BossInput,
            crate::dto::encounter::QuestionInput,
            crate::dto::encounter::JoinRequest,
            crate::dto::encounter::SessionSnapshot,
            crate::dto::encounter::ResourceSnapshot,
            crate::dto::encounter::LogEntrySnapshot,
            crate::dto::actions::SubmitAnswerRequest,
            crate::dto::actions::AbilityCastRequest,
            crate::dto::actions::AbilityResponse,
            crate::dto::actions::VoteRequest,
            crate::dto::actions::VoteResponse,
            crate::dto::actions::HostActionRequest,
            crate::dto::actions::TransitionResponse,
            crate::dto::sse::EncounterClosedEvent,
            crate::dto::summary::SummaryListItem,
            crate::dto::summary::EncounterSummaryResponse,
            crate::state::abilities::AbilityName,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "encounter", description = "Encounter creation, membership and live state"),
        (name = "round", description = "Answers, abilities and votes during a round"),
        (name = "host", description = "Lifecycle transitions driven by the host"),
        (name = "timers", description = "Deadline triggers fired by client timers"),
        (name = "summary", description = "Archived encounter summaries"),
    )
)]
pub struct ApiDoc;
