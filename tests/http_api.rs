use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use raid_sync_back::{config::AppConfig, routes, state::AppState, state::SharedState};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

fn app(state: &SharedState) -> Router {
    routes::router(state.clone())
}

async fn send(
    state: &SharedState,
    method: &str,
    uri: &str,
    caller: Option<Uuid>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(caller) = caller {
        builder = builder.header("x-participant-id", caller.to_string());
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app(state).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

fn encounter_body() -> Value {
    json!({
        "name": "Crypt",
        "boss": { "name": "Lich", "max_hp": 40 },
        "questions": [
            { "prompt": "Capital of France?", "choices": ["Paris", "Lyon"], "correct_choice": 0 },
            { "prompt": "2 + 2?", "choices": ["3", "4", "5"], "correct_choice": 1 }
        ]
    })
}

async fn create_encounter(state: &SharedState, host: Uuid) -> Uuid {
    let (status, body) = send(state, "POST", "/encounters", Some(host), Some(encounter_body())).await;
    assert_eq!(status, StatusCode::OK);
    Uuid::parse_str(body["id"].as_str().unwrap()).unwrap()
}

#[tokio::test]
async fn healthcheck_reports_degraded_without_archive() {
    let state = AppState::new(AppConfig::default());
    let (status, body) = send(&state, "GET", "/healthcheck", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["encounters"], 0);
}

#[tokio::test]
async fn missing_identity_is_unauthorized() {
    let state = AppState::new(AppConfig::default());
    let (status, body) = send(&state, "POST", "/encounters", None, Some(encounter_body())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["message"].as_str().unwrap().contains("X-Participant-Id"));
}

#[tokio::test]
async fn invalid_questions_are_rejected() {
    let state = AppState::new(AppConfig::default());
    let mut body = encounter_body();
    body["questions"][0]["correct_choice"] = json!(7);
    let (status, _) = send(&state, "POST", "/encounters", Some(Uuid::new_v4()), Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_encounter_is_not_found() {
    let state = AppState::new(AppConfig::default());
    let uri = format!("/encounters/{}", Uuid::new_v4());
    let (status, _) = send(&state, "GET", &uri, None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn round_flow_over_http() {
    let state = AppState::new(AppConfig::default());
    let host = Uuid::new_v4();
    let player = Uuid::new_v4();
    let id = create_encounter(&state, host).await;

    let (status, body) = send(
        &state,
        "POST",
        &format!("/encounters/{id}/join"),
        Some(player),
        Some(json!({ "display_name": "Ada" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["display_name"], "Ada");
    assert_eq!(body["hp"], body["max_hp"]);

    // Only the host drives the lifecycle.
    let (status, _) = send(
        &state,
        "POST",
        &format!("/encounters/{id}/host/start"),
        Some(player),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(
        &state,
        "POST",
        &format!("/encounters/{id}/host/start"),
        Some(host),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["applied"], true);
    assert_eq!(body["status"], "in_progress");

    let (status, body) = send(&state, "GET", &format!("/encounters/{id}"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["question"]["prompt"], "Capital of France?");
    assert!(body["question"]["correct_choice"].is_null());
    assert_eq!(body["participants"][0]["display_name"], "Ada");

    let (status, body) = send(
        &state,
        "POST",
        &format!("/encounters/{id}/answers"),
        Some(player),
        Some(json!({ "round_index": 0, "choice": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["recorded"], true);

    let (status, body) = send(
        &state,
        "POST",
        &format!("/encounters/{id}/abilities"),
        Some(player),
        Some(json!({ "ability": "revive", "targets": [player] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "rejected");

    let (status, body) = send(
        &state,
        "POST",
        &format!("/encounters/{id}/host/end-round"),
        Some(host),
        Some(json!({ "round_index": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "round_ending");

    // The grace window is still open.
    let (status, _) = send(
        &state,
        "POST",
        &format!("/encounters/{id}/timers/round"),
        None,
        Some(json!({ "round_index": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(&state, "GET", &format!("/encounters/{id}/log"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    let lines: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["text"].as_str().unwrap())
        .collect();
    assert_eq!(lines.first().copied(), Some("Lich blocks the way"));
    assert!(lines.iter().any(|line| line.contains("Ada joined")));
}

#[tokio::test]
async fn summaries_are_unavailable_in_degraded_mode() {
    let state = AppState::new(AppConfig::default());
    let (status, _) = send(&state, "GET", "/summaries", None, None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn host_cannot_open_a_second_encounter() {
    let state = AppState::new(AppConfig::default());
    let host = Uuid::new_v4();
    create_encounter(&state, host).await;
    let (status, _) = send(&state, "POST", "/encounters", Some(host), Some(encounter_body())).await;
    assert_eq!(status, StatusCode::CONFLICT);
}
