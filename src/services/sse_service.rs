use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::document_store::{Change, keys},
    dto::sse::ServerEvent,
    error::ServiceError,
    services::{encounter_service, sse_events},
    state::SharedState,
};

/// Open the live stream of one encounter. The stream starts with the current
/// Session Record and resource records, then follows every committed change.
pub fn subscribe_encounter(
    state: &SharedState,
    encounter_id: Uuid,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>> + use<>>, ServiceError> {
    // subscribe first so nothing committed after the snapshot is missed
    let receiver = state.documents().subscribe();
    let session = encounter_service::snapshot(state, encounter_id)?;
    let resources = encounter_service::participants(state, encounter_id)?;

    let mut initial: Vec<ServerEvent> = sse_events::session_event(&session).into_iter().collect();
    initial.extend(resources.iter().filter_map(sse_events::resource_event));

    info!(%encounter_id, "new encounter SSE connection");
    Ok(to_sse_stream(state.clone(), encounter_id, receiver, initial))
}

/// Events replacing `skipped` missed changes: the Session Record, every
/// resource record and the log entries that may have been among them. Log
/// entries carry their `seq`, so a client drops the ones it already has.
fn resync_events(state: &SharedState, encounter_id: Uuid, skipped: u64) -> Vec<ServerEvent> {
    let Ok(session) = encounter_service::snapshot(state, encounter_id) else {
        return Vec::new();
    };
    let mut events: Vec<ServerEvent> = sse_events::session_event(&session).into_iter().collect();
    if let Ok(resources) = encounter_service::participants(state, encounter_id) {
        events.extend(resources.iter().filter_map(sse_events::resource_event));
    }
    let first_missed = session.log_length.saturating_sub(skipped);
    if let Ok(log) = encounter_service::battle_log(state, encounter_id) {
        events.extend(
            log.iter()
                .filter(|entry| entry.seq >= first_missed)
                .filter_map(sse_events::log_event),
        );
    }
    events
}

fn to_event(payload: ServerEvent) -> Event {
    let mut event = Event::default().data(payload.data);
    if let Some(name) = payload.event {
        event = event.event(name);
    }
    event
}

/// Forward the encounter's changes into an SSE response until the client
/// disconnects or the encounter is torn down.
fn to_sse_stream(
    state: SharedState,
    encounter_id: Uuid,
    mut receiver: broadcast::Receiver<Change>,
    initial: Vec<ServerEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + use<>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(16);

    tokio::spawn(async move {
        for payload in initial {
            if tx.send(Ok(to_event(payload))).await.is_err() {
                return;
            }
        }

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(change) => {
                            if keys::encounter_of(&change.key) != Some(encounter_id) {
                                continue;
                            }
                            let closing = sse_events::is_teardown(encounter_id, &change);
                            if let Some(payload) = sse_events::change_event(encounter_id, &change) {
                                if tx.send(Ok(to_event(payload))).await.is_err() {
                                    break;
                                }
                            }
                            if closing {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(%encounter_id, skipped, "SSE stream lagged; resyncing");
                            let mut closed = false;
                            for payload in resync_events(&state, encounter_id, skipped) {
                                if tx.send(Ok(to_event(payload))).await.is_err() {
                                    closed = true;
                                    break;
                                }
                            }
                            if closed {
                                break;
                            }
                        }
                    }
                }
            }
        }

        info!(%encounter_id, "encounter SSE stream disconnected");
    });

    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig,
        dto::encounter::{BossInput, CreateEncounterRequest, JoinRequest, QuestionInput},
        state::AppState,
    };

    #[tokio::test]
    async fn lag_resync_resends_resources_and_log_tail() {
        let state = AppState::new(AppConfig::default());
        let session = encounter_service::create_encounter(
            &state,
            Uuid::new_v4(),
            CreateEncounterRequest {
                name: "Crypt".into(),
                boss: BossInput {
                    name: "Lich".into(),
                    max_hp: 10,
                },
                questions: vec![QuestionInput {
                    prompt: "?".into(),
                    choices: vec!["a".into(), "b".into()],
                    correct_choice: 0,
                }],
            },
        )
        .await
        .unwrap();
        for name in ["ada", "bob"] {
            encounter_service::join_encounter(
                &state,
                session.id,
                Uuid::new_v4(),
                JoinRequest {
                    display_name: Some(name.into()),
                },
            )
            .await
            .unwrap();
        }

        let events = resync_events(&state, session.id, 1);
        let names: Vec<_> = events.iter().map(|event| event.event.as_deref()).collect();
        assert_eq!(
            names,
            [Some("session"), Some("resource"), Some("resource"), Some("log")]
        );
        assert!(events[3].data.contains("bob joined"));

        // A large gap replays the whole log.
        let events = resync_events(&state, session.id, 100);
        assert_eq!(events.len(), 1 + 2 + 3);

        assert!(resync_events(&state, Uuid::new_v4(), 1).is_empty());
    }
}
