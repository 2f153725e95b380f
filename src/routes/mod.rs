use axum::Router;

use crate::state::SharedState;

pub mod actions;
pub mod docs;
pub mod encounters;
pub mod health;
pub mod host;
pub mod identity;
pub mod sse;
pub mod summaries;
pub mod timers;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(sse::router())
        .merge(encounters::router())
        .merge(actions::router())
        .merge(host::router())
        .merge(timers::router())
        .merge(summaries::router());

    let docs_router = docs::router(state.clone());

    api_router.merge(docs_router).with_state(state)
}
