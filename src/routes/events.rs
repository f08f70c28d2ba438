use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;

use crate::{dao::models::UserId, services::event_stream, state::SharedState};

/// Per-user server-sent event stream.
pub fn router() -> Router<SharedState> {
    Router::new().route("/users/{user_id}/events", get(user_events))
}

#[utoipa::path(
    get,
    path = "/users/{user_id}/events",
    tag = "events",
    params(("user_id" = i64, Path, description = "Subscribing user")),
    responses((status = 200, description = "Event stream", content_type = "text/event-stream", body = String))
)]
/// Notifications addressed to the user plus degraded mode changes.
pub async fn user_events(
    State(state): State<SharedState>,
    Path(user_id): Path<UserId>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    event_stream::open(&state, user_id)
}
