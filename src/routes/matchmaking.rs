use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dao::models::UserId,
    dto::matchmaking::{EnqueueRequest, PairingView, RelayRequest},
    error::AppError,
    services::{
        dispatch::{self, Command, Outcome, Reply},
        pairing,
    },
    state::SharedState,
};

/// Queue, pairing and chat relay routes.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/users/{user_id}/queue", post(enqueue).delete(cancel))
        .route("/users/{user_id}/pairing", get(current_pairing).delete(end_pairing))
        .route("/users/{user_id}/messages", post(relay_message))
}

/// Pay the search cost and join the queue.
#[utoipa::path(
    post,
    path = "/users/{user_id}/queue",
    tag = "matchmaking",
    params(("user_id" = i64, Path, description = "Acting user")),
    request_body = EnqueueRequest,
    responses(
        (status = 200, description = "Queued", body = Reply),
        (status = 402, description = "Not enough coins"),
        (status = 409, description = "Already queued")
    )
)]
pub async fn enqueue(
    State(state): State<SharedState>,
    Path(user_id): Path<UserId>,
    Valid(Json(payload)): Valid<Json<EnqueueRequest>>,
) -> Result<Outcome, AppError> {
    let command = Command::Enqueue {
        user: user_id,
        profile: payload.profile,
        filters: payload.filters,
        game_type: payload.game_type,
    };
    Ok(dispatch::submit(&state, command).await?)
}

/// Leave the queue with a full refund.
#[utoipa::path(
    delete,
    path = "/users/{user_id}/queue",
    tag = "matchmaking",
    params(("user_id" = i64, Path, description = "Acting user")),
    responses(
        (status = 200, description = "Search cancelled", body = Reply),
        (status = 404, description = "Not queued")
    )
)]
pub async fn cancel(
    State(state): State<SharedState>,
    Path(user_id): Path<UserId>,
) -> Result<Outcome, AppError> {
    Ok(dispatch::submit(&state, Command::Cancel { user: user_id }).await?)
}

/// Open pairing of the user.
#[utoipa::path(
    get,
    path = "/users/{user_id}/pairing",
    tag = "matchmaking",
    params(("user_id" = i64, Path, description = "Acting user")),
    responses(
        (status = 200, description = "Open pairing", body = PairingView),
        (status = 404, description = "No open pairing")
    )
)]
pub async fn current_pairing(
    State(state): State<SharedState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<PairingView>, AppError> {
    let pairing = pairing::current(&state, user_id).await?;
    Ok(Json(PairingView::from(&pairing)))
}

/// End the open pairing and any game running on it.
#[utoipa::path(
    delete,
    path = "/users/{user_id}/pairing",
    tag = "matchmaking",
    params(("user_id" = i64, Path, description = "Acting user")),
    responses((status = 200, description = "Pairing ended", body = Reply))
)]
pub async fn end_pairing(
    State(state): State<SharedState>,
    Path(user_id): Path<UserId>,
) -> Result<Outcome, AppError> {
    Ok(dispatch::submit(&state, Command::EndPairing { user: user_id }).await?)
}

/// Forward a chat line to the partner.
#[utoipa::path(
    post,
    path = "/users/{user_id}/messages",
    tag = "matchmaking",
    params(("user_id" = i64, Path, description = "Acting user")),
    request_body = RelayRequest,
    responses(
        (status = 200, description = "Message relayed", body = Reply),
        (status = 402, description = "Message cost not covered")
    )
)]
pub async fn relay_message(
    State(state): State<SharedState>,
    Path(user_id): Path<UserId>,
    Valid(Json(payload)): Valid<Json<RelayRequest>>,
) -> Result<Outcome, AppError> {
    let command = Command::RelayMessage {
        user: user_id,
        text: payload.text,
    };
    Ok(dispatch::submit(&state, command).await?)
}
