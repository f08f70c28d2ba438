use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dao::models::{RoomId, UserId},
    dto::group::{GroupChoiceRequest, GroupSessionView, StartGroupRequest},
    error::AppError,
    services::{
        dispatch::{self, Command, Outcome, Reply},
        group_service,
    },
    state::SharedState,
};

/// Group game routes. Host-only operations are checked against the room directory.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/groups/{session_id}", get(get_session))
        .route("/users/{user_id}/groups", post(start))
        .route("/users/{user_id}/rooms/{room_id}/game", axum::routing::delete(end))
        .route("/users/{user_id}/rooms/{room_id}/game/choice", post(submit_choice))
        .route("/users/{user_id}/rooms/{room_id}/game/confirm", post(confirm_turn))
        .route("/users/{user_id}/rooms/{room_id}/game/advance", post(force_advance))
}

#[utoipa::path(
    get,
    path = "/groups/{session_id}",
    tag = "group",
    params(("session_id" = Uuid, Path, description = "Group session")),
    responses(
        (status = 200, description = "Session", body = GroupSessionView),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn get_session(
    State(state): State<SharedState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<GroupSessionView>, AppError> {
    let session = group_service::get(&state, session_id).await?;
    Ok(Json(GroupSessionView::from(&session)))
}

/// The room host starts a game over the current members.
#[utoipa::path(
    post,
    path = "/users/{user_id}/groups",
    tag = "group",
    params(("user_id" = i64, Path, description = "Room host")),
    request_body = StartGroupRequest,
    responses(
        (status = 200, description = "Game started", body = Reply),
        (status = 403, description = "Not the room host")
    )
)]
pub async fn start(
    State(state): State<SharedState>,
    Path(user_id): Path<UserId>,
    Json(payload): Json<StartGroupRequest>,
) -> Result<Outcome, AppError> {
    let command = Command::StartGroup {
        user: user_id,
        room_id: payload.room_id,
        game_type: payload.game_type,
    };
    Ok(dispatch::submit(&state, command).await?)
}

#[utoipa::path(
    post,
    path = "/users/{user_id}/rooms/{room_id}/game/choice",
    tag = "group",
    params(
        ("user_id" = i64, Path, description = "Turn user"),
        ("room_id" = i64, Path, description = "Room")
    ),
    request_body = GroupChoiceRequest,
    responses((status = 200, description = "Prompt drawn", body = Reply))
)]
pub async fn submit_choice(
    State(state): State<SharedState>,
    Path((user_id, room_id)): Path<(UserId, RoomId)>,
    Valid(Json(payload)): Valid<Json<GroupChoiceRequest>>,
) -> Result<Outcome, AppError> {
    let command = Command::GroupChoice {
        user: user_id,
        room_id,
        choice: payload.choice,
        category: payload.category,
    };
    Ok(dispatch::submit(&state, command).await?)
}

#[utoipa::path(
    post,
    path = "/users/{user_id}/rooms/{room_id}/game/confirm",
    tag = "group",
    params(
        ("user_id" = i64, Path, description = "Room host"),
        ("room_id" = i64, Path, description = "Room")
    ),
    responses((status = 200, description = "Turn confirmed and rewarded", body = Reply))
)]
pub async fn confirm_turn(
    State(state): State<SharedState>,
    Path((user_id, room_id)): Path<(UserId, RoomId)>,
) -> Result<Outcome, AppError> {
    let command = Command::GroupConfirm {
        user: user_id,
        room_id,
    };
    Ok(dispatch::submit(&state, command).await?)
}

#[utoipa::path(
    post,
    path = "/users/{user_id}/rooms/{room_id}/game/advance",
    tag = "group",
    params(
        ("user_id" = i64, Path, description = "Room host"),
        ("room_id" = i64, Path, description = "Room")
    ),
    responses((status = 200, description = "Turn skipped", body = Reply))
)]
pub async fn force_advance(
    State(state): State<SharedState>,
    Path((user_id, room_id)): Path<(UserId, RoomId)>,
) -> Result<Outcome, AppError> {
    let command = Command::GroupForceAdvance {
        user: user_id,
        room_id,
    };
    Ok(dispatch::submit(&state, command).await?)
}

#[utoipa::path(
    delete,
    path = "/users/{user_id}/rooms/{room_id}/game",
    tag = "group",
    params(
        ("user_id" = i64, Path, description = "Room host"),
        ("room_id" = i64, Path, description = "Room")
    ),
    responses((status = 200, description = "Game ended", body = Reply))
)]
pub async fn end(
    State(state): State<SharedState>,
    Path((user_id, room_id)): Path<(UserId, RoomId)>,
) -> Result<Outcome, AppError> {
    let command = Command::GroupEnd {
        user: user_id,
        room_id,
    };
    Ok(dispatch::submit(&state, command).await?)
}
