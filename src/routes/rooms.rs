use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};

use crate::{
    dao::models::{RoomId, UserId},
    dto::rooms::{OpenRoomRequest, RoomMembersResponse},
    error::AppError,
    services::group_service,
    state::SharedState,
};

/// Room directory routes. Joins and leaves are forwarded to a running group game.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/rooms/{room_id}", post(open_room))
        .route("/rooms/{room_id}/members", get(members))
        .route(
            "/rooms/{room_id}/members/{user_id}",
            axum::routing::put(join).delete(leave),
        )
        .route("/users/{user_id}/rooms/{room_id}", axum::routing::delete(close_room))
}

#[utoipa::path(
    post,
    path = "/rooms/{room_id}",
    tag = "rooms",
    params(("room_id" = i64, Path, description = "Room")),
    request_body = OpenRoomRequest,
    responses((status = 201, description = "Room opened", body = RoomMembersResponse))
)]
pub async fn open_room(
    State(state): State<SharedState>,
    Path(room_id): Path<RoomId>,
    Json(payload): Json<OpenRoomRequest>,
) -> (StatusCode, Json<RoomMembersResponse>) {
    state.rooms().open_room(room_id, payload.host).await;
    let members = state.rooms().members(room_id).await;
    (StatusCode::CREATED, Json(RoomMembersResponse { room_id, members }))
}

#[utoipa::path(
    get,
    path = "/rooms/{room_id}/members",
    tag = "rooms",
    params(("room_id" = i64, Path, description = "Room")),
    responses((status = 200, description = "Members in join order", body = RoomMembersResponse))
)]
pub async fn members(
    State(state): State<SharedState>,
    Path(room_id): Path<RoomId>,
) -> Json<RoomMembersResponse> {
    let members = state.rooms().members(room_id).await;
    Json(RoomMembersResponse { room_id, members })
}

#[utoipa::path(
    put,
    path = "/rooms/{room_id}/members/{user_id}",
    tag = "rooms",
    params(
        ("room_id" = i64, Path, description = "Room"),
        ("user_id" = i64, Path, description = "Joining user")
    ),
    responses(
        (status = 204, description = "Joined"),
        (status = 404, description = "Unknown room or already a member")
    )
)]
pub async fn join(
    State(state): State<SharedState>,
    Path((room_id, user_id)): Path<(RoomId, UserId)>,
) -> Result<StatusCode, AppError> {
    if group_service::member_joined(&state, room_id, user_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!(
            "room {room_id} does not accept user {user_id}"
        )))
    }
}

#[utoipa::path(
    delete,
    path = "/rooms/{room_id}/members/{user_id}",
    tag = "rooms",
    params(
        ("room_id" = i64, Path, description = "Room"),
        ("user_id" = i64, Path, description = "Leaving user")
    ),
    responses(
        (status = 204, description = "Left"),
        (status = 404, description = "Not a member")
    )
)]
pub async fn leave(
    State(state): State<SharedState>,
    Path((room_id, user_id)): Path<(RoomId, UserId)>,
) -> Result<StatusCode, AppError> {
    if group_service::member_left(&state, room_id, user_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!(
            "user {user_id} is not in room {room_id}"
        )))
    }
}

/// The host closes the room, ending its game first.
#[utoipa::path(
    delete,
    path = "/users/{user_id}/rooms/{room_id}",
    tag = "rooms",
    params(
        ("user_id" = i64, Path, description = "Room host"),
        ("room_id" = i64, Path, description = "Room")
    ),
    responses(
        (status = 204, description = "Room closed"),
        (status = 403, description = "Not the room host")
    )
)]
pub async fn close_room(
    State(state): State<SharedState>,
    Path((user_id, room_id)): Path<(UserId, RoomId)>,
) -> Result<StatusCode, AppError> {
    group_service::close_room(&state, room_id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
