use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dao::models::{Proof, UserId},
    dto::tod::{
        ItemRequest, JudgmentRequest, ProofRequest, StartTodRequest, TodChoiceRequest,
        TodGameView,
    },
    error::AppError,
    services::{
        dispatch::{self, Command, Outcome, Reply},
        tod_service,
    },
    state::SharedState,
};

/// Truth-or-dare routes.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/tod/{game_id}", get(get_game))
        .route("/users/{user_id}/tod", post(start_game))
        .route("/users/{user_id}/tod/{game_id}/choice", post(submit_choice))
        .route("/users/{user_id}/tod/{game_id}/proof", post(submit_proof))
        .route("/users/{user_id}/tod/{game_id}/judgment", post(submit_judgment))
        .route("/users/{user_id}/tod/{game_id}/items", post(use_item))
        .route("/users/{user_id}/tod/{game_id}/quit", post(quit))
}

#[utoipa::path(
    get,
    path = "/tod/{game_id}",
    tag = "truth-or-dare",
    params(("game_id" = Uuid, Path, description = "Game")),
    responses(
        (status = 200, description = "Game", body = TodGameView),
        (status = 404, description = "Unknown game")
    )
)]
pub async fn get_game(
    State(state): State<SharedState>,
    Path(game_id): Path<Uuid>,
) -> Result<Json<TodGameView>, AppError> {
    let game = tod_service::get(&state, game_id).await?;
    Ok(Json(TodGameView::from(&game)))
}

#[utoipa::path(
    post,
    path = "/users/{user_id}/tod",
    tag = "truth-or-dare",
    params(("user_id" = i64, Path, description = "Acting user")),
    request_body = StartTodRequest,
    responses((status = 200, description = "Game started", body = Reply))
)]
pub async fn start_game(
    State(state): State<SharedState>,
    Path(user_id): Path<UserId>,
    Json(payload): Json<StartTodRequest>,
) -> Result<Outcome, AppError> {
    let command = Command::StartTod {
        user: user_id,
        pairing_id: payload.pairing_id,
    };
    Ok(dispatch::submit(&state, command).await?)
}

#[utoipa::path(
    post,
    path = "/users/{user_id}/tod/{game_id}/choice",
    tag = "truth-or-dare",
    params(
        ("user_id" = i64, Path, description = "Acting user"),
        ("game_id" = Uuid, Path, description = "Game")
    ),
    request_body = TodChoiceRequest,
    responses(
        (status = 200, description = "Challenge bound", body = Reply),
        (status = 202, description = "Replayed token or stale action")
    )
)]
pub async fn submit_choice(
    State(state): State<SharedState>,
    Path((user_id, game_id)): Path<(UserId, Uuid)>,
    Valid(Json(payload)): Valid<Json<TodChoiceRequest>>,
) -> Result<Outcome, AppError> {
    let command = Command::TodChoice {
        user: user_id,
        game_id,
        token: payload.token,
        choice: payload.choice,
        category: payload.category,
    };
    Ok(dispatch::submit(&state, command).await?)
}

#[utoipa::path(
    post,
    path = "/users/{user_id}/tod/{game_id}/proof",
    tag = "truth-or-dare",
    params(
        ("user_id" = i64, Path, description = "Acting user"),
        ("game_id" = Uuid, Path, description = "Game")
    ),
    request_body = ProofRequest,
    responses(
        (status = 200, description = "Proof submitted", body = Reply),
        (status = 400, description = "Proof media does not match the challenge")
    )
)]
pub async fn submit_proof(
    State(state): State<SharedState>,
    Path((user_id, game_id)): Path<(UserId, Uuid)>,
    Valid(Json(payload)): Valid<Json<ProofRequest>>,
) -> Result<Outcome, AppError> {
    let command = Command::TodProof {
        user: user_id,
        game_id,
        token: payload.token,
        proof: Proof {
            kind: payload.kind,
            payload: payload.payload,
        },
    };
    Ok(dispatch::submit(&state, command).await?)
}

#[utoipa::path(
    post,
    path = "/users/{user_id}/tod/{game_id}/judgment",
    tag = "truth-or-dare",
    params(
        ("user_id" = i64, Path, description = "Acting user"),
        ("game_id" = Uuid, Path, description = "Game")
    ),
    request_body = JudgmentRequest,
    responses((status = 200, description = "Turn judged", body = Reply))
)]
pub async fn submit_judgment(
    State(state): State<SharedState>,
    Path((user_id, game_id)): Path<(UserId, Uuid)>,
    Valid(Json(payload)): Valid<Json<JudgmentRequest>>,
) -> Result<Outcome, AppError> {
    let command = Command::TodJudgment {
        user: user_id,
        game_id,
        token: payload.token,
        accepted: payload.accepted,
    };
    Ok(dispatch::submit(&state, command).await?)
}

#[utoipa::path(
    post,
    path = "/users/{user_id}/tod/{game_id}/items",
    tag = "truth-or-dare",
    params(
        ("user_id" = i64, Path, description = "Acting user"),
        ("game_id" = Uuid, Path, description = "Game")
    ),
    request_body = ItemRequest,
    responses(
        (status = 200, description = "Item applied", body = Reply),
        (status = 400, description = "Item not owned")
    )
)]
pub async fn use_item(
    State(state): State<SharedState>,
    Path((user_id, game_id)): Path<(UserId, Uuid)>,
    Valid(Json(payload)): Valid<Json<ItemRequest>>,
) -> Result<Outcome, AppError> {
    let command = Command::TodItem {
        user: user_id,
        game_id,
        token: payload.token,
        item: payload.item,
    };
    Ok(dispatch::submit(&state, command).await?)
}

#[utoipa::path(
    post,
    path = "/users/{user_id}/tod/{game_id}/quit",
    tag = "truth-or-dare",
    params(
        ("user_id" = i64, Path, description = "Acting user"),
        ("game_id" = Uuid, Path, description = "Game")
    ),
    responses((status = 200, description = "Game forfeited", body = Reply))
)]
pub async fn quit(
    State(state): State<SharedState>,
    Path((user_id, game_id)): Path<(UserId, Uuid)>,
) -> Result<Outcome, AppError> {
    let command = Command::TodQuit {
        user: user_id,
        game_id,
    };
    Ok(dispatch::submit(&state, command).await?)
}
