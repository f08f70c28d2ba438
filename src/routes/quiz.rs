use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dao::models::UserId,
    dto::quiz::{AnswerRequest, CategoryRequest, QuizSessionView, StartQuizRequest},
    error::AppError,
    services::{
        dispatch::{self, Command, Outcome, Reply},
        quiz_service,
    },
    state::SharedState,
};

/// 1v1 quiz routes.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/quiz/{session_id}", get(get_session))
        .route("/users/{user_id}/quiz", post(start_session))
        .route("/users/{user_id}/quiz/{session_id}/category", post(submit_category))
        .route("/users/{user_id}/quiz/{session_id}/answers", post(submit_answer))
}

#[utoipa::path(
    get,
    path = "/quiz/{session_id}",
    tag = "quiz",
    params(("session_id" = Uuid, Path, description = "Quiz session")),
    responses(
        (status = 200, description = "Session", body = QuizSessionView),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn get_session(
    State(state): State<SharedState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<QuizSessionView>, AppError> {
    let session = quiz_service::get(&state, session_id).await?;
    Ok(Json(QuizSessionView::from(&session)))
}

/// Start a quiz on one of the user's pairings.
#[utoipa::path(
    post,
    path = "/users/{user_id}/quiz",
    tag = "quiz",
    params(("user_id" = i64, Path, description = "Acting user")),
    request_body = StartQuizRequest,
    responses((status = 200, description = "Quiz started", body = Reply))
)]
pub async fn start_session(
    State(state): State<SharedState>,
    Path(user_id): Path<UserId>,
    Json(payload): Json<StartQuizRequest>,
) -> Result<Outcome, AppError> {
    let command = Command::StartQuiz {
        user: user_id,
        pairing_id: payload.pairing_id,
    };
    Ok(dispatch::submit(&state, command).await?)
}

#[utoipa::path(
    post,
    path = "/users/{user_id}/quiz/{session_id}/category",
    tag = "quiz",
    params(
        ("user_id" = i64, Path, description = "Acting user"),
        ("session_id" = Uuid, Path, description = "Quiz session")
    ),
    request_body = CategoryRequest,
    responses(
        (status = 200, description = "Category accepted", body = Reply),
        (status = 202, description = "Ignored")
    )
)]
pub async fn submit_category(
    State(state): State<SharedState>,
    Path((user_id, session_id)): Path<(UserId, Uuid)>,
    Valid(Json(payload)): Valid<Json<CategoryRequest>>,
) -> Result<Outcome, AppError> {
    let command = Command::SubmitCategory {
        user: user_id,
        session_id,
        category: payload.category,
    };
    Ok(dispatch::submit(&state, command).await?)
}

#[utoipa::path(
    post,
    path = "/users/{user_id}/quiz/{session_id}/answers",
    tag = "quiz",
    params(
        ("user_id" = i64, Path, description = "Acting user"),
        ("session_id" = Uuid, Path, description = "Quiz session")
    ),
    request_body = AnswerRequest,
    responses(
        (status = 200, description = "Answer recorded", body = Reply),
        (status = 202, description = "Duplicate or late answer ignored")
    )
)]
pub async fn submit_answer(
    State(state): State<SharedState>,
    Path((user_id, session_id)): Path<(UserId, Uuid)>,
    Valid(Json(payload)): Valid<Json<AnswerRequest>>,
) -> Result<Outcome, AppError> {
    let command = Command::SubmitAnswer {
        user: user_id,
        session_id,
        round: payload.round,
        question: payload.question,
        choice: payload.choice,
    };
    Ok(dispatch::submit(&state, command).await?)
}
