//! 1v1 quiz payloads.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{QuizScore, QuizSessionEntity, QuizState, RoundResult, UserId},
    dto::{format_optional_time, format_system_time, validation::validate_not_blank},
};

/// Request to start a quiz on an open pairing.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct StartQuizRequest {
    pub pairing_id: Uuid,
}

/// Category picked by the round's chooser.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct CategoryRequest {
    #[validate(length(min = 1, max = 64), custom(function = "validate_not_blank"))]
    pub category: String,
}

/// Answer to the current question.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct AnswerRequest {
    #[validate(range(min = 1))]
    pub round: u8,
    #[validate(range(min = 1))]
    pub question: u8,
    /// Index of the picked option.
    pub choice: u8,
}

/// Public projection of a quiz session.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QuizSessionView {
    pub id: Uuid,
    pub pairing_id: Uuid,
    pub user_a: UserId,
    pub user_b: UserId,
    pub state: QuizState,
    pub rounds_total: u8,
    pub questions_per_round: u8,
    pub current_round: u8,
    pub current_question: u8,
    pub score_a: QuizScore,
    pub score_b: QuizScore,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_deadline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_deadline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<UserId>,
    pub updated_at: String,
}

impl From<&QuizSessionEntity> for QuizSessionView {
    fn from(session: &QuizSessionEntity) -> Self {
        Self {
            id: session.id,
            pairing_id: session.pairing_id,
            user_a: session.user_a,
            user_b: session.user_b,
            state: session.state,
            rounds_total: session.rounds_total,
            questions_per_round: session.questions_per_round,
            current_round: session.current_round,
            current_question: session.current_question,
            score_a: session.score_a,
            score_b: session.score_b,
            category_deadline: format_optional_time(session.category_deadline),
            question_deadline: format_optional_time(session.question_deadline),
            winner: session.winner,
            updated_at: format_system_time(session.updated_at),
        }
    }
}

/// Prompt sent to the chooser of a round.
#[derive(Debug, Serialize, ToSchema)]
pub struct ChooseCategoryEvent {
    pub session_id: Uuid,
    pub round: u8,
    pub categories: Vec<String>,
    pub deadline: Option<String>,
}

/// Question broadcast to both players.
#[derive(Debug, Serialize, ToSchema)]
pub struct QuestionEvent {
    pub session_id: Uuid,
    pub round: u8,
    pub question: u8,
    pub category: String,
    pub text: String,
    pub options: Vec<String>,
    pub deadline: Option<String>,
}

/// Sent to the other player once an answer is in.
#[derive(Debug, Serialize, ToSchema)]
pub struct OpponentAnsweredEvent {
    pub session_id: Uuid,
    pub round: u8,
    pub question: u8,
}

/// Round totals.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoundFinishedEvent {
    pub session_id: Uuid,
    pub round: u8,
    pub result: RoundResult,
}

/// Final standing and payouts.
#[derive(Debug, Serialize, ToSchema)]
pub struct QuizFinishedEvent {
    pub session_id: Uuid,
    pub winner: Option<UserId>,
    pub score_a: QuizScore,
    pub score_b: QuizScore,
    pub coins: i64,
    pub xp: i64,
}

/// Session abandoned without rewards.
#[derive(Debug, Serialize, ToSchema)]
pub struct QuizTimedOutEvent {
    pub session_id: Uuid,
    pub round: u8,
}
