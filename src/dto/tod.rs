//! Truth-or-dare payloads.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{
        EndReason, ItemKind, JudgmentResult, ProofKind, TodChoice, TodGameEntity, TodState,
        UserId,
    },
    dto::{format_optional_time, format_system_time, validation::validate_not_blank},
};

/// Request to start a game on an open pairing.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct StartTodRequest {
    pub pairing_id: Uuid,
}

/// Truth or dare pick of the active player.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct TodChoiceRequest {
    #[validate(length(min = 1, max = 64))]
    pub token: String,
    pub choice: TodChoice,
    #[serde(default)]
    #[validate(length(max = 64))]
    pub category: Option<String>,
}

/// Proof of a completed challenge.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct ProofRequest {
    #[validate(length(min = 1, max = 64))]
    pub token: String,
    pub kind: ProofKind,
    /// Text answer or media reference.
    #[serde(default)]
    #[validate(length(max = 4000))]
    pub payload: String,
}

/// Verdict of the passive player.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct JudgmentRequest {
    #[validate(length(min = 1, max = 64))]
    pub token: String,
    pub accepted: bool,
}

/// Item used during the choice phase.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct ItemRequest {
    #[validate(length(min = 1, max = 64), custom(function = "validate_not_blank"))]
    pub token: String,
    pub item: ItemKind,
}

/// Public projection of a truth-or-dare game.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TodGameView {
    pub id: Uuid,
    pub pairing_id: Uuid,
    pub user_a: UserId,
    pub user_b: UserId,
    pub state: TodState,
    pub current_round: u32,
    pub max_rounds: u32,
    pub turn_number: u32,
    pub active_player: UserId,
    pub passive_player: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_deadline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<EndReason>,
    pub updated_at: String,
}

impl From<&TodGameEntity> for TodGameView {
    fn from(game: &TodGameEntity) -> Self {
        Self {
            id: game.id,
            pairing_id: game.pairing_id,
            user_a: game.user_a,
            user_b: game.user_b,
            state: game.state,
            current_round: game.current_round,
            max_rounds: game.max_rounds,
            turn_number: game.turn_number,
            active_player: game.active_player,
            passive_player: game.passive_player,
            turn_deadline: format_optional_time(game.turn_deadline),
            winner: game.winner,
            end_reason: game.end_reason,
            updated_at: format_system_time(game.updated_at),
        }
    }
}

/// Sent to the player whose turn starts.
#[derive(Debug, Serialize, ToSchema)]
pub struct YourTurnEvent {
    pub game_id: Uuid,
    pub round: u32,
    pub turn_number: u32,
    pub deadline: Option<String>,
}

/// Challenge bound to the current turn.
#[derive(Debug, Serialize, ToSchema)]
pub struct ChallengeEvent {
    pub game_id: Uuid,
    pub turn_number: u32,
    pub active_player: UserId,
    pub choice: TodChoice,
    pub text: String,
    pub proof_kind: ProofKind,
    pub coin_reward: i64,
}

/// Proof forwarded to the judge.
#[derive(Debug, Serialize, ToSchema)]
pub struct ProofEvent {
    pub game_id: Uuid,
    pub turn_number: u32,
    pub kind: ProofKind,
    pub payload: String,
}

/// Verdict broadcast to both players.
#[derive(Debug, Serialize, ToSchema)]
pub struct JudgedEvent {
    pub game_id: Uuid,
    pub turn_number: u32,
    pub result: JudgmentResult,
    pub coins: i64,
    pub xp: i64,
}

/// Item effect broadcast to both players.
#[derive(Debug, Serialize, ToSchema)]
pub struct ItemUsedEvent {
    pub game_id: Uuid,
    pub by: UserId,
    pub item: ItemKind,
    pub active_player: UserId,
}

/// Deadline warning.
#[derive(Debug, Serialize, ToSchema)]
pub struct TurnWarningEvent {
    pub game_id: Uuid,
    pub seconds_left: u64,
}

/// Game over.
#[derive(Debug, Serialize, ToSchema)]
pub struct TodEndedEvent {
    pub game_id: Uuid,
    pub reason: EndReason,
    pub winner: Option<UserId>,
    pub score_a: u32,
    pub score_b: u32,
}

/// Sent to a judge whose verdicts look abusive.
#[derive(Debug, Serialize, ToSchema)]
pub struct JudgeWarningEvent {
    pub unfair_judgments: u32,
    pub judge_score: f64,
}
