//! Group game payloads.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{
        GroupGameType, GroupPrompt, GroupSessionEntity, GroupStatus, Participant, RoomId,
        TodChoice, UserId,
    },
    dto::{format_optional_time, format_system_time, validation::validate_not_blank},
};

/// Request from the room host to start a game.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct StartGroupRequest {
    pub room_id: RoomId,
    pub game_type: GroupGameType,
}

/// Prompt picked by the turn user.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct GroupChoiceRequest {
    pub choice: TodChoice,
    #[validate(length(min = 1, max = 64), custom(function = "validate_not_blank"))]
    pub category: String,
}

/// Public projection of a group session.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GroupSessionView {
    pub id: Uuid,
    pub room_id: RoomId,
    pub game_type: GroupGameType,
    pub status: GroupStatus,
    pub turn_user: Option<UserId>,
    pub participants: Vec<Participant>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<GroupPrompt>,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
}

impl From<&GroupSessionEntity> for GroupSessionView {
    fn from(session: &GroupSessionEntity) -> Self {
        Self {
            id: session.id,
            room_id: session.room_id,
            game_type: session.game_type,
            status: session.status,
            turn_user: session.turn_user,
            participants: session.participants.clone(),
            prompt: session.prompt.clone(),
            updated_at: format_system_time(session.updated_at),
            ended_at: format_optional_time(session.ended_at),
        }
    }
}

/// Turn handed to a participant.
#[derive(Debug, Serialize, ToSchema)]
pub struct GroupTurnEvent {
    pub session_id: Uuid,
    pub turn_user: UserId,
}

/// Prompt broadcast to the room; the host receives confirm controls.
#[derive(Debug, Serialize, ToSchema)]
pub struct GroupPromptEvent {
    pub session_id: Uuid,
    pub turn_user: UserId,
    pub prompt: GroupPrompt,
}

/// Host confirmed a turn.
#[derive(Debug, Serialize, ToSchema)]
pub struct GroupTurnConfirmedEvent {
    pub session_id: Uuid,
    pub user_id: UserId,
    pub score: i64,
    pub coins: i64,
}

/// Final scores.
#[derive(Debug, Serialize, ToSchema)]
pub struct GroupFinishedEvent {
    pub session_id: Uuid,
    pub participants: Vec<Participant>,
}
