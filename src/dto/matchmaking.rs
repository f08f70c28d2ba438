//! Matchmaking and pairing payloads.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::dao::models::{
    GameType, MatchFilters, PairingEntity, PairingStatus, QueueEntryEntity, SearchProfile,
    UserId,
};
use crate::dto::{
    format_optional_time, format_system_time,
    validation::{MAX_AGE, validate_filters, validate_not_blank},
};

/// Request to join the matchmaking queue.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct EnqueueRequest {
    #[validate(custom(function = "validate_profile"))]
    pub profile: SearchProfile,
    #[serde(default)]
    #[validate(custom(function = "validate_filters"))]
    pub filters: MatchFilters,
    #[serde(default)]
    pub game_type: GameType,
}

fn validate_profile(profile: &SearchProfile) -> Result<(), validator::ValidationError> {
    if profile.age.is_some_and(|age| age > MAX_AGE) {
        let mut err = validator::ValidationError::new("age_bounds");
        err.message = Some(format!("age must not exceed {MAX_AGE}").into());
        return Err(err);
    }
    Ok(())
}

/// Queue entry as returned to its owner.
#[derive(Debug, Serialize, ToSchema)]
pub struct QueueEntryView {
    pub user_id: UserId,
    pub game_type: GameType,
    pub coins_paid: i64,
    pub enqueued_at: String,
}

impl From<&QueueEntryEntity> for QueueEntryView {
    fn from(entry: &QueueEntryEntity) -> Self {
        Self {
            user_id: entry.user_id,
            game_type: entry.game_type,
            coins_paid: entry.coins_paid,
            enqueued_at: format_system_time(entry.enqueued_at),
        }
    }
}

/// Public projection of a pairing.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PairingView {
    pub id: Uuid,
    pub user_a: UserId,
    pub user_b: UserId,
    pub game_type: GameType,
    pub status: PairingStatus,
    pub started_at: String,
    pub timeout_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
}

impl From<&PairingEntity> for PairingView {
    fn from(pairing: &PairingEntity) -> Self {
        Self {
            id: pairing.id,
            user_a: pairing.user_a,
            user_b: pairing.user_b,
            game_type: pairing.game_type,
            status: pairing.status,
            started_at: format_system_time(pairing.started_at),
            timeout_at: format_system_time(pairing.timeout_at),
            ended_at: format_optional_time(pairing.ended_at),
        }
    }
}

/// Chat line forwarded to the partner.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct RelayRequest {
    #[validate(length(min = 1, max = 2000), custom(function = "validate_not_blank"))]
    pub text: String,
}

/// Sent when a search starts.
#[derive(Debug, Serialize, ToSchema)]
pub struct SearchingEvent {
    pub game_type: GameType,
    pub coins_paid: i64,
}

/// Sent when a search ends without a pairing.
#[derive(Debug, Serialize, ToSchema)]
pub struct SearchEndedEvent {
    pub refunded: i64,
}

/// Sent to both sides of a fresh pairing.
#[derive(Debug, Serialize, ToSchema)]
pub struct PairingFoundEvent {
    pub pairing_id: Uuid,
    pub partner: UserId,
    pub game_type: GameType,
    pub timeout_at: String,
}

/// Sent when the free interaction window elapsed.
#[derive(Debug, Serialize, ToSchema)]
pub struct PairingTimeoutEvent {
    pub pairing_id: Uuid,
    pub message_cost: i64,
}

/// Sent to both sides when a pairing closes.
#[derive(Debug, Serialize, ToSchema)]
pub struct PairingEndedEvent {
    pub pairing_id: Uuid,
    pub ended_by: UserId,
    pub xp: i64,
}

/// Relayed chat line.
#[derive(Debug, Serialize, ToSchema)]
pub struct ChatMessageEvent {
    pub pairing_id: Uuid,
    pub from: UserId,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::Gender;

    fn request(age: Option<u8>, filters: MatchFilters) -> EnqueueRequest {
        EnqueueRequest {
            profile: SearchProfile {
                gender: Gender::Female,
                age,
                city: Some("Tehran".into()),
                province: None,
            },
            filters,
            game_type: GameType::Chat,
        }
    }

    #[test]
    fn enqueue_request_checks_profile_and_filters() {
        assert!(request(Some(25), MatchFilters::default()).validate().is_ok());
        assert!(request(Some(130), MatchFilters::default()).validate().is_err());
        let inverted = MatchFilters {
            min_age: Some(30),
            max_age: Some(18),
            ..MatchFilters::default()
        };
        assert!(request(None, inverted).validate().is_err());
    }

    #[test]
    fn blank_relay_text_is_rejected() {
        assert!(RelayRequest { text: "  ".into() }.validate().is_err());
        assert!(RelayRequest { text: "salam".into() }.validate().is_ok());
    }
}
