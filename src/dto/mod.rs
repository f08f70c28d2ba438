use std::time::SystemTime;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

pub mod events;
pub mod group;
pub mod health;
pub mod ledger;
pub mod matchmaking;
pub mod quiz;
pub mod rooms;
pub mod tod;
pub mod validation;

pub(crate) fn format_system_time(time: SystemTime) -> String {
    OffsetDateTime::from(time)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}

pub(crate) fn format_optional_time(time: Option<SystemTime>) -> Option<String> {
    time.map(format_system_time)
}

/// Generic action acknowledgement.
#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct ActionResponse {
    /// Human readable outcome.
    pub message: String,
}

impl ActionResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
