use std::time::{SystemTime, UNIX_EPOCH};

use mongodb::bson::{Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dao::models::UserId;

/// Entity stored alongside the fields backing partial unique indexes.
///
/// `open` mirrors "non-terminal" and `participants` holds the users a pairing blocks, so the
/// database itself enforces one open pairing per user and one open session per room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tracked<T> {
    #[serde(flatten)]
    pub entity: T,
    pub open: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub participants: Vec<UserId>,
}

impl<T> Tracked<T> {
    pub fn new(entity: T, open: bool) -> Self {
        Self {
            entity,
            open,
            participants: Vec::new(),
        }
    }

    pub fn with_participants(mut self, participants: Vec<UserId>) -> Self {
        self.participants = participants;
        self
    }
}

/// Materialized balance row, mutated with conditional `$inc`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceDocument {
    #[serde(rename = "_id")]
    pub user_id: UserId,
    pub balance: i64,
}

pub fn doc_id(id: Uuid) -> Document {
    doc! {"_id": id.to_string()}
}

/// Epoch milliseconds, matching the `TimestampMilliSeconds` encoding of the entities.
pub fn millis(at: SystemTime) -> i64 {
    at.duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Serialized tag of a unit enum variant, as stored by serde.
pub fn tag<T: Serialize>(value: &T) -> String {
    serde_json::to_value(value)
        .ok()
        .and_then(|value| value.as_str().map(str::to_owned))
        .unwrap_or_default()
}

pub fn tags<T: Serialize>(values: &[T]) -> Vec<String> {
    values.iter().map(tag).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::{PairingStatus, TodState};

    #[test]
    fn tag_matches_serde_encoding() {
        assert_eq!(tag(&PairingStatus::Active), "active");
        assert_eq!(tag(&TodState::WaitingJudgment), "waiting_judgment");
    }

    #[test]
    fn millis_of_epoch_is_zero() {
        assert_eq!(millis(UNIX_EPOCH), 0);
    }
}
