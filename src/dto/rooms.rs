use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::dao::models::{RoomId, UserId};

/// Create a room owned by `host`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct OpenRoomRequest {
    pub host: UserId,
}

/// Room members in join order.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoomMembersResponse {
    pub room_id: RoomId,
    pub members: Vec<UserId>,
}
