use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use tracing::info;

use crate::dao::models::{RoomId, UserId};

/// Room membership owned by the surrounding chat platform.
pub trait RoomDirectory: Send + Sync {
    /// Members still present, in join order.
    fn members(&self, room: RoomId) -> BoxFuture<'static, Vec<UserId>>;
    fn is_host(&self, room: RoomId, user: UserId) -> BoxFuture<'static, bool>;
    fn close_room(&self, room: RoomId) -> BoxFuture<'static, ()>;
    /// Create or reset `room` with `host` as its only member.
    fn open_room(&self, room: RoomId, host: UserId) -> BoxFuture<'static, ()>;
    /// Returns `false` if the room does not exist or already has the user.
    fn join(&self, room: RoomId, user: UserId) -> BoxFuture<'static, bool>;
    /// Returns whether the user was a member.
    fn leave(&self, room: RoomId, user: UserId) -> BoxFuture<'static, bool>;
}

#[derive(Debug, Clone)]
struct Room {
    host: UserId,
    members: Vec<UserId>,
}

/// Process-local room directory. The host is the first member.
#[derive(Clone, Default)]
pub struct MemoryRooms {
    rooms: Arc<DashMap<RoomId, Room>>,
}

impl MemoryRooms {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, room: RoomId, host: UserId) {
        self.rooms.insert(
            room,
            Room {
                host,
                members: vec![host],
            },
        );
        info!(room_id = room, host_id = host, "room opened");
    }

    fn add_member(&self, room: RoomId, user: UserId) -> bool {
        match self.rooms.get_mut(&room) {
            Some(mut entry) if !entry.members.contains(&user) => {
                entry.members.push(user);
                true
            }
            _ => false,
        }
    }

    fn remove_member(&self, room: RoomId, user: UserId) -> bool {
        match self.rooms.get_mut(&room) {
            Some(mut entry) => {
                let before = entry.members.len();
                entry.members.retain(|member| *member != user);
                before != entry.members.len()
            }
            None => false,
        }
    }
}

impl RoomDirectory for MemoryRooms {
    fn members(&self, room: RoomId) -> BoxFuture<'static, Vec<UserId>> {
        let members = self
            .rooms
            .get(&room)
            .map(|entry| entry.members.clone())
            .unwrap_or_default();
        Box::pin(async move { members })
    }

    fn is_host(&self, room: RoomId, user: UserId) -> BoxFuture<'static, bool> {
        let host = self.rooms.get(&room).is_some_and(|entry| entry.host == user);
        Box::pin(async move { host })
    }

    fn close_room(&self, room: RoomId) -> BoxFuture<'static, ()> {
        if self.rooms.remove(&room).is_some() {
            info!(room_id = room, "room closed");
        }
        Box::pin(async {})
    }

    fn open_room(&self, room: RoomId, host: UserId) -> BoxFuture<'static, ()> {
        self.insert(room, host);
        Box::pin(async {})
    }

    fn join(&self, room: RoomId, user: UserId) -> BoxFuture<'static, bool> {
        let joined = self.add_member(room, user);
        Box::pin(async move { joined })
    }

    fn leave(&self, room: RoomId, user: UserId) -> BoxFuture<'static, bool> {
        let left = self.remove_member(room, user);
        Box::pin(async move { left })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn members_keep_join_order() {
        let rooms = MemoryRooms::new();
        rooms.open_room(5, 100).await;
        assert!(rooms.join(5, 200).await);
        assert!(rooms.join(5, 300).await);
        assert!(!rooms.join(5, 200).await);
        assert!(rooms.leave(5, 200).await);

        assert_eq!(rooms.members(5).await, vec![100, 300]);
        assert!(rooms.is_host(5, 100).await);
        assert!(!rooms.is_host(5, 300).await);
    }

    #[tokio::test]
    async fn closed_room_has_no_members() {
        let rooms = MemoryRooms::new();
        rooms.open_room(1, 10).await;
        rooms.close_room(1).await;
        assert!(rooms.members(1).await.is_empty());
        assert!(!rooms.join(1, 11).await);
    }
}
