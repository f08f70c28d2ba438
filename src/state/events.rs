use tokio::sync::broadcast;

use crate::{dao::models::UserId, dto::events::ServerEvent};

/// Event addressed to a single user.
#[derive(Clone, Debug)]
pub struct UserEvent {
    pub user: UserId,
    pub event: ServerEvent,
}

/// Broadcast hub fanning user events out to the per-user SSE streams.
pub struct EventHub {
    sender: broadcast::Sender<UserEvent>,
}

impl EventHub {
    /// Construct a new hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<UserEvent> {
        self.sender.subscribe()
    }

    /// Send an event to all current subscribers, ignoring delivery errors.
    pub fn publish(&self, user: UserId, event: ServerEvent) {
        let _ = self.sender.send(UserEvent { user, event });
    }
}
