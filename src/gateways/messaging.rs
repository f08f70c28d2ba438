use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{dao::models::UserId, dto::events::ServerEvent, state::events::EventHub};

/// Event name used when a previously sent notification is replaced in place.
pub const NOTIFICATION_UPDATED: &str = "notification.updated";
/// Event name carrying the outcome of a token-bearing command.
pub const ACTION_FEEDBACK: &str = "action.feedback";

/// Button the client may render under a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Control {
    pub action: String,
    pub value: String,
}

impl Control {
    pub fn new(action: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            value: value.into(),
        }
    }
}

/// Message delivered to one user.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Notification {
    pub event: String,
    #[schema(value_type = Object)]
    pub payload: Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub controls: Vec<Control>,
}

impl Notification {
    /// Notification with a serialisable payload and no controls.
    pub fn new<T: Serialize>(event: impl Into<String>, payload: &T) -> Self {
        let event = event.into();
        let payload = serde_json::to_value(payload).unwrap_or_else(|err| {
            warn!(%event, error = %err, "failed to serialise notification payload");
            Value::Null
        });
        Self {
            event,
            payload,
            controls: Vec::new(),
        }
    }

    pub fn with_controls(mut self, controls: Vec<Control>) -> Self {
        self.controls = controls;
        self
    }
}

/// Reference to a delivered notification, used to edit it later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct DeliveryHandle {
    pub user: UserId,
    pub id: Uuid,
}

/// Outcome reported against the action token of a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum Feedback {
    Done,
    Ignored,
    Failed(String),
}

/// Outbound user messaging. Delivery is best effort and never fails the caller.
pub trait MessagingGateway: Send + Sync {
    fn notify(&self, user: UserId, notification: Notification) -> DeliveryHandle;
    fn update_notification(&self, handle: &DeliveryHandle, notification: Notification);
    fn acknowledge(&self, user: UserId, token: &str, feedback: Feedback);
}

/// Prompts whose controls are still live, at most one per session.
///
/// A new prompt for the same session, or [`OpenPrompts::withdraw`], edits the
/// previous one in place to drop its controls so stale buttons stop working.
#[derive(Default)]
pub struct OpenPrompts {
    prompts: DashMap<Uuid, (DeliveryHandle, Notification)>,
}

impl OpenPrompts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(
        &self,
        messenger: &dyn MessagingGateway,
        session: Uuid,
        user: UserId,
        notification: Notification,
    ) -> DeliveryHandle {
        self.withdraw(messenger, session);
        let handle = messenger.notify(user, notification.clone());
        self.prompts.insert(session, (handle, notification));
        handle
    }

    /// Strip the controls of the prompt open for `session`, if any.
    pub fn withdraw(&self, messenger: &dyn MessagingGateway, session: Uuid) {
        if let Some((_, (handle, mut notification))) = self.prompts.remove(&session) {
            notification.controls.clear();
            messenger.update_notification(&handle, notification);
        }
    }

    pub fn is_open(&self, session: Uuid) -> bool {
        self.prompts.contains_key(&session)
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    id: Uuid,
    #[serde(flatten)]
    notification: &'a Notification,
}

#[derive(Serialize)]
struct Acknowledgement<'a> {
    token: &'a str,
    #[serde(flatten)]
    feedback: &'a Feedback,
}

/// Messenger publishing every notification to the user's SSE stream.
pub struct HubMessenger {
    hub: Arc<EventHub>,
}

impl HubMessenger {
    pub fn new(hub: Arc<EventHub>) -> Self {
        Self { hub }
    }

    fn publish<T: Serialize>(&self, user: UserId, event: &str, payload: &T) {
        match ServerEvent::json(event.to_owned(), payload) {
            Ok(event) => self.hub.publish(user, event),
            Err(err) => warn!(user_id = user, %event, error = %err, "failed to encode event"),
        }
    }
}

impl MessagingGateway for HubMessenger {
    fn notify(&self, user: UserId, notification: Notification) -> DeliveryHandle {
        let handle = DeliveryHandle {
            user,
            id: Uuid::new_v4(),
        };
        debug!(user_id = user, event = %notification.event, "notify");
        self.publish(
            user,
            &notification.event,
            &Envelope {
                id: handle.id,
                notification: &notification,
            },
        );
        handle
    }

    fn update_notification(&self, handle: &DeliveryHandle, notification: Notification) {
        self.publish(
            handle.user,
            NOTIFICATION_UPDATED,
            &Envelope {
                id: handle.id,
                notification: &notification,
            },
        );
    }

    fn acknowledge(&self, user: UserId, token: &str, feedback: Feedback) {
        self.publish(
            user,
            ACTION_FEEDBACK,
            &Acknowledgement {
                token,
                feedback: &feedback,
            },
        );
    }
}

/// One delivery captured by [`RecordingMessenger`].
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Notified {
        handle: DeliveryHandle,
        notification: Notification,
    },
    Updated {
        handle: DeliveryHandle,
        notification: Notification,
    },
    Acknowledged {
        user: UserId,
        token: String,
        feedback: Feedback,
    },
}

/// In-process messenger keeping every delivery, for tests and local tooling.
#[derive(Default)]
pub struct RecordingMessenger {
    deliveries: Mutex<Vec<Delivery>>,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, delivery: Delivery) {
        if let Ok(mut deliveries) = self.deliveries.lock() {
            deliveries.push(delivery);
        }
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries
            .lock()
            .map(|deliveries| deliveries.clone())
            .unwrap_or_default()
    }

    /// Event names notified to `user`, oldest first.
    pub fn events_for(&self, user: UserId) -> Vec<String> {
        self.deliveries()
            .into_iter()
            .filter_map(|delivery| match delivery {
                Delivery::Notified {
                    handle,
                    notification,
                } if handle.user == user => Some(notification.event),
                _ => None,
            })
            .collect()
    }

    /// Last notification of kind `event` sent to `user`.
    pub fn last(&self, user: UserId, event: &str) -> Option<Notification> {
        self.deliveries()
            .into_iter()
            .rev()
            .find_map(|delivery| match delivery {
                Delivery::Notified {
                    handle,
                    notification,
                } if handle.user == user && notification.event == event => Some(notification),
                _ => None,
            })
    }

    /// In-place edits sent to `user`, oldest first.
    pub fn updates_for(&self, user: UserId) -> Vec<(DeliveryHandle, Notification)> {
        self.deliveries()
            .into_iter()
            .filter_map(|delivery| match delivery {
                Delivery::Updated {
                    handle,
                    notification,
                } if handle.user == user => Some((handle, notification)),
                _ => None,
            })
            .collect()
    }

    /// Handles of the notifications of kind `event` sent to `user`, oldest first.
    pub fn handles(&self, user: UserId, event: &str) -> Vec<DeliveryHandle> {
        self.deliveries()
            .into_iter()
            .filter_map(|delivery| match delivery {
                Delivery::Notified {
                    handle,
                    notification,
                } if handle.user == user && notification.event == event => Some(handle),
                _ => None,
            })
            .collect()
    }

    /// Feedback recorded for `token`.
    pub fn feedback(&self, token: &str) -> Option<Feedback> {
        self.deliveries()
            .into_iter()
            .rev()
            .find_map(|delivery| match delivery {
                Delivery::Acknowledged {
                    token: recorded,
                    feedback,
                    ..
                } if recorded == token => Some(feedback),
                _ => None,
            })
    }

    pub fn clear(&self) {
        if let Ok(mut deliveries) = self.deliveries.lock() {
            deliveries.clear();
        }
    }
}

impl MessagingGateway for RecordingMessenger {
    fn notify(&self, user: UserId, notification: Notification) -> DeliveryHandle {
        let handle = DeliveryHandle {
            user,
            id: Uuid::new_v4(),
        };
        self.push(Delivery::Notified {
            handle,
            notification,
        });
        handle
    }

    fn update_notification(&self, handle: &DeliveryHandle, notification: Notification) {
        self.push(Delivery::Updated {
            handle: *handle,
            notification,
        });
    }

    fn acknowledge(&self, user: UserId, token: &str, feedback: Feedback) {
        self.push(Delivery::Acknowledged {
            user,
            token: token.to_owned(),
            feedback,
        });
    }
}
