use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    mpsc, watch,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::{
    dao::models::UserId,
    dto::events::{Handshake, ServerEvent, SystemStatus},
    state::{SharedState, events::UserEvent},
};

const HANDSHAKE_EVENT: &str = "handshake";
const SYSTEM_STATUS_EVENT: &str = "system.status";

fn to_event(payload: ServerEvent) -> Event {
    let event = Event::default().data(payload.data);
    match payload.event {
        Some(name) => event.event(name),
        None => event,
    }
}

fn encode<T: serde::Serialize>(name: &str, payload: &T) -> Option<Event> {
    match ServerEvent::json(name.to_owned(), payload) {
        Ok(event) => Some(to_event(event)),
        Err(err) => {
            warn!(event = name, error = %err, "failed to encode stream event");
            None
        }
    }
}

/// Open the event stream of `user`: a handshake, then every event addressed to them and
/// every degraded mode change.
pub fn open(
    state: &SharedState,
    user: UserId,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + use<>> {
    let receiver = state.events().subscribe();
    let degraded = state.degraded_watcher();
    let handshake = encode(
        HANDSHAKE_EVENT,
        &Handshake {
            user_id: user,
            degraded: state.is_degraded(),
        },
    );
    info!(user_id = user, "event stream connected");

    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(16);
    tokio::spawn(forward(user, handshake, receiver, degraded, tx));

    Sse::new(ReceiverStream::new(rx)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

async fn forward(
    user: UserId,
    handshake: Option<Event>,
    mut receiver: broadcast::Receiver<UserEvent>,
    mut degraded: watch::Receiver<bool>,
    tx: mpsc::Sender<Result<Event, Infallible>>,
) {
    if let Some(event) = handshake {
        if tx.send(Ok(event)).await.is_err() {
            return;
        }
    }

    loop {
        let next = tokio::select! {
            _ = tx.closed() => break,
            changed = degraded.changed() => {
                if changed.is_err() {
                    break;
                }
                let flag = *degraded.borrow_and_update();
                encode(SYSTEM_STATUS_EVENT, &SystemStatus { degraded: flag })
            }
            received = receiver.recv() => match received {
                Ok(UserEvent { user: target, event }) if target == user => Some(to_event(event)),
                Ok(_) => None,
                Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(user_id = user, skipped, "event stream lagged");
                    None
                }
            },
        };

        if let Some(event) = next {
            if tx.send(Ok(event)).await.is_err() {
                break;
            }
        }
    }
    debug!(user_id = user, "event stream disconnected");
}
