//! Room-wide games: turn rotation over present members, host controls and broadcasts.

use std::time::SystemTime;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::models::{
        GroupGameType, GroupPrompt, GroupSessionEntity, RoomId, TodChoice, TxType, UserId,
    },
    dto::group::{
        GroupFinishedEvent, GroupPromptEvent, GroupSessionView, GroupTurnConfirmedEvent,
        GroupTurnEvent,
    },
    error::ServiceError,
    gateways::messaging::{Control, Notification},
    services::{economy, notifications},
    state::{
        SharedState,
        group::{self, GroupError, Rotation},
        registry::SessionGuard,
    },
};

type Guard = SessionGuard<GroupSessionEntity>;

async fn load(
    state: &SharedState,
    guard: &mut Guard,
    id: Uuid,
) -> Result<GroupSessionEntity, ServiceError> {
    let store = state.require_store().await?;
    guard
        .load(|| async move { store.find_group_session(id).await.map_err(ServiceError::from) })
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("group session {id}")))
}

async fn save(
    state: &SharedState,
    guard: &mut Guard,
    mut session: GroupSessionEntity,
) -> Result<GroupSessionEntity, ServiceError> {
    let store = state.require_store().await?;
    let expected = session.version;
    session.version = expected + 1;

    if store.save_group_session(session.clone(), expected).await? {
        guard.store(session.clone());
        Ok(session)
    } else {
        guard.invalidate();
        Err(ServiceError::InvalidState(format!(
            "group session {} changed concurrently",
            session.id
        )))
    }
}

async fn require_host(state: &SharedState, room: RoomId, user: UserId) -> Result<(), ServiceError> {
    if state.rooms().is_host(room, user).await {
        Ok(())
    } else {
        Err(GroupError::NotHost(user).into())
    }
}

/// Open session of `room`, or `NotFound`.
async fn open_session_id(state: &SharedState, room: RoomId) -> Result<Uuid, ServiceError> {
    let store = state.require_store().await?;
    store
        .find_open_group_session(room)
        .await?
        .map(|session| session.id)
        .ok_or_else(|| ServiceError::NotFound(format!("room {room} has no running game")))
}

async fn broadcast(state: &SharedState, room: RoomId, notification: Notification) {
    for member in state.rooms().members(room).await {
        state.messenger().notify(member, notification.clone());
    }
}

async fn announce_rotation(state: &SharedState, session: &GroupSessionEntity, rotation: Rotation) {
    match rotation {
        Rotation::Next(turn_user) => {
            debug!(session_id = %session.id, turn_user, "group turn rotated");
            broadcast(
                state,
                session.room_id,
                Notification::new(
                    notifications::GROUP_TURN,
                    &GroupTurnEvent {
                        session_id: session.id,
                        turn_user,
                    },
                ),
            )
            .await;
        }
        Rotation::Finished => finish(state, session).await,
    }
}

async fn finish(state: &SharedState, session: &GroupSessionEntity) {
    state.group_sessions().evict(session.id);
    info!(session_id = %session.id, room_id = session.room_id, "group game finished");
    broadcast(
        state,
        session.room_id,
        Notification::new(
            notifications::GROUP_FINISHED,
            &GroupFinishedEvent {
                session_id: session.id,
                participants: session.participants.clone(),
            },
        ),
    )
    .await;
}

/// Read-only view of a session.
pub async fn get(state: &SharedState, id: Uuid) -> Result<GroupSessionEntity, ServiceError> {
    let mut guard = state.group_sessions().lock(id).await;
    load(state, &mut guard, id).await
}

/// The host starts a game over the members currently in the room.
pub async fn start(
    state: &SharedState,
    host: UserId,
    room: RoomId,
    game_type: GroupGameType,
) -> Result<GroupSessionEntity, ServiceError> {
    let store = state.require_store().await?;
    require_host(state, room, host).await?;
    if let Some(existing) = store.find_open_group_session(room).await? {
        return Err(ServiceError::InvalidState(format!(
            "room {room} already runs game {}",
            existing.id
        )));
    }

    let members = state.rooms().members(room).await;
    let session = group::start(
        room,
        game_type,
        &members,
        state.config().group.min_players,
        SystemTime::now(),
    )?;
    if !store.insert_group_session(session.clone()).await? {
        return Err(ServiceError::InvalidState(format!(
            "room {room} already runs a game"
        )));
    }
    {
        let mut guard = state.group_sessions().lock(session.id).await;
        guard.store(session.clone());
    }
    info!(session_id = %session.id, room_id = room, ?game_type, players = members.len(), "group game started");

    broadcast(
        state,
        room,
        Notification::new(notifications::GROUP_STARTED, &GroupSessionView::from(&session)),
    )
    .await;
    if let Some(turn_user) = session.turn_user {
        announce_rotation(state, &session, Rotation::Next(turn_user)).await;
    }
    Ok(session)
}

fn draw_prompt(
    state: &SharedState,
    game_type: GroupGameType,
    choice: TodChoice,
    category: &str,
) -> Result<GroupPrompt, ServiceError> {
    match game_type {
        GroupGameType::TruthDare => state
            .content()
            .draw_challenge(choice, Some(category))
            .map(|challenge| GroupPrompt {
                choice,
                category: challenge.category,
                text: challenge.text,
            })
            .ok_or_else(|| ServiceError::InvalidInput(format!("no {choice:?} challenges available"))),
        GroupGameType::Quiz => {
            let question = state
                .content()
                .draw_questions(category, 1)
                .map_err(|err| ServiceError::InvalidInput(err.to_string()))?
                .into_iter()
                .next()
                .ok_or_else(|| ServiceError::InvalidInput(format!("no questions in {category}")))?;
            Ok(GroupPrompt {
                choice,
                category: question.category,
                text: format!("{} [{}]", question.text, question.options.join(" / ")),
            })
        }
    }
}

/// The turn user picks a prompt; it is shown to the whole room.
pub async fn submit_choice(
    state: &SharedState,
    room: RoomId,
    user: UserId,
    choice: TodChoice,
    category: String,
) -> Result<GroupSessionEntity, ServiceError> {
    let id = open_session_id(state, room).await?;
    let mut guard = state.group_sessions().lock(id).await;
    let mut session = load(state, &mut guard, id).await?;

    let prompt = draw_prompt(state, session.game_type, choice, &category)?;
    session.submit_choice(user, prompt.clone(), SystemTime::now())?;
    let session = save(state, &mut guard, session).await?;

    let event = GroupPromptEvent {
        session_id: id,
        turn_user: user,
        prompt,
    };
    for member in state.rooms().members(room).await {
        let mut notification = Notification::new(notifications::GROUP_PROMPT, &event);
        if state.rooms().is_host(room, member).await {
            notification = notification.with_controls(vec![
                Control::new("confirm", id.to_string()),
                Control::new("skip", id.to_string()),
            ]);
        }
        state.messenger().notify(member, notification);
    }
    Ok(session)
}

/// The host confirms the turn was played; the turn user is rewarded.
pub async fn confirm_turn(
    state: &SharedState,
    room: RoomId,
    host: UserId,
) -> Result<GroupSessionEntity, ServiceError> {
    require_host(state, room, host).await?;
    let id = open_session_id(state, room).await?;
    let mut guard = state.group_sessions().lock(id).await;
    let mut session = load(state, &mut guard, id).await?;

    let present = state.rooms().members(room).await;
    let (rewarded, rotation) = session.confirm_turn(&present, SystemTime::now())?;
    let session = save(state, &mut guard, session).await?;

    let coins = state.config().group.turn_reward;
    economy::pay(state, rewarded, coins, TxType::GameReward, "group turn completed").await;
    let score = session
        .participant(rewarded)
        .map(|participant| participant.score)
        .unwrap_or_default();
    info!(session_id = %id, user_id = rewarded, score, "group turn confirmed");

    broadcast(
        state,
        room,
        Notification::new(
            notifications::GROUP_TURN_CONFIRMED,
            &GroupTurnConfirmedEvent {
                session_id: id,
                user_id: rewarded,
                score,
                coins,
            },
        ),
    )
    .await;
    announce_rotation(state, &session, rotation).await;
    Ok(session)
}

/// The host skips the current turn without reward.
pub async fn force_advance(
    state: &SharedState,
    room: RoomId,
    host: UserId,
) -> Result<GroupSessionEntity, ServiceError> {
    require_host(state, room, host).await?;
    let id = open_session_id(state, room).await?;
    let mut guard = state.group_sessions().lock(id).await;
    let mut session = load(state, &mut guard, id).await?;

    let present = state.rooms().members(room).await;
    let rotation = session.force_advance(&present, SystemTime::now())?;
    let session = save(state, &mut guard, session).await?;
    announce_rotation(state, &session, rotation).await;
    Ok(session)
}

/// The host ends the game.
pub async fn end(
    state: &SharedState,
    room: RoomId,
    host: UserId,
) -> Result<GroupSessionEntity, ServiceError> {
    require_host(state, room, host).await?;
    let id = open_session_id(state, room).await?;
    let mut guard = state.group_sessions().lock(id).await;
    let mut session = load(state, &mut guard, id).await?;

    session.end(SystemTime::now())?;
    let session = save(state, &mut guard, session).await?;
    finish(state, &session).await;
    Ok(session)
}

/// A user entered the room; a running game appends them to the rotation.
pub async fn member_joined(state: &SharedState, room: RoomId, user: UserId) -> Result<bool, ServiceError> {
    if !state.rooms().join(room, user).await {
        return Ok(false);
    }
    let id = match open_session_id(state, room).await {
        Ok(id) => id,
        Err(ServiceError::NotFound(_)) => return Ok(true),
        Err(err) => return Err(err),
    };

    let mut guard = state.group_sessions().lock(id).await;
    let mut session = load(state, &mut guard, id).await?;
    if session.member_joined(user, SystemTime::now())? {
        save(state, &mut guard, session).await?;
        debug!(session_id = %id, user_id = user, "participant appended");
    }
    Ok(true)
}

/// A user left the room; the turn moves on if they held it.
pub async fn member_left(state: &SharedState, room: RoomId, user: UserId) -> Result<bool, ServiceError> {
    if !state.rooms().leave(room, user).await {
        return Ok(false);
    }
    let id = match open_session_id(state, room).await {
        Ok(id) => id,
        Err(ServiceError::NotFound(_)) => return Ok(true),
        Err(err) => return Err(err),
    };

    let mut guard = state.group_sessions().lock(id).await;
    let mut session = load(state, &mut guard, id).await?;
    let present = state.rooms().members(room).await;
    if let Some(rotation) = session.member_left(user, &present, SystemTime::now())? {
        let session = save(state, &mut guard, session).await?;
        announce_rotation(state, &session, rotation).await;
    }
    Ok(true)
}

/// Close the room, ending its game first.
pub async fn close_room(state: &SharedState, room: RoomId, host: UserId) -> Result<(), ServiceError> {
    require_host(state, room, host).await?;
    match end(state, room, host).await {
        Ok(_) | Err(ServiceError::NotFound(_)) => {}
        Err(err) => warn!(room_id = room, error = %err, "failed to end game of closing room"),
    }
    state.rooms().close_room(room).await;
    Ok(())
}
