//! Command dispatch: every produced operation runs on a worker chosen by the acting user, so
//! the events of one user are applied in order while different users proceed in parallel.

use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::{Arc, Weak},
};

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::models::{
        GameType, GroupGameType, ItemKind, MatchFilters, Proof, RoomId, SearchProfile, TodChoice,
        UserId,
    },
    dto::{
        ActionResponse,
        events::CommandErrorEvent,
        group::GroupSessionView,
        matchmaking::{PairingView, QueueEntryView},
        quiz::QuizSessionView,
        tod::TodGameView,
    },
    error::ServiceError,
    gateways::messaging::{Feedback, Notification},
    services::{group_service, matchmaking, notifications, pairing, quiz_service, tod_service},
    state::{AppState, SharedState},
};

/// Operation requested by a user.
#[derive(Debug, Clone)]
pub enum Command {
    Enqueue {
        user: UserId,
        profile: SearchProfile,
        filters: MatchFilters,
        game_type: GameType,
    },
    Cancel {
        user: UserId,
    },
    EndPairing {
        user: UserId,
    },
    RelayMessage {
        user: UserId,
        text: String,
    },
    StartQuiz {
        user: UserId,
        pairing_id: Uuid,
    },
    SubmitCategory {
        user: UserId,
        session_id: Uuid,
        category: String,
    },
    SubmitAnswer {
        user: UserId,
        session_id: Uuid,
        round: u8,
        question: u8,
        choice: u8,
    },
    StartTod {
        user: UserId,
        pairing_id: Uuid,
    },
    TodChoice {
        user: UserId,
        game_id: Uuid,
        token: String,
        choice: TodChoice,
        category: Option<String>,
    },
    TodProof {
        user: UserId,
        game_id: Uuid,
        token: String,
        proof: Proof,
    },
    TodJudgment {
        user: UserId,
        game_id: Uuid,
        token: String,
        accepted: bool,
    },
    TodItem {
        user: UserId,
        game_id: Uuid,
        token: String,
        item: ItemKind,
    },
    TodQuit {
        user: UserId,
        game_id: Uuid,
    },
    StartGroup {
        user: UserId,
        room_id: RoomId,
        game_type: GroupGameType,
    },
    GroupChoice {
        user: UserId,
        room_id: RoomId,
        choice: TodChoice,
        category: String,
    },
    GroupConfirm {
        user: UserId,
        room_id: RoomId,
    },
    GroupForceAdvance {
        user: UserId,
        room_id: RoomId,
    },
    GroupEnd {
        user: UserId,
        room_id: RoomId,
    },
}

impl Command {
    /// The acting user, which also selects the worker.
    pub fn user(&self) -> UserId {
        match self {
            Command::Enqueue { user, .. }
            | Command::Cancel { user }
            | Command::EndPairing { user }
            | Command::RelayMessage { user, .. }
            | Command::StartQuiz { user, .. }
            | Command::SubmitCategory { user, .. }
            | Command::SubmitAnswer { user, .. }
            | Command::StartTod { user, .. }
            | Command::TodChoice { user, .. }
            | Command::TodProof { user, .. }
            | Command::TodJudgment { user, .. }
            | Command::TodItem { user, .. }
            | Command::TodQuit { user, .. }
            | Command::StartGroup { user, .. }
            | Command::GroupChoice { user, .. }
            | Command::GroupConfirm { user, .. }
            | Command::GroupForceAdvance { user, .. }
            | Command::GroupEnd { user, .. } => *user,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Enqueue { .. } => "enqueue",
            Command::Cancel { .. } => "cancel",
            Command::EndPairing { .. } => "end_pairing",
            Command::RelayMessage { .. } => "relay_message",
            Command::StartQuiz { .. } => "start_quiz",
            Command::SubmitCategory { .. } => "submit_category",
            Command::SubmitAnswer { .. } => "submit_answer",
            Command::StartTod { .. } => "start_tod",
            Command::TodChoice { .. } => "tod_choice",
            Command::TodProof { .. } => "tod_proof",
            Command::TodJudgment { .. } => "tod_judgment",
            Command::TodItem { .. } => "tod_item",
            Command::TodQuit { .. } => "tod_quit",
            Command::StartGroup { .. } => "start_group",
            Command::GroupChoice { .. } => "group_choice",
            Command::GroupConfirm { .. } => "group_confirm",
            Command::GroupForceAdvance { .. } => "group_force_advance",
            Command::GroupEnd { .. } => "group_end",
        }
    }

    /// Client action token, acknowledged with the command's outcome.
    pub fn token(&self) -> Option<&str> {
        match self {
            Command::TodChoice { token, .. }
            | Command::TodProof { token, .. }
            | Command::TodJudgment { token, .. }
            | Command::TodItem { token, .. } => Some(token),
            _ => None,
        }
    }
}

/// Result of an applied command.
#[derive(Debug, Serialize, ToSchema)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Reply {
    Queued(QueueEntryView),
    Cancelled(QueueEntryView),
    Pairing(PairingView),
    Quiz(QuizSessionView),
    Tod(TodGameView),
    Group(GroupSessionView),
}

/// What dispatch reports back to the caller.
#[derive(Debug)]
pub enum Outcome {
    Done(Reply),
    /// The command lost a race or was replayed; nothing changed.
    Ignored,
}

impl IntoResponse for Outcome {
    fn into_response(self) -> Response {
        match self {
            Outcome::Done(reply) => (StatusCode::OK, Json(reply)).into_response(),
            Outcome::Ignored => {
                (StatusCode::ACCEPTED, Json(ActionResponse::new("ignored"))).into_response()
            }
        }
    }
}

struct Envelope {
    command: Command,
    reply: oneshot::Sender<Result<Reply, ServiceError>>,
}

/// Handle to the worker pool.
#[derive(Clone)]
pub struct Dispatcher {
    senders: Arc<Vec<mpsc::Sender<Envelope>>>,
}

impl Dispatcher {
    /// Spawn the configured number of workers.
    pub fn start(state: &SharedState) -> Self {
        let cfg = &state.config().dispatch;
        let workers = cfg.workers.max(1);
        let senders = (0..workers)
            .map(|index| {
                let (tx, rx) = mpsc::channel(cfg.queue_capacity.max(1));
                tokio::spawn(run_worker(index, Arc::downgrade(state), rx));
                tx
            })
            .collect();
        info!(workers, capacity = cfg.queue_capacity, "dispatch workers started");
        Self {
            senders: Arc::new(senders),
        }
    }

    fn worker_for(&self, user: UserId) -> usize {
        let mut hasher = DefaultHasher::new();
        user.hash(&mut hasher);
        (hasher.finish() % self.senders.len() as u64) as usize
    }

    /// Queue `command` on its user's worker and wait for the result.
    pub async fn send(&self, command: Command) -> Result<Reply, ServiceError> {
        let index = self.worker_for(command.user());
        let (reply, rx) = oneshot::channel();
        self.senders[index]
            .send(Envelope { command, reply })
            .await
            .map_err(|_| ServiceError::Internal(format!("dispatch worker {index} stopped")))?;
        rx.await
            .map_err(|_| ServiceError::Internal(format!("dispatch worker {index} dropped a command")))?
    }
}

async fn run_worker(index: usize, state: Weak<AppState>, mut rx: mpsc::Receiver<Envelope>) {
    while let Some(Envelope { command, reply }) = rx.recv().await {
        let Some(state) = state.upgrade() else {
            break;
        };
        let result = execute(&state, command).await;
        if reply.send(result).is_err() {
            debug!(worker = index, "caller went away before the reply");
        }
    }
    debug!(worker = index, "dispatch worker stopped");
}

/// Apply `command` through the worker pool, or inline when no pool is running, then apply
/// the error policy: races are ignored, refusals are reported to the acting user.
pub async fn submit(state: &SharedState, command: Command) -> Result<Outcome, ServiceError> {
    let user = command.user();
    let name = command.name();
    let token = command.token().map(str::to_owned);

    let result = match state.dispatcher() {
        Some(dispatcher) => dispatcher.send(command).await,
        None => execute(state, command).await,
    };

    let ack = |feedback: Feedback| {
        if let Some(token) = token.as_deref() {
            state.messenger().acknowledge(user, token, feedback);
        }
    };

    match result {
        Ok(reply) => {
            ack(Feedback::Done);
            Ok(Outcome::Done(reply))
        }
        Err(err) if err.is_absorbed() => {
            debug!(user_id = user, command = name, error = %err, "command ignored");
            ack(Feedback::Ignored);
            Ok(Outcome::Ignored)
        }
        Err(err) => {
            if err.is_user_facing() {
                state.messenger().notify(
                    user,
                    Notification::new(
                        notifications::ERROR,
                        &CommandErrorEvent {
                            command: name.to_owned(),
                            message: err.to_string(),
                        },
                    ),
                );
            } else {
                warn!(user_id = user, command = name, error = %err, "command failed");
            }
            ack(Feedback::Failed(err.to_string()));
            Err(err)
        }
    }
}

async fn ensure_in_pairing(state: &SharedState, user: UserId, pairing_id: Uuid) -> Result<(), ServiceError> {
    let store = state.require_store().await?;
    let pairing = store
        .find_pairing(pairing_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("pairing {pairing_id}")))?;
    if pairing.involves(user) {
        Ok(())
    } else {
        Err(ServiceError::Unauthorized(format!(
            "user {user} is not part of pairing {pairing_id}"
        )))
    }
}

async fn execute(state: &SharedState, command: Command) -> Result<Reply, ServiceError> {
    let reply = match command {
        Command::Enqueue {
            user,
            profile,
            filters,
            game_type,
        } => {
            let entry = matchmaking::enqueue(state, user, profile, filters, game_type).await?;
            Reply::Queued(QueueEntryView::from(&entry))
        }
        Command::Cancel { user } => {
            let entry = matchmaking::cancel(state, user).await?;
            Reply::Cancelled(QueueEntryView::from(&entry))
        }
        Command::EndPairing { user } => {
            Reply::Pairing(PairingView::from(&pairing::end(state, user).await?))
        }
        Command::RelayMessage { user, text } => {
            Reply::Pairing(PairingView::from(&pairing::relay_message(state, user, text).await?))
        }
        Command::StartQuiz { user, pairing_id } => {
            ensure_in_pairing(state, user, pairing_id).await?;
            Reply::Quiz(QuizSessionView::from(
                &quiz_service::start_session(state, pairing_id).await?,
            ))
        }
        Command::SubmitCategory {
            user,
            session_id,
            category,
        } => Reply::Quiz(QuizSessionView::from(
            &quiz_service::submit_category(state, session_id, user, category).await?,
        )),
        Command::SubmitAnswer {
            user,
            session_id,
            round,
            question,
            choice,
        } => Reply::Quiz(QuizSessionView::from(
            &quiz_service::submit_answer(state, session_id, user, round, question, choice).await?,
        )),
        Command::StartTod { user, pairing_id } => {
            ensure_in_pairing(state, user, pairing_id).await?;
            Reply::Tod(TodGameView::from(&tod_service::start_game(state, pairing_id).await?))
        }
        Command::TodChoice {
            user,
            game_id,
            token,
            choice,
            category,
        } => Reply::Tod(TodGameView::from(
            &tod_service::submit_choice(state, game_id, user, &token, choice, category).await?,
        )),
        Command::TodProof {
            user,
            game_id,
            token,
            proof,
        } => Reply::Tod(TodGameView::from(
            &tod_service::submit_proof(state, game_id, user, &token, proof).await?,
        )),
        Command::TodJudgment {
            user,
            game_id,
            token,
            accepted,
        } => Reply::Tod(TodGameView::from(
            &tod_service::submit_judgment(state, game_id, user, &token, accepted).await?,
        )),
        Command::TodItem {
            user,
            game_id,
            token,
            item,
        } => Reply::Tod(TodGameView::from(
            &tod_service::use_item(state, game_id, user, &token, item).await?,
        )),
        Command::TodQuit { user, game_id } => {
            Reply::Tod(TodGameView::from(&tod_service::quit(state, game_id, user).await?))
        }
        Command::StartGroup {
            user,
            room_id,
            game_type,
        } => Reply::Group(GroupSessionView::from(
            &group_service::start(state, user, room_id, game_type).await?,
        )),
        Command::GroupChoice {
            user,
            room_id,
            choice,
            category,
        } => Reply::Group(GroupSessionView::from(
            &group_service::submit_choice(state, room_id, user, choice, category).await?,
        )),
        Command::GroupConfirm { user, room_id } => Reply::Group(GroupSessionView::from(
            &group_service::confirm_turn(state, room_id, user).await?,
        )),
        Command::GroupForceAdvance { user, room_id } => Reply::Group(GroupSessionView::from(
            &group_service::force_advance(state, room_id, user).await?,
        )),
        Command::GroupEnd { user, room_id } => Reply::Group(GroupSessionView::from(
            &group_service::end(state, room_id, user).await?,
        )),
    };
    Ok(reply)
}
