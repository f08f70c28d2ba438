//! 1v1 quiz orchestration: persistence, deadlines, notifications and payouts around the pure
//! machine in [`crate::state::quiz`].

use std::time::SystemTime;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::{
            QuizAnswerEntity, QuizRoundEntity, QuizSessionEntity, QuizState, StatsDelta, TxType,
            UserId,
        },
        session_store::SessionStore,
    },
    dto::{
        format_optional_time,
        quiz::{
            ChooseCategoryEvent, OpponentAnsweredEvent, QuestionEvent, QuizFinishedEvent,
            QuizSessionView, QuizTimedOutEvent, RoundFinishedEvent,
        },
    },
    error::ServiceError,
    gateways::{
        content::ContentError,
        messaging::{Control, Notification},
    },
    services::{economy, notifications},
    state::{
        SharedState,
        quiz::{self, QuizError, QuizOutcome, QuizStep, RoundAdvance},
        registry::SessionGuard,
        timers::TimerKind,
    },
};

type Guard = SessionGuard<QuizSessionEntity>;

/// Live (non-terminal) states scanned by the inactivity sweep.
const LIVE_STATES: [QuizState; 3] = [
    QuizState::WaitingCategory,
    QuizState::PlayingRound,
    QuizState::RoundFinished,
];

async fn load(state: &SharedState, guard: &mut Guard, id: Uuid) -> Result<QuizSessionEntity, ServiceError> {
    let store = state.require_store().await?;
    guard
        .load(|| async move { store.find_quiz_session(id).await.map_err(ServiceError::from) })
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("quiz session {id}")))
}

/// Persist `session` if nobody saved it since it was loaded.
async fn save(
    state: &SharedState,
    guard: &mut Guard,
    mut session: QuizSessionEntity,
) -> Result<QuizSessionEntity, ServiceError> {
    let store = state.require_store().await?;
    let expected = session.version;
    session.version = expected + 1;

    if store.save_quiz_session(session.clone(), expected).await? {
        guard.store(session.clone());
        Ok(session)
    } else {
        guard.invalidate();
        Err(ServiceError::InvalidState(format!(
            "quiz session {} changed concurrently",
            session.id
        )))
    }
}

/// Read-only view of a session.
pub async fn get(state: &SharedState, id: Uuid) -> Result<QuizSessionEntity, ServiceError> {
    let mut guard = state.quiz_sessions().lock(id).await;
    load(state, &mut guard, id).await
}

/// Open a quiz on `pairing_id` and prompt the first chooser.
pub async fn start_session(
    state: &SharedState,
    pairing_id: Uuid,
) -> Result<QuizSessionEntity, ServiceError> {
    let store = state.require_store().await?;
    let cfg = &state.config().quiz;

    let pairing = store
        .find_pairing(pairing_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("pairing {pairing_id}")))?;
    if pairing.status.is_terminal() {
        return Err(ServiceError::InvalidState(format!(
            "pairing {pairing_id} already ended"
        )));
    }
    if let Some(existing) = store.find_quiz_session_by_pairing(pairing_id).await? {
        if !existing.state.is_terminal() {
            return Err(ServiceError::InvalidState(format!(
                "pairing {pairing_id} already runs quiz {}",
                existing.id
            )));
        }
    }

    let session = quiz::new_session(&pairing, cfg, SystemTime::now());
    if !store.insert_quiz_session(session.clone()).await? {
        return Err(ServiceError::InvalidState(format!(
            "quiz for pairing {pairing_id} already exists"
        )));
    }
    {
        let mut guard = state.quiz_sessions().lock(session.id).await;
        guard.store(session.clone());
    }
    info!(
        session_id = %session.id,
        pairing_id = %pairing_id,
        rounds = session.rounds_total,
        "quiz session started"
    );

    for user in session.participants() {
        state.messenger().notify(
            user,
            Notification::new(notifications::QUIZ_STARTED, &QuizSessionView::from(&session)),
        );
    }
    prompt_category(state, &session);
    Ok(session)
}

fn prompt_category(state: &SharedState, session: &QuizSessionEntity) {
    let categories = state.content().categories();
    let controls = categories
        .iter()
        .map(|category| Control::new("category", category.clone()))
        .collect();

    state.messenger().notify(
        session.chooser(),
        Notification::new(
            notifications::QUIZ_CHOOSE_CATEGORY,
            &ChooseCategoryEvent {
                session_id: session.id,
                round: session.current_round,
                categories,
                deadline: format_optional_time(session.category_deadline),
            },
        )
        .with_controls(controls),
    );

    let timer_state = state.clone();
    let (id, round) = (session.id, session.current_round);
    state.timers().schedule(
        (id, TimerKind::QuizCategory),
        state.config().quiz.category_timeout,
        async move {
            if let Err(err) = on_category_timeout(&timer_state, id, round).await {
                warn!(session_id = %id, round, error = %err, "category timeout handling failed");
            }
        },
    );
}

/// Bind the questions of the current round, reusing the persisted list after a restart.
async fn bind_round(
    state: &SharedState,
    store: &dyn SessionStore,
    session: &QuizSessionEntity,
    chooser: UserId,
    category: &str,
) -> Result<QuizRoundEntity, ServiceError> {
    if let Some(existing) = store.find_quiz_round(session.id, session.current_round).await? {
        return Ok(existing);
    }

    let questions = state
        .content()
        .draw_questions(category, usize::from(session.questions_per_round))
        .map_err(|err| match err {
            ContentError::Insufficient { .. } => ServiceError::InvalidInput(err.to_string()),
            other => ServiceError::Internal(other.to_string()),
        })?;

    let round = QuizRoundEntity {
        session_id: session.id,
        round_number: session.current_round,
        category: category.to_owned(),
        chosen_by: chooser,
        question_ids: questions.iter().map(|question| question.id).collect(),
        result: None,
        created_at: SystemTime::now(),
    };
    if store.insert_quiz_round(round.clone()).await? {
        return Ok(round);
    }
    store
        .find_quiz_round(session.id, session.current_round)
        .await?
        .ok_or_else(|| ServiceError::Internal(format!("round of session {} vanished", session.id)))
}

/// The chooser picked a category; the first question opens.
pub async fn submit_category(
    state: &SharedState,
    session_id: Uuid,
    user: UserId,
    category: String,
) -> Result<QuizSessionEntity, ServiceError> {
    let store = state.require_store().await?;
    let cfg = &state.config().quiz;
    let mut guard = state.quiz_sessions().lock(session_id).await;
    let mut session = load(state, &mut guard, session_id).await?;

    if !state.content().categories().contains(&category) {
        return Err(ServiceError::InvalidInput(format!("unknown category {category}")));
    }

    let now = SystemTime::now();
    session.choose_category(user, cfg, now)?;
    let round = bind_round(state, store.as_ref(), &session, user, &category).await?;

    state.timers().cancel(&(session_id, TimerKind::QuizCategory));
    let session = save(state, &mut guard, session).await?;
    debug!(session_id = %session_id, round = session.current_round, %category, "category chosen");

    open_question(state, &session, &round);
    Ok(session)
}

fn open_question(state: &SharedState, session: &QuizSessionEntity, round: &QuizRoundEntity) {
    let number = session.current_question;
    let question = round
        .question_ids
        .get(usize::from(number).saturating_sub(1))
        .and_then(|id| state.content().questions(&[*id]).into_iter().next());

    match question {
        Some(question) => {
            let controls: Vec<Control> = (0..question.options.len())
                .map(|index| Control::new("answer", index.to_string()))
                .collect();
            for user in session.participants() {
                state.messenger().notify(
                    user,
                    Notification::new(
                        notifications::QUIZ_QUESTION,
                        &QuestionEvent {
                            session_id: session.id,
                            round: session.current_round,
                            question: number,
                            category: round.category.clone(),
                            text: question.text.clone(),
                            options: question.options.clone(),
                            deadline: format_optional_time(session.question_deadline),
                        },
                    )
                    .with_controls(controls.clone()),
                );
            }
        }
        None => warn!(
            session_id = %session.id,
            round = session.current_round,
            question = number,
            "question missing from catalog"
        ),
    }

    let timer_state = state.clone();
    let (id, round_number) = (session.id, session.current_round);
    state.timers().schedule(
        (id, TimerKind::QuizQuestion),
        state.config().quiz.question_timeout,
        async move {
            if let Err(err) = on_question_timeout(&timer_state, id, round_number, number).await {
                warn!(session_id = %id, round = round_number, question = number, error = %err, "question timeout handling failed");
            }
        },
    );
}

/// Record an answer; the question closes once both players answered.
pub async fn submit_answer(
    state: &SharedState,
    session_id: Uuid,
    user: UserId,
    round: u8,
    question: u8,
    choice: u8,
) -> Result<QuizSessionEntity, ServiceError> {
    let store = state.require_store().await?;
    let cfg = &state.config().quiz;
    let mut guard = state.quiz_sessions().lock(session_id).await;
    let mut session = load(state, &mut guard, session_id).await?;
    session.accept_answer(user, round, question)?;

    let bound = store
        .find_quiz_round(session_id, round)
        .await?
        .ok_or_else(|| ServiceError::Internal(format!("round {round} of {session_id} not bound")))?;
    let question_entity = bound
        .question_ids
        .get(usize::from(question).saturating_sub(1))
        .and_then(|id| state.content().questions(&[*id]).into_iter().next())
        .ok_or_else(|| ServiceError::Internal(format!("question {question} of round {round} missing")))?;
    if usize::from(choice) >= question_entity.options.len() {
        return Err(QuizError::InvalidChoice { choice }.into());
    }

    let now = SystemTime::now();
    let correct = choice == question_entity.correct;
    let elapsed_ms = session.elapsed_ms(cfg, now);
    let answer = QuizAnswerEntity {
        session_id,
        round_number: round,
        user_id: user,
        question_number: question,
        choice: Some(choice),
        correct,
        elapsed_ms,
        auto_filled: false,
        answered_at: now,
    };
    if !store.insert_quiz_answer(answer).await? {
        debug!(session_id = %session_id, user_id = user, round, question, "duplicate answer ignored");
        return Err(ServiceError::DuplicateAction);
    }
    session.add_score(user, correct, elapsed_ms, now);
    let session = match save(state, &mut guard, session).await {
        Ok(session) => session,
        Err(err) => {
            // The answer only counts together with its score.
            match store.delete_quiz_answer(session_id, round, user, question).await {
                Ok(_) => debug!(session_id = %session_id, user_id = user, round, question, "answer rolled back"),
                Err(cleanup) => warn!(session_id = %session_id, user_id = user, error = %cleanup, "failed to roll back answer"),
            }
            return Err(err);
        }
    };

    if let Some(other) = session.participants().into_iter().find(|p| *p != user) {
        state.messenger().notify(
            other,
            Notification::new(
                notifications::QUIZ_OPPONENT_ANSWERED,
                &OpponentAnsweredEvent {
                    session_id,
                    round,
                    question,
                },
            ),
        );
    }

    let answers = store.list_quiz_answers(session_id, round).await?;
    if quiz::missing_answers(&answers, session.participants(), question).is_empty() {
        close_question(state, &mut guard, session, bound).await
    } else {
        Ok(session)
    }
}

/// Advance past a question whose answers are all in.
async fn close_question(
    state: &SharedState,
    guard: &mut Guard,
    mut session: QuizSessionEntity,
    mut round: QuizRoundEntity,
) -> Result<QuizSessionEntity, ServiceError> {
    let store = state.require_store().await?;
    let cfg = &state.config().quiz;
    let now = SystemTime::now();
    state.timers().cancel(&(session.id, TimerKind::QuizQuestion));

    match session.advance_question(cfg, now)? {
        QuizStep::NextQuestion { .. } => {
            let session = save(state, guard, session).await?;
            open_question(state, &session, &round);
            Ok(session)
        }
        QuizStep::RoundFinished { round: number } => {
            let answers = store.list_quiz_answers(session.id, number).await?;
            let result = quiz::round_result(&answers, session.user_a, session.user_b);
            let session = save(state, guard, session).await?;

            round.result = Some(result);
            if let Err(err) = store.save_quiz_round(round).await {
                warn!(session_id = %session.id, round = number, error = %err, "failed to store round result");
            }
            info!(session_id = %session.id, round = number, winner = ?result.winner, "quiz round finished");
            for user in session.participants() {
                state.messenger().notify(
                    user,
                    Notification::new(
                        notifications::QUIZ_ROUND_FINISHED,
                        &RoundFinishedEvent {
                            session_id: session.id,
                            round: number,
                            result,
                        },
                    ),
                );
            }

            if cfg.round_break.is_zero() {
                return next_round(state, guard, session).await;
            }
            let timer_state = state.clone();
            let id = session.id;
            state.timers().schedule(
                (id, TimerKind::QuizRoundBreak),
                cfg.round_break,
                async move {
                    if let Err(err) = on_round_break(&timer_state, id, number).await {
                        warn!(session_id = %id, round = number, error = %err, "round break handling failed");
                    }
                },
            );
            Ok(session)
        }
    }
}

async fn next_round(
    state: &SharedState,
    guard: &mut Guard,
    mut session: QuizSessionEntity,
) -> Result<QuizSessionEntity, ServiceError> {
    match session.start_next_round(&state.config().quiz, SystemTime::now())? {
        RoundAdvance::NextRound { round, chooser } => {
            let session = save(state, guard, session).await?;
            debug!(session_id = %session.id, round, chooser, "next quiz round");
            prompt_category(state, &session);
            Ok(session)
        }
        RoundAdvance::Finished(outcome) => {
            // Only the caller whose save lands on `Finished` pays out.
            let session = save(state, guard, session).await?;
            finish(state, &session, outcome).await;
            Ok(session)
        }
    }
}

async fn finish(state: &SharedState, session: &QuizSessionEntity, outcome: QuizOutcome) {
    let cfg = &state.config().quiz;
    state.timers().cancel_session(session.id);
    state.quiz_sessions().evict(session.id);
    info!(session_id = %session.id, winner = ?outcome.winner, "quiz finished");

    let payouts: Vec<(UserId, i64, i64, bool)> = match (outcome.winner, outcome.loser) {
        (Some(winner), Some(loser)) => vec![
            (winner, cfg.winner_coins, cfg.winner_xp, true),
            (loser, 0, cfg.loser_xp, false),
        ],
        _ => session
            .participants()
            .into_iter()
            .map(|user| (user, cfg.draw_coins, cfg.draw_xp, false))
            .collect(),
    };

    for (user, coins, xp, won) in payouts {
        economy::pay(state, user, coins, TxType::GameReward, "quiz reward").await;
        economy::record_stats(state, user, StatsDelta::game(won, xp)).await;
        state.messenger().notify(
            user,
            Notification::new(
                notifications::QUIZ_FINISHED,
                &QuizFinishedEvent {
                    session_id: session.id,
                    winner: outcome.winner,
                    score_a: session.score_a,
                    score_b: session.score_b,
                    coins,
                    xp,
                },
            ),
        );
    }
}

/// End a live session as `TimedOut`, without rewards.
async fn time_out(
    state: &SharedState,
    guard: &mut Guard,
    mut session: QuizSessionEntity,
) -> Result<QuizSessionEntity, ServiceError> {
    session.time_out(SystemTime::now())?;
    let session = save(state, guard, session).await?;
    state.timers().cancel_session(session.id);
    state.quiz_sessions().evict(session.id);
    info!(session_id = %session.id, round = session.current_round, "quiz timed out");

    for user in session.participants() {
        state.messenger().notify(
            user,
            Notification::new(
                notifications::QUIZ_TIMED_OUT,
                &QuizTimedOutEvent {
                    session_id: session.id,
                    round: session.current_round,
                },
            ),
        );
    }
    Ok(session)
}

/// Close a live session because its pairing ended or it went idle.
pub async fn abandon(state: &SharedState, session_id: Uuid) -> Result<QuizSessionEntity, ServiceError> {
    let mut guard = state.quiz_sessions().lock(session_id).await;
    let session = load(state, &mut guard, session_id).await?;
    time_out(state, &mut guard, session).await
}

/// Category deadline callback. Stale firings do nothing.
pub async fn on_category_timeout(
    state: &SharedState,
    session_id: Uuid,
    round: u8,
) -> Result<(), ServiceError> {
    let mut guard = state.quiz_sessions().lock(session_id).await;
    let session = load(state, &mut guard, session_id).await?;
    if session.state != QuizState::WaitingCategory || session.current_round != round {
        debug!(session_id = %session_id, round, "stale category timer");
        return Ok(());
    }
    time_out(state, &mut guard, session).await.map(|_| ())
}

/// Question deadline callback: auto-fill missing answers and advance.
pub async fn on_question_timeout(
    state: &SharedState,
    session_id: Uuid,
    round: u8,
    question: u8,
) -> Result<(), ServiceError> {
    let store = state.require_store().await?;
    let mut guard = state.quiz_sessions().lock(session_id).await;
    let mut session = load(state, &mut guard, session_id).await?;
    if session.state != QuizState::PlayingRound
        || session.current_round != round
        || session.current_question != question
    {
        debug!(session_id = %session_id, round, question, "stale question timer");
        return Ok(());
    }

    let now = SystemTime::now();
    let answers = store.list_quiz_answers(session_id, round).await?;
    for user in quiz::missing_answers(&answers, session.participants(), question) {
        let filled = QuizAnswerEntity {
            session_id,
            round_number: round,
            user_id: user,
            question_number: question,
            choice: None,
            correct: false,
            elapsed_ms: 0,
            auto_filled: true,
            answered_at: now,
        };
        if store.insert_quiz_answer(filled).await? {
            session.add_score(user, false, 0, now);
            debug!(session_id = %session_id, user_id = user, round, question, "answer auto-filled");
        }
    }

    let bound = store
        .find_quiz_round(session_id, round)
        .await?
        .ok_or_else(|| ServiceError::Internal(format!("round {round} of {session_id} not bound")))?;
    close_question(state, &mut guard, session, bound).await.map(|_| ())
}

/// Round break callback: prompt the next chooser or finish.
pub async fn on_round_break(state: &SharedState, session_id: Uuid, round: u8) -> Result<(), ServiceError> {
    let mut guard = state.quiz_sessions().lock(session_id).await;
    let session = load(state, &mut guard, session_id).await?;
    if session.state != QuizState::RoundFinished || session.current_round != round {
        debug!(session_id = %session_id, round, "stale round break timer");
        return Ok(());
    }
    next_round(state, &mut guard, session).await.map(|_| ())
}

/// Time out live sessions nobody touched within the inactivity window.
pub async fn sweep_inactive(state: &SharedState) -> Result<usize, ServiceError> {
    let store = state.require_store().await?;
    let cutoff = SystemTime::now()
        .checked_sub(state.config().quiz.inactivity_timeout)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let mut closed = 0;

    for stale in store
        .list_stale_quiz_sessions(LIVE_STATES.to_vec(), cutoff)
        .await?
    {
        let mut guard = state.quiz_sessions().lock(stale.id).await;
        let session = match load(state, &mut guard, stale.id).await {
            Ok(session) => session,
            Err(err) => {
                warn!(session_id = %stale.id, error = %err, "failed to load idle quiz");
                continue;
            }
        };
        if session.state.is_terminal() || session.updated_at >= cutoff {
            continue;
        }
        match time_out(state, &mut guard, session).await {
            Ok(_) => closed += 1,
            Err(err) => warn!(session_id = %stale.id, error = %err, "failed to time out idle quiz"),
        }
    }
    Ok(closed)
}

/// Fire deadlines whose timers were lost, typically across a restart. Handlers ignore
/// sessions that already moved on, so racing a live timer is harmless.
pub async fn sweep_due(state: &SharedState) -> Result<usize, ServiceError> {
    let store = state.require_store().await?;
    let now = SystemTime::now();
    let round_break = state.config().quiz.round_break;
    let mut handled = 0;

    for session in store.list_quiz_sessions_due(now).await? {
        let (id, round) = (session.id, session.current_round);
        let outcome = match session.state {
            QuizState::WaitingCategory => on_category_timeout(state, id, round).await,
            QuizState::PlayingRound => {
                on_question_timeout(state, id, round, session.current_question).await
            }
            QuizState::RoundFinished if session.updated_at + round_break <= now => {
                on_round_break(state, id, round).await
            }
            _ => continue,
        };
        match outcome {
            Ok(()) => handled += 1,
            Err(err) => warn!(session_id = %id, error = %err, "quiz deadline sweep failed"),
        }
    }
    Ok(handled)
}
