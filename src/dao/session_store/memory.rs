//! In-process session store. Every operation runs under one async mutex, which makes each
//! trait call atomic and gives the ledger its per-user serialization for free.

use std::{
    collections::HashMap,
    sync::Arc,
    time::SystemTime,
};

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::SessionStore;
use crate::dao::{
    models::{
        ActionLogEntity, GameType, GroupSessionEntity, GroupStatus, ItemKind, JudgmentLogEntity,
        LedgerOutcome, LedgerTxEntity, PairingEntity, PairingOutcome, PairingStatus,
        QueueEntryEntity, QuizAnswerEntity, QuizRoundEntity, QuizSessionEntity, QuizState,
        RoomId, StatsDelta, TodGameEntity, TodTurnEntity, TxType, UserId, UserStatsEntity,
        UserStatus,
    },
    storage::StorageResult,
};

type AnswerKey = (Uuid, u8, UserId, u8);

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, UserStatsEntity>,
    queue: HashMap<UserId, QueueEntryEntity>,
    pairings: HashMap<Uuid, PairingEntity>,
    quiz_sessions: HashMap<Uuid, QuizSessionEntity>,
    quiz_rounds: HashMap<(Uuid, u8), QuizRoundEntity>,
    quiz_answers: HashMap<AnswerKey, QuizAnswerEntity>,
    tod_games: HashMap<Uuid, TodGameEntity>,
    tod_turns: HashMap<(Uuid, u32), TodTurnEntity>,
    judgments: Vec<JudgmentLogEntity>,
    actions: HashMap<(Uuid, String), ActionLogEntity>,
    inventories: HashMap<UserId, HashMap<ItemKind, u32>>,
    group_sessions: HashMap<Uuid, GroupSessionEntity>,
    balances: HashMap<UserId, i64>,
    ledger: Vec<LedgerTxEntity>,
}

impl Tables {
    fn open_pairing(&self, user: UserId) -> Option<&PairingEntity> {
        self.pairings
            .values()
            .find(|pairing| pairing.involves(user) && !pairing.status.is_terminal())
    }

    fn stats_mut(&mut self, user: UserId) -> &mut UserStatsEntity {
        self.users
            .entry(user)
            .or_insert_with(|| UserStatsEntity::new(user))
    }
}

/// Session store keeping every table in process memory.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn find_user_stats(
        &self,
        user: UserId,
    ) -> BoxFuture<'static, StorageResult<UserStatsEntity>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let guard = tables.lock().await;
            Ok(guard
                .users
                .get(&user)
                .cloned()
                .unwrap_or_else(|| UserStatsEntity::new(user)))
        })
    }

    fn set_user_status(
        &self,
        user: UserId,
        status: UserStatus,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            tables.lock().await.stats_mut(user).status = status;
            Ok(())
        })
    }

    fn apply_stats(
        &self,
        user: UserId,
        delta: StatsDelta,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut guard = tables.lock().await;
            let stats = guard.stats_mut(user);
            stats.xp += delta.xp;
            stats.games_played += delta.games_played;
            stats.games_won += delta.games_won;
            stats.timeout_count += delta.timeout_count;
            stats.unfair_judgments += delta.unfair_judgments;
            if let Some(score) = delta.judge_score {
                stats.judge_score = score;
            }
            Ok(())
        })
    }

    fn insert_queue_entry(
        &self,
        entry: QueueEntryEntity,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut guard = tables.lock().await;
            if guard.queue.contains_key(&entry.user_id) {
                return Ok(false);
            }
            guard.queue.insert(entry.user_id, entry);
            Ok(true)
        })
    }

    fn find_queue_entry(
        &self,
        user: UserId,
    ) -> BoxFuture<'static, StorageResult<Option<QueueEntryEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move { Ok(tables.lock().await.queue.get(&user).cloned()) })
    }

    fn remove_queue_entry(
        &self,
        user: UserId,
    ) -> BoxFuture<'static, StorageResult<Option<QueueEntryEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move { Ok(tables.lock().await.queue.remove(&user)) })
    }

    fn list_queue(
        &self,
        game_type: GameType,
    ) -> BoxFuture<'static, StorageResult<Vec<QueueEntryEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let guard = tables.lock().await;
            let mut entries: Vec<_> = guard
                .queue
                .values()
                .filter(|entry| entry.game_type == game_type)
                .cloned()
                .collect();
            entries.sort_by_key(|entry| (entry.enqueued_at, entry.user_id));
            Ok(entries)
        })
    }

    fn create_pairing(
        &self,
        pairing: PairingEntity,
    ) -> BoxFuture<'static, StorageResult<PairingOutcome>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut guard = tables.lock().await;
            let both_queued = guard.queue.contains_key(&pairing.user_a)
                && guard.queue.contains_key(&pairing.user_b);
            let already_paired = guard.open_pairing(pairing.user_a).is_some()
                || guard.open_pairing(pairing.user_b).is_some();
            if !both_queued || already_paired || pairing.user_a == pairing.user_b {
                return Ok(PairingOutcome::Conflict);
            }

            guard.queue.remove(&pairing.user_a);
            guard.queue.remove(&pairing.user_b);
            guard.pairings.insert(pairing.id, pairing.clone());
            Ok(PairingOutcome::Created(pairing))
        })
    }

    fn find_pairing(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<PairingEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move { Ok(tables.lock().await.pairings.get(&id).cloned()) })
    }

    fn find_open_pairing(
        &self,
        user: UserId,
    ) -> BoxFuture<'static, StorageResult<Option<PairingEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move { Ok(tables.lock().await.open_pairing(user).cloned()) })
    }

    fn transition_pairing(
        &self,
        id: Uuid,
        expected: Vec<PairingStatus>,
        next: PairingStatus,
        ended_by: Option<UserId>,
        at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut guard = tables.lock().await;
            let Some(pairing) = guard.pairings.get_mut(&id) else {
                return Ok(false);
            };
            if !expected.contains(&pairing.status) {
                return Ok(false);
            }
            pairing.status = next;
            if next.is_terminal() {
                pairing.ended_at = Some(at);
                pairing.ended_by = ended_by;
            }
            Ok(true)
        })
    }

    fn list_expired_pairings(
        &self,
        now: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Vec<PairingEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let guard = tables.lock().await;
            Ok(guard
                .pairings
                .values()
                .filter(|pairing| pairing.status == PairingStatus::Active && pairing.timeout_at <= now)
                .cloned()
                .collect())
        })
    }

    fn insert_quiz_session(
        &self,
        session: QuizSessionEntity,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut guard = tables.lock().await;
            let taken = guard
                .quiz_sessions
                .values()
                .any(|existing| existing.pairing_id == session.pairing_id);
            if taken || guard.quiz_sessions.contains_key(&session.id) {
                return Ok(false);
            }
            guard.quiz_sessions.insert(session.id, session);
            Ok(true)
        })
    }

    fn find_quiz_session(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<QuizSessionEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move { Ok(tables.lock().await.quiz_sessions.get(&id).cloned()) })
    }

    fn find_quiz_session_by_pairing(
        &self,
        pairing_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<QuizSessionEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let guard = tables.lock().await;
            Ok(guard
                .quiz_sessions
                .values()
                .find(|session| session.pairing_id == pairing_id)
                .cloned())
        })
    }

    fn save_quiz_session(
        &self,
        session: QuizSessionEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut guard = tables.lock().await;
            match guard.quiz_sessions.get_mut(&session.id) {
                Some(current) if current.version == expected_version => {
                    *current = session;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    fn list_stale_quiz_sessions(
        &self,
        states: Vec<QuizState>,
        updated_before: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Vec<QuizSessionEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let guard = tables.lock().await;
            Ok(guard
                .quiz_sessions
                .values()
                .filter(|session| {
                    states.contains(&session.state) && session.updated_at < updated_before
                })
                .cloned()
                .collect())
        })
    }

    fn list_quiz_sessions_due(
        &self,
        before: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Vec<QuizSessionEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let guard = tables.lock().await;
            Ok(guard
                .quiz_sessions
                .values()
                .filter(|session| {
                    let passed = |deadline: Option<SystemTime>| deadline.is_some_and(|at| at <= before);
                    match session.state {
                        QuizState::WaitingCategory => passed(session.category_deadline),
                        QuizState::PlayingRound => passed(session.question_deadline),
                        QuizState::RoundFinished => session.updated_at <= before,
                        QuizState::Finished | QuizState::TimedOut => false,
                    }
                })
                .cloned()
                .collect())
        })
    }

    fn insert_quiz_round(
        &self,
        round: QuizRoundEntity,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut guard = tables.lock().await;
            let key = (round.session_id, round.round_number);
            if guard.quiz_rounds.contains_key(&key) {
                return Ok(false);
            }
            guard.quiz_rounds.insert(key, round);
            Ok(true)
        })
    }

    fn save_quiz_round(&self, round: QuizRoundEntity) -> BoxFuture<'static, StorageResult<()>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let key = (round.session_id, round.round_number);
            tables.lock().await.quiz_rounds.insert(key, round);
            Ok(())
        })
    }

    fn find_quiz_round(
        &self,
        session_id: Uuid,
        round_number: u8,
    ) -> BoxFuture<'static, StorageResult<Option<QuizRoundEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            Ok(tables
                .lock()
                .await
                .quiz_rounds
                .get(&(session_id, round_number))
                .cloned())
        })
    }

    fn insert_quiz_answer(
        &self,
        answer: QuizAnswerEntity,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut guard = tables.lock().await;
            let key = (
                answer.session_id,
                answer.round_number,
                answer.user_id,
                answer.question_number,
            );
            if guard.quiz_answers.contains_key(&key) {
                return Ok(false);
            }
            guard.quiz_answers.insert(key, answer);
            Ok(true)
        })
    }

    fn delete_quiz_answer(
        &self,
        session_id: Uuid,
        round_number: u8,
        user: UserId,
        question_number: u8,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let key = (session_id, round_number, user, question_number);
            Ok(tables.lock().await.quiz_answers.remove(&key).is_some())
        })
    }

    fn list_quiz_answers(
        &self,
        session_id: Uuid,
        round_number: u8,
    ) -> BoxFuture<'static, StorageResult<Vec<QuizAnswerEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let guard = tables.lock().await;
            let mut answers: Vec<_> = guard
                .quiz_answers
                .values()
                .filter(|answer| {
                    answer.session_id == session_id && answer.round_number == round_number
                })
                .cloned()
                .collect();
            answers.sort_by_key(|answer| (answer.question_number, answer.user_id));
            Ok(answers)
        })
    }

    fn insert_tod_game(&self, game: TodGameEntity) -> BoxFuture<'static, StorageResult<bool>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut guard = tables.lock().await;
            let taken = guard
                .tod_games
                .values()
                .any(|existing| existing.pairing_id == game.pairing_id && !existing.state.is_terminal());
            if taken || guard.tod_games.contains_key(&game.id) {
                return Ok(false);
            }
            guard.tod_games.insert(game.id, game);
            Ok(true)
        })
    }

    fn find_tod_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<TodGameEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move { Ok(tables.lock().await.tod_games.get(&id).cloned()) })
    }

    fn find_tod_game_by_pairing(
        &self,
        pairing_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<TodGameEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let guard = tables.lock().await;
            Ok(guard
                .tod_games
                .values()
                .filter(|game| game.pairing_id == pairing_id)
                .max_by_key(|game| game.created_at)
                .cloned())
        })
    }

    fn save_tod_game(
        &self,
        game: TodGameEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut guard = tables.lock().await;
            match guard.tod_games.get_mut(&game.id) {
                Some(current) if current.version == expected_version => {
                    *current = game;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    fn list_tod_games_due(
        &self,
        before: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Vec<TodGameEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let guard = tables.lock().await;
            Ok(guard
                .tod_games
                .values()
                .filter(|game| {
                    game.state.awaits_player()
                        && game.turn_deadline.is_some_and(|deadline| deadline <= before)
                })
                .cloned()
                .collect())
        })
    }

    fn save_tod_turn(&self, turn: TodTurnEntity) -> BoxFuture<'static, StorageResult<()>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let key = (turn.game_id, turn.turn_number);
            tables.lock().await.tod_turns.insert(key, turn);
            Ok(())
        })
    }

    fn find_tod_turn(
        &self,
        game_id: Uuid,
        turn_number: u32,
    ) -> BoxFuture<'static, StorageResult<Option<TodTurnEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            Ok(tables
                .lock()
                .await
                .tod_turns
                .get(&(game_id, turn_number))
                .cloned())
        })
    }

    fn list_tod_turns(
        &self,
        game_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<TodTurnEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let guard = tables.lock().await;
            let mut turns: Vec<_> = guard
                .tod_turns
                .values()
                .filter(|turn| turn.game_id == game_id)
                .cloned()
                .collect();
            turns.sort_by_key(|turn| turn.turn_number);
            Ok(turns)
        })
    }

    fn append_judgment(&self, log: JudgmentLogEntity) -> BoxFuture<'static, StorageResult<()>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            tables.lock().await.judgments.push(log);
            Ok(())
        })
    }

    fn recent_judgments(
        &self,
        judge: UserId,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<JudgmentLogEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let guard = tables.lock().await;
            Ok(guard
                .judgments
                .iter()
                .rev()
                .filter(|log| log.judge_id == judge)
                .take(limit)
                .cloned()
                .collect())
        })
    }

    fn action_seen(
        &self,
        game_id: Uuid,
        token: String,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let tables = self.tables.clone();
        Box::pin(async move { Ok(tables.lock().await.actions.contains_key(&(game_id, token))) })
    }

    fn record_action(&self, action: ActionLogEntity) -> BoxFuture<'static, StorageResult<bool>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut guard = tables.lock().await;
            let key = (action.game_id, action.token.clone());
            if guard.actions.contains_key(&key) {
                return Ok(false);
            }
            guard.actions.insert(key, action);
            Ok(true)
        })
    }

    fn purge_actions(&self, before: SystemTime) -> BoxFuture<'static, StorageResult<u64>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut guard = tables.lock().await;
            let initial = guard.actions.len();
            guard.actions.retain(|_, action| action.created_at >= before);
            Ok((initial - guard.actions.len()) as u64)
        })
    }

    fn consume_item(
        &self,
        user: UserId,
        item: ItemKind,
        starter: u32,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut guard = tables.lock().await;
            let inventory = guard.inventories.entry(user).or_insert_with(|| {
                [ItemKind::Shield, ItemKind::Swap, ItemKind::Mirror]
                    .into_iter()
                    .map(|kind| (kind, starter))
                    .collect()
            });
            match inventory.get_mut(&item) {
                Some(count) if *count > 0 => {
                    *count -= 1;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    fn insert_group_session(
        &self,
        session: GroupSessionEntity,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut guard = tables.lock().await;
            let taken = guard.group_sessions.values().any(|existing| {
                existing.room_id == session.room_id && existing.status != GroupStatus::Finished
            });
            if taken || guard.group_sessions.contains_key(&session.id) {
                return Ok(false);
            }
            guard.group_sessions.insert(session.id, session);
            Ok(true)
        })
    }

    fn find_group_session(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<GroupSessionEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move { Ok(tables.lock().await.group_sessions.get(&id).cloned()) })
    }

    fn find_open_group_session(
        &self,
        room: RoomId,
    ) -> BoxFuture<'static, StorageResult<Option<GroupSessionEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let guard = tables.lock().await;
            Ok(guard
                .group_sessions
                .values()
                .find(|session| session.room_id == room && session.status != GroupStatus::Finished)
                .cloned())
        })
    }

    fn save_group_session(
        &self,
        session: GroupSessionEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut guard = tables.lock().await;
            match guard.group_sessions.get_mut(&session.id) {
                Some(current) if current.version == expected_version => {
                    *current = session;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    fn ledger_balance(&self, user: UserId) -> BoxFuture<'static, StorageResult<i64>> {
        let tables = self.tables.clone();
        Box::pin(async move { Ok(tables.lock().await.balances.get(&user).copied().unwrap_or(0)) })
    }

    fn ledger_apply(
        &self,
        user: UserId,
        amount: i64,
        tx_type: TxType,
        reason: String,
    ) -> BoxFuture<'static, StorageResult<LedgerOutcome>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let mut guard = tables.lock().await;
            let balance = guard.balances.get(&user).copied().unwrap_or(0);
            if amount < 0 && balance + amount < 0 {
                return Ok(LedgerOutcome::InsufficientFunds { balance });
            }

            let next = balance + amount;
            guard.balances.insert(user, next);
            guard.ledger.push(LedgerTxEntity {
                id: Uuid::new_v4(),
                user_id: user,
                amount,
                tx_type,
                reason,
                balance_after: next,
                created_at: SystemTime::now(),
            });
            Ok(LedgerOutcome::Applied { balance: next })
        })
    }

    fn ledger_history(
        &self,
        user: UserId,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<LedgerTxEntity>>> {
        let tables = self.tables.clone();
        Box::pin(async move {
            let guard = tables.lock().await;
            Ok(guard
                .ledger
                .iter()
                .rev()
                .filter(|tx| tx.user_id == user)
                .take(limit)
                .cloned()
                .collect())
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}
