use std::time::SystemTime;

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::{
    models::{
        ActionLogEntity, GameType, GroupSessionEntity, ItemKind, JudgmentLogEntity,
        LedgerOutcome, LedgerTxEntity, PairingEntity, PairingOutcome, PairingStatus,
        QueueEntryEntity, QuizAnswerEntity, QuizRoundEntity, QuizSessionEntity, QuizState,
        RoomId, StatsDelta, TodGameEntity, TodTurnEntity, TxType, UserId, UserStatsEntity,
        UserStatus,
    },
    storage::StorageResult,
};

pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

pub use memory::MemorySessionStore;

/// Abstraction over the persistence layer for queues, pairings, game sessions and the ledger.
///
/// Methods returning `bool` report whether a conditional write took effect: inserts return
/// `false` when the uniqueness key already exists and versioned saves return `false` when the
/// stored version no longer matches.
pub trait SessionStore: Send + Sync {
    // users
    fn find_user_stats(&self, user: UserId)
    -> BoxFuture<'static, StorageResult<UserStatsEntity>>;
    fn set_user_status(
        &self,
        user: UserId,
        status: UserStatus,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn apply_stats(&self, user: UserId, delta: StatsDelta)
    -> BoxFuture<'static, StorageResult<()>>;

    // matchmaking queue
    fn insert_queue_entry(
        &self,
        entry: QueueEntryEntity,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    fn find_queue_entry(
        &self,
        user: UserId,
    ) -> BoxFuture<'static, StorageResult<Option<QueueEntryEntity>>>;
    fn remove_queue_entry(
        &self,
        user: UserId,
    ) -> BoxFuture<'static, StorageResult<Option<QueueEntryEntity>>>;
    fn list_queue(
        &self,
        game_type: GameType,
    ) -> BoxFuture<'static, StorageResult<Vec<QueueEntryEntity>>>;

    // pairings
    /// Consume both queue entries and store `pairing` as one unit, provided both entries are
    /// still queued and neither user holds a non-terminal pairing.
    fn create_pairing(
        &self,
        pairing: PairingEntity,
    ) -> BoxFuture<'static, StorageResult<PairingOutcome>>;
    fn find_pairing(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<PairingEntity>>>;
    fn find_open_pairing(
        &self,
        user: UserId,
    ) -> BoxFuture<'static, StorageResult<Option<PairingEntity>>>;
    /// Move a pairing to `next` only if its current status is one of `expected`.
    fn transition_pairing(
        &self,
        id: Uuid,
        expected: Vec<PairingStatus>,
        next: PairingStatus,
        ended_by: Option<UserId>,
        at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    fn list_expired_pairings(
        &self,
        now: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Vec<PairingEntity>>>;

    // quiz
    fn insert_quiz_session(
        &self,
        session: QuizSessionEntity,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    fn find_quiz_session(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<QuizSessionEntity>>>;
    fn find_quiz_session_by_pairing(
        &self,
        pairing_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<QuizSessionEntity>>>;
    fn save_quiz_session(
        &self,
        session: QuizSessionEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    fn list_stale_quiz_sessions(
        &self,
        states: Vec<QuizState>,
        updated_before: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Vec<QuizSessionEntity>>>;
    /// Live sessions whose pending deadline is at or before `before`: category choices and
    /// questions past their deadline, and round breaks last touched by then.
    fn list_quiz_sessions_due(
        &self,
        before: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Vec<QuizSessionEntity>>>;
    fn insert_quiz_round(&self, round: QuizRoundEntity)
    -> BoxFuture<'static, StorageResult<bool>>;
    fn save_quiz_round(&self, round: QuizRoundEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn find_quiz_round(
        &self,
        session_id: Uuid,
        round_number: u8,
    ) -> BoxFuture<'static, StorageResult<Option<QuizRoundEntity>>>;
    fn insert_quiz_answer(
        &self,
        answer: QuizAnswerEntity,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Remove an answer whose session update could not be stored.
    fn delete_quiz_answer(
        &self,
        session_id: Uuid,
        round_number: u8,
        user: UserId,
        question_number: u8,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    fn list_quiz_answers(
        &self,
        session_id: Uuid,
        round_number: u8,
    ) -> BoxFuture<'static, StorageResult<Vec<QuizAnswerEntity>>>;

    // truth or dare
    fn insert_tod_game(&self, game: TodGameEntity) -> BoxFuture<'static, StorageResult<bool>>;
    fn find_tod_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<TodGameEntity>>>;
    fn find_tod_game_by_pairing(
        &self,
        pairing_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<TodGameEntity>>>;
    fn save_tod_game(
        &self,
        game: TodGameEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Non-terminal games whose turn deadline is at or before `before`.
    fn list_tod_games_due(
        &self,
        before: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Vec<TodGameEntity>>>;
    fn save_tod_turn(&self, turn: TodTurnEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn find_tod_turn(
        &self,
        game_id: Uuid,
        turn_number: u32,
    ) -> BoxFuture<'static, StorageResult<Option<TodTurnEntity>>>;
    fn list_tod_turns(
        &self,
        game_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<TodTurnEntity>>>;
    fn append_judgment(&self, log: JudgmentLogEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Most recent judgments issued by `judge`, newest first.
    fn recent_judgments(
        &self,
        judge: UserId,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<JudgmentLogEntity>>>;
    fn action_seen(&self, game_id: Uuid, token: String)
    -> BoxFuture<'static, StorageResult<bool>>;
    fn record_action(&self, action: ActionLogEntity) -> BoxFuture<'static, StorageResult<bool>>;
    fn purge_actions(&self, before: SystemTime) -> BoxFuture<'static, StorageResult<u64>>;
    /// Take one `item` from `user`, seeding the inventory with `starter` of each kind first.
    fn consume_item(
        &self,
        user: UserId,
        item: ItemKind,
        starter: u32,
    ) -> BoxFuture<'static, StorageResult<bool>>;

    // group games
    fn insert_group_session(
        &self,
        session: GroupSessionEntity,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    fn find_group_session(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<GroupSessionEntity>>>;
    fn find_open_group_session(
        &self,
        room: RoomId,
    ) -> BoxFuture<'static, StorageResult<Option<GroupSessionEntity>>>;
    fn save_group_session(
        &self,
        session: GroupSessionEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<bool>>;

    // ledger
    fn ledger_balance(&self, user: UserId) -> BoxFuture<'static, StorageResult<i64>>;
    /// Apply a signed movement and append its transaction row in one unit.
    /// Negative amounts are refused when they would overdraw the balance.
    fn ledger_apply(
        &self,
        user: UserId,
        amount: i64,
        tx_type: TxType,
        reason: String,
    ) -> BoxFuture<'static, StorageResult<LedgerOutcome>>;
    fn ledger_history(
        &self,
        user: UserId,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<LedgerTxEntity>>>;

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
