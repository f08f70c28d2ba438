use std::{sync::Arc, time::SystemTime};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database, IndexModel,
    bson::{Document, doc},
    options::{IndexOptions, ReturnDocument},
};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult, is_duplicate_key, query},
    models::{BalanceDocument, Tracked, doc_id, millis, tag, tags},
};
use crate::dao::{
    models::{
        ActionLogEntity, GameType, GroupSessionEntity, GroupStatus, ItemKind, JudgmentLogEntity,
        LedgerOutcome, LedgerTxEntity, PairingEntity, PairingOutcome, PairingStatus,
        QueueEntryEntity, QuizAnswerEntity, QuizRoundEntity, QuizSessionEntity, QuizState,
        RoomId, StatsDelta, TodGameEntity, TodState, TodTurnEntity, TxType, UserId,
        UserStatsEntity, UserStatus,
    },
    session_store::SessionStore,
    storage::StorageResult,
};

const USERS: &str = "users";
const QUEUE: &str = "queue";
const PAIRINGS: &str = "pairings";
const QUIZ_SESSIONS: &str = "quiz_sessions";
const QUIZ_ROUNDS: &str = "quiz_rounds";
const QUIZ_ANSWERS: &str = "quiz_answers";
const TOD_GAMES: &str = "tod_games";
const TOD_TURNS: &str = "tod_turns";
const JUDGMENTS: &str = "judgments";
const ACTIONS: &str = "actions";
const INVENTORY: &str = "inventory";
const GROUP_SESSIONS: &str = "group_sessions";
const BALANCES: &str = "balances";
const LEDGER: &str = "ledger";

/// MongoDB-backed [`SessionStore`].
///
/// Uniqueness and "one open row" invariants are enforced by indexes; multi-document steps
/// such as pairing creation compensate on conflict instead of relying on transactions.
#[derive(Clone)]
pub struct MongoSessionStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    #[allow(dead_code)]
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

async fn insert_unique<T>(
    collection: &Collection<T>,
    name: &'static str,
    value: &T,
) -> MongoResult<bool>
where
    T: Serialize + Send + Sync,
{
    match collection.insert_one(value).await {
        Ok(_) => Ok(true),
        Err(err) if is_duplicate_key(&err) => Ok(false),
        Err(source) => Err(query(name, "insert")(source)),
    }
}

impl MongoSessionStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let open_only = doc! { "open": true };
        let specs: [(&'static str, &'static str, Document, bool, Option<Document>); 12] = [
            (QUEUE, "queue_type_fifo_idx", doc! {"game_type": 1, "enqueued_at": 1}, false, None),
            (PAIRINGS, "pairing_open_participant_idx", doc! {"participants": 1}, true, Some(open_only.clone())),
            (PAIRINGS, "pairing_sweep_idx", doc! {"status": 1, "timeout_at": 1}, false, None),
            (QUIZ_SESSIONS, "quiz_pairing_idx", doc! {"pairing_id": 1}, true, None),
            (QUIZ_ROUNDS, "quiz_round_idx", doc! {"session_id": 1, "round_number": 1}, true, None),
            (
                QUIZ_ANSWERS,
                "quiz_answer_idx",
                doc! {"session_id": 1, "round_number": 1, "user_id": 1, "question_number": 1},
                true,
                None,
            ),
            (TOD_GAMES, "tod_open_pairing_idx", doc! {"pairing_id": 1}, true, Some(open_only.clone())),
            (TOD_TURNS, "tod_turn_idx", doc! {"game_id": 1, "turn_number": 1}, true, None),
            (JUDGMENTS, "judgment_judge_idx", doc! {"judge_id": 1, "created_at": -1}, false, None),
            (ACTIONS, "action_token_idx", doc! {"game_id": 1, "token": 1}, true, None),
            (GROUP_SESSIONS, "group_open_room_idx", doc! {"room_id": 1}, true, Some(open_only)),
            (LEDGER, "ledger_user_idx", doc! {"user_id": 1, "created_at": -1}, false, None),
        ];

        let database = self.database().await;
        for (collection, name, keys, unique, partial) in specs {
            let options = IndexOptions::builder()
                .name(Some(name.to_owned()))
                .unique(unique.then_some(true))
                .partial_filter_expression(partial)
                .build();
            let model = IndexModel::builder().keys(keys).options(options).build();

            database
                .collection::<Document>(collection)
                .create_index(model)
                .await
                .map_err(|source| MongoDaoError::EnsureIndex {
                    collection,
                    index: name,
                    source,
                })?;
        }

        Ok(())
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn collection<T: Send + Sync>(&self, name: &str) -> Collection<T> {
        let guard = self.inner.state.read().await;
        guard.database.collection::<T>(name)
    }

    async fn find_all<T>(
        collection: Collection<T>,
        name: &'static str,
        filter: Document,
        sort: Document,
        limit: Option<i64>,
    ) -> MongoResult<Vec<T>>
    where
        T: serde::de::DeserializeOwned + Send + Sync + Unpin,
    {
        let mut find = collection.find(filter).sort(sort);
        if let Some(limit) = limit {
            find = find.limit(limit);
        }
        find.await
            .map_err(query(name, "find"))?
            .try_collect()
            .await
            .map_err(query(name, "collect"))
    }

    // users

    async fn find_user_stats(&self, user: UserId) -> MongoResult<UserStatsEntity> {
        let users = self.collection::<UserStatsEntity>(USERS).await;
        let stats = users
            .find_one(doc! {"_id": user})
            .await
            .map_err(query(USERS, "find_one"))?;
        Ok(stats.unwrap_or_else(|| UserStatsEntity::new(user)))
    }

    async fn set_user_status(&self, user: UserId, status: UserStatus) -> MongoResult<()> {
        let users = self.collection::<Document>(USERS).await;
        users
            .update_one(doc! {"_id": user}, doc! {"$set": {"status": tag(&status)}})
            .upsert(true)
            .await
            .map_err(query(USERS, "set_status"))?;
        Ok(())
    }

    async fn apply_stats(&self, user: UserId, delta: StatsDelta) -> MongoResult<()> {
        let mut update = doc! {
            "$inc": {
                "xp": delta.xp,
                "games_played": i64::from(delta.games_played),
                "games_won": i64::from(delta.games_won),
                "timeout_count": i64::from(delta.timeout_count),
                "unfair_judgments": i64::from(delta.unfair_judgments),
            }
        };
        if let Some(score) = delta.judge_score {
            update.insert("$set", doc! {"judge_score": score});
        }

        let users = self.collection::<Document>(USERS).await;
        users
            .update_one(doc! {"_id": user}, update)
            .upsert(true)
            .await
            .map_err(query(USERS, "apply_stats"))?;
        Ok(())
    }

    // queue

    async fn restore_queue_entry(&self, entry: QueueEntryEntity) {
        let queue = self.collection::<QueueEntryEntity>(QUEUE).await;
        if let Err(err) = insert_unique(&queue, QUEUE, &entry).await {
            warn!(user_id = entry.user_id, error = %err, "failed to restore queue entry");
        }
    }

    async fn create_pairing(&self, pairing: PairingEntity) -> MongoResult<PairingOutcome> {
        if pairing.user_a == pairing.user_b {
            return Ok(PairingOutcome::Conflict);
        }

        let queue = self.collection::<QueueEntryEntity>(QUEUE).await;
        let Some(entry_a) = queue
            .find_one_and_delete(doc! {"_id": pairing.user_a})
            .await
            .map_err(query(QUEUE, "take"))?
        else {
            return Ok(PairingOutcome::Conflict);
        };
        let entry_b = match queue
            .find_one_and_delete(doc! {"_id": pairing.user_b})
            .await
        {
            Ok(Some(entry_b)) => entry_b,
            Ok(None) => {
                self.restore_queue_entry(entry_a).await;
                return Ok(PairingOutcome::Conflict);
            }
            Err(source) => {
                self.restore_queue_entry(entry_a).await;
                return Err(query(QUEUE, "take")(source));
            }
        };

        let pairings = self.collection::<Tracked<PairingEntity>>(PAIRINGS).await;
        let document = Tracked::new(pairing.clone(), true)
            .with_participants(vec![pairing.user_a, pairing.user_b]);
        match insert_unique(&pairings, PAIRINGS, &document).await {
            Ok(true) => Ok(PairingOutcome::Created(pairing)),
            Ok(false) => {
                self.restore_queue_entry(entry_a).await;
                self.restore_queue_entry(entry_b).await;
                Ok(PairingOutcome::Conflict)
            }
            Err(err) => {
                self.restore_queue_entry(entry_a).await;
                self.restore_queue_entry(entry_b).await;
                Err(err)
            }
        }
    }

    async fn find_pairing_by(&self, filter: Document) -> MongoResult<Option<PairingEntity>> {
        let pairings = self.collection::<Tracked<PairingEntity>>(PAIRINGS).await;
        let found = pairings
            .find_one(filter)
            .await
            .map_err(query(PAIRINGS, "find_one"))?;
        Ok(found.map(|document| document.entity))
    }

    async fn transition_pairing(
        &self,
        id: Uuid,
        expected: Vec<PairingStatus>,
        next: PairingStatus,
        ended_by: Option<UserId>,
        at: SystemTime,
    ) -> MongoResult<bool> {
        let mut set = doc! {"status": tag(&next), "open": !next.is_terminal()};
        if next.is_terminal() {
            set.insert("ended_at", millis(at));
            if let Some(user) = ended_by {
                set.insert("ended_by", user);
            }
        }

        let pairings = self.collection::<Document>(PAIRINGS).await;
        let result = pairings
            .update_one(
                doc! {"_id": id.to_string(), "status": {"$in": tags(&expected)}},
                doc! {"$set": set},
            )
            .await
            .map_err(query(PAIRINGS, "transition"))?;
        Ok(result.modified_count == 1)
    }

    // quiz

    async fn save_quiz_session(
        &self,
        session: QuizSessionEntity,
        expected_version: u64,
    ) -> MongoResult<bool> {
        let sessions = self.collection::<QuizSessionEntity>(QUIZ_SESSIONS).await;
        let result = sessions
            .replace_one(
                doc! {"_id": session.id.to_string(), "version": expected_version as i64},
                &session,
            )
            .await
            .map_err(query(QUIZ_SESSIONS, "replace"))?;
        Ok(result.matched_count == 1)
    }

    async fn save_quiz_round(&self, round: QuizRoundEntity) -> MongoResult<()> {
        let rounds = self.collection::<QuizRoundEntity>(QUIZ_ROUNDS).await;
        rounds
            .replace_one(
                doc! {
                    "session_id": round.session_id.to_string(),
                    "round_number": i32::from(round.round_number),
                },
                &round,
            )
            .upsert(true)
            .await
            .map_err(query(QUIZ_ROUNDS, "replace"))?;
        Ok(())
    }

    // truth or dare

    async fn save_tod_game(&self, game: TodGameEntity, expected_version: u64) -> MongoResult<bool> {
        let games = self.collection::<Tracked<TodGameEntity>>(TOD_GAMES).await;
        let filter = doc! {"_id": game.id.to_string(), "version": expected_version as i64};
        let open = !game.state.is_terminal();
        let result = games
            .replace_one(filter, &Tracked::new(game, open))
            .await
            .map_err(query(TOD_GAMES, "replace"))?;
        Ok(result.matched_count == 1)
    }

    async fn save_tod_turn(&self, turn: TodTurnEntity) -> MongoResult<()> {
        let turns = self.collection::<TodTurnEntity>(TOD_TURNS).await;
        turns
            .replace_one(
                doc! {"game_id": turn.game_id.to_string(), "turn_number": i64::from(turn.turn_number)},
                &turn,
            )
            .upsert(true)
            .await
            .map_err(query(TOD_TURNS, "replace"))?;
        Ok(())
    }

    async fn consume_item(&self, user: UserId, item: ItemKind, starter: u32) -> MongoResult<bool> {
        let inventory = self.collection::<Document>(INVENTORY).await;
        let starter = i64::from(starter);
        inventory
            .update_one(
                doc! {"_id": user},
                doc! {"$setOnInsert": {"shield": starter, "swap": starter, "mirror": starter}},
            )
            .upsert(true)
            .await
            .map_err(query(INVENTORY, "seed"))?;

        let mut filter = doc! {"_id": user};
        filter.insert(item.as_str(), doc! {"$gt": 0});
        let mut decrement = Document::new();
        decrement.insert(item.as_str(), -1);

        let result = inventory
            .update_one(filter, doc! {"$inc": decrement})
            .await
            .map_err(query(INVENTORY, "consume"))?;
        Ok(result.modified_count == 1)
    }

    // group games

    async fn save_group_session(
        &self,
        session: GroupSessionEntity,
        expected_version: u64,
    ) -> MongoResult<bool> {
        let sessions = self.collection::<Tracked<GroupSessionEntity>>(GROUP_SESSIONS).await;
        let filter = doc! {"_id": session.id.to_string(), "version": expected_version as i64};
        let open = session.status != GroupStatus::Finished;
        let result = sessions
            .replace_one(filter, &Tracked::new(session, open))
            .await
            .map_err(query(GROUP_SESSIONS, "replace"))?;
        Ok(result.matched_count == 1)
    }

    // ledger

    async fn ledger_balance(&self, user: UserId) -> MongoResult<i64> {
        let balances = self.collection::<BalanceDocument>(BALANCES).await;
        let found = balances
            .find_one(doc! {"_id": user})
            .await
            .map_err(query(BALANCES, "find_one"))?;
        Ok(found.map(|document| document.balance).unwrap_or(0))
    }

    async fn ledger_apply(
        &self,
        user: UserId,
        amount: i64,
        tx_type: TxType,
        reason: String,
    ) -> MongoResult<LedgerOutcome> {
        let balances = self.collection::<BalanceDocument>(BALANCES).await;
        let updated = if amount < 0 {
            balances
                .find_one_and_update(
                    doc! {"_id": user, "balance": {"$gte": -amount}},
                    doc! {"$inc": {"balance": amount}},
                )
                .return_document(ReturnDocument::After)
                .await
        } else {
            balances
                .find_one_and_update(doc! {"_id": user}, doc! {"$inc": {"balance": amount}})
                .upsert(true)
                .return_document(ReturnDocument::After)
                .await
        }
        .map_err(query(BALANCES, "apply"))?;

        let Some(updated) = updated else {
            let balance = self.ledger_balance(user).await?;
            return Ok(LedgerOutcome::InsufficientFunds { balance });
        };

        let row = LedgerTxEntity {
            id: Uuid::new_v4(),
            user_id: user,
            amount,
            tx_type,
            reason,
            balance_after: updated.balance,
            created_at: SystemTime::now(),
        };
        let ledger = self.collection::<LedgerTxEntity>(LEDGER).await;
        if let Err(source) = ledger.insert_one(&row).await {
            balances
                .update_one(doc! {"_id": user}, doc! {"$inc": {"balance": -amount}})
                .await
                .map_err(query(BALANCES, "revert"))?;
            return Err(query(LEDGER, "insert")(source));
        }

        Ok(LedgerOutcome::Applied {
            balance: updated.balance,
        })
    }
}

impl SessionStore for MongoSessionStore {
    fn find_user_stats(&self, user: UserId) -> BoxFuture<'static, StorageResult<UserStatsEntity>> {
        let store = self.clone();
        Box::pin(async move { store.find_user_stats(user).await.map_err(Into::into) })
    }

    fn set_user_status(
        &self,
        user: UserId,
        status: UserStatus,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.set_user_status(user, status).await.map_err(Into::into) })
    }

    fn apply_stats(&self, user: UserId, delta: StatsDelta) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.apply_stats(user, delta).await.map_err(Into::into) })
    }

    fn insert_queue_entry(&self, entry: QueueEntryEntity) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            let queue = store.collection::<QueueEntryEntity>(QUEUE).await;
            Ok(insert_unique(&queue, QUEUE, &entry).await?)
        })
    }

    fn find_queue_entry(
        &self,
        user: UserId,
    ) -> BoxFuture<'static, StorageResult<Option<QueueEntryEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let queue = store.collection::<QueueEntryEntity>(QUEUE).await;
            Ok(queue
                .find_one(doc! {"_id": user})
                .await
                .map_err(query(QUEUE, "find_one"))?)
        })
    }

    fn remove_queue_entry(
        &self,
        user: UserId,
    ) -> BoxFuture<'static, StorageResult<Option<QueueEntryEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let queue = store.collection::<QueueEntryEntity>(QUEUE).await;
            Ok(queue
                .find_one_and_delete(doc! {"_id": user})
                .await
                .map_err(query(QUEUE, "delete"))?)
        })
    }

    fn list_queue(
        &self,
        game_type: GameType,
    ) -> BoxFuture<'static, StorageResult<Vec<QueueEntryEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let queue = store.collection::<QueueEntryEntity>(QUEUE).await;
            Ok(Self::find_all(
                queue,
                QUEUE,
                doc! {"game_type": tag(&game_type)},
                doc! {"enqueued_at": 1, "_id": 1},
                None,
            )
            .await?)
        })
    }

    fn create_pairing(
        &self,
        pairing: PairingEntity,
    ) -> BoxFuture<'static, StorageResult<PairingOutcome>> {
        let store = self.clone();
        Box::pin(async move { store.create_pairing(pairing).await.map_err(Into::into) })
    }

    fn find_pairing(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<PairingEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_pairing_by(doc_id(id)).await.map_err(Into::into) })
    }

    fn find_open_pairing(
        &self,
        user: UserId,
    ) -> BoxFuture<'static, StorageResult<Option<PairingEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_pairing_by(doc! {"participants": user, "open": true})
                .await
                .map_err(Into::into)
        })
    }

    fn transition_pairing(
        &self,
        id: Uuid,
        expected: Vec<PairingStatus>,
        next: PairingStatus,
        ended_by: Option<UserId>,
        at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .transition_pairing(id, expected, next, ended_by, at)
                .await
                .map_err(Into::into)
        })
    }

    fn list_expired_pairings(
        &self,
        now: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Vec<PairingEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let pairings = store.collection::<Tracked<PairingEntity>>(PAIRINGS).await;
            let documents = Self::find_all(
                pairings,
                PAIRINGS,
                doc! {
                    "status": tag(&PairingStatus::Active),
                    "timeout_at": {"$lte": millis(now)},
                },
                doc! {"timeout_at": 1},
                None,
            )
            .await?;
            Ok(documents.into_iter().map(|document| document.entity).collect())
        })
    }

    fn insert_quiz_session(
        &self,
        session: QuizSessionEntity,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            let sessions = store.collection::<QuizSessionEntity>(QUIZ_SESSIONS).await;
            Ok(insert_unique(&sessions, QUIZ_SESSIONS, &session).await?)
        })
    }

    fn find_quiz_session(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<QuizSessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let sessions = store.collection::<QuizSessionEntity>(QUIZ_SESSIONS).await;
            Ok(sessions
                .find_one(doc_id(id))
                .await
                .map_err(query(QUIZ_SESSIONS, "find_one"))?)
        })
    }

    fn find_quiz_session_by_pairing(
        &self,
        pairing_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<QuizSessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let sessions = store.collection::<QuizSessionEntity>(QUIZ_SESSIONS).await;
            Ok(sessions
                .find_one(doc! {"pairing_id": pairing_id.to_string()})
                .await
                .map_err(query(QUIZ_SESSIONS, "find_one"))?)
        })
    }

    fn save_quiz_session(
        &self,
        session: QuizSessionEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .save_quiz_session(session, expected_version)
                .await
                .map_err(Into::into)
        })
    }

    fn list_stale_quiz_sessions(
        &self,
        states: Vec<QuizState>,
        updated_before: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Vec<QuizSessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let sessions = store.collection::<QuizSessionEntity>(QUIZ_SESSIONS).await;
            Ok(Self::find_all(
                sessions,
                QUIZ_SESSIONS,
                doc! {
                    "state": {"$in": tags(&states)},
                    "updated_at": {"$lt": millis(updated_before)},
                },
                doc! {"updated_at": 1},
                None,
            )
            .await?)
        })
    }

    fn list_quiz_sessions_due(
        &self,
        before: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Vec<QuizSessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let sessions = store.collection::<QuizSessionEntity>(QUIZ_SESSIONS).await;
            let before = millis(before);
            Ok(Self::find_all(
                sessions,
                QUIZ_SESSIONS,
                doc! {
                    "$or": [
                        {"state": tag(&QuizState::WaitingCategory), "category_deadline": {"$lte": before}},
                        {"state": tag(&QuizState::PlayingRound), "question_deadline": {"$lte": before}},
                        {"state": tag(&QuizState::RoundFinished), "updated_at": {"$lte": before}},
                    ],
                },
                doc! {"updated_at": 1},
                None,
            )
            .await?)
        })
    }

    fn insert_quiz_round(&self, round: QuizRoundEntity) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            let rounds = store.collection::<QuizRoundEntity>(QUIZ_ROUNDS).await;
            Ok(insert_unique(&rounds, QUIZ_ROUNDS, &round).await?)
        })
    }

    fn save_quiz_round(&self, round: QuizRoundEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_quiz_round(round).await.map_err(Into::into) })
    }

    fn find_quiz_round(
        &self,
        session_id: Uuid,
        round_number: u8,
    ) -> BoxFuture<'static, StorageResult<Option<QuizRoundEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let rounds = store.collection::<QuizRoundEntity>(QUIZ_ROUNDS).await;
            Ok(rounds
                .find_one(doc! {
                    "session_id": session_id.to_string(),
                    "round_number": i32::from(round_number),
                })
                .await
                .map_err(query(QUIZ_ROUNDS, "find_one"))?)
        })
    }

    fn insert_quiz_answer(
        &self,
        answer: QuizAnswerEntity,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            let answers = store.collection::<QuizAnswerEntity>(QUIZ_ANSWERS).await;
            Ok(insert_unique(&answers, QUIZ_ANSWERS, &answer).await?)
        })
    }

    fn delete_quiz_answer(
        &self,
        session_id: Uuid,
        round_number: u8,
        user: UserId,
        question_number: u8,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            let answers = store.collection::<Document>(QUIZ_ANSWERS).await;
            let result = answers
                .delete_one(doc! {
                    "session_id": session_id.to_string(),
                    "round_number": i32::from(round_number),
                    "user_id": user,
                    "question_number": i32::from(question_number),
                })
                .await
                .map_err(query(QUIZ_ANSWERS, "delete"))?;
            Ok(result.deleted_count == 1)
        })
    }

    fn list_quiz_answers(
        &self,
        session_id: Uuid,
        round_number: u8,
    ) -> BoxFuture<'static, StorageResult<Vec<QuizAnswerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let answers = store.collection::<QuizAnswerEntity>(QUIZ_ANSWERS).await;
            Ok(Self::find_all(
                answers,
                QUIZ_ANSWERS,
                doc! {
                    "session_id": session_id.to_string(),
                    "round_number": i32::from(round_number),
                },
                doc! {"question_number": 1, "user_id": 1},
                None,
            )
            .await?)
        })
    }

    fn insert_tod_game(&self, game: TodGameEntity) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            let games = store.collection::<Tracked<TodGameEntity>>(TOD_GAMES).await;
            let open = !game.state.is_terminal();
            Ok(insert_unique(&games, TOD_GAMES, &Tracked::new(game, open)).await?)
        })
    }

    fn find_tod_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<TodGameEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let games = store.collection::<Tracked<TodGameEntity>>(TOD_GAMES).await;
            let found = games
                .find_one(doc_id(id))
                .await
                .map_err(query(TOD_GAMES, "find_one"))?;
            Ok(found.map(|document| document.entity))
        })
    }

    fn find_tod_game_by_pairing(
        &self,
        pairing_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<TodGameEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let games = store.collection::<Tracked<TodGameEntity>>(TOD_GAMES).await;
            let found = games
                .find_one(doc! {"pairing_id": pairing_id.to_string()})
                .sort(doc! {"created_at": -1})
                .await
                .map_err(query(TOD_GAMES, "find_one"))?;
            Ok(found.map(|document| document.entity))
        })
    }

    fn save_tod_game(
        &self,
        game: TodGameEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .save_tod_game(game, expected_version)
                .await
                .map_err(Into::into)
        })
    }

    fn list_tod_games_due(
        &self,
        before: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Vec<TodGameEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let games = store.collection::<Tracked<TodGameEntity>>(TOD_GAMES).await;
            let waiting = [
                TodState::WaitingChoice,
                TodState::WaitingProof,
                TodState::WaitingJudgment,
            ];
            let documents = Self::find_all(
                games,
                TOD_GAMES,
                doc! {
                    "open": true,
                    "state": {"$in": tags(&waiting)},
                    "turn_deadline": {"$lte": millis(before)},
                },
                doc! {"turn_deadline": 1},
                None,
            )
            .await?;
            Ok(documents.into_iter().map(|document| document.entity).collect())
        })
    }

    fn save_tod_turn(&self, turn: TodTurnEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_tod_turn(turn).await.map_err(Into::into) })
    }

    fn find_tod_turn(
        &self,
        game_id: Uuid,
        turn_number: u32,
    ) -> BoxFuture<'static, StorageResult<Option<TodTurnEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let turns = store.collection::<TodTurnEntity>(TOD_TURNS).await;
            Ok(turns
                .find_one(doc! {"game_id": game_id.to_string(), "turn_number": i64::from(turn_number)})
                .await
                .map_err(query(TOD_TURNS, "find_one"))?)
        })
    }

    fn list_tod_turns(
        &self,
        game_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<TodTurnEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let turns = store.collection::<TodTurnEntity>(TOD_TURNS).await;
            Ok(Self::find_all(
                turns,
                TOD_TURNS,
                doc! {"game_id": game_id.to_string()},
                doc! {"turn_number": 1},
                None,
            )
            .await?)
        })
    }

    fn append_judgment(&self, log: JudgmentLogEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let judgments = store.collection::<JudgmentLogEntity>(JUDGMENTS).await;
            judgments
                .insert_one(&log)
                .await
                .map_err(query(JUDGMENTS, "insert"))?;
            Ok(())
        })
    }

    fn recent_judgments(
        &self,
        judge: UserId,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<JudgmentLogEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let judgments = store.collection::<JudgmentLogEntity>(JUDGMENTS).await;
            Ok(Self::find_all(
                judgments,
                JUDGMENTS,
                doc! {"judge_id": judge},
                doc! {"created_at": -1, "_id": -1},
                Some(i64::try_from(limit).unwrap_or(i64::MAX)),
            )
            .await?)
        })
    }

    fn action_seen(&self, game_id: Uuid, token: String) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            let actions = store.collection::<Document>(ACTIONS).await;
            let found = actions
                .find_one(doc! {"game_id": game_id.to_string(), "token": token})
                .await
                .map_err(query(ACTIONS, "find_one"))?;
            Ok(found.is_some())
        })
    }

    fn record_action(&self, action: ActionLogEntity) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            let actions = store.collection::<ActionLogEntity>(ACTIONS).await;
            Ok(insert_unique(&actions, ACTIONS, &action).await?)
        })
    }

    fn purge_actions(&self, before: SystemTime) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        Box::pin(async move {
            let actions = store.collection::<Document>(ACTIONS).await;
            let result = actions
                .delete_many(doc! {"created_at": {"$lt": millis(before)}})
                .await
                .map_err(query(ACTIONS, "purge"))?;
            Ok(result.deleted_count)
        })
    }

    fn consume_item(
        &self,
        user: UserId,
        item: ItemKind,
        starter: u32,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .consume_item(user, item, starter)
                .await
                .map_err(Into::into)
        })
    }

    fn insert_group_session(
        &self,
        session: GroupSessionEntity,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            let sessions = store
                .collection::<Tracked<GroupSessionEntity>>(GROUP_SESSIONS)
                .await;
            let open = session.status != GroupStatus::Finished;
            Ok(insert_unique(&sessions, GROUP_SESSIONS, &Tracked::new(session, open)).await?)
        })
    }

    fn find_group_session(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<GroupSessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let sessions = store
                .collection::<Tracked<GroupSessionEntity>>(GROUP_SESSIONS)
                .await;
            let found = sessions
                .find_one(doc_id(id))
                .await
                .map_err(query(GROUP_SESSIONS, "find_one"))?;
            Ok(found.map(|document| document.entity))
        })
    }

    fn find_open_group_session(
        &self,
        room: RoomId,
    ) -> BoxFuture<'static, StorageResult<Option<GroupSessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let sessions = store
                .collection::<Tracked<GroupSessionEntity>>(GROUP_SESSIONS)
                .await;
            let found = sessions
                .find_one(doc! {"room_id": room, "open": true})
                .await
                .map_err(query(GROUP_SESSIONS, "find_one"))?;
            Ok(found.map(|document| document.entity))
        })
    }

    fn save_group_session(
        &self,
        session: GroupSessionEntity,
        expected_version: u64,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .save_group_session(session, expected_version)
                .await
                .map_err(Into::into)
        })
    }

    fn ledger_balance(&self, user: UserId) -> BoxFuture<'static, StorageResult<i64>> {
        let store = self.clone();
        Box::pin(async move { store.ledger_balance(user).await.map_err(Into::into) })
    }

    fn ledger_apply(
        &self,
        user: UserId,
        amount: i64,
        tx_type: TxType,
        reason: String,
    ) -> BoxFuture<'static, StorageResult<LedgerOutcome>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .ledger_apply(user, amount, tx_type, reason)
                .await
                .map_err(Into::into)
        })
    }

    fn ledger_history(
        &self,
        user: UserId,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<LedgerTxEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let ledger = store.collection::<LedgerTxEntity>(LEDGER).await;
            Ok(Self::find_all(
                ledger,
                LEDGER,
                doc! {"user_id": user},
                doc! {"created_at": -1},
                Some(i64::try_from(limit).unwrap_or(i64::MAX)),
            )
            .await?)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
