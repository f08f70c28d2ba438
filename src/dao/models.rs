//! Persisted entities shared by every storage backend.
//!
//! Timestamps are stored as epoch milliseconds and identifiers as strings so the same
//! records can be queried by range and equality in any backend.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, TimestampMilliSeconds, serde_as};
use utoipa::ToSchema;
use uuid::Uuid;

/// Identifier of an end user as handed to us by the transport layer.
pub type UserId = i64;
/// Identifier of a room owned by the membership provider.
pub type RoomId = i64;

/// Gender declared in a searcher's profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    /// Male profile.
    Male,
    /// Female profile.
    Female,
}

/// Gender a searcher is willing to be matched with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GenderPreference {
    /// No restriction.
    #[default]
    Any,
    /// Only male candidates.
    Male,
    /// Only female candidates.
    Female,
}

/// Kind of session a queue entry is searching for. Entries only match within one kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GameType {
    /// Plain anonymous chat.
    #[default]
    Chat,
    /// 1v1 quiz.
    Quiz,
    /// 1v1 truth-or-dare.
    TruthOrDare,
}

impl GameType {
    /// Every kind, in declaration order.
    pub const ALL: [GameType; 3] = [GameType::Chat, GameType::Quiz, GameType::TruthOrDare];
}

/// Public attributes of the searcher used by the other side's filters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SearchProfile {
    pub gender: Gender,
    #[serde(default)]
    pub age: Option<u8>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub province: Option<String>,
}

/// Constraints a searcher places on a candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MatchFilters {
    #[serde(default)]
    pub gender: GenderPreference,
    #[serde(default)]
    pub min_age: Option<u8>,
    #[serde(default)]
    pub max_age: Option<u8>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub provinces: Vec<String>,
}

/// A user waiting in the matchmaking queue. Unique per user.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntryEntity {
    #[serde(rename = "_id")]
    pub user_id: UserId,
    pub profile: SearchProfile,
    pub filters: MatchFilters,
    pub game_type: GameType,
    pub coins_paid: i64,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub enqueued_at: SystemTime,
}

/// Lifecycle of a 1:1 pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PairingStatus {
    /// Freshly matched, within the free interaction window.
    Active,
    /// Interaction window elapsed; still open under the costed policy.
    Timeout,
    /// Closed by one of the participants.
    Ended,
}

impl PairingStatus {
    /// Terminal pairings never reopen.
    pub fn is_terminal(self) -> bool {
        matches!(self, PairingStatus::Ended)
    }
}

/// The 1:1 relationship formed when matchmaking succeeds.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairingEntity {
    #[serde(rename = "_id")]
    #[serde_as(as = "DisplayFromStr")]
    pub id: Uuid,
    pub user_a: UserId,
    pub user_b: UserId,
    pub game_type: GameType,
    pub status: PairingStatus,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub started_at: SystemTime,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub timeout_at: SystemTime,
    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    pub ended_at: Option<SystemTime>,
    #[serde(default)]
    pub ended_by: Option<UserId>,
}

impl PairingEntity {
    /// Whether `user` is one of the two participants.
    pub fn involves(&self, user: UserId) -> bool {
        self.user_a == user || self.user_b == user
    }

    /// The other participant, if `user` belongs to this pairing.
    pub fn partner_of(&self, user: UserId) -> Option<UserId> {
        if self.user_a == user {
            Some(self.user_b)
        } else if self.user_b == user {
            Some(self.user_a)
        } else {
            None
        }
    }
}

/// Result of an atomic pairing attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum PairingOutcome {
    /// Both queue entries were consumed and the pairing stored.
    Created(PairingEntity),
    /// One of the entries vanished or a participant is already paired; nothing changed.
    Conflict,
}

/// Coarse presence of a user as seen by matchmaking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    /// Idle and free to search.
    #[default]
    Online,
    /// Waiting in the queue.
    Searching,
    /// Inside a pairing.
    InChat,
}

/// Per-user counters maintained by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UserStatsEntity {
    #[serde(rename = "_id")]
    pub user_id: UserId,
    #[serde(default)]
    pub status: UserStatus,
    #[serde(default)]
    pub xp: i64,
    #[serde(default)]
    pub games_played: u32,
    #[serde(default)]
    pub games_won: u32,
    #[serde(default)]
    pub timeout_count: u32,
    #[serde(default = "default_judge_score")]
    pub judge_score: f64,
    #[serde(default)]
    pub unfair_judgments: u32,
}

fn default_judge_score() -> f64 {
    100.0
}

impl UserStatsEntity {
    /// Fresh counters for a user seen for the first time.
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            status: UserStatus::Online,
            xp: 0,
            games_played: 0,
            games_won: 0,
            timeout_count: 0,
            judge_score: default_judge_score(),
            unfair_judgments: 0,
        }
    }
}

/// Incremental change applied to [`UserStatsEntity`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsDelta {
    pub xp: i64,
    pub games_played: u32,
    pub games_won: u32,
    pub timeout_count: u32,
    pub unfair_judgments: u32,
    pub judge_score: Option<f64>,
}

impl StatsDelta {
    /// Delta that only grants experience.
    pub fn xp(amount: i64) -> Self {
        Self {
            xp: amount,
            ..Self::default()
        }
    }

    /// Delta recording a finished game.
    pub fn game(won: bool, xp: i64) -> Self {
        Self {
            xp,
            games_played: 1,
            games_won: u32::from(won),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Quiz
// ---------------------------------------------------------------------------

/// States of a 1v1 quiz session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum QuizState {
    WaitingCategory,
    PlayingRound,
    RoundFinished,
    Finished,
    TimedOut,
}

impl QuizState {
    /// Whether the session accepts no further events.
    pub fn is_terminal(self) -> bool {
        matches!(self, QuizState::Finished | QuizState::TimedOut)
    }
}

/// Running totals of one quiz participant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct QuizScore {
    pub correct: u32,
    pub time_ms: i64,
}

/// A 1v1 quiz layered on a pairing.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizSessionEntity {
    #[serde(rename = "_id")]
    #[serde_as(as = "DisplayFromStr")]
    pub id: Uuid,
    #[serde_as(as = "DisplayFromStr")]
    pub pairing_id: Uuid,
    pub user_a: UserId,
    pub user_b: UserId,
    pub state: QuizState,
    pub rounds_total: u8,
    pub questions_per_round: u8,
    pub current_round: u8,
    pub current_question: u8,
    pub score_a: QuizScore,
    pub score_b: QuizScore,
    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    pub category_deadline: Option<SystemTime>,
    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    pub question_started_at: Option<SystemTime>,
    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    pub question_deadline: Option<SystemTime>,
    #[serde(default)]
    pub winner: Option<UserId>,
    pub version: u64,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub created_at: SystemTime,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub updated_at: SystemTime,
}

/// Per-round outcome stored once the round completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RoundResult {
    pub score_a: QuizScore,
    pub score_b: QuizScore,
    pub winner: Option<UserId>,
}

/// One category round of a quiz session. The question list is bound once.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizRoundEntity {
    #[serde_as(as = "DisplayFromStr")]
    pub session_id: Uuid,
    pub round_number: u8,
    pub category: String,
    pub chosen_by: UserId,
    pub question_ids: Vec<u32>,
    #[serde(default)]
    pub result: Option<RoundResult>,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub created_at: SystemTime,
}

/// A recorded answer, unique on `(session, round, user, question)`.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizAnswerEntity {
    #[serde_as(as = "DisplayFromStr")]
    pub session_id: Uuid,
    pub round_number: u8,
    pub user_id: UserId,
    pub question_number: u8,
    #[serde(default)]
    pub choice: Option<u8>,
    pub correct: bool,
    pub elapsed_ms: i64,
    #[serde(default)]
    pub auto_filled: bool,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub answered_at: SystemTime,
}

// ---------------------------------------------------------------------------
// Truth or dare
// ---------------------------------------------------------------------------

/// States of a 1v1 truth-or-dare game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TodState {
    Matchmaking,
    CoinFlip,
    WaitingChoice,
    WaitingProof,
    WaitingJudgment,
    Forfeit,
    GameEnd,
}

impl TodState {
    /// Whether the game accepts no further events.
    pub fn is_terminal(self) -> bool {
        matches!(self, TodState::Forfeit | TodState::GameEnd)
    }

    /// States that run against a turn deadline.
    pub fn awaits_player(self) -> bool {
        matches!(
            self,
            TodState::WaitingChoice | TodState::WaitingProof | TodState::WaitingJudgment
        )
    }
}

/// Why a truth-or-dare game ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Completed,
    Forfeit,
    Quit,
    Afk,
}

/// Truth or dare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TodChoice {
    Truth,
    Dare,
}

/// Media a challenge expects as proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProofKind {
    Text,
    Voice,
    Image,
    Video,
    None,
}

/// A judge's verdict on a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JudgmentResult {
    Accepted,
    Rejected,
    /// The judge let the turn deadline expire.
    TimedOut,
}

/// Consumable power-ups usable during the choice phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// Skip the turn without penalty.
    Shield,
    /// Redraw the choice.
    Swap,
    /// Hand the turn to the opponent.
    Mirror,
}

impl ItemKind {
    /// Stable key used by storage backends.
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Shield => "shield",
            ItemKind::Swap => "swap",
            ItemKind::Mirror => "mirror",
        }
    }
}

/// Copy of the challenge bound to a turn, so later content edits do not alter history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ChallengeSnapshot {
    pub id: u32,
    pub kind: TodChoice,
    pub text: String,
    pub proof_kind: ProofKind,
    pub coin_reward: i64,
    pub xp_reward: i64,
}

/// Proof submitted by the active player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Proof {
    pub kind: ProofKind,
    pub payload: String,
}

/// A truth-or-dare game layered on a pairing.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodGameEntity {
    #[serde(rename = "_id")]
    #[serde_as(as = "DisplayFromStr")]
    pub id: Uuid,
    #[serde_as(as = "DisplayFromStr")]
    pub pairing_id: Uuid,
    pub user_a: UserId,
    pub user_b: UserId,
    pub state: TodState,
    pub current_round: u32,
    pub max_rounds: u32,
    pub turn_number: u32,
    pub active_player: UserId,
    pub passive_player: UserId,
    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    pub turn_deadline: Option<SystemTime>,
    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    pub warning_shown_at: Option<SystemTime>,
    #[serde(default)]
    pub winner: Option<UserId>,
    #[serde(default)]
    pub end_reason: Option<EndReason>,
    pub version: u64,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub created_at: SystemTime,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub updated_at: SystemTime,
    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    pub ended_at: Option<SystemTime>,
}

/// One choice/challenge/proof/judgment cycle.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodTurnEntity {
    #[serde_as(as = "DisplayFromStr")]
    pub game_id: Uuid,
    pub turn_number: u32,
    pub round: u32,
    pub active_player: UserId,
    pub passive_player: UserId,
    #[serde(default)]
    pub choice: Option<TodChoice>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub challenge: Option<ChallengeSnapshot>,
    #[serde(default)]
    pub proof: Option<Proof>,
    #[serde(default)]
    pub judgment: Option<JudgmentResult>,
    #[serde(default)]
    pub item_used: Option<ItemKind>,
    #[serde(default)]
    pub coins_awarded: i64,
    #[serde(default)]
    pub xp_awarded: i64,
    #[serde(default)]
    pub completed: bool,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub started_at: SystemTime,
}

/// Audit row written for every judge decision.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgmentLogEntity {
    #[serde_as(as = "DisplayFromStr")]
    pub game_id: Uuid,
    pub turn_number: u32,
    pub judge_id: UserId,
    pub player_id: UserId,
    pub result: JudgmentResult,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub created_at: SystemTime,
}

/// Idempotency record for a client-supplied action token.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionLogEntity {
    #[serde_as(as = "DisplayFromStr")]
    pub game_id: Uuid,
    pub user_id: UserId,
    pub token: String,
    pub action: String,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub created_at: SystemTime,
}

// ---------------------------------------------------------------------------
// Group games
// ---------------------------------------------------------------------------

/// Which mini-game a room is playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GroupGameType {
    Quiz,
    TruthDare,
}

/// Status of a group session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Waiting,
    InProgress,
    WaitingForChoice,
    WaitingForHost,
    Finished,
}

/// Member of a group game, kept even after leaving the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Participant {
    pub user_id: UserId,
    pub turn_order: u32,
    pub score: i64,
}

/// Prompt drawn for the current turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct GroupPrompt {
    pub choice: TodChoice,
    pub category: String,
    pub text: String,
}

/// A game played by the members of a room.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSessionEntity {
    #[serde(rename = "_id")]
    #[serde_as(as = "DisplayFromStr")]
    pub id: Uuid,
    pub room_id: RoomId,
    pub game_type: GroupGameType,
    pub status: GroupStatus,
    #[serde(default)]
    pub turn_user: Option<UserId>,
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub prompt: Option<GroupPrompt>,
    pub version: u64,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub created_at: SystemTime,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub updated_at: SystemTime,
    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    pub ended_at: Option<SystemTime>,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Tag attached to every coin movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TxType {
    Matchmaking,
    MatchRefund,
    MessageCost,
    GameReward,
    Penalty,
    Grant,
}

/// Immutable ledger row. `amount` is signed.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTxEntity {
    #[serde(rename = "_id")]
    #[serde_as(as = "DisplayFromStr")]
    pub id: Uuid,
    pub user_id: UserId,
    pub amount: i64,
    pub tx_type: TxType,
    pub reason: String,
    pub balance_after: i64,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub created_at: SystemTime,
}

/// Result of a ledger mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOutcome {
    /// The movement was recorded; `balance` is the new balance.
    Applied { balance: i64 },
    /// A debit was refused; nothing was written.
    InsufficientFunds { balance: i64 },
}
