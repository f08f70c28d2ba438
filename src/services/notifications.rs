//! Event names of every notification the engine emits.

pub const MATCH_SEARCHING: &str = "matchmaking.searching";
pub const MATCH_CANCELLED: &str = "matchmaking.cancelled";
pub const MATCH_TIMEOUT: &str = "matchmaking.timeout";
pub const MATCH_FAILED: &str = "matchmaking.failed";

pub const PAIRING_FOUND: &str = "pairing.found";
pub const PAIRING_TIMEOUT: &str = "pairing.timeout";
pub const PAIRING_ENDED: &str = "pairing.ended";
pub const CHAT_MESSAGE: &str = "chat.message";

pub const QUIZ_STARTED: &str = "quiz.started";
pub const QUIZ_CHOOSE_CATEGORY: &str = "quiz.choose_category";
pub const QUIZ_QUESTION: &str = "quiz.question";
pub const QUIZ_OPPONENT_ANSWERED: &str = "quiz.opponent_answered";
pub const QUIZ_ROUND_FINISHED: &str = "quiz.round_finished";
pub const QUIZ_FINISHED: &str = "quiz.finished";
pub const QUIZ_TIMED_OUT: &str = "quiz.timed_out";

pub const TOD_STARTED: &str = "tod.started";
pub const TOD_YOUR_TURN: &str = "tod.your_turn";
pub const TOD_CHALLENGE: &str = "tod.challenge";
pub const TOD_PROOF: &str = "tod.proof";
pub const TOD_JUDGED: &str = "tod.judged";
pub const TOD_ITEM_USED: &str = "tod.item_used";
pub const TOD_WARNING: &str = "tod.warning";
pub const TOD_ENDED: &str = "tod.ended";
pub const TOD_JUDGE_WARNING: &str = "tod.judge_warning";

pub const GROUP_STARTED: &str = "group.started";
pub const GROUP_TURN: &str = "group.turn";
pub const GROUP_PROMPT: &str = "group.prompt";
pub const GROUP_TURN_CONFIRMED: &str = "group.turn_confirmed";
pub const GROUP_FINISHED: &str = "group.finished";

/// Error surfaced to the acting user.
pub const ERROR: &str = "error";
