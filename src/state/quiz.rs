//! Pure 1v1 quiz state machine operating on [`QuizSessionEntity`].
//!
//! Every transition takes `now` explicitly; persistence, timers and payouts live in the
//! quiz service.

use std::{cmp::Ordering, time::SystemTime};

use thiserror::Error;
use uuid::Uuid;

use crate::{
    config::QuizConfig,
    dao::models::{
        PairingEntity, QuizAnswerEntity, QuizScore, QuizSessionEntity, QuizState, RoundResult,
        UserId,
    },
};

/// Reasons a quiz event is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuizError {
    /// The acting user does not belong to the session.
    #[error("user {0} is not part of this quiz")]
    NotParticipant(UserId),
    /// Someone other than the round's chooser picked a category.
    #[error("user {user} does not choose the category of round {round}")]
    NotChooser { user: UserId, round: u8 },
    /// Answer index outside the question's options.
    #[error("choice {choice} is out of range")]
    InvalidChoice { choice: u8 },
    /// The session is not in the state the event requires.
    #[error("quiz is {actual:?}, expected {expected:?}")]
    WrongState {
        expected: QuizState,
        actual: QuizState,
    },
    /// The question was already closed.
    #[error("question {question} of round {round} is no longer open")]
    StaleQuestion { round: u8, question: u8 },
}

/// What happened once the current question closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuizStep {
    /// The next question of the same round is open.
    NextQuestion { question: u8 },
    /// The last question of the round closed.
    RoundFinished { round: u8 },
}

/// What happened once a finished round was left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundAdvance {
    /// A new round awaits its category.
    NextRound { round: u8, chooser: UserId },
    /// All rounds are played.
    Finished(QuizOutcome),
}

/// Final standing; `winner` is `None` on a full tie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuizOutcome {
    /// Player ranked first by correct answers, then by total answer time.
    pub winner: Option<UserId>,
    /// The other participant when there is a winner.
    pub loser: Option<UserId>,
}

impl QuizOutcome {
    /// Both players tied on correct answers and time.
    pub fn is_draw(&self) -> bool {
        self.winner.is_none()
    }
}

/// Fresh session for `pairing`, waiting for user A to pick the first category.
pub fn new_session(pairing: &PairingEntity, cfg: &QuizConfig, now: SystemTime) -> QuizSessionEntity {
    QuizSessionEntity {
        id: Uuid::new_v4(),
        pairing_id: pairing.id,
        user_a: pairing.user_a,
        user_b: pairing.user_b,
        state: QuizState::WaitingCategory,
        rounds_total: cfg.rounds.max(1),
        questions_per_round: cfg.questions_per_round.max(1),
        current_round: 1,
        current_question: 0,
        score_a: QuizScore::default(),
        score_b: QuizScore::default(),
        category_deadline: Some(now + cfg.category_timeout),
        question_started_at: None,
        question_deadline: None,
        winner: None,
        version: 0,
        created_at: now,
        updated_at: now,
    }
}

/// Order two scores: more correct answers first, then less elapsed time.
/// `Greater` means `a` ranks above `b`.
pub fn rank(a: QuizScore, b: QuizScore) -> Ordering {
    a.correct
        .cmp(&b.correct)
        .then_with(|| b.time_ms.cmp(&a.time_ms))
}

/// Per-round totals computed from the recorded answers.
pub fn round_result(answers: &[QuizAnswerEntity], user_a: UserId, user_b: UserId) -> RoundResult {
    let total = |user: UserId| {
        answers
            .iter()
            .filter(|answer| answer.user_id == user)
            .fold(QuizScore::default(), |mut score, answer| {
                score.correct += u32::from(answer.correct);
                score.time_ms += answer.elapsed_ms;
                score
            })
    };
    let score_a = total(user_a);
    let score_b = total(user_b);
    let winner = match rank(score_a, score_b) {
        Ordering::Greater => Some(user_a),
        Ordering::Less => Some(user_b),
        Ordering::Equal => None,
    };

    RoundResult {
        score_a,
        score_b,
        winner,
    }
}

/// Participants that have not answered `question` yet.
pub fn missing_answers(
    answers: &[QuizAnswerEntity],
    participants: [UserId; 2],
    question: u8,
) -> Vec<UserId> {
    participants
        .into_iter()
        .filter(|user| {
            !answers
                .iter()
                .any(|answer| answer.user_id == *user && answer.question_number == question)
        })
        .collect()
}

impl QuizSessionEntity {
    /// Whether `user` is one of the two players.
    pub fn is_participant(&self, user: UserId) -> bool {
        self.user_a == user || self.user_b == user
    }

    pub fn participants(&self) -> [UserId; 2] {
        [self.user_a, self.user_b]
    }

    /// User A chooses odd rounds, user B even ones.
    pub fn chooser(&self) -> UserId {
        if self.current_round % 2 == 1 {
            self.user_a
        } else {
            self.user_b
        }
    }

    fn expect_state(&self, expected: QuizState) -> Result<(), QuizError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(QuizError::WrongState {
                expected,
                actual: self.state,
            })
        }
    }

    fn open_question(&mut self, question: u8, cfg: &QuizConfig, now: SystemTime) {
        self.current_question = question;
        self.question_started_at = Some(now);
        self.question_deadline = Some(now + cfg.question_timeout);
        self.updated_at = now;
    }

    /// The chooser picked a category; the first question of the round opens.
    pub fn choose_category(
        &mut self,
        user: UserId,
        cfg: &QuizConfig,
        now: SystemTime,
    ) -> Result<(), QuizError> {
        self.expect_state(QuizState::WaitingCategory)?;
        if !self.is_participant(user) {
            return Err(QuizError::NotParticipant(user));
        }
        if user != self.chooser() {
            return Err(QuizError::NotChooser {
                user,
                round: self.current_round,
            });
        }

        self.state = QuizState::PlayingRound;
        self.category_deadline = None;
        self.open_question(1, cfg, now);
        Ok(())
    }

    /// Check that `user` may answer `question` of `round` right now.
    pub fn accept_answer(&self, user: UserId, round: u8, question: u8) -> Result<(), QuizError> {
        if !self.is_participant(user) {
            return Err(QuizError::NotParticipant(user));
        }
        self.expect_state(QuizState::PlayingRound)?;
        if round != self.current_round || question != self.current_question {
            return Err(QuizError::StaleQuestion { round, question });
        }
        Ok(())
    }

    /// Milliseconds since the current question opened, capped at the question deadline.
    pub fn elapsed_ms(&self, cfg: &QuizConfig, now: SystemTime) -> i64 {
        let elapsed = self
            .question_started_at
            .and_then(|started| now.duration_since(started).ok())
            .unwrap_or_default()
            .min(cfg.question_timeout);
        i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
    }

    /// Add an answer to the running totals of `user`.
    pub fn add_score(&mut self, user: UserId, correct: bool, elapsed_ms: i64, now: SystemTime) {
        let score = if user == self.user_a {
            &mut self.score_a
        } else {
            &mut self.score_b
        };
        score.correct += u32::from(correct);
        score.time_ms += elapsed_ms;
        self.updated_at = now;
    }

    /// Close the current question once both answers are in.
    pub fn advance_question(
        &mut self,
        cfg: &QuizConfig,
        now: SystemTime,
    ) -> Result<QuizStep, QuizError> {
        self.expect_state(QuizState::PlayingRound)?;
        if self.current_question < self.questions_per_round {
            let question = self.current_question + 1;
            self.open_question(question, cfg, now);
            return Ok(QuizStep::NextQuestion { question });
        }

        self.state = QuizState::RoundFinished;
        self.question_started_at = None;
        self.question_deadline = None;
        self.updated_at = now;
        Ok(QuizStep::RoundFinished {
            round: self.current_round,
        })
    }

    /// Leave a finished round: either prompt the next chooser or finish the game.
    pub fn start_next_round(
        &mut self,
        cfg: &QuizConfig,
        now: SystemTime,
    ) -> Result<RoundAdvance, QuizError> {
        self.expect_state(QuizState::RoundFinished)?;
        self.updated_at = now;

        if self.current_round < self.rounds_total {
            self.current_round += 1;
            self.current_question = 0;
            self.state = QuizState::WaitingCategory;
            self.category_deadline = Some(now + cfg.category_timeout);
            return Ok(RoundAdvance::NextRound {
                round: self.current_round,
                chooser: self.chooser(),
            });
        }

        let outcome = self.outcome();
        self.state = QuizState::Finished;
        self.winner = outcome.winner;
        Ok(RoundAdvance::Finished(outcome))
    }

    /// Abandon the session. Used for the category deadline, inactivity and owner cascade.
    pub fn time_out(&mut self, now: SystemTime) -> Result<(), QuizError> {
        if self.state.is_terminal() {
            return Err(QuizError::WrongState {
                expected: QuizState::WaitingCategory,
                actual: self.state,
            });
        }
        self.state = QuizState::TimedOut;
        self.category_deadline = None;
        self.question_started_at = None;
        self.question_deadline = None;
        self.updated_at = now;
        Ok(())
    }

    /// Compare the running totals of both players.
    pub fn outcome(&self) -> QuizOutcome {
        match rank(self.score_a, self.score_b) {
            Ordering::Greater => QuizOutcome {
                winner: Some(self.user_a),
                loser: Some(self.user_b),
            },
            Ordering::Less => QuizOutcome {
                winner: Some(self.user_b),
                loser: Some(self.user_a),
            },
            Ordering::Equal => QuizOutcome {
                winner: None,
                loser: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::dao::models::{GameType, PairingStatus};

    const A: UserId = 10;
    const B: UserId = 20;

    fn pairing() -> PairingEntity {
        let now = SystemTime::now();
        PairingEntity {
            id: Uuid::new_v4(),
            user_a: A,
            user_b: B,
            game_type: GameType::Quiz,
            status: PairingStatus::Active,
            started_at: now,
            timeout_at: now + Duration::from_secs(300),
            ended_at: None,
            ended_by: None,
        }
    }

    fn answer(user: UserId, question: u8, correct: bool, elapsed_ms: i64) -> QuizAnswerEntity {
        QuizAnswerEntity {
            session_id: Uuid::nil(),
            round_number: 1,
            user_id: user,
            question_number: question,
            choice: Some(0),
            correct,
            elapsed_ms,
            auto_filled: false,
            answered_at: SystemTime::now(),
        }
    }

    #[test]
    fn chooser_alternates_between_rounds() {
        let cfg = QuizConfig::default();
        let mut now = SystemTime::now();
        let mut session = new_session(&pairing(), &cfg, now);
        let mut choosers = Vec::new();

        loop {
            choosers.push(session.chooser());
            session.choose_category(session.chooser(), &cfg, now).unwrap();
            while let QuizStep::NextQuestion { .. } = session.advance_question(&cfg, now).unwrap() {}
            now += Duration::from_secs(1);
            if let RoundAdvance::Finished(_) = session.start_next_round(&cfg, now).unwrap() {
                break;
            }
        }

        assert_eq!(choosers, vec![A, B, A, B]);
        assert_eq!(session.state, QuizState::Finished);
    }

    #[test]
    fn only_the_chooser_picks_the_category() {
        let cfg = QuizConfig::default();
        let mut session = new_session(&pairing(), &cfg, SystemTime::now());

        let err = session.choose_category(B, &cfg, SystemTime::now()).unwrap_err();
        assert_eq!(err, QuizError::NotChooser { user: B, round: 1 });
        assert_eq!(
            session.choose_category(99, &cfg, SystemTime::now()).unwrap_err(),
            QuizError::NotParticipant(99)
        );
    }

    #[test]
    fn answers_for_closed_questions_are_stale() {
        let cfg = QuizConfig::default();
        let now = SystemTime::now();
        let mut session = new_session(&pairing(), &cfg, now);
        session.choose_category(A, &cfg, now).unwrap();
        session.advance_question(&cfg, now).unwrap();

        assert_eq!(
            session.accept_answer(A, 1, 1).unwrap_err(),
            QuizError::StaleQuestion {
                round: 1,
                question: 1
            }
        );
        assert!(session.accept_answer(A, 1, 2).is_ok());
    }

    #[test]
    fn elapsed_is_capped_by_the_question_deadline() {
        let cfg = QuizConfig::default();
        let now = SystemTime::now();
        let mut session = new_session(&pairing(), &cfg, now);
        session.choose_category(A, &cfg, now).unwrap();

        assert_eq!(session.elapsed_ms(&cfg, now + Duration::from_millis(1500)), 1500);
        assert_eq!(session.elapsed_ms(&cfg, now + Duration::from_secs(90)), 25_000);
    }

    #[test]
    fn equal_correct_count_is_broken_by_time() {
        let answers = vec![
            answer(A, 1, true, 4000),
            answer(B, 1, true, 3000),
            answer(A, 2, false, 1000),
            answer(B, 2, false, 1000),
        ];
        let result = round_result(&answers, A, B);
        assert_eq!(result.winner, Some(B));
        assert_eq!(result.score_a.correct, 1);
        assert_eq!(result.score_b.time_ms, 4000);
    }

    #[test]
    fn all_correct_with_identical_times_is_a_draw() {
        let cfg = QuizConfig::default();
        let mut now = SystemTime::now();
        let mut session = new_session(&pairing(), &cfg, now);

        let outcome = loop {
            session.choose_category(session.chooser(), &cfg, now).unwrap();
            loop {
                now += Duration::from_millis(1200);
                let elapsed = session.elapsed_ms(&cfg, now);
                session.add_score(A, true, elapsed, now);
                session.add_score(B, true, elapsed, now);
                if let QuizStep::RoundFinished { .. } = session.advance_question(&cfg, now).unwrap() {
                    break;
                }
            }
            if let RoundAdvance::Finished(outcome) = session.start_next_round(&cfg, now).unwrap() {
                break outcome;
            }
        };

        assert!(outcome.is_draw());
        assert_eq!(session.state, QuizState::Finished);
        assert_eq!(session.score_a, session.score_b);
        assert_eq!(session.score_a.correct, 16);
        assert_eq!(session.winner, None);
    }

    #[test]
    fn missing_answers_lists_silent_players() {
        let answers = vec![answer(A, 3, true, 100)];
        assert_eq!(missing_answers(&answers, [A, B], 3), vec![B]);
        assert_eq!(missing_answers(&answers, [A, B], 4), vec![A, B]);
    }

    #[test]
    fn terminal_session_cannot_time_out_again() {
        let cfg = QuizConfig::default();
        let now = SystemTime::now();
        let mut session = new_session(&pairing(), &cfg, now);
        session.time_out(now).unwrap();
        assert_eq!(session.state, QuizState::TimedOut);
        assert!(session.time_out(now).is_err());
    }
}
