//! Pure truth-or-dare turn engine operating on [`TodGameEntity`], plus the judge fairness
//! heuristics.

use std::time::SystemTime;

use thiserror::Error;
use uuid::Uuid;

use crate::{
    config::TodConfig,
    dao::models::{
        EndReason, ItemKind, JudgmentResult, PairingEntity, ProofKind, TodGameEntity, TodState,
        TodTurnEntity, UserId,
    },
};

/// How many recent verdicts the unfairness check looks at.
pub const UNFAIR_WINDOW: usize = 10;
/// How many recent verdicts feed the judge score.
pub const SCORE_WINDOW: usize = 20;

/// Reasons a truth-or-dare event is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TodError {
    /// The acting user does not belong to the game.
    #[error("user {0} is not part of this game")]
    NotParticipant(UserId),
    /// The acting user is not the one the game waits for.
    #[error("user {user} cannot act while the game is {state:?}")]
    NotYourTurn { user: UserId, state: TodState },
    /// The game is not in the state the event requires.
    #[error("game is {actual:?}, expected {expected:?}")]
    WrongState { expected: TodState, actual: TodState },
    /// Proof media does not match what the challenge asks for.
    #[error("challenge expects {expected:?} proof, got {actual:?}")]
    ProofMismatch { expected: ProofKind, actual: ProofKind },
}

/// Result of a completed turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnEnd {
    /// Roles swapped, a new turn awaits its choice.
    Next { active: UserId, round: u32 },
    /// `max_rounds` reached.
    GameOver,
}

/// Effect of an item on the current turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemEffect {
    /// Turn skipped; the opponent now chooses.
    Skipped { active: UserId },
    /// Same player chooses again with a fresh deadline.
    Redraw,
    /// The opponent performs this turn instead.
    Mirrored { active: UserId },
}

/// Game ended by a deadline expiring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expiry {
    /// Player who let the deadline pass.
    pub loser: UserId,
    pub winner: UserId,
    /// The expired phase was the judge's, so a timed-out verdict must be logged.
    pub judgment_pending: bool,
}

/// Fresh game in `Matchmaking`, before the coin flip.
pub fn new_game(pairing: &PairingEntity, cfg: &TodConfig, now: SystemTime) -> TodGameEntity {
    TodGameEntity {
        id: Uuid::new_v4(),
        pairing_id: pairing.id,
        user_a: pairing.user_a,
        user_b: pairing.user_b,
        state: TodState::Matchmaking,
        current_round: 0,
        max_rounds: cfg.max_rounds,
        turn_number: 0,
        active_player: pairing.user_a,
        passive_player: pairing.user_b,
        turn_deadline: None,
        warning_shown_at: None,
        winner: None,
        end_reason: None,
        version: 0,
        created_at: now,
        updated_at: now,
        ended_at: None,
    }
}

/// Empty turn record for the game's current turn.
pub fn open_turn(game: &TodGameEntity, now: SystemTime) -> TodTurnEntity {
    TodTurnEntity {
        game_id: game.id,
        turn_number: game.turn_number,
        round: game.current_round,
        active_player: game.active_player,
        passive_player: game.passive_player,
        choice: None,
        category: None,
        challenge: None,
        proof: None,
        judgment: None,
        item_used: None,
        coins_awarded: 0,
        xp_awarded: 0,
        completed: false,
        started_at: now,
    }
}

/// Accepted turns per player: `(user_a, user_b)`.
pub fn accepted_counts(game: &TodGameEntity, turns: &[TodTurnEntity]) -> (u32, u32) {
    turns
        .iter()
        .filter(|turn| turn.judgment == Some(JudgmentResult::Accepted))
        .fold((0, 0), |(a, b), turn| {
            if turn.active_player == game.user_a {
                (a + 1, b)
            } else {
                (a, b + 1)
            }
        })
}

/// Whether the latest verdicts of a judge look abusive.
///
/// `recent` is newest first. Timed-out verdicts are not decisions and are skipped.
pub fn is_unfair(recent: &[JudgmentResult]) -> bool {
    let decisions: Vec<_> = recent
        .iter()
        .filter(|result| **result != JudgmentResult::TimedOut)
        .take(UNFAIR_WINDOW)
        .collect();
    let rejected = decisions
        .iter()
        .filter(|result| ***result == JudgmentResult::Rejected)
        .count();
    let latest_five_rejected = decisions.len() >= 5
        && decisions
            .iter()
            .take(5)
            .all(|result| **result == JudgmentResult::Rejected);

    rejected >= 8 || latest_five_rejected
}

/// Judge fairness score in `[0, 100]` from the acceptance rate of recent decisions.
pub fn judge_score(recent: &[JudgmentResult]) -> f64 {
    let decisions: Vec<_> = recent
        .iter()
        .filter(|result| **result != JudgmentResult::TimedOut)
        .take(SCORE_WINDOW)
        .collect();
    if decisions.len() < 5 {
        return 100.0;
    }

    let accepted = decisions
        .iter()
        .filter(|result| ***result == JudgmentResult::Accepted)
        .count();
    let rate = accepted as f64 / decisions.len() as f64;

    if rate < 0.3 {
        20.0
    } else if rate < 0.5 {
        50.0
    } else if (0.7..=0.9).contains(&rate) {
        100.0
    } else if rate > 0.9 {
        80.0
    } else {
        70.0
    }
}

impl TodGameEntity {
    /// Whether `user` is one of the two players.
    pub fn is_participant(&self, user: UserId) -> bool {
        self.user_a == user || self.user_b == user
    }

    /// The other player, or `None` for outsiders.
    pub fn opponent_of(&self, user: UserId) -> Option<UserId> {
        if user == self.user_a {
            Some(self.user_b)
        } else if user == self.user_b {
            Some(self.user_a)
        } else {
            None
        }
    }

    /// Player the current state waits for.
    pub fn awaited_player(&self) -> Option<UserId> {
        match self.state {
            TodState::WaitingChoice | TodState::WaitingProof => Some(self.active_player),
            TodState::WaitingJudgment => Some(self.passive_player),
            _ => None,
        }
    }

    fn expect(&self, expected: TodState, actor: UserId, user: UserId) -> Result<(), TodError> {
        if !self.is_participant(user) {
            return Err(TodError::NotParticipant(user));
        }
        if self.state != expected {
            return Err(TodError::WrongState {
                expected,
                actual: self.state,
            });
        }
        if actor != user {
            return Err(TodError::NotYourTurn {
                user,
                state: self.state,
            });
        }
        Ok(())
    }

    fn reset_deadline(&mut self, cfg: &TodConfig, now: SystemTime) {
        self.turn_deadline = Some(now + cfg.turn_timeout);
        self.warning_shown_at = None;
        self.updated_at = now;
    }

    fn swap_roles(&mut self) {
        std::mem::swap(&mut self.active_player, &mut self.passive_player);
    }

    /// Run the coin flip and open the first turn with `first` as active player.
    pub fn begin(&mut self, first: UserId, cfg: &TodConfig, now: SystemTime) -> Result<(), TodError> {
        if self.state != TodState::Matchmaking {
            return Err(TodError::WrongState {
                expected: TodState::Matchmaking,
                actual: self.state,
            });
        }
        let Some(second) = self.opponent_of(first) else {
            return Err(TodError::NotParticipant(first));
        };

        self.state = TodState::CoinFlip;
        self.active_player = first;
        self.passive_player = second;
        self.current_round = 1;
        self.turn_number = 1;
        self.state = TodState::WaitingChoice;
        self.reset_deadline(cfg, now);
        Ok(())
    }

    /// The active player picked truth or dare; a challenge is now bound to the turn.
    pub fn submit_choice(&mut self, user: UserId, cfg: &TodConfig, now: SystemTime) -> Result<(), TodError> {
        self.expect(TodState::WaitingChoice, self.active_player, user)?;
        self.state = TodState::WaitingProof;
        self.reset_deadline(cfg, now);
        Ok(())
    }

    /// Check proof media against the challenge. Nothing changes on mismatch.
    pub fn submit_proof(
        &mut self,
        user: UserId,
        expected: ProofKind,
        actual: ProofKind,
        cfg: &TodConfig,
        now: SystemTime,
    ) -> Result<(), TodError> {
        self.expect(TodState::WaitingProof, self.active_player, user)?;
        if expected != ProofKind::None && expected != actual {
            return Err(TodError::ProofMismatch { expected, actual });
        }
        self.state = TodState::WaitingJudgment;
        self.reset_deadline(cfg, now);
        Ok(())
    }

    /// The passive player judged the proof; the turn completes.
    pub fn judge(&mut self, user: UserId, cfg: &TodConfig, now: SystemTime) -> Result<TurnEnd, TodError> {
        self.expect(TodState::WaitingJudgment, self.passive_player, user)?;
        Ok(self.complete_turn(cfg, now))
    }

    fn complete_turn(&mut self, cfg: &TodConfig, now: SystemTime) -> TurnEnd {
        if self.max_rounds != 0 && self.current_round >= self.max_rounds {
            self.state = TodState::GameEnd;
            self.end_reason = Some(EndReason::Completed);
            self.turn_deadline = None;
            self.ended_at = Some(now);
            self.updated_at = now;
            return TurnEnd::GameOver;
        }

        self.current_round += 1;
        self.turn_number += 1;
        self.swap_roles();
        self.state = TodState::WaitingChoice;
        self.reset_deadline(cfg, now);
        TurnEnd::Next {
            active: self.active_player,
            round: self.current_round,
        }
    }

    /// Apply an item during the choice phase.
    pub fn use_item(
        &mut self,
        user: UserId,
        item: ItemKind,
        cfg: &TodConfig,
        now: SystemTime,
    ) -> Result<ItemEffect, TodError> {
        self.expect(TodState::WaitingChoice, self.active_player, user)?;
        let effect = match item {
            ItemKind::Shield => {
                self.swap_roles();
                self.turn_number += 1;
                ItemEffect::Skipped {
                    active: self.active_player,
                }
            }
            ItemKind::Swap => ItemEffect::Redraw,
            ItemKind::Mirror => {
                self.swap_roles();
                ItemEffect::Mirrored {
                    active: self.active_player,
                }
            }
        };
        self.reset_deadline(cfg, now);
        Ok(effect)
    }

    /// Whether the one-time deadline warning is due.
    pub fn warning_due(&self, cfg: &TodConfig, now: SystemTime) -> bool {
        if !self.state.awaits_player() || self.warning_shown_at.is_some() {
            return false;
        }
        self.turn_deadline
            .and_then(|deadline| deadline.checked_sub(cfg.warning_lead))
            .is_some_and(|warn_at| warn_at <= now)
    }

    /// Record that the warning for the current deadline went out.
    pub fn mark_warned(&mut self, now: SystemTime) {
        self.warning_shown_at = Some(now);
        self.updated_at = now;
    }

    /// Forfeit the awaited player once the deadline passed.
    pub fn expire(&mut self, now: SystemTime) -> Option<Expiry> {
        let loser = self.awaited_player()?;
        if !self.turn_deadline.is_some_and(|deadline| deadline <= now) {
            return None;
        }
        let winner = self.opponent_of(loser)?;
        let judgment_pending = self.state == TodState::WaitingJudgment;

        self.finish(TodState::Forfeit, EndReason::Afk, Some(winner), now);
        Some(Expiry {
            loser,
            winner,
            judgment_pending,
        })
    }

    /// `user` leaves the game; the opponent wins.
    pub fn quit(&mut self, user: UserId, now: SystemTime) -> Result<UserId, TodError> {
        let Some(winner) = self.opponent_of(user) else {
            return Err(TodError::NotParticipant(user));
        };
        if self.state.is_terminal() {
            return Err(TodError::WrongState {
                expected: TodState::WaitingChoice,
                actual: self.state,
            });
        }
        self.finish(TodState::Forfeit, EndReason::Quit, Some(winner), now);
        Ok(winner)
    }

    /// End without a winner because the owning pairing closed.
    pub fn abandon(&mut self, now: SystemTime) -> Result<(), TodError> {
        if self.state.is_terminal() {
            return Err(TodError::WrongState {
                expected: TodState::WaitingChoice,
                actual: self.state,
            });
        }
        self.finish(TodState::Forfeit, EndReason::Forfeit, None, now);
        Ok(())
    }

    /// Record the winner of a completed game.
    pub fn settle(&mut self, winner: Option<UserId>) {
        self.winner = winner;
    }

    fn finish(&mut self, state: TodState, reason: EndReason, winner: Option<UserId>, now: SystemTime) {
        self.state = state;
        self.end_reason = Some(reason);
        self.winner = winner;
        self.turn_deadline = None;
        self.ended_at = Some(now);
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::dao::models::{GameType, PairingStatus};

    const A: UserId = 1;
    const B: UserId = 2;

    fn started(cfg: &TodConfig, now: SystemTime) -> TodGameEntity {
        let pairing = PairingEntity {
            id: Uuid::new_v4(),
            user_a: A,
            user_b: B,
            game_type: GameType::TruthOrDare,
            status: PairingStatus::Active,
            started_at: now,
            timeout_at: now + Duration::from_secs(300),
            ended_at: None,
            ended_by: None,
        };
        let mut game = new_game(&pairing, cfg, now);
        game.begin(A, cfg, now).unwrap();
        game
    }

    fn play_turn(game: &mut TodGameEntity, cfg: &TodConfig, now: SystemTime) -> TurnEnd {
        let active = game.active_player;
        let passive = game.passive_player;
        game.submit_choice(active, cfg, now).unwrap();
        game.submit_proof(active, ProofKind::Text, ProofKind::Text, cfg, now)
            .unwrap();
        game.judge(passive, cfg, now).unwrap()
    }

    #[test]
    fn turns_alternate_until_max_rounds() {
        let cfg = TodConfig {
            max_rounds: 3,
            ..TodConfig::default()
        };
        let now = SystemTime::now();
        let mut game = started(&cfg, now);

        assert_eq!(play_turn(&mut game, &cfg, now), TurnEnd::Next { active: B, round: 2 });
        assert_eq!(play_turn(&mut game, &cfg, now), TurnEnd::Next { active: A, round: 3 });
        assert_eq!(play_turn(&mut game, &cfg, now), TurnEnd::GameOver);
        assert_eq!(game.state, TodState::GameEnd);
        assert_eq!(game.end_reason, Some(EndReason::Completed));
    }

    #[test]
    fn zero_max_rounds_never_completes() {
        let cfg = TodConfig {
            max_rounds: 0,
            ..TodConfig::default()
        };
        let now = SystemTime::now();
        let mut game = started(&cfg, now);
        for _ in 0..25 {
            assert!(matches!(play_turn(&mut game, &cfg, now), TurnEnd::Next { .. }));
        }
    }

    #[test]
    fn mismatched_proof_keeps_the_turn() {
        let cfg = TodConfig::default();
        let now = SystemTime::now();
        let mut game = started(&cfg, now);
        game.submit_choice(A, &cfg, now).unwrap();

        let err = game
            .submit_proof(A, ProofKind::Video, ProofKind::Text, &cfg, now)
            .unwrap_err();
        assert_eq!(
            err,
            TodError::ProofMismatch {
                expected: ProofKind::Video,
                actual: ProofKind::Text
            }
        );
        assert_eq!(game.state, TodState::WaitingProof);

        game.submit_proof(A, ProofKind::None, ProofKind::Image, &cfg, now)
            .unwrap();
        assert_eq!(game.state, TodState::WaitingJudgment);
    }

    #[test]
    fn only_the_passive_player_judges() {
        let cfg = TodConfig::default();
        let now = SystemTime::now();
        let mut game = started(&cfg, now);
        game.submit_choice(A, &cfg, now).unwrap();
        game.submit_proof(A, ProofKind::Text, ProofKind::Text, &cfg, now)
            .unwrap();

        assert!(matches!(
            game.judge(A, &cfg, now),
            Err(TodError::NotYourTurn { user: A, .. })
        ));
    }

    #[test]
    fn expired_judgment_forfeits_to_the_active_player() {
        let cfg = TodConfig::default();
        let now = SystemTime::now();
        let mut game = started(&cfg, now);
        game.submit_choice(A, &cfg, now).unwrap();
        game.submit_proof(A, ProofKind::Text, ProofKind::Text, &cfg, now)
            .unwrap();

        assert!(game.expire(now + Duration::from_secs(59)).is_none());
        let expiry = game.expire(now + Duration::from_secs(60)).unwrap();
        assert_eq!(
            expiry,
            Expiry {
                loser: B,
                winner: A,
                judgment_pending: true
            }
        );
        assert_eq!(game.state, TodState::Forfeit);
        assert_eq!(game.end_reason, Some(EndReason::Afk));
        assert_eq!(game.winner, Some(A));
    }

    #[test]
    fn warning_fires_once_inside_the_lead_window() {
        let cfg = TodConfig::default();
        let now = SystemTime::now();
        let mut game = started(&cfg, now);

        assert!(!game.warning_due(&cfg, now + Duration::from_secs(29)));
        assert!(game.warning_due(&cfg, now + Duration::from_secs(30)));
        game.mark_warned(now + Duration::from_secs(30));
        assert!(!game.warning_due(&cfg, now + Duration::from_secs(45)));
    }

    #[test]
    fn items_reshape_the_turn() {
        let cfg = TodConfig::default();
        let now = SystemTime::now();
        let mut game = started(&cfg, now);

        assert_eq!(
            game.use_item(A, ItemKind::Swap, &cfg, now).unwrap(),
            ItemEffect::Redraw
        );
        assert_eq!(game.active_player, A);

        assert_eq!(
            game.use_item(A, ItemKind::Mirror, &cfg, now).unwrap(),
            ItemEffect::Mirrored { active: B }
        );
        assert_eq!(game.turn_number, 1);

        assert_eq!(
            game.use_item(B, ItemKind::Shield, &cfg, now).unwrap(),
            ItemEffect::Skipped { active: A }
        );
        assert_eq!(game.turn_number, 2);
        assert_eq!(game.current_round, 1);
    }

    #[test]
    fn quit_hands_the_win_to_the_opponent() {
        let cfg = TodConfig::default();
        let now = SystemTime::now();
        let mut game = started(&cfg, now);
        assert_eq!(game.quit(B, now).unwrap(), A);
        assert_eq!(game.end_reason, Some(EndReason::Quit));
        assert!(game.quit(A, now).is_err());
    }

    #[test]
    fn unfair_when_five_latest_are_rejections() {
        use JudgmentResult::{Accepted, Rejected};
        let mut recent = vec![Rejected; 5];
        recent.extend([Accepted; 5]);
        assert!(is_unfair(&recent));

        let mixed = vec![Rejected, Accepted, Rejected, Rejected, Rejected, Rejected];
        assert!(!is_unfair(&mixed));

        let mut mostly_rejected = vec![Accepted];
        mostly_rejected.extend([Rejected; 8]);
        mostly_rejected.push(Accepted);
        assert!(is_unfair(&mostly_rejected));
    }

    #[test]
    fn judge_score_buckets() {
        use JudgmentResult::{Accepted, Rejected};
        assert_eq!(judge_score(&[Rejected; 4]), 100.0);
        assert_eq!(judge_score(&[Rejected; 10]), 20.0);

        let mut balanced = vec![Accepted; 4];
        balanced.extend([Rejected; 6]);
        assert_eq!(judge_score(&balanced), 50.0);

        let mut fair = vec![Accepted; 8];
        fair.extend([Rejected; 2]);
        assert_eq!(judge_score(&fair), 100.0);

        assert_eq!(judge_score(&[Accepted; 10]), 80.0);

        let mut lenient = vec![Accepted; 6];
        lenient.extend([Rejected; 4]);
        assert_eq!(judge_score(&lenient), 70.0);
    }
}
