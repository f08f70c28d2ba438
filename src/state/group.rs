//! Turn rotation of room-wide group games.
//!
//! Participants are never removed: members who left the room stay in the session with their
//! score and are skipped by the rotation.

use std::time::SystemTime;

use thiserror::Error;
use uuid::Uuid;

use crate::dao::models::{
    GroupGameType, GroupPrompt, GroupSessionEntity, GroupStatus, Participant, RoomId, UserId,
};

/// Reasons a group game event is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GroupError {
    /// A host-only control was used by someone else.
    #[error("user {0} is not the room host")]
    NotHost(UserId),
    /// Only the turn user may submit a choice.
    #[error("user {user} acted out of turn, waiting for {expected:?}")]
    NotTurnUser {
        user: UserId,
        expected: Option<UserId>,
    },
    /// Too few room members to start.
    #[error("{have} players present, {need} required")]
    NotEnoughPlayers { have: usize, need: usize },
    /// The session is not in the status the event requires.
    #[error("session is {actual:?}, expected {expected:?}")]
    WrongStatus {
        expected: GroupStatus,
        actual: GroupStatus,
    },
}

/// Where the turn went after a rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Next(UserId),
    /// Nobody is left in the room.
    Finished,
}

/// New session over the current room members, in their room order.
pub fn start(
    room_id: RoomId,
    game_type: GroupGameType,
    members: &[UserId],
    min_players: usize,
    now: SystemTime,
) -> Result<GroupSessionEntity, GroupError> {
    if members.len() < min_players.max(1) {
        return Err(GroupError::NotEnoughPlayers {
            have: members.len(),
            need: min_players.max(1),
        });
    }

    let participants = members
        .iter()
        .zip(0u32..)
        .map(|(user_id, turn_order)| Participant {
            user_id: *user_id,
            turn_order,
            score: 0,
        })
        .collect();

    Ok(GroupSessionEntity {
        id: Uuid::new_v4(),
        room_id,
        game_type,
        status: GroupStatus::WaitingForChoice,
        turn_user: members.first().copied(),
        participants,
        prompt: None,
        version: 0,
        created_at: now,
        updated_at: now,
        ended_at: None,
    })
}

impl GroupSessionEntity {
    fn expect_status(&self, expected: GroupStatus) -> Result<(), GroupError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(GroupError::WrongStatus {
                expected,
                actual: self.status,
            })
        }
    }

    fn ensure_open(&self) -> Result<(), GroupError> {
        if self.status == GroupStatus::Finished {
            return Err(GroupError::WrongStatus {
                expected: GroupStatus::InProgress,
                actual: self.status,
            });
        }
        Ok(())
    }

    pub fn participant(&self, user: UserId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user)
    }

    /// The turn user picked a prompt; the host must now confirm.
    pub fn submit_choice(
        &mut self,
        user: UserId,
        prompt: GroupPrompt,
        now: SystemTime,
    ) -> Result<(), GroupError> {
        self.expect_status(GroupStatus::WaitingForChoice)?;
        if self.turn_user != Some(user) {
            return Err(GroupError::NotTurnUser {
                user,
                expected: self.turn_user,
            });
        }
        self.prompt = Some(prompt);
        self.status = GroupStatus::WaitingForHost;
        self.updated_at = now;
        Ok(())
    }

    /// Host confirmed the turn. Returns the rewarded user and where the turn went.
    pub fn confirm_turn(
        &mut self,
        present: &[UserId],
        now: SystemTime,
    ) -> Result<(UserId, Rotation), GroupError> {
        self.expect_status(GroupStatus::WaitingForHost)?;
        let Some(rewarded) = self.turn_user else {
            return Err(GroupError::WrongStatus {
                expected: GroupStatus::WaitingForHost,
                actual: GroupStatus::InProgress,
            });
        };
        if let Some(participant) = self.participants.iter_mut().find(|p| p.user_id == rewarded) {
            participant.score += 1;
        }
        Ok((rewarded, self.rotate(present, now)))
    }

    /// Host skipped the current turn without reward.
    pub fn force_advance(&mut self, present: &[UserId], now: SystemTime) -> Result<Rotation, GroupError> {
        self.ensure_open()?;
        Ok(self.rotate(present, now))
    }

    pub fn end(&mut self, now: SystemTime) -> Result<(), GroupError> {
        self.ensure_open()?;
        self.finish(now);
        Ok(())
    }

    /// Hand the turn to the next participant still in the room, wrapping around. The current
    /// turn user is considered last.
    pub fn rotate(&mut self, present: &[UserId], now: SystemTime) -> Rotation {
        let mut order: Vec<&Participant> = self.participants.iter().collect();
        order.sort_by_key(|p| p.turn_order);

        let start = self
            .turn_user
            .and_then(|current| order.iter().position(|p| p.user_id == current))
            .map_or(0, |index| index + 1);

        let next = (0..order.len())
            .map(|offset| order[(start + offset) % order.len()].user_id)
            .find(|user| present.contains(user));

        self.prompt = None;
        self.updated_at = now;
        match next {
            Some(user) => {
                self.turn_user = Some(user);
                self.status = GroupStatus::WaitingForChoice;
                Rotation::Next(user)
            }
            None => {
                self.finish(now);
                Rotation::Finished
            }
        }
    }

    /// Append a late joiner at the end of the rotation. Returns `false` if already known.
    pub fn member_joined(&mut self, user: UserId, now: SystemTime) -> Result<bool, GroupError> {
        self.ensure_open()?;
        if self.participant(user).is_some() {
            return Ok(false);
        }
        let turn_order = self
            .participants
            .iter()
            .map(|p| p.turn_order + 1)
            .max()
            .unwrap_or(0);
        self.participants.push(Participant {
            user_id: user,
            turn_order,
            score: 0,
        });
        self.updated_at = now;
        Ok(true)
    }

    /// React to a member leaving. Rotates only when the leaver held the turn.
    pub fn member_left(
        &mut self,
        user: UserId,
        present: &[UserId],
        now: SystemTime,
    ) -> Result<Option<Rotation>, GroupError> {
        self.ensure_open()?;
        if present.is_empty() {
            self.finish(now);
            return Ok(Some(Rotation::Finished));
        }
        if self.turn_user != Some(user) {
            return Ok(None);
        }
        Ok(Some(self.rotate(present, now)))
    }

    fn finish(&mut self, now: SystemTime) {
        self.status = GroupStatus::Finished;
        self.turn_user = None;
        self.prompt = None;
        self.ended_at = Some(now);
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::TodChoice;

    fn prompt() -> GroupPrompt {
        GroupPrompt {
            choice: TodChoice::Truth,
            category: "fun".into(),
            text: "What was your first concert?".into(),
        }
    }

    fn session(members: &[UserId]) -> GroupSessionEntity {
        start(7, GroupGameType::TruthDare, members, 2, SystemTime::now()).unwrap()
    }

    #[test]
    fn start_requires_enough_members() {
        let err = start(7, GroupGameType::Quiz, &[1], 2, SystemTime::now()).unwrap_err();
        assert_eq!(err, GroupError::NotEnoughPlayers { have: 1, need: 2 });
    }

    #[test]
    fn confirmed_turn_scores_and_rotates() {
        let now = SystemTime::now();
        let mut game = session(&[10, 20, 30]);
        assert_eq!(game.turn_user, Some(10));

        assert!(matches!(
            game.submit_choice(20, prompt(), now),
            Err(GroupError::NotTurnUser { user: 20, .. })
        ));
        game.submit_choice(10, prompt(), now).unwrap();
        assert_eq!(game.status, GroupStatus::WaitingForHost);

        let (rewarded, rotation) = game.confirm_turn(&[10, 20, 30], now).unwrap();
        assert_eq!(rewarded, 10);
        assert_eq!(rotation, Rotation::Next(20));
        assert_eq!(game.participant(10).unwrap().score, 1);
        assert_eq!(game.status, GroupStatus::WaitingForChoice);
        assert!(game.prompt.is_none());
    }

    #[test]
    fn rotation_skips_absent_members_and_wraps() {
        let now = SystemTime::now();
        let mut game = session(&[10, 20, 30]);
        game.turn_user = Some(30);

        assert_eq!(game.force_advance(&[20, 30], now).unwrap(), Rotation::Next(20));
        assert_eq!(game.force_advance(&[20], now).unwrap(), Rotation::Next(20));
        assert_eq!(game.participants.len(), 3);
    }

    #[test]
    fn late_joiner_enters_rotation() {
        let now = SystemTime::now();
        let mut game = session(&[10, 20]);
        assert!(game.member_joined(40, now).unwrap());
        assert!(!game.member_joined(40, now).unwrap());

        game.turn_user = Some(20);
        assert_eq!(game.force_advance(&[10, 20, 40], now).unwrap(), Rotation::Next(40));
    }

    #[test]
    fn turn_user_leaving_moves_the_turn() {
        let now = SystemTime::now();
        let mut game = session(&[10, 20, 30]);
        game.submit_choice(10, prompt(), now).unwrap();

        assert_eq!(game.member_left(20, &[10, 30], now).unwrap(), None);
        assert_eq!(
            game.member_left(10, &[30], now).unwrap(),
            Some(Rotation::Next(30))
        );
        assert_eq!(game.status, GroupStatus::WaitingForChoice);
    }

    #[test]
    fn empty_room_finishes_the_game() {
        let now = SystemTime::now();
        let mut game = session(&[10, 20]);
        assert_eq!(
            game.member_left(10, &[], now).unwrap(),
            Some(Rotation::Finished)
        );
        assert_eq!(game.status, GroupStatus::Finished);
        assert!(game.end(now).is_err());
    }
}
