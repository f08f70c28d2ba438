//! Truth-or-dare orchestration around [`crate::state::tod`]: tokens, turns, judging,
//! deadlines and the economy of a game.

use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::models::{
        ActionLogEntity, EndReason, ItemKind, JudgmentLogEntity, JudgmentResult, Proof,
        StatsDelta, TodChoice, TodGameEntity, TodTurnEntity, TxType, UserId,
    },
    dto::{
        format_optional_time,
        tod::{
            ChallengeEvent, ItemUsedEvent, JudgeWarningEvent, JudgedEvent, ProofEvent,
            TodEndedEvent, TodGameView, TurnWarningEvent, YourTurnEvent,
        },
    },
    error::ServiceError,
    gateways::messaging::{Control, Notification},
    services::{economy, notifications},
    state::{
        SharedState,
        registry::SessionGuard,
        timers::TimerKind,
        tod::{self, ItemEffect, SCORE_WINDOW, TurnEnd, UNFAIR_WINDOW},
    },
};

type Guard = SessionGuard<TodGameEntity>;

async fn load(state: &SharedState, guard: &mut Guard, id: Uuid) -> Result<TodGameEntity, ServiceError> {
    let store = state.require_store().await?;
    guard
        .load(|| async move { store.find_tod_game(id).await.map_err(ServiceError::from) })
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("truth-or-dare game {id}")))
}

async fn save(
    state: &SharedState,
    guard: &mut Guard,
    mut game: TodGameEntity,
) -> Result<TodGameEntity, ServiceError> {
    let store = state.require_store().await?;
    let expected = game.version;
    game.version = expected + 1;

    if store.save_tod_game(game.clone(), expected).await? {
        guard.store(game.clone());
        Ok(game)
    } else {
        guard.invalidate();
        Err(ServiceError::InvalidState(format!(
            "game {} changed concurrently",
            game.id
        )))
    }
}

async fn current_turn(state: &SharedState, game: &TodGameEntity) -> Result<TodTurnEntity, ServiceError> {
    let store = state.require_store().await?;
    store
        .find_tod_turn(game.id, game.turn_number)
        .await?
        .ok_or_else(|| {
            ServiceError::Internal(format!("turn {} of game {} missing", game.turn_number, game.id))
        })
}

/// Refuse blank or replayed action tokens.
async fn check_token(state: &SharedState, game_id: Uuid, token: &str) -> Result<(), ServiceError> {
    if token.trim().is_empty() {
        return Err(ServiceError::InvalidInput("action token is required".into()));
    }
    let store = state.require_store().await?;
    if store.action_seen(game_id, token.to_owned()).await? {
        debug!(game_id = %game_id, token, "replayed action token");
        return Err(ServiceError::DuplicateAction);
    }
    Ok(())
}

async fn record_token(state: &SharedState, game_id: Uuid, user: UserId, token: &str, action: &str) {
    let Some(store) = state.session_store().await else {
        return;
    };
    let entry = ActionLogEntity {
        game_id,
        user_id: user,
        token: token.to_owned(),
        action: action.to_owned(),
        created_at: SystemTime::now(),
    };
    if let Err(err) = store.record_action(entry).await {
        warn!(game_id = %game_id, user_id = user, action, error = %err, "failed to record action token");
    }
}

async fn store_turn(state: &SharedState, turn: TodTurnEntity) {
    let Some(store) = state.session_store().await else {
        return;
    };
    let (game_id, number) = (turn.game_id, turn.turn_number);
    if let Err(err) = store.save_tod_turn(turn).await {
        warn!(game_id = %game_id, turn_number = number, error = %err, "failed to store turn");
    }
}

fn until(deadline: SystemTime, now: SystemTime) -> Duration {
    deadline.duration_since(now).unwrap_or_default()
}

/// (Re)arm the warning and forfeit timers of the game's current deadline.
fn arm_deadline(state: &SharedState, game: &TodGameEntity) {
    let timers = state.timers();
    timers.cancel(&(game.id, TimerKind::TodWarning));
    timers.cancel(&(game.id, TimerKind::TodDeadline));
    let Some(deadline) = game.turn_deadline else {
        return;
    };
    let now = SystemTime::now();
    let id = game.id;

    if let Some(warn_at) = deadline.checked_sub(state.config().tod.warning_lead) {
        if warn_at > now {
            let warn_state = state.clone();
            let turn_number = game.turn_number;
            timers.schedule((id, TimerKind::TodWarning), until(warn_at, now), async move {
                if let Err(err) = on_warning(&warn_state, id, turn_number).await {
                    warn!(game_id = %id, error = %err, "turn warning failed");
                }
            });
        }
    }

    let deadline_state = state.clone();
    timers.schedule((id, TimerKind::TodDeadline), until(deadline, now), async move {
        if let Err(err) = on_deadline(&deadline_state, id).await {
            warn!(game_id = %id, error = %err, "turn deadline handling failed");
        }
    });
}

fn notify_both(state: &SharedState, game: &TodGameEntity, notification: Notification) {
    state.messenger().notify(game.user_a, notification.clone());
    state.messenger().notify(game.user_b, notification);
}

fn prompt_turn(state: &SharedState, game: &TodGameEntity) {
    state.prompts().send(
        state.messenger().as_ref(),
        game.id,
        game.active_player,
        Notification::new(
            notifications::TOD_YOUR_TURN,
            &YourTurnEvent {
                game_id: game.id,
                round: game.current_round,
                turn_number: game.turn_number,
                deadline: format_optional_time(game.turn_deadline),
            },
        )
        .with_controls(vec![
            Control::new("choice", "truth"),
            Control::new("choice", "dare"),
        ]),
    );
}

/// Read-only view of a game.
pub async fn get(state: &SharedState, id: Uuid) -> Result<TodGameEntity, ServiceError> {
    let mut guard = state.tod_games().lock(id).await;
    load(state, &mut guard, id).await
}

/// Turns played so far, oldest first.
pub async fn turns(state: &SharedState, id: Uuid) -> Result<Vec<TodTurnEntity>, ServiceError> {
    let store = state.require_store().await?;
    Ok(store.list_tod_turns(id).await?)
}

/// Open a game on `pairing_id`: flip the coin and prompt the first active player.
pub async fn start_game(state: &SharedState, pairing_id: Uuid) -> Result<TodGameEntity, ServiceError> {
    let store = state.require_store().await?;
    let cfg = &state.config().tod;

    let pairing = store
        .find_pairing(pairing_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("pairing {pairing_id}")))?;
    if pairing.status.is_terminal() {
        return Err(ServiceError::InvalidState(format!(
            "pairing {pairing_id} already ended"
        )));
    }
    if let Some(existing) = store.find_tod_game_by_pairing(pairing_id).await? {
        if !existing.state.is_terminal() {
            return Err(ServiceError::InvalidState(format!(
                "pairing {pairing_id} already runs game {}",
                existing.id
            )));
        }
    }

    let now = SystemTime::now();
    let mut game = tod::new_game(&pairing, cfg, now);
    let first = if rand::random::<bool>() {
        pairing.user_a
    } else {
        pairing.user_b
    };
    game.begin(first, cfg, now)?;

    if !store.insert_tod_game(game.clone()).await? {
        return Err(ServiceError::InvalidState(format!(
            "game for pairing {pairing_id} already exists"
        )));
    }
    {
        let mut guard = state.tod_games().lock(game.id).await;
        guard.store(game.clone());
    }
    store_turn(state, tod::open_turn(&game, now)).await;
    arm_deadline(state, &game);
    info!(game_id = %game.id, pairing_id = %pairing_id, first, max_rounds = game.max_rounds, "truth-or-dare started");

    notify_both(
        state,
        &game,
        Notification::new(notifications::TOD_STARTED, &TodGameView::from(&game)),
    );
    prompt_turn(state, &game);
    Ok(game)
}

/// The active player picks truth or dare; a challenge is drawn and bound to the turn.
pub async fn submit_choice(
    state: &SharedState,
    game_id: Uuid,
    user: UserId,
    token: &str,
    choice: TodChoice,
    category: Option<String>,
) -> Result<TodGameEntity, ServiceError> {
    let cfg = &state.config().tod;
    let mut guard = state.tod_games().lock(game_id).await;
    let mut game = load(state, &mut guard, game_id).await?;
    check_token(state, game_id, token).await?;

    game.submit_choice(user, cfg, SystemTime::now())?;
    let challenge = state
        .content()
        .draw_challenge(choice, category.as_deref())
        .ok_or_else(|| ServiceError::InvalidInput(format!("no {choice:?} challenges available")))?
        .snapshot(cfg.default_coin_reward, cfg.default_xp_reward);

    let mut turn = current_turn(state, &game).await?;
    let game = save(state, &mut guard, game).await?;
    record_token(state, game_id, user, token, "choice").await;
    state.prompts().withdraw(state.messenger().as_ref(), game_id);

    turn.choice = Some(choice);
    turn.category = category;
    turn.challenge = Some(challenge.clone());
    store_turn(state, turn).await;
    arm_deadline(state, &game);
    debug!(game_id = %game_id, user_id = user, ?choice, challenge_id = challenge.id, "challenge bound");

    notify_both(
        state,
        &game,
        Notification::new(
            notifications::TOD_CHALLENGE,
            &ChallengeEvent {
                game_id,
                turn_number: game.turn_number,
                active_player: game.active_player,
                choice,
                text: challenge.text,
                proof_kind: challenge.proof_kind,
                coin_reward: challenge.coin_reward,
            },
        ),
    );
    Ok(game)
}

/// The active player sends proof; the passive player is asked to judge it.
pub async fn submit_proof(
    state: &SharedState,
    game_id: Uuid,
    user: UserId,
    token: &str,
    proof: Proof,
) -> Result<TodGameEntity, ServiceError> {
    let cfg = &state.config().tod;
    let mut guard = state.tod_games().lock(game_id).await;
    let mut game = load(state, &mut guard, game_id).await?;
    check_token(state, game_id, token).await?;

    let mut turn = current_turn(state, &game).await?;
    let expected = turn
        .challenge
        .as_ref()
        .map(|challenge| challenge.proof_kind)
        .ok_or_else(|| ServiceError::Internal(format!("turn of game {game_id} has no challenge")))?;
    game.submit_proof(user, expected, proof.kind, cfg, SystemTime::now())?;

    let game = save(state, &mut guard, game).await?;
    record_token(state, game_id, user, token, "proof").await;
    turn.proof = Some(proof.clone());
    store_turn(state, turn).await;
    arm_deadline(state, &game);

    state.messenger().notify(
        game.passive_player,
        Notification::new(
            notifications::TOD_PROOF,
            &ProofEvent {
                game_id,
                turn_number: game.turn_number,
                kind: proof.kind,
                payload: proof.payload,
            },
        )
        .with_controls(vec![
            Control::new("judge", "accept"),
            Control::new("judge", "reject"),
        ]),
    );
    Ok(game)
}

/// The passive player accepts or rejects the proof; the turn completes.
pub async fn submit_judgment(
    state: &SharedState,
    game_id: Uuid,
    user: UserId,
    token: &str,
    accepted: bool,
) -> Result<TodGameEntity, ServiceError> {
    let store = state.require_store().await?;
    let cfg = &state.config().tod;
    let mut guard = state.tod_games().lock(game_id).await;
    let mut game = load(state, &mut guard, game_id).await?;
    check_token(state, game_id, token).await?;

    let now = SystemTime::now();
    let mut turn = current_turn(state, &game).await?;
    let player = game.active_player;
    let end = game.judge(user, cfg, now)?;

    let result = if accepted {
        JudgmentResult::Accepted
    } else {
        JudgmentResult::Rejected
    };
    let (coins, xp) = match (&turn.challenge, accepted) {
        (Some(challenge), true) => (challenge.coin_reward, challenge.xp_reward),
        _ => (0, 0),
    };
    turn.judgment = Some(result);
    turn.completed = true;
    turn.coins_awarded = coins;
    turn.xp_awarded = xp;

    let mut scores = (0, 0);
    if matches!(end, TurnEnd::GameOver) {
        let mut played = store.list_tod_turns(game_id).await?;
        played.retain(|stored| stored.turn_number != turn.turn_number);
        played.push(turn.clone());
        scores = tod::accepted_counts(&game, &played);
        let winner = match scores.0.cmp(&scores.1) {
            std::cmp::Ordering::Greater => Some(game.user_a),
            std::cmp::Ordering::Less => Some(game.user_b),
            std::cmp::Ordering::Equal => None,
        };
        game.settle(winner);
    }

    let game = save(state, &mut guard, game).await?;
    record_token(state, game_id, user, token, "judgment").await;
    store_turn(state, turn.clone()).await;
    if let Err(err) = store
        .append_judgment(JudgmentLogEntity {
            game_id,
            turn_number: turn.turn_number,
            judge_id: user,
            player_id: player,
            result,
            created_at: now,
        })
        .await
    {
        warn!(game_id = %game_id, turn_number = turn.turn_number, error = %err, "failed to log judgment");
    }

    if accepted {
        economy::pay(state, player, coins, TxType::GameReward, "truth-or-dare challenge").await;
        economy::record_stats(state, player, StatsDelta::xp(xp)).await;
    } else {
        economy::penalize(state, player, cfg.reject_penalty, "truth-or-dare proof rejected").await;
    }
    info!(game_id = %game_id, turn_number = turn.turn_number, ?result, "turn judged");

    notify_both(
        state,
        &game,
        Notification::new(
            notifications::TOD_JUDGED,
            &JudgedEvent {
                game_id,
                turn_number: turn.turn_number,
                result,
                coins,
                xp,
            },
        ),
    );
    update_fairness(state, user).await;

    match end {
        TurnEnd::Next { active, round } => {
            store_turn(state, tod::open_turn(&game, now)).await;
            arm_deadline(state, &game);
            debug!(game_id = %game_id, active, round, "next turn");
            prompt_turn(state, &game);
        }
        TurnEnd::GameOver => {
            let winner = game.winner;
            let payouts: Vec<(UserId, i64, bool)> = [game.user_a, game.user_b]
                .into_iter()
                .map(|participant| match winner {
                    Some(w) if w == participant => (participant, cfg.winner_coins, true),
                    Some(_) => (participant, 0, false),
                    None => (participant, cfg.draw_coins, false),
                })
                .collect();
            for (participant, reward, won) in payouts {
                economy::pay(state, participant, reward, TxType::GameReward, "truth-or-dare result").await;
                economy::record_stats(state, participant, StatsDelta::game(won, 0)).await;
            }
            close(state, &game, scores);
        }
    }
    Ok(game)
}

/// Refresh the judge's fairness score and warn repeat offenders.
async fn update_fairness(state: &SharedState, judge: UserId) {
    let Some(store) = state.session_store().await else {
        return;
    };
    let recent = match store
        .recent_judgments(judge, SCORE_WINDOW.max(UNFAIR_WINDOW))
        .await
    {
        Ok(recent) => recent,
        Err(err) => {
            warn!(user_id = judge, error = %err, "failed to read judge history");
            return;
        }
    };
    let results: Vec<JudgmentResult> = recent.iter().map(|log| log.result).collect();
    let unfair = tod::is_unfair(&results);
    let score = tod::judge_score(&results);

    let delta = StatsDelta {
        unfair_judgments: u32::from(unfair),
        judge_score: Some(score),
        ..StatsDelta::default()
    };
    if let Err(err) = store.apply_stats(judge, delta).await {
        warn!(user_id = judge, error = %err, "failed to update judge score");
        return;
    }
    if !unfair {
        return;
    }

    match store.find_user_stats(judge).await {
        Ok(stats) if stats.unfair_judgments >= state.config().tod.judge_warning_threshold => {
            warn!(user_id = judge, unfair_judgments = stats.unfair_judgments, judge_score = score, "unfair judge");
            state.messenger().notify(
                judge,
                Notification::new(
                    notifications::TOD_JUDGE_WARNING,
                    &JudgeWarningEvent {
                        unfair_judgments: stats.unfair_judgments,
                        judge_score: score,
                    },
                ),
            );
        }
        Ok(_) => {}
        Err(err) => warn!(user_id = judge, error = %err, "failed to read judge stats"),
    }
}

/// Spend an item during the choice phase.
pub async fn use_item(
    state: &SharedState,
    game_id: Uuid,
    user: UserId,
    token: &str,
    item: ItemKind,
) -> Result<TodGameEntity, ServiceError> {
    let store = state.require_store().await?;
    let cfg = &state.config().tod;
    let mut guard = state.tod_games().lock(game_id).await;
    let mut game = load(state, &mut guard, game_id).await?;
    check_token(state, game_id, token).await?;

    let now = SystemTime::now();
    let mut turn = current_turn(state, &game).await?;
    let effect = game.use_item(user, item, cfg, now)?;
    if !store.consume_item(user, item, cfg.starter_items).await? {
        return Err(ServiceError::InvalidInput(format!(
            "user {user} has no {} left",
            item.as_str()
        )));
    }

    let game = save(state, &mut guard, game).await?;
    record_token(state, game_id, user, token, "item").await;
    turn.item_used = Some(item);

    match effect {
        ItemEffect::Skipped { .. } => {
            turn.completed = true;
            store_turn(state, turn).await;
            store_turn(state, tod::open_turn(&game, now)).await;
        }
        ItemEffect::Redraw => store_turn(state, turn).await,
        ItemEffect::Mirrored { .. } => {
            turn.active_player = game.active_player;
            turn.passive_player = game.passive_player;
            store_turn(state, turn).await;
        }
    }
    arm_deadline(state, &game);
    info!(game_id = %game_id, user_id = user, item = item.as_str(), "item used");

    notify_both(
        state,
        &game,
        Notification::new(
            notifications::TOD_ITEM_USED,
            &ItemUsedEvent {
                game_id,
                by: user,
                item,
                active_player: game.active_player,
            },
        ),
    );
    prompt_turn(state, &game);
    Ok(game)
}

/// `user` leaves the game; the opponent is compensated.
pub async fn quit(state: &SharedState, game_id: Uuid, user: UserId) -> Result<TodGameEntity, ServiceError> {
    let cfg = &state.config().tod;
    let mut guard = state.tod_games().lock(game_id).await;
    let mut game = load(state, &mut guard, game_id).await?;
    let winner = game.quit(user, SystemTime::now())?;
    let game = save(state, &mut guard, game).await?;
    info!(game_id = %game_id, user_id = user, winner, "player quit");

    economy::penalize(state, user, cfg.quit_penalty, "truth-or-dare quit").await;
    economy::pay(state, winner, cfg.quit_compensation, TxType::GameReward, "opponent quit").await;
    economy::record_stats(state, user, StatsDelta::game(false, 0)).await;
    economy::record_stats(state, winner, StatsDelta::game(true, 0)).await;

    let scores = final_scores(state, &game).await;
    close(state, &game, scores);
    Ok(game)
}

/// End a live game because its pairing closed. Nobody is paid.
pub async fn abandon(state: &SharedState, game_id: Uuid) -> Result<TodGameEntity, ServiceError> {
    let mut guard = state.tod_games().lock(game_id).await;
    let mut game = load(state, &mut guard, game_id).await?;
    game.abandon(SystemTime::now())?;
    let game = save(state, &mut guard, game).await?;
    info!(game_id = %game_id, "truth-or-dare abandoned");

    let scores = final_scores(state, &game).await;
    close(state, &game, scores);
    Ok(game)
}

async fn final_scores(state: &SharedState, game: &TodGameEntity) -> (u32, u32) {
    match turns(state, game.id).await {
        Ok(played) => tod::accepted_counts(game, &played),
        Err(err) => {
            warn!(game_id = %game.id, error = %err, "failed to count accepted turns");
            (0, 0)
        }
    }
}

/// Stop timers, drop the cache and tell both players how the game ended.
fn close(state: &SharedState, game: &TodGameEntity, (score_a, score_b): (u32, u32)) {
    state.timers().cancel_session(game.id);
    state.prompts().withdraw(state.messenger().as_ref(), game.id);
    state.tod_games().evict(game.id);
    notify_both(
        state,
        game,
        Notification::new(
            notifications::TOD_ENDED,
            &TodEndedEvent {
                game_id: game.id,
                reason: game.end_reason.unwrap_or(EndReason::Forfeit),
                winner: game.winner,
                score_a,
                score_b,
            },
        ),
    );
}

/// Warning callback: tell the awaited player the deadline is near, once per deadline.
pub async fn on_warning(state: &SharedState, game_id: Uuid, turn_number: u32) -> Result<(), ServiceError> {
    let cfg = &state.config().tod;
    let mut guard = state.tod_games().lock(game_id).await;
    let mut game = load(state, &mut guard, game_id).await?;
    let now = SystemTime::now();
    if game.turn_number != turn_number || !game.warning_due(cfg, now) {
        debug!(game_id = %game_id, turn_number, "stale warning");
        return Ok(());
    }
    let Some(awaited) = game.awaited_player() else {
        return Ok(());
    };

    game.mark_warned(now);
    let game = save(state, &mut guard, game).await?;
    let seconds_left = game
        .turn_deadline
        .map(|deadline| until(deadline, now).as_secs())
        .unwrap_or_default();
    state.messenger().notify(
        awaited,
        Notification::new(
            notifications::TOD_WARNING,
            &TurnWarningEvent {
                game_id,
                seconds_left,
            },
        ),
    );
    Ok(())
}

/// Deadline callback: the awaited player forfeits.
pub async fn on_deadline(state: &SharedState, game_id: Uuid) -> Result<(), ServiceError> {
    let store = state.require_store().await?;
    let cfg = &state.config().tod;
    let mut guard = state.tod_games().lock(game_id).await;
    let mut game = load(state, &mut guard, game_id).await?;
    let now = SystemTime::now();
    let Some(expiry) = game.expire(now) else {
        debug!(game_id = %game_id, "deadline not reached");
        return Ok(());
    };
    let game = save(state, &mut guard, game).await?;
    info!(game_id = %game_id, loser = expiry.loser, winner = expiry.winner, "turn deadline expired");

    if expiry.judgment_pending {
        match current_turn(state, &game).await {
            Ok(mut turn) => {
                turn.judgment = Some(JudgmentResult::TimedOut);
                turn.completed = true;
                let player = turn.active_player;
                store_turn(state, turn).await;
                if let Err(err) = store
                    .append_judgment(JudgmentLogEntity {
                        game_id,
                        turn_number: game.turn_number,
                        judge_id: expiry.loser,
                        player_id: player,
                        result: JudgmentResult::TimedOut,
                        created_at: now,
                    })
                    .await
                {
                    warn!(game_id = %game_id, error = %err, "failed to log timed-out judgment");
                }
            }
            Err(err) => warn!(game_id = %game_id, error = %err, "timed-out turn missing"),
        }
    }

    economy::penalize(state, expiry.loser, cfg.afk_penalty, "truth-or-dare timeout").await;
    economy::pay(state, expiry.winner, cfg.afk_compensation, TxType::GameReward, "opponent timed out").await;
    economy::record_stats(
        state,
        expiry.loser,
        StatsDelta {
            timeout_count: 1,
            ..StatsDelta::game(false, 0)
        },
    )
    .await;
    economy::record_stats(state, expiry.winner, StatsDelta::game(true, 0)).await;

    let scores = final_scores(state, &game).await;
    close(state, &game, scores);
    Ok(())
}

/// Catch up on warnings and deadlines whose timers were lost, e.g. across a restart.
pub async fn sweep_due(state: &SharedState) -> Result<usize, ServiceError> {
    let store = state.require_store().await?;
    let now = SystemTime::now();
    let horizon = now + state.config().tod.warning_lead;
    let mut handled = 0;

    for game in store.list_tod_games_due(horizon).await? {
        let outcome = match game.turn_deadline {
            Some(deadline) if deadline <= now => on_deadline(state, game.id).await,
            Some(_) if game.warning_shown_at.is_none() => {
                on_warning(state, game.id, game.turn_number).await
            }
            _ => continue,
        };
        match outcome {
            Ok(()) => handled += 1,
            Err(err) => warn!(game_id = %game.id, error = %err, "deadline sweep failed"),
        }
    }
    Ok(handled)
}

/// Drop action tokens older than the retention window.
pub async fn purge_actions(state: &SharedState) -> Result<u64, ServiceError> {
    let store = state.require_store().await?;
    let before = SystemTime::now()
        .checked_sub(state.config().tod.action_retention)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let purged = store.purge_actions(before).await?;
    if purged > 0 {
        debug!(purged, "purged action tokens");
    }
    Ok(purged)
}
