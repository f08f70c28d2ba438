mod common;

use std::time::Duration;

use common::{balance, eventually, harness, harness_with, pair, test_config, Harness};
use pairplay::{
    dao::{
        models::{
            EndReason, GameType, ItemKind, JudgmentResult, Proof, ProofKind, TodChoice,
            TodGameEntity, TodState, UserId,
        },
        session_store::SessionStore,
    },
    error::ServiceError,
    services::{
        dispatch::{self, Command, Outcome},
        notifications, tod_service,
    },
};

async fn started(h: &Harness, a: UserId, b: UserId) -> TodGameEntity {
    let found = pair(h, a, b, GameType::TruthOrDare).await;
    eventually(|| {
        let store = h.store.clone();
        async move {
            store
                .find_tod_game_by_pairing(found.id)
                .await
                .unwrap()
                .is_some()
        }
    })
    .await;
    h.store
        .find_tod_game_by_pairing(found.id)
        .await
        .unwrap()
        .unwrap()
}

fn text_proof() -> Proof {
    Proof {
        kind: ProofKind::Text,
        payload: "done".into(),
    }
}

/// Play the current turn through to the judgment.
async fn play_turn(h: &Harness, game: &TodGameEntity, prefix: &str, accepted: bool) -> TodGameEntity {
    let (active, passive) = (game.active_player, game.passive_player);
    tod_service::submit_choice(&h.state, game.id, active, &format!("{prefix}-c"), TodChoice::Truth, None)
        .await
        .unwrap();
    tod_service::submit_proof(&h.state, game.id, active, &format!("{prefix}-p"), text_proof())
        .await
        .unwrap();
    tod_service::submit_judgment(&h.state, game.id, passive, &format!("{prefix}-j"), accepted)
        .await
        .unwrap()
}

#[tokio::test]
async fn pairing_starts_a_game_waiting_for_the_first_choice() {
    let h = harness();
    let game = started(&h, 1, 2).await;

    assert_eq!(game.state, TodState::WaitingChoice);
    assert_eq!(game.turn_number, 1);
    assert!(game.turn_deadline.is_some());
    assert_ne!(game.active_player, game.passive_player);
    assert_eq!(tod_service::turns(&h.state, game.id).await.unwrap().len(), 1);
    eventually(|| {
        let messenger = h.messenger.clone();
        let active = game.active_player;
        async move { messenger.last(active, notifications::TOD_YOUR_TURN).is_some() }
    })
    .await;
}

#[tokio::test]
async fn accepted_proof_pays_the_challenge_and_swaps_roles() {
    let h = harness();
    let game = started(&h, 1, 2).await;
    let (active, passive) = (game.active_player, game.passive_player);
    let before = balance(&h.state, active).await;

    let next = play_turn(&h, &game, "t1", true).await;

    assert_eq!(next.state, TodState::WaitingChoice);
    assert_eq!(next.current_round, 2);
    assert_eq!(next.active_player, passive);
    assert_eq!(balance(&h.state, active).await, before + 12);
    assert_eq!(h.store.find_user_stats(active).await.unwrap().xp, 7);

    let turns = tod_service::turns(&h.state, game.id).await.unwrap();
    assert_eq!(turns[0].judgment, Some(JudgmentResult::Accepted));
    assert!(turns[0].completed);
    assert!(h.messenger.last(passive, notifications::TOD_JUDGED).is_some());
}

#[tokio::test]
async fn rejected_proof_costs_the_player() {
    let h = harness();
    let game = started(&h, 1, 2).await;
    let active = game.active_player;
    let before = balance(&h.state, active).await;

    play_turn(&h, &game, "t1", false).await;
    assert_eq!(balance(&h.state, active).await, before - 5);
}

#[tokio::test]
async fn tokens_are_required_and_single_use() {
    let h = harness();
    let game = started(&h, 1, 2).await;
    let active = game.active_player;

    let err = tod_service::submit_choice(&h.state, game.id, active, "  ", TodChoice::Dare, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidInput(_)));

    tod_service::submit_choice(&h.state, game.id, active, "tok", TodChoice::Dare, None)
        .await
        .unwrap();
    let replay = dispatch::submit(
        &h.state,
        Command::TodProof {
            user: active,
            game_id: game.id,
            token: "tok".into(),
            proof: text_proof(),
        },
    )
    .await
    .unwrap();
    assert!(matches!(replay, Outcome::Ignored));
    assert_eq!(
        tod_service::get(&h.state, game.id).await.unwrap().state,
        TodState::WaitingProof
    );
}

#[tokio::test]
async fn out_of_turn_and_mismatched_proofs_are_refused() {
    let h = harness();
    let game = started(&h, 1, 2).await;
    let (active, passive) = (game.active_player, game.passive_player);

    let err = tod_service::submit_choice(&h.state, game.id, passive, "x1", TodChoice::Truth, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Unauthorized(_)));

    tod_service::submit_choice(&h.state, game.id, active, "x2", TodChoice::Truth, None)
        .await
        .unwrap();
    let image = Proof {
        kind: ProofKind::Image,
        payload: "file-id".into(),
    };
    let err = tod_service::submit_proof(&h.state, game.id, active, "x3", image)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidInput(_)));
    assert_eq!(
        tod_service::get(&h.state, game.id).await.unwrap().state,
        TodState::WaitingProof
    );
}

#[tokio::test]
async fn last_round_settles_the_winner() {
    let h = harness();
    let game = started(&h, 1, 2).await;
    let first = game.active_player;
    let second = game.passive_player;

    let game = play_turn(&h, &game, "r1", true).await;
    let before_first = balance(&h.state, first).await;
    let ended = play_turn(&h, &game, "r2", false).await;

    assert_eq!(ended.state, TodState::GameEnd);
    assert_eq!(ended.end_reason, Some(EndReason::Completed));
    assert_eq!(ended.winner, Some(first));
    assert_eq!(balance(&h.state, first).await, before_first + 50);
    let stats = h.store.find_user_stats(second).await.unwrap();
    assert_eq!((stats.games_played, stats.games_won), (1, 0));
    assert!(h.messenger.last(second, notifications::TOD_ENDED).is_some());
}

#[tokio::test]
async fn quitting_forfeits_to_the_opponent() {
    let h = harness();
    let game = started(&h, 1, 2).await;
    let quitter = game.passive_player;
    let other = game.active_player;
    let (before_quitter, before_other) = (balance(&h.state, quitter).await, balance(&h.state, other).await);

    let ended = tod_service::quit(&h.state, game.id, quitter).await.unwrap();
    assert_eq!(ended.state, TodState::Forfeit);
    assert_eq!(ended.end_reason, Some(EndReason::Quit));
    assert_eq!(ended.winner, Some(other));
    assert_eq!(balance(&h.state, quitter).await, before_quitter - 10);
    assert_eq!(balance(&h.state, other).await, before_other + 20);

    let err = tod_service::quit(&h.state, game.id, other).await.unwrap_err();
    assert!(err.is_absorbed());
}

#[tokio::test]
async fn mirror_hands_the_turn_over_until_the_items_run_out() {
    let h = harness();
    let game = started(&h, 1, 2).await;
    let (first, second) = (game.active_player, game.passive_player);

    let game = tod_service::use_item(&h.state, game.id, first, "m1", ItemKind::Mirror)
        .await
        .unwrap();
    assert_eq!(game.active_player, second);
    let game = tod_service::use_item(&h.state, game.id, second, "m2", ItemKind::Mirror)
        .await
        .unwrap();
    assert_eq!(game.active_player, first);

    let err = tod_service::use_item(&h.state, game.id, first, "m3", ItemKind::Mirror)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidInput(_)));
    assert_eq!(
        tod_service::get(&h.state, game.id).await.unwrap().active_player,
        first
    );
}

#[tokio::test]
async fn shield_skips_the_turn() {
    let h = harness();
    let game = started(&h, 1, 2).await;
    let (first, second) = (game.active_player, game.passive_player);

    let shielded = tod_service::use_item(&h.state, game.id, first, "s1", ItemKind::Shield)
        .await
        .unwrap();
    assert_eq!(shielded.active_player, second);
    assert_eq!(shielded.turn_number, 2);
    let turns = tod_service::turns(&h.state, game.id).await.unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].item_used, Some(ItemKind::Shield));
    assert!(turns[0].completed);
}

#[tokio::test]
async fn missed_deadline_forfeits_the_awaited_player() {
    let mut config = test_config();
    config.tod.turn_timeout = Duration::from_millis(100);
    config.tod.warning_lead = Duration::ZERO;
    let h = harness_with(config);
    let game = started(&h, 1, 2).await;
    let (afk, other) = (game.active_player, game.passive_player);

    eventually(|| {
        let store = h.store.clone();
        async move {
            store
                .find_tod_game(game.id)
                .await
                .unwrap()
                .is_some_and(|game| game.state == TodState::Forfeit)
        }
    })
    .await;

    let ended = h.store.find_tod_game(game.id).await.unwrap().unwrap();
    assert_eq!(ended.end_reason, Some(EndReason::Afk));
    assert_eq!(ended.winner, Some(other));
    eventually(|| {
        let store = h.store.clone();
        async move { store.find_user_stats(afk).await.unwrap().timeout_count == 1 }
    })
    .await;
}

#[tokio::test]
async fn unjudged_proof_forfeits_to_the_player_and_logs_the_timeout() {
    let mut config = test_config();
    config.tod.turn_timeout = Duration::from_millis(500);
    config.tod.warning_lead = Duration::ZERO;
    let h = harness_with(config);
    let game = started(&h, 1, 2).await;
    let (player, judge) = (game.active_player, game.passive_player);
    tod_service::submit_choice(&h.state, game.id, player, "jd-c", TodChoice::Truth, None)
        .await
        .unwrap();
    tod_service::submit_proof(&h.state, game.id, player, "jd-p", text_proof())
        .await
        .unwrap();

    eventually(|| {
        let store = h.store.clone();
        async move {
            store
                .find_tod_game(game.id)
                .await
                .unwrap()
                .is_some_and(|game| game.state == TodState::Forfeit)
        }
    })
    .await;

    let ended = h.store.find_tod_game(game.id).await.unwrap().unwrap();
    assert_eq!(ended.end_reason, Some(EndReason::Afk));
    assert_eq!(ended.winner, Some(player));
    let turns = tod_service::turns(&h.state, game.id).await.unwrap();
    assert_eq!(turns[0].judgment, Some(JudgmentResult::TimedOut));
    assert!(turns[0].completed);
    let logged = h.store.recent_judgments(judge, 5).await.unwrap();
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].result, JudgmentResult::TimedOut);
    assert_eq!(logged[0].player_id, player);
}

#[tokio::test]
async fn deadline_warning_is_sent_once() {
    let mut config = test_config();
    config.tod.turn_timeout = Duration::from_secs(3);
    config.tod.warning_lead = Duration::from_millis(2900);
    let h = harness_with(config);
    let game = started(&h, 1, 2).await;
    let awaited = game.active_player;

    eventually(|| {
        let messenger = h.messenger.clone();
        async move { messenger.last(awaited, notifications::TOD_WARNING).is_some() }
    })
    .await;
    tod_service::on_warning(&h.state, game.id, game.turn_number)
        .await
        .unwrap();
    tod_service::sweep_due(&h.state).await.unwrap();

    let warnings = h
        .messenger
        .events_for(awaited)
        .into_iter()
        .filter(|event| event == notifications::TOD_WARNING)
        .count();
    assert_eq!(warnings, 1);
    assert!(h
        .store
        .find_tod_game(game.id)
        .await
        .unwrap()
        .unwrap()
        .warning_shown_at
        .is_some());
}

#[tokio::test]
async fn answered_turn_prompt_loses_its_controls() {
    let h = harness();
    let game = started(&h, 1, 2).await;
    let active = game.active_player;
    eventually(|| {
        let messenger = h.messenger.clone();
        async move { messenger.last(active, notifications::TOD_YOUR_TURN).is_some() }
    })
    .await;
    let prompt = h.messenger.handles(active, notifications::TOD_YOUR_TURN)[0];
    assert!(h.state.prompts().is_open(game.id));

    tod_service::submit_choice(&h.state, game.id, active, "pr-c", TodChoice::Dare, None)
        .await
        .unwrap();

    let updates = h.messenger.updates_for(active);
    assert_eq!(updates.len(), 1);
    let (handle, edited) = &updates[0];
    assert_eq!(*handle, prompt);
    assert_eq!(edited.event, notifications::TOD_YOUR_TURN);
    assert!(edited.controls.is_empty());
    assert!(!h.state.prompts().is_open(game.id));
}
