mod common;

use std::time::Duration;

use common::{balance, eventually, fund, harness, harness_with, pair, profile, test_config};
use pairplay::{
    dao::{
        models::{GameType, MatchFilters, PairingStatus, TxType, UserStatus},
        session_store::SessionStore,
    },
    error::ServiceError,
    services::{matchmaking, notifications, pairing},
};

#[tokio::test]
async fn enqueue_charges_the_search_cost_and_cancel_refunds_it() {
    let h = harness();
    fund(&h.state, 1, 20).await;

    let entry = matchmaking::enqueue(&h.state, 1, profile(), MatchFilters::default(), GameType::Chat)
        .await
        .unwrap();
    assert_eq!(entry.coins_paid, 5);
    assert_eq!(balance(&h.state, 1).await, 15);
    assert_eq!(
        h.store.find_user_stats(1).await.unwrap().status,
        UserStatus::Searching
    );

    matchmaking::cancel(&h.state, 1).await.unwrap();
    assert_eq!(balance(&h.state, 1).await, 20);
    assert!(h.store.find_queue_entry(1).await.unwrap().is_none());
    assert!(h
        .messenger
        .events_for(1)
        .contains(&notifications::MATCH_CANCELLED.to_owned()));
}

#[tokio::test]
async fn second_enqueue_is_refused_without_charging_twice() {
    let h = harness();
    fund(&h.state, 1, 20).await;
    matchmaking::enqueue(&h.state, 1, profile(), MatchFilters::default(), GameType::Chat)
        .await
        .unwrap();

    let err = matchmaking::enqueue(&h.state, 1, profile(), MatchFilters::default(), GameType::Chat)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::AlreadyQueued));
    assert_eq!(balance(&h.state, 1).await, 15);
}

#[tokio::test]
async fn enqueue_without_funds_leaves_no_entry() {
    let h = harness();
    fund(&h.state, 1, 2).await;

    let err = matchmaking::enqueue(&h.state, 1, profile(), MatchFilters::default(), GameType::Chat)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InsufficientFunds { balance: 2, .. }));
    assert!(h.store.find_queue_entry(1).await.unwrap().is_none());
    assert_eq!(balance(&h.state, 1).await, 2);
}

#[tokio::test]
async fn cancel_without_entry_is_not_found() {
    let h = harness();
    let err = matchmaking::cancel(&h.state, 9).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn compatible_searchers_are_paired_once() {
    let h = harness();
    let found = pair(&h, 1, 2, GameType::Chat).await;

    assert!(found.involves(1) && found.involves(2));
    assert_eq!(found.status, PairingStatus::Active);
    assert!(h.store.find_queue_entry(1).await.unwrap().is_none());
    assert!(h.store.find_queue_entry(2).await.unwrap().is_none());

    for user in [1, 2] {
        eventually(|| {
            let messenger = h.messenger.clone();
            async move {
                messenger
                    .events_for(user)
                    .iter()
                    .filter(|event| event.as_str() == notifications::PAIRING_FOUND)
                    .count()
                    == 1
            }
        })
        .await;
        assert_eq!(
            h.store.find_user_stats(user).await.unwrap().status,
            UserStatus::InChat
        );
    }
}

#[tokio::test]
async fn searchers_for_different_games_never_meet() {
    let h = harness();
    for (user, game_type) in [(1, GameType::Chat), (2, GameType::Quiz)] {
        fund(&h.state, user, 20).await;
        matchmaking::enqueue(&h.state, user, profile(), MatchFilters::default(), game_type)
            .await
            .unwrap();
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(pairing::current(&h.state, 1).await.is_err());
    assert!(h.store.find_queue_entry(2).await.unwrap().is_some());
}

#[tokio::test]
async fn messages_are_free_until_the_pairing_window_elapses() {
    let mut config = test_config();
    config.matchmaking.pairing_timeout = Duration::ZERO;
    config.matchmaking.message_cost = 3;
    let h = harness_with(config);
    pair(&h, 1, 2, GameType::Chat).await;
    let before = balance(&h.state, 1).await;

    pairing::relay_message(&h.state, 1, "hi".into()).await.unwrap();
    assert_eq!(balance(&h.state, 1).await, before);
    assert!(h.messenger.last(2, notifications::CHAT_MESSAGE).is_some());

    assert_eq!(pairing::sweep_timeouts(&h.state).await.unwrap(), 1);
    assert_eq!(pairing::sweep_timeouts(&h.state).await.unwrap(), 0);
    assert!(h.messenger.last(1, notifications::PAIRING_TIMEOUT).is_some());

    pairing::relay_message(&h.state, 1, "still there?".into())
        .await
        .unwrap();
    assert_eq!(balance(&h.state, 1).await, before - 3);
    let history = h.state.ledger().history(1, 1).await.unwrap();
    assert_eq!(history[0].tx_type, TxType::MessageCost);
}

#[tokio::test]
async fn ending_a_pairing_rewards_both_sides_and_frees_them() {
    let h = harness();
    let found = pair(&h, 1, 2, GameType::Chat).await;

    let ended = pairing::end(&h.state, 2).await.unwrap();
    assert_eq!(ended.id, found.id);
    assert_eq!(ended.status, PairingStatus::Ended);
    assert_eq!(ended.ended_by, Some(2));

    for user in [1, 2] {
        let stats = h.store.find_user_stats(user).await.unwrap();
        assert_eq!(stats.xp, 10);
        assert_eq!(stats.status, UserStatus::Online);
        assert!(h.messenger.last(user, notifications::PAIRING_ENDED).is_some());
    }
    assert!(matches!(
        pairing::end(&h.state, 1).await.unwrap_err(),
        ServiceError::NotFound(_)
    ));
}

#[tokio::test]
async fn expired_search_refunds_half_rounded_down() {
    let mut config = test_config();
    config.matchmaking.search_timeout = Duration::ZERO;
    let h = harness_with(config);
    fund(&h.state, 1, 20).await;

    matchmaking::enqueue(&h.state, 1, profile(), MatchFilters::default(), GameType::Chat)
        .await
        .unwrap();
    eventually(|| {
        let messenger = h.messenger.clone();
        async move { messenger.last(1, notifications::MATCH_TIMEOUT).is_some() }
    })
    .await;

    assert_eq!(balance(&h.state, 1).await, 17);
    assert!(h.store.find_queue_entry(1).await.unwrap().is_none());
    assert_eq!(
        h.store.find_user_stats(1).await.unwrap().status,
        UserStatus::Online
    );
}

#[tokio::test]
async fn search_survives_an_entry_briefly_taken_by_another_pairing_attempt() {
    let mut config = test_config();
    config.matchmaking.poll_interval = Duration::from_millis(100);
    let h = harness_with(config);
    fund(&h.state, 1, 20).await;
    matchmaking::enqueue(&h.state, 1, profile(), MatchFilters::default(), GameType::Chat)
        .await
        .unwrap();

    let taken = h.store.remove_queue_entry(1).await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(h.store.insert_queue_entry(taken).await.unwrap());
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(h.state.searches().is_pending(&1));

    fund(&h.state, 2, 20).await;
    matchmaking::enqueue(&h.state, 2, profile(), MatchFilters::default(), GameType::Chat)
        .await
        .unwrap();
    let found = common::wait_for_pairing(&h.state, 1).await;
    assert!(found.involves(2));
}

#[tokio::test]
async fn search_stops_once_the_entry_stays_gone() {
    let mut config = test_config();
    config.matchmaking.poll_interval = Duration::from_millis(20);
    let h = harness_with(config);
    fund(&h.state, 1, 20).await;
    matchmaking::enqueue(&h.state, 1, profile(), MatchFilters::default(), GameType::Chat)
        .await
        .unwrap();

    h.store.remove_queue_entry(1).await.unwrap();
    eventually(|| {
        let searches = h.state.clone();
        async move { !searches.searches().is_pending(&1) }
    })
    .await;
}
