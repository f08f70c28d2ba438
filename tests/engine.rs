mod common;

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use axum::response::IntoResponse;
use common::{catalog, fund, harness, harness_with, pair, profile, test_config};
use futures::StreamExt;
use pairplay::{
    dao::{
        models::{GameType, MatchFilters, QueueEntryEntity, TodChoice},
        session_store::SessionStore,
    },
    error::ServiceError,
    gateways::messaging::{Feedback, RecordingMessenger},
    services::{
        dispatch::{self, Command, Dispatcher, Outcome, Reply},
        event_stream, group_service, health_service, notifications, quiz_service, sweepers,
        tod_service,
    },
    state::AppState,
};
use uuid::Uuid;

#[tokio::test]
async fn degraded_engine_refuses_commands() {
    let messenger = Arc::new(RecordingMessenger::new());
    let state = AppState::builder(test_config())
        .messenger(messenger.clone())
        .content(Arc::new(catalog()))
        .build();

    assert!(state.is_degraded());
    assert_eq!(health_service::health_status(&state).await.status, "degraded");
    let err = dispatch::submit(&state, Command::Cancel { user: 1 })
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Degraded));
}

#[tokio::test]
async fn commands_run_through_the_worker_pool() {
    let h = harness();
    assert!(h.state.install_dispatcher(Dispatcher::start(&h.state)));
    fund(&h.state, 1, 10).await;

    let outcome = dispatch::submit(
        &h.state,
        Command::Enqueue {
            user: 1,
            profile: profile(),
            filters: MatchFilters::default(),
            game_type: GameType::Chat,
        },
    )
    .await
    .unwrap();
    assert!(matches!(outcome, Outcome::Done(Reply::Queued(_))));

    let outcome = dispatch::submit(&h.state, Command::Cancel { user: 1 })
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Done(Reply::Cancelled(_))));
    assert_eq!(health_service::health_status(&h.state).await.status, "ok");
}

#[tokio::test]
async fn refusals_reach_the_acting_user() {
    let h = harness();

    let err = dispatch::submit(&h.state, Command::RelayMessage { user: 4, text: "hello".into() })
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
    assert!(h.messenger.last(4, notifications::ERROR).is_some());
}

#[tokio::test]
async fn tokens_are_acknowledged_with_the_outcome() {
    let h = harness();
    let found = pair(&h, 1, 2, GameType::Chat).await;

    let err = dispatch::submit(
        &h.state,
        Command::TodChoice {
            user: 1,
            game_id: found.id,
            token: "tok-1".into(),
            choice: TodChoice::Truth,
            category: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
    assert!(matches!(h.messenger.feedback("tok-1"), Some(Feedback::Failed(_))));
    assert_eq!(h.messenger.feedback("never-sent"), None);
}

#[tokio::test]
async fn games_only_start_on_own_pairings() {
    let h = harness();
    let found = pair(&h, 1, 2, GameType::Chat).await;

    let err = dispatch::submit(
        &h.state,
        Command::StartTod {
            user: 3,
            pairing_id: found.id,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ServiceError::Unauthorized(_)));

    let outcome = dispatch::submit(
        &h.state,
        Command::StartTod {
            user: 2,
            pairing_id: found.id,
        },
    )
    .await
    .unwrap();
    assert!(matches!(outcome, Outcome::Done(Reply::Tod(_))));
}

#[tokio::test]
async fn sweep_pass_moves_elapsed_pairings() {
    let mut config = test_config();
    config.matchmaking.pairing_timeout = Duration::ZERO;
    let h = harness_with(config);
    pair(&h, 1, 2, GameType::Chat).await;

    let report = sweepers::sweep_once(&h.state).await;
    assert_eq!(report.pairings_timed_out, 1);
    assert_eq!(sweepers::sweep_once(&h.state).await.pairings_timed_out, 0);
}

#[tokio::test]
async fn search_without_partner_is_cancelled_with_refund_through_dispatch() {
    let h = harness();
    fund(&h.state, 5, 5).await;
    dispatch::submit(
        &h.state,
        Command::Enqueue {
            user: 5,
            profile: profile(),
            filters: MatchFilters::default(),
            game_type: GameType::TruthOrDare,
        },
    )
    .await
    .unwrap();
    assert_eq!(h.state.ledger().balance(5).await.unwrap(), 0);

    dispatch::submit(&h.state, Command::Cancel { user: 5 }).await.unwrap();
    assert_eq!(h.state.ledger().balance(5).await.unwrap(), 5);
}

#[tokio::test]
async fn lookups_of_unknown_sessions_leave_no_cache_slots() {
    let h = harness();

    for _ in 0..25 {
        let missing = quiz_service::get(&h.state, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(missing, ServiceError::NotFound(_)));
        let missing = tod_service::get(&h.state, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(missing, ServiceError::NotFound(_)));
        let missing = group_service::get(&h.state, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(missing, ServiceError::NotFound(_)));
    }

    assert!(h.state.quiz_sessions().is_empty());
    assert!(h.state.tod_games().is_empty());
    assert!(h.state.group_sessions().is_empty());
}

#[tokio::test]
async fn event_stream_outlives_the_state_handle_and_opens_with_a_handshake() {
    let h = harness();
    let response = {
        let state = h.state.clone();
        event_stream::open(&state, 7).into_response()
    };

    let mut body = response.into_body().into_data_stream();
    let first = tokio::time::timeout(Duration::from_secs(5), body.next())
        .await
        .expect("handshake frame")
        .expect("stream open")
        .expect("frame bytes");
    let frame = String::from_utf8(first.to_vec()).unwrap();
    assert!(frame.contains("handshake"));
    assert!(frame.contains("\"user_id\":7"));
}

#[tokio::test]
async fn sweepers_run_until_the_state_is_dropped() {
    let mut config = test_config();
    config.dispatch.sweep_interval = Duration::from_millis(20);
    let h = harness_with(config);
    let stale = QueueEntryEntity {
        user_id: 4,
        profile: profile(),
        filters: MatchFilters::default(),
        game_type: GameType::Chat,
        coins_paid: 4,
        enqueued_at: SystemTime::now() - Duration::from_secs(3600),
    };
    assert!(h.store.insert_queue_entry(stale).await.unwrap());

    let sweeping = tokio::spawn(sweepers::run(Arc::downgrade(&h.state)));
    common::eventually(|| {
        let messenger = h.messenger.clone();
        async move { messenger.last(4, notifications::MATCH_TIMEOUT).is_some() }
    })
    .await;

    drop(h);
    tokio::time::timeout(Duration::from_secs(1), sweeping)
        .await
        .expect("sweepers stop without a state")
        .unwrap();
}
