mod common;

use common::{balance, harness, Harness};
use pairplay::{
    dao::models::{GroupGameType, GroupStatus, TodChoice},
    error::ServiceError,
    services::{group_service, notifications},
};

const ROOM: i64 = 7;
const HOST: i64 = 10;

async fn room_with(h: &Harness, guests: &[i64]) {
    h.state.rooms().open_room(ROOM, HOST).await;
    for guest in guests {
        assert!(group_service::member_joined(&h.state, ROOM, *guest).await.unwrap());
    }
}

#[tokio::test]
async fn only_the_host_starts_and_enough_members_are_needed() {
    let h = harness();
    room_with(&h, &[]).await;

    let err = group_service::start(&h.state, HOST, ROOM, GroupGameType::TruthDare)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidInput(_)));

    group_service::member_joined(&h.state, ROOM, 11).await.unwrap();
    let err = group_service::start(&h.state, 11, ROOM, GroupGameType::TruthDare)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Unauthorized(_)));

    let session = group_service::start(&h.state, HOST, ROOM, GroupGameType::TruthDare)
        .await
        .unwrap();
    assert_eq!(session.turn_user, Some(HOST));
    assert_eq!(session.participants.len(), 2);
    assert!(h.messenger.last(11, notifications::GROUP_STARTED).is_some());

    let err = group_service::start(&h.state, HOST, ROOM, GroupGameType::Quiz)
        .await
        .unwrap_err();
    assert!(err.is_absorbed());
}

#[tokio::test]
async fn confirmed_turns_reward_and_rotate() {
    let h = harness();
    room_with(&h, &[11, 12]).await;
    let session = group_service::start(&h.state, HOST, ROOM, GroupGameType::TruthDare)
        .await
        .unwrap();

    let err = group_service::submit_choice(&h.state, ROOM, 11, TodChoice::Truth, "general".into())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Unauthorized(_)));

    let waiting = group_service::submit_choice(&h.state, ROOM, HOST, TodChoice::Dare, "general".into())
        .await
        .unwrap();
    assert_eq!(waiting.status, GroupStatus::WaitingForHost);
    assert!(waiting.prompt.is_some());
    let host_prompt = h.messenger.last(HOST, notifications::GROUP_PROMPT).unwrap();
    let guest_prompt = h.messenger.last(12, notifications::GROUP_PROMPT).unwrap();
    assert!(!host_prompt.controls.is_empty());
    assert!(guest_prompt.controls.is_empty());

    let err = group_service::confirm_turn(&h.state, ROOM, 11).await.unwrap_err();
    assert!(matches!(err, ServiceError::Unauthorized(_)));

    let next = group_service::confirm_turn(&h.state, ROOM, HOST).await.unwrap();
    assert_eq!(next.id, session.id);
    assert_eq!(next.turn_user, Some(11));
    assert_eq!(next.participant(HOST).unwrap().score, 1);
    assert_eq!(balance(&h.state, HOST).await, 15);

    let skipped = group_service::force_advance(&h.state, ROOM, HOST).await.unwrap();
    assert_eq!(skipped.turn_user, Some(12));
    assert_eq!(balance(&h.state, 11).await, 0);
}

#[tokio::test]
async fn quiz_prompts_show_one_question_with_its_options() {
    let h = harness();
    room_with(&h, &[11]).await;
    group_service::start(&h.state, HOST, ROOM, GroupGameType::Quiz)
        .await
        .unwrap();

    let session = group_service::submit_choice(&h.state, ROOM, HOST, TodChoice::Truth, "science".into())
        .await
        .unwrap();
    let prompt = session.prompt.unwrap();
    assert_eq!(prompt.category, "science");
    assert!(prompt.text.ends_with("[a / b / c]"));
}

#[tokio::test]
async fn leaving_members_are_skipped_and_late_joiners_appended() {
    let h = harness();
    room_with(&h, &[11]).await;
    group_service::start(&h.state, HOST, ROOM, GroupGameType::TruthDare)
        .await
        .unwrap();

    group_service::member_joined(&h.state, ROOM, 12).await.unwrap();
    assert!(group_service::member_left(&h.state, ROOM, HOST).await.unwrap());

    let id = h
        .state
        .session_store()
        .await
        .unwrap()
        .find_open_group_session(ROOM)
        .await
        .unwrap()
        .unwrap()
        .id;
    let session = group_service::get(&h.state, id).await.unwrap();
    assert_eq!(session.participants.len(), 3);
    assert_eq!(session.turn_user, Some(11));
    assert!(h.messenger.last(12, notifications::GROUP_TURN).is_some());

    assert!(!group_service::member_left(&h.state, ROOM, HOST).await.unwrap());
}

#[tokio::test]
async fn closing_the_room_ends_its_game() {
    let h = harness();
    room_with(&h, &[11]).await;
    let session = group_service::start(&h.state, HOST, ROOM, GroupGameType::TruthDare)
        .await
        .unwrap();

    let err = group_service::close_room(&h.state, ROOM, 11).await.unwrap_err();
    assert!(matches!(err, ServiceError::Unauthorized(_)));

    group_service::close_room(&h.state, ROOM, HOST).await.unwrap();
    let ended = group_service::get(&h.state, session.id).await.unwrap();
    assert_eq!(ended.status, GroupStatus::Finished);
    assert!(h.messenger.last(11, notifications::GROUP_FINISHED).is_some());
    assert!(h.state.rooms().members(ROOM).await.is_empty());
}

#[tokio::test]
async fn membership_hooks_surface_storage_outages() {
    let h = harness();
    room_with(&h, &[11]).await;
    assert!(group_service::member_left(&h.state, ROOM, 11).await.unwrap());

    h.state.clear_session_store().await;

    let err = group_service::member_joined(&h.state, ROOM, 12).await.unwrap_err();
    assert!(matches!(err, ServiceError::Degraded));
    let err = group_service::member_left(&h.state, ROOM, 12).await.unwrap_err();
    assert!(matches!(err, ServiceError::Degraded));
}
