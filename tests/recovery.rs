mod common;

use std::time::{Duration, SystemTime};

use common::{balance, harness, profile, wait_for_pairing, Harness};
use pairplay::{
    dao::{
        models::{
            GameType, MatchFilters, PairingEntity, PairingStatus, QueueEntryEntity,
            QuizRoundEntity, QuizSessionEntity, QuizState, UserId,
        },
        session_store::SessionStore,
    },
    services::{notifications, quiz_service, sweepers},
    state::quiz,
};
use uuid::Uuid;

/// A quiz persisted by an earlier process, without any timer armed in this one.
async fn persisted_quiz(h: &Harness, since: Duration) -> QuizSessionEntity {
    let started = SystemTime::now() - since;
    let pairing = PairingEntity {
        id: Uuid::new_v4(),
        user_a: 1,
        user_b: 2,
        game_type: GameType::Quiz,
        status: PairingStatus::Active,
        started_at: started,
        timeout_at: started + Duration::from_secs(3600),
        ended_at: None,
        ended_by: None,
    };
    let session = quiz::new_session(&pairing, &h.state.config().quiz, started);
    assert!(h.store.insert_quiz_session(session.clone()).await.unwrap());
    session
}

fn queued(user: UserId, coins_paid: i64, enqueued_at: SystemTime) -> QueueEntryEntity {
    QueueEntryEntity {
        user_id: user,
        profile: profile(),
        filters: MatchFilters::default(),
        game_type: GameType::Chat,
        coins_paid,
        enqueued_at,
    }
}

#[tokio::test]
async fn missed_question_deadline_is_fired_by_the_sweep() {
    let h = harness();
    let mut session = persisted_quiz(&h, Duration::from_secs(60)).await;
    let now = SystemTime::now();
    session.state = QuizState::PlayingRound;
    session.category_deadline = None;
    session.current_question = 1;
    session.question_started_at = Some(now - Duration::from_secs(40));
    session.question_deadline = Some(now - Duration::from_secs(15));
    session.version = 1;
    assert!(h.store.save_quiz_session(session.clone(), 0).await.unwrap());
    h.store
        .insert_quiz_round(QuizRoundEntity {
            session_id: session.id,
            round_number: 1,
            category: "science".into(),
            chosen_by: 1,
            question_ids: vec![1, 2],
            result: None,
            created_at: now,
        })
        .await
        .unwrap();

    let report = sweepers::sweep_once(&h.state).await;
    assert_eq!(report.quiz_deadlines, 1);

    let resumed = quiz_service::get(&h.state, session.id).await.unwrap();
    assert_eq!(resumed.state, QuizState::PlayingRound);
    assert_eq!(resumed.current_question, 2);
    assert!(resumed.question_deadline.is_some_and(|deadline| deadline > now));

    let answers = h.store.list_quiz_answers(session.id, 1).await.unwrap();
    assert_eq!(answers.len(), 2);
    assert!(answers
        .iter()
        .all(|answer| answer.auto_filled && !answer.correct && answer.elapsed_ms == 0));

    assert_eq!(sweepers::sweep_once(&h.state).await.quiz_deadlines, 0);
}

#[tokio::test]
async fn missed_category_deadline_times_the_quiz_out() {
    let h = harness();
    let session = persisted_quiz(&h, Duration::from_secs(120)).await;
    assert!(session
        .category_deadline
        .is_some_and(|deadline| deadline < SystemTime::now()));

    let report = sweepers::sweep_once(&h.state).await;
    assert_eq!(report.quiz_deadlines, 1);
    assert_eq!(
        quiz_service::get(&h.state, session.id).await.unwrap().state,
        QuizState::TimedOut
    );
    assert!(h
        .messenger
        .last(session.user_b, notifications::QUIZ_TIMED_OUT)
        .is_some());
}

#[tokio::test]
async fn expired_orphaned_search_is_refunded_by_the_sweep() {
    let h = harness();
    let enqueued_at = SystemTime::now() - Duration::from_secs(10 * 60);
    assert!(h.store.insert_queue_entry(queued(4, 6, enqueued_at)).await.unwrap());

    let report = sweepers::sweep_once(&h.state).await;
    assert_eq!(report.searches_recovered, 1);
    assert!(h.store.find_queue_entry(4).await.unwrap().is_none());
    assert_eq!(balance(&h.state, 4).await, 3);
    assert!(h.messenger.last(4, notifications::MATCH_TIMEOUT).is_some());

    assert_eq!(sweepers::sweep_once(&h.state).await.searches_recovered, 0);
}

#[tokio::test]
async fn orphaned_searches_resume_and_pair() {
    let h = harness();
    let now = SystemTime::now();
    for user in [1, 2] {
        assert!(h.store.insert_queue_entry(queued(user, 5, now)).await.unwrap());
    }

    let report = sweepers::sweep_once(&h.state).await;
    assert_eq!(report.searches_recovered, 2);

    let found = wait_for_pairing(&h.state, 1).await;
    assert_eq!(found.game_type, GameType::Chat);
    assert!(h.store.find_queue_entry(2).await.unwrap().is_none());
}
