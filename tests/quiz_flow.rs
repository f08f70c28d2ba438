mod common;

use std::time::Duration;

use common::{balance, eventually, harness, harness_with, pair, test_config, Harness};
use pairplay::{
    dao::{
        models::{GameType, QuizSessionEntity, QuizState, UserId},
        session_store::SessionStore,
    },
    error::ServiceError,
    services::{
        dispatch::{self, Command, Outcome},
        notifications, pairing, quiz_service,
    },
};

/// Pair two quiz searchers and wait for the automatically started session.
async fn started(h: &Harness, a: UserId, b: UserId) -> QuizSessionEntity {
    let found = pair(h, a, b, GameType::Quiz).await;
    let store = h.store.clone();
    eventually(|| {
        let store = store.clone();
        async move {
            store
                .find_quiz_session_by_pairing(found.id)
                .await
                .unwrap()
                .is_some()
        }
    })
    .await;
    h.store
        .find_quiz_session_by_pairing(found.id)
        .await
        .unwrap()
        .unwrap()
}

/// Correct option of question `number` in the bound round. The test catalog uses `id % 3`.
async fn correct_option(h: &Harness, session: &QuizSessionEntity, number: u8) -> u8 {
    let round = h
        .store
        .find_quiz_round(session.id, session.current_round)
        .await
        .unwrap()
        .expect("round bound");
    let id = round.question_ids[usize::from(number) - 1];
    (id % 3) as u8
}

#[tokio::test]
async fn quiz_pairing_starts_a_session_and_prompts_the_first_chooser() {
    let h = harness();
    let session = started(&h, 1, 2).await;

    assert_eq!(session.state, QuizState::WaitingCategory);
    assert_eq!(session.current_round, 1);
    assert_eq!(session.chooser(), session.user_a);
    eventually(|| {
        let messenger = h.messenger.clone();
        let chooser = session.chooser();
        async move {
            messenger
                .last(chooser, notifications::QUIZ_CHOOSE_CATEGORY)
                .is_some()
        }
    })
    .await;
}

#[tokio::test]
async fn only_the_chooser_may_pick_a_known_category() {
    let h = harness();
    let session = started(&h, 1, 2).await;
    let other = session.user_b;

    let err = quiz_service::submit_category(&h.state, session.id, other, "science".into())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Unauthorized(_)));

    let err = quiz_service::submit_category(&h.state, session.id, session.user_a, "cooking".into())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidInput(_)));

    let playing = quiz_service::submit_category(&h.state, session.id, session.user_a, "science".into())
        .await
        .unwrap();
    assert_eq!(playing.state, QuizState::PlayingRound);
    assert_eq!(playing.current_question, 1);
    for user in [session.user_a, session.user_b] {
        assert!(h.messenger.last(user, notifications::QUIZ_QUESTION).is_some());
    }
}

#[tokio::test]
async fn duplicate_and_out_of_range_answers_are_rejected() {
    let h = harness();
    let session = started(&h, 1, 2).await;
    let session = quiz_service::submit_category(&h.state, session.id, session.user_a, "history".into())
        .await
        .unwrap();

    let err = quiz_service::submit_answer(&h.state, session.id, session.user_a, 1, 1, 7)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidInput(_)));

    quiz_service::submit_answer(&h.state, session.id, session.user_a, 1, 1, 0)
        .await
        .unwrap();
    assert!(h
        .messenger
        .last(session.user_b, notifications::QUIZ_OPPONENT_ANSWERED)
        .is_some());

    let replay = dispatch::submit(
        &h.state,
        Command::SubmitAnswer {
            user: session.user_a,
            session_id: session.id,
            round: 1,
            question: 1,
            choice: 1,
        },
    )
    .await
    .unwrap();
    assert!(matches!(replay, Outcome::Ignored));

    let answers = h.store.list_quiz_answers(session.id, 1).await.unwrap();
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].choice, Some(0));
}

#[tokio::test]
async fn full_game_pays_the_winner_once() {
    let h = harness();
    let mut session = started(&h, 1, 2).await;
    let (a, b) = (session.user_a, session.user_b);
    let start_a = balance(&h.state, a).await;
    let start_b = balance(&h.state, b).await;

    for round in 1..=session.rounds_total {
        session = quiz_service::submit_category(&h.state, session.id, session.chooser(), "science".into())
            .await
            .unwrap();
        assert_eq!(session.current_round, round);

        for question in 1..=session.questions_per_round {
            let correct = correct_option(&h, &session, question).await;
            quiz_service::submit_answer(&h.state, session.id, a, round, question, correct)
                .await
                .unwrap();
            session = quiz_service::submit_answer(&h.state, session.id, b, round, question, (correct + 1) % 3)
                .await
                .unwrap();
        }
    }

    assert_eq!(session.state, QuizState::Finished);
    assert_eq!(session.score_a.correct, 4);
    assert_eq!(session.score_b.correct, 0);
    assert_eq!(session.winner, Some(a));

    assert_eq!(balance(&h.state, a).await, start_a + 100);
    assert_eq!(balance(&h.state, b).await, start_b);
    let stats_a = h.store.find_user_stats(a).await.unwrap();
    let stats_b = h.store.find_user_stats(b).await.unwrap();
    assert_eq!((stats_a.games_played, stats_a.games_won, stats_a.xp), (1, 1, 30));
    assert_eq!((stats_b.games_played, stats_b.games_won, stats_b.xp), (1, 0, 10));
    assert!(h.messenger.last(b, notifications::QUIZ_FINISHED).is_some());

    let late = quiz_service::submit_answer(&h.state, session.id, a, 2, 2, 0)
        .await
        .unwrap_err();
    assert!(late.is_absorbed());
}

/// Wait until the stored session satisfies `check`, returning it.
async fn settled<F>(h: &Harness, session: &QuizSessionEntity, check: F) -> QuizSessionEntity
where
    F: Fn(&QuizSessionEntity) -> bool,
{
    let id = session.id;
    eventually(|| {
        let store = h.store.clone();
        let check = &check;
        async move {
            store
                .find_quiz_session(id)
                .await
                .unwrap()
                .is_some_and(|current| check(&current))
        }
    })
    .await;
    quiz_service::get(&h.state, id).await.unwrap()
}

#[tokio::test]
async fn unanswered_question_is_filled_in_as_wrong_when_its_time_runs_out() {
    let mut config = test_config();
    config.quiz.question_timeout = Duration::from_millis(100);
    let h = harness_with(config);
    let session = started(&h, 1, 2).await;
    let (a, b) = (session.user_a, session.user_b);
    let session = quiz_service::submit_category(&h.state, session.id, a, "science".into())
        .await
        .unwrap();
    let correct = correct_option(&h, &session, 1).await;
    quiz_service::submit_answer(&h.state, session.id, a, 1, 1, correct)
        .await
        .unwrap();

    let advanced = settled(&h, &session, |s| s.current_question == 2).await;
    assert_eq!(advanced.score_a.correct, 1);
    assert_eq!(advanced.score_b.correct, 0);

    let answers = h.store.list_quiz_answers(session.id, 1).await.unwrap();
    let filled = answers
        .iter()
        .find(|answer| answer.user_id == b && answer.question_number == 1)
        .expect("auto-filled answer");
    assert!(filled.auto_filled);
    assert!(!filled.correct);
    assert_eq!(filled.choice, None);
    assert_eq!(filled.elapsed_ms, 0);
    let own = answers
        .iter()
        .find(|answer| answer.user_id == a && answer.question_number == 1)
        .expect("submitted answer");
    assert!(!own.auto_filled);
}

#[tokio::test]
async fn simultaneous_answers_are_both_counted_and_advance_once() {
    let h = harness();
    let session = started(&h, 1, 2).await;
    let (a, b) = (session.user_a, session.user_b);
    let session = quiz_service::submit_category(&h.state, session.id, a, "science".into())
        .await
        .unwrap();
    let correct = correct_option(&h, &session, 1).await;

    let (first, second) = tokio::join!(
        quiz_service::submit_answer(&h.state, session.id, a, 1, 1, correct),
        quiz_service::submit_answer(&h.state, session.id, b, 1, 1, correct),
    );
    first.unwrap();
    second.unwrap();

    let current = quiz_service::get(&h.state, session.id).await.unwrap();
    assert_eq!(current.state, QuizState::PlayingRound);
    assert_eq!(current.current_question, 2);
    assert_eq!((current.score_a.correct, current.score_b.correct), (1, 1));
    assert_eq!(h.store.list_quiz_answers(session.id, 1).await.unwrap().len(), 2);
}

#[tokio::test]
async fn answer_is_rolled_back_when_the_session_changed_underneath() {
    let h = harness();
    let session = started(&h, 1, 2).await;
    let a = session.user_a;
    let session = quiz_service::submit_category(&h.state, session.id, a, "science".into())
        .await
        .unwrap();
    let correct = correct_option(&h, &session, 1).await;

    // Another process saves the session after this one cached it.
    let mut stored = h.store.find_quiz_session(session.id).await.unwrap().unwrap();
    let expected = stored.version;
    stored.version += 1;
    assert!(h.store.save_quiz_session(stored, expected).await.unwrap());

    let err = quiz_service::submit_answer(&h.state, session.id, a, 1, 1, correct)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidState(_)));
    assert!(h.store.list_quiz_answers(session.id, 1).await.unwrap().is_empty());

    let retried = quiz_service::submit_answer(&h.state, session.id, a, 1, 1, correct)
        .await
        .unwrap();
    assert_eq!(retried.score_a.correct, 1);
    assert_eq!(h.store.list_quiz_answers(session.id, 1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn unchosen_category_times_the_quiz_out() {
    let mut config = test_config();
    config.quiz.category_timeout = Duration::from_millis(50);
    let h = harness_with(config);
    let session = started(&h, 1, 2).await;

    let closed = settled(&h, &session, |s| s.state == QuizState::TimedOut).await;
    assert_eq!(closed.winner, None);
    for user in [session.user_a, session.user_b] {
        assert!(h.messenger.last(user, notifications::QUIZ_TIMED_OUT).is_some());
    }
}

#[tokio::test]
async fn drawn_game_pays_both_players() {
    let mut config = test_config();
    config.quiz.question_timeout = Duration::from_millis(30);
    let draw = (config.quiz.draw_coins, config.quiz.draw_xp);
    let h = harness_with(config);
    let mut session = started(&h, 1, 2).await;
    let (a, b) = (session.user_a, session.user_b);
    let start = (balance(&h.state, a).await, balance(&h.state, b).await);

    // Nobody answers: every question is filled in as wrong in zero time.
    for round in 1..=session.rounds_total {
        session = quiz_service::submit_category(&h.state, session.id, session.chooser(), "history".into())
            .await
            .unwrap();
        session = settled(&h, &session, |s| {
            s.state == QuizState::Finished || (s.state == QuizState::WaitingCategory && s.current_round > round)
        })
        .await;
    }

    assert_eq!(session.state, QuizState::Finished);
    assert_eq!(session.winner, None);
    assert_eq!(session.score_a, session.score_b);
    assert_eq!(balance(&h.state, a).await, start.0 + draw.0);
    assert_eq!(balance(&h.state, b).await, start.1 + draw.0);
    for user in [a, b] {
        let stats = h.store.find_user_stats(user).await.unwrap();
        assert_eq!((stats.games_played, stats.games_won, stats.xp), (1, 0, draw.1));
    }
}

#[tokio::test]
async fn ending_the_pairing_times_the_quiz_out() {
    let h = harness();
    let session = started(&h, 1, 2).await;

    pairing::end(&h.state, session.user_b).await.unwrap();

    let closed = quiz_service::get(&h.state, session.id).await.unwrap();
    assert_eq!(closed.state, QuizState::TimedOut);
    assert!(h
        .messenger
        .last(session.user_a, notifications::QUIZ_TIMED_OUT)
        .is_some());
}

#[tokio::test]
async fn idle_sessions_are_swept() {
    let mut config = test_config();
    config.quiz.inactivity_timeout = Duration::ZERO;
    let h = harness_with(config);
    let session = started(&h, 1, 2).await;
    tokio::time::sleep(Duration::from_millis(5)).await;

    assert_eq!(quiz_service::sweep_inactive(&h.state).await.unwrap(), 1);
    assert_eq!(
        quiz_service::get(&h.state, session.id).await.unwrap().state,
        QuizState::TimedOut
    );
    assert_eq!(quiz_service::sweep_inactive(&h.state).await.unwrap(), 0);
}
