#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use pairplay::{
    config::AppConfig,
    dao::{
        models::{
            GameType, Gender, MatchFilters, PairingEntity, ProofKind, SearchProfile, TodChoice,
            TxType, UserId,
        },
        session_store::MemorySessionStore,
    },
    gateways::{
        content::{Challenge, ContentCatalog, Question},
        messaging::RecordingMessenger,
    },
    services::{matchmaking, pairing},
    state::{AppState, SharedState},
};
use tokio::time::{sleep, timeout};

pub struct Harness {
    pub state: SharedState,
    pub store: Arc<MemorySessionStore>,
    pub messenger: Arc<RecordingMessenger>,
}

/// Short polling, instant round breaks and deadlines far enough away to never fire.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.matchmaking.poll_interval = Duration::from_millis(10);
    config.quiz.rounds = 2;
    config.quiz.questions_per_round = 2;
    config.quiz.round_break = Duration::ZERO;
    config.tod.max_rounds = 2;
    config.tod.turn_timeout = Duration::from_secs(600);
    config.tod.warning_lead = Duration::from_secs(30);
    config.dispatch.workers = 2;
    config
}

pub fn catalog() -> ContentCatalog {
    let mut questions = Vec::new();
    for (offset, category) in ["science", "history"].into_iter().enumerate() {
        for n in 0..4u32 {
            let id = offset as u32 * 10 + n + 1;
            questions.push(Question {
                id,
                category: category.to_owned(),
                text: format!("{category} question {id}"),
                options: vec!["a".into(), "b".into(), "c".into()],
                correct: (id % 3) as u8,
            });
        }
    }

    let challenge = |id: u32, kind: TodChoice| Challenge {
        id,
        kind,
        category: "general".into(),
        text: format!("challenge {id}"),
        proof_kind: ProofKind::Text,
        coin_reward: Some(12),
        xp_reward: Some(7),
    };
    let challenges = vec![
        challenge(1, TodChoice::Truth),
        challenge(2, TodChoice::Truth),
        challenge(3, TodChoice::Dare),
        challenge(4, TodChoice::Dare),
    ];
    ContentCatalog::from_parts(questions, challenges)
}

pub fn harness_with(config: AppConfig) -> Harness {
    let store = Arc::new(MemorySessionStore::new());
    let messenger = Arc::new(RecordingMessenger::new());
    let state = AppState::builder(config)
        .store(store.clone())
        .messenger(messenger.clone())
        .content(Arc::new(catalog()))
        .build();
    Harness {
        state,
        store,
        messenger,
    }
}

pub fn harness() -> Harness {
    harness_with(test_config())
}

pub fn profile() -> SearchProfile {
    SearchProfile {
        gender: Gender::Female,
        age: Some(25),
        city: None,
        province: None,
    }
}

pub async fn fund(state: &SharedState, user: UserId, amount: i64) {
    state
        .ledger()
        .credit(user, amount, TxType::Grant, "test funds".into())
        .await
        .expect("grant");
}

pub async fn balance(state: &SharedState, user: UserId) -> i64 {
    state.ledger().balance(user).await.expect("balance")
}

/// Queue both users for `game_type` and wait until their search loops pair them.
pub async fn pair(harness: &Harness, a: UserId, b: UserId, game_type: GameType) -> PairingEntity {
    for user in [a, b] {
        fund(&harness.state, user, 100).await;
        matchmaking::enqueue(
            &harness.state,
            user,
            profile(),
            MatchFilters::default(),
            game_type,
        )
        .await
        .expect("enqueue");
    }
    wait_for_pairing(&harness.state, a).await
}

pub async fn wait_for_pairing(state: &SharedState, user: UserId) -> PairingEntity {
    timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(pairing) = pairing::current(state, user).await {
                return pairing;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("pairing within five seconds")
}

/// Poll `check` until it holds, for state reached by background tasks.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    timeout(Duration::from_secs(5), async {
        while !check().await {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition within five seconds");
}
