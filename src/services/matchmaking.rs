//! Matchmaking queue: paid enqueue, background search loops and atomic pairing.

use std::time::{Duration, SystemTime};

use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::models::{
        GameType, MatchFilters, PairingEntity, PairingOutcome, PairingStatus, QueueEntryEntity,
        SearchProfile, TxType, UserId, UserStatus,
    },
    dto::matchmaking::{PairingFoundEvent, SearchEndedEvent, SearchingEvent},
    dto::format_system_time,
    error::ServiceError,
    gateways::messaging::{Control, Notification},
    services::{economy, notifications, quiz_service, tod_service},
    state::{SharedState, matching},
};

/// Result of one candidate lookup of a search loop.
#[derive(Debug)]
pub enum SearchStep {
    /// The searcher's entry is gone: cancelled, expired or paired by the other side.
    Gone,
    /// No eligible candidate yet.
    Waiting,
    Paired(PairingEntity),
}

/// Charge the search cost, queue `user` and start its search loop.
pub async fn enqueue(
    state: &SharedState,
    user: UserId,
    profile: SearchProfile,
    filters: MatchFilters,
    game_type: GameType,
) -> Result<QueueEntryEntity, ServiceError> {
    let store = state.require_store().await?;

    if store.find_queue_entry(user).await?.is_some() {
        return Err(ServiceError::AlreadyQueued);
    }
    if store.find_open_pairing(user).await?.is_some() {
        return Err(ServiceError::InvalidInput(format!(
            "user {user} is already in a pairing"
        )));
    }

    let cost = state.config().matchmaking.search_cost;
    if cost > 0 {
        state
            .ledger()
            .debit(user, cost, TxType::Matchmaking, "matchmaking search".into())
            .await?;
    }

    let entry = QueueEntryEntity {
        user_id: user,
        profile,
        filters,
        game_type,
        coins_paid: cost.max(0),
        enqueued_at: SystemTime::now(),
    };

    let inserted = match store.insert_queue_entry(entry.clone()).await {
        Ok(inserted) => inserted,
        Err(err) => {
            refund(state, user, entry.coins_paid, "matchmaking enqueue failed").await;
            return Err(err.into());
        }
    };
    if !inserted {
        refund(state, user, entry.coins_paid, "duplicate matchmaking search").await;
        return Err(ServiceError::AlreadyQueued);
    }

    set_status(state, user, UserStatus::Searching).await;
    info!(user_id = user, ?game_type, coins_paid = entry.coins_paid, "user queued");

    state.messenger().notify(
        user,
        Notification::new(
            notifications::MATCH_SEARCHING,
            &SearchingEvent {
                game_type,
                coins_paid: entry.coins_paid,
            },
        )
        .with_controls(vec![Control::new("cancel", "matchmaking")]),
    );

    spawn_search(state, user, state.config().matchmaking.search_timeout);
    Ok(entry)
}

/// Leave the queue with a full refund.
pub async fn cancel(state: &SharedState, user: UserId) -> Result<QueueEntryEntity, ServiceError> {
    let store = state.require_store().await?;
    let entry = store
        .remove_queue_entry(user)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("no queue entry for user {user}")))?;

    state.searches().cancel(&user);
    refund(state, user, entry.coins_paid, "matchmaking cancelled").await;
    set_status(state, user, UserStatus::Online).await;
    info!(user_id = user, refunded = entry.coins_paid, "search cancelled");

    state.messenger().notify(
        user,
        Notification::new(
            notifications::MATCH_CANCELLED,
            &SearchEndedEvent {
                refunded: entry.coins_paid,
            },
        ),
    );
    Ok(entry)
}

/// Look for a partner for `user` and pair them if one is found.
pub async fn try_match(state: &SharedState, user: UserId) -> Result<SearchStep, ServiceError> {
    let store = state.require_store().await?;
    let Some(me) = store.find_queue_entry(user).await? else {
        return Ok(SearchStep::Gone);
    };

    let queue = store.list_queue(me.game_type).await?;
    let Some(candidate) = matching::find_candidate(&me, &queue) else {
        return Ok(SearchStep::Waiting);
    };

    match create_pairing(state, &me, candidate).await? {
        Some(pairing) => Ok(SearchStep::Paired(pairing)),
        None => Ok(SearchStep::Waiting),
    }
}

/// Consume both entries and store the pairing as one unit.
///
/// Returns `None` when one of the entries vanished in the meantime. A storage failure
/// refunds both sides and returns them to `online`.
pub async fn create_pairing(
    state: &SharedState,
    a: &QueueEntryEntity,
    b: &QueueEntryEntity,
) -> Result<Option<PairingEntity>, ServiceError> {
    let store = state.require_store().await?;
    let now = SystemTime::now();
    let pairing = PairingEntity {
        id: Uuid::new_v4(),
        user_a: a.user_id,
        user_b: b.user_id,
        game_type: a.game_type,
        status: PairingStatus::Active,
        started_at: now,
        timeout_at: now + state.config().matchmaking.pairing_timeout,
        ended_at: None,
        ended_by: None,
    };

    match store.create_pairing(pairing).await {
        Ok(PairingOutcome::Created(pairing)) => {
            info!(
                pairing_id = %pairing.id,
                user_a = pairing.user_a,
                user_b = pairing.user_b,
                game_type = ?pairing.game_type,
                "pairing created"
            );
            on_paired(state, &pairing).await;
            Ok(Some(pairing))
        }
        Ok(PairingOutcome::Conflict) => {
            debug!(user_a = a.user_id, user_b = b.user_id, "pairing conflict; retrying later");
            Ok(None)
        }
        Err(err) => {
            warn!(
                user_a = a.user_id,
                user_b = b.user_id,
                error = %err,
                "pairing creation failed; refunding both sides"
            );
            for entry in [a, b] {
                abort_search(state, entry).await;
            }
            Err(err.into())
        }
    }
}

async fn on_paired(state: &SharedState, pairing: &PairingEntity) {
    for (user, partner) in [
        (pairing.user_a, pairing.user_b),
        (pairing.user_b, pairing.user_a),
    ] {
        set_status(state, user, UserStatus::InChat).await;
        state.messenger().notify(
            user,
            Notification::new(
                notifications::PAIRING_FOUND,
                &PairingFoundEvent {
                    pairing_id: pairing.id,
                    partner,
                    game_type: pairing.game_type,
                    timeout_at: format_system_time(pairing.timeout_at),
                },
            )
            .with_controls(vec![Control::new("end", pairing.id.to_string())]),
        );
    }

    let started = match pairing.game_type {
        GameType::Chat => Ok(()),
        GameType::Quiz => quiz_service::start_session(state, pairing.id)
            .await
            .map(|_| ()),
        GameType::TruthOrDare => tod_service::start_game(state, pairing.id).await.map(|_| ()),
    };
    if let Err(err) = started {
        warn!(pairing_id = %pairing.id, error = %err, "failed to start game for new pairing");
    }
}

/// Drop a search whose pairing could not be stored: refund what is still queued.
async fn abort_search(state: &SharedState, entry: &QueueEntryEntity) {
    let user = entry.user_id;
    let refunded = match state.require_store().await {
        Ok(store) => match store.remove_queue_entry(user).await {
            Ok(Some(removed)) => removed.coins_paid,
            // already refunded by a concurrent cancel
            Ok(None) => 0,
            Err(_) => entry.coins_paid,
        },
        Err(_) => entry.coins_paid,
    };

    refund(state, user, refunded, "pairing failed").await;
    set_status(state, user, UserStatus::Online).await;
    state.messenger().notify(
        user,
        Notification::new(notifications::MATCH_FAILED, &SearchEndedEvent { refunded }),
    );
}

/// Remove an expired search and refund half of what was paid.
pub async fn expire_search(state: &SharedState, user: UserId) -> Result<Option<i64>, ServiceError> {
    let store = state.require_store().await?;
    let Some(entry) = store.remove_queue_entry(user).await? else {
        return Ok(None);
    };

    let refunded = entry.coins_paid / 2;
    refund(state, user, refunded, "matchmaking timeout").await;
    set_status(state, user, UserStatus::Online).await;
    info!(user_id = user, refunded, "search timed out");

    state.messenger().notify(
        user,
        Notification::new(notifications::MATCH_TIMEOUT, &SearchEndedEvent { refunded }),
    );
    Ok(Some(refunded))
}

fn spawn_search(state: &SharedState, user: UserId, remaining: Duration) {
    let loop_state = state.clone();
    let deadline = Instant::now() + remaining;
    state
        .searches()
        .spawn(user, async move { search_loop(loop_state, user, deadline).await });
}

/// Restart the search loop of every queued user that has none, expiring entries whose
/// window already closed. Returns how many entries were resumed or expired.
pub async fn resume_searches(state: &SharedState) -> Result<usize, ServiceError> {
    let store = state.require_store().await?;
    let timeout = state.config().matchmaking.search_timeout;
    let now = SystemTime::now();
    let mut handled = 0;

    for game_type in GameType::ALL {
        for entry in store.list_queue(game_type).await? {
            let user = entry.user_id;
            if state.searches().is_pending(&user) {
                continue;
            }
            let remaining = (entry.enqueued_at + timeout)
                .duration_since(now)
                .unwrap_or(Duration::ZERO);
            if remaining.is_zero() {
                if let Err(err) = expire_search(state, user).await {
                    warn!(user_id = user, error = %err, "failed to expire orphaned search");
                    continue;
                }
            } else {
                debug!(user_id = user, remaining_ms = remaining.as_millis() as u64, "resuming search");
                spawn_search(state, user, remaining);
            }
            handled += 1;
        }
    }
    Ok(handled)
}

/// Poll for a candidate until paired, cancelled or `deadline`.
async fn search_loop(state: SharedState, user: UserId, deadline: Instant) {
    let cfg = state.config().matchmaking.clone();
    // A failed pairing attempt restores the entries it took, so one missing read is not final.
    let mut missing = false;

    loop {
        match try_match(&state, user).await {
            Ok(SearchStep::Gone) if missing => {
                debug!(user_id = user, "search entry gone; stopping");
                return;
            }
            Ok(SearchStep::Gone) => missing = true,
            Ok(SearchStep::Paired(pairing)) => {
                debug!(user_id = user, pairing_id = %pairing.id, "search finished");
                return;
            }
            Ok(SearchStep::Waiting) => missing = false,
            Err(err) => warn!(user_id = user, error = %err, "candidate lookup failed"),
        }

        if Instant::now() >= deadline && !missing {
            if let Err(err) = expire_search(&state, user).await {
                warn!(user_id = user, error = %err, "failed to expire search");
            }
            return;
        }
        sleep(cfg.poll_interval).await;
    }
}

async fn refund(state: &SharedState, user: UserId, amount: i64, reason: &str) {
    economy::pay(state, user, amount, TxType::MatchRefund, reason).await;
}

pub(crate) async fn set_status(state: &SharedState, user: UserId, status: UserStatus) {
    let Some(store) = state.session_store().await else {
        return;
    };
    if let Err(err) = store.set_user_status(user, status).await {
        warn!(user_id = user, ?status, error = %err, "failed to update user status");
    }
}
