//! Best-effort coin and stats side effects of game transitions.
//!
//! A transition that already committed is never rolled back because a payout failed; the
//! failure is logged instead.

use tracing::warn;

use crate::{
    dao::models::{StatsDelta, TxType, UserId},
    state::SharedState,
};

/// Credit `amount` coins. Zero or negative amounts are skipped.
pub async fn pay(state: &SharedState, user: UserId, amount: i64, tx_type: TxType, reason: &str) {
    if amount <= 0 {
        return;
    }
    if let Err(err) = state
        .ledger()
        .credit(user, amount, tx_type, reason.to_owned())
        .await
    {
        warn!(user_id = user, amount, reason, error = %err, "payout failed");
    }
}

/// Debit up to `amount` coins, never more than the current balance. Returns what was taken.
pub async fn penalize(state: &SharedState, user: UserId, amount: i64, reason: &str) -> i64 {
    if amount <= 0 {
        return 0;
    }
    let balance = match state.ledger().balance(user).await {
        Ok(balance) => balance,
        Err(err) => {
            warn!(user_id = user, amount, reason, error = %err, "penalty skipped");
            return 0;
        }
    };
    let taken = amount.min(balance);
    if taken <= 0 {
        return 0;
    }
    match state
        .ledger()
        .debit(user, taken, TxType::Penalty, reason.to_owned())
        .await
    {
        Ok(_) => taken,
        Err(err) => {
            warn!(user_id = user, amount = taken, reason, error = %err, "penalty failed");
            0
        }
    }
}

/// Apply a stats delta, logging failures.
pub async fn record_stats(state: &SharedState, user: UserId, delta: StatsDelta) {
    let Some(store) = state.session_store().await else {
        warn!(user_id = user, "stats update skipped in degraded mode");
        return;
    };
    if let Err(err) = store.apply_stats(user, delta).await {
        warn!(user_id = user, error = %err, "stats update failed");
    }
}
