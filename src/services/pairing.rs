//! Pairing lifecycle: timeout sweep, end, chat relay and the cascade into owned games.

use std::time::SystemTime;

use tracing::{info, warn};

use crate::{
    dao::models::{PairingEntity, PairingStatus, StatsDelta, TxType, UserId, UserStatus},
    dto::matchmaking::{ChatMessageEvent, PairingEndedEvent, PairingTimeoutEvent},
    error::ServiceError,
    gateways::messaging::Notification,
    services::{economy, matchmaking, notifications, quiz_service, tod_service},
    state::SharedState,
};

/// Open pairing of `user`, or `NotFound`.
pub async fn current(state: &SharedState, user: UserId) -> Result<PairingEntity, ServiceError> {
    let store = state.require_store().await?;
    store
        .find_open_pairing(user)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("user {user} has no open pairing")))
}

/// Close the open pairing of `user`, reward both sides and end any game it owns.
pub async fn end(state: &SharedState, user: UserId) -> Result<PairingEntity, ServiceError> {
    let store = state.require_store().await?;
    let mut pairing = current(state, user).await?;
    let now = SystemTime::now();

    let moved = store
        .transition_pairing(
            pairing.id,
            vec![PairingStatus::Active, PairingStatus::Timeout],
            PairingStatus::Ended,
            Some(user),
            now,
        )
        .await?;
    if !moved {
        return Err(ServiceError::InvalidState(format!(
            "pairing {} already ended",
            pairing.id
        )));
    }
    pairing.status = PairingStatus::Ended;
    pairing.ended_at = Some(now);
    pairing.ended_by = Some(user);
    info!(pairing_id = %pairing.id, ended_by = user, "pairing ended");

    let xp = state.config().matchmaking.end_xp;
    for participant in [pairing.user_a, pairing.user_b] {
        if xp > 0 {
            economy::record_stats(state, participant, StatsDelta::xp(xp)).await;
        }
        matchmaking::set_status(state, participant, UserStatus::Online).await;
        state.messenger().notify(
            participant,
            Notification::new(
                notifications::PAIRING_ENDED,
                &PairingEndedEvent {
                    pairing_id: pairing.id,
                    ended_by: user,
                    xp,
                },
            ),
        );
    }

    cascade(state, &pairing).await;
    Ok(pairing)
}

/// End the live quiz and truth-or-dare game of a closed pairing, without payouts.
async fn cascade(state: &SharedState, pairing: &PairingEntity) {
    let Some(store) = state.session_store().await else {
        return;
    };

    match store.find_quiz_session_by_pairing(pairing.id).await {
        Ok(Some(session)) if !session.state.is_terminal() => {
            if let Err(err) = quiz_service::abandon(state, session.id).await {
                warn!(session_id = %session.id, error = %err, "failed to close quiz of ended pairing");
            }
        }
        Ok(_) => {}
        Err(err) => warn!(pairing_id = %pairing.id, error = %err, "quiz lookup failed"),
    }

    match store.find_tod_game_by_pairing(pairing.id).await {
        Ok(Some(game)) if !game.state.is_terminal() => {
            if let Err(err) = tod_service::abandon(state, game.id).await {
                warn!(game_id = %game.id, error = %err, "failed to close game of ended pairing");
            }
        }
        Ok(_) => {}
        Err(err) => warn!(pairing_id = %pairing.id, error = %err, "game lookup failed"),
    }
}

/// Move every active pairing past its window to `Timeout`. Returns how many moved.
pub async fn sweep_timeouts(state: &SharedState) -> Result<usize, ServiceError> {
    let store = state.require_store().await?;
    let now = SystemTime::now();
    let message_cost = state.config().matchmaking.message_cost;
    let mut moved = 0;

    for pairing in store.list_expired_pairings(now).await? {
        let changed = store
            .transition_pairing(
                pairing.id,
                vec![PairingStatus::Active],
                PairingStatus::Timeout,
                None,
                now,
            )
            .await?;
        if !changed {
            continue;
        }
        moved += 1;
        info!(pairing_id = %pairing.id, "pairing window elapsed");

        for participant in [pairing.user_a, pairing.user_b] {
            state.messenger().notify(
                participant,
                Notification::new(
                    notifications::PAIRING_TIMEOUT,
                    &PairingTimeoutEvent {
                        pairing_id: pairing.id,
                        message_cost,
                    },
                ),
            );
        }
    }
    Ok(moved)
}

/// Forward a chat line to the partner, charging for it once the pairing timed out.
pub async fn relay_message(
    state: &SharedState,
    user: UserId,
    text: String,
) -> Result<PairingEntity, ServiceError> {
    let pairing = current(state, user).await?;
    let Some(partner) = pairing.partner_of(user) else {
        return Err(ServiceError::Internal(format!(
            "pairing {} does not involve user {user}",
            pairing.id
        )));
    };

    let cost = state.config().matchmaking.message_cost;
    if pairing.status == PairingStatus::Timeout && cost > 0 {
        state
            .ledger()
            .debit(user, cost, TxType::MessageCost, "message after pairing timeout".into())
            .await?;
    }

    state.messenger().notify(
        partner,
        Notification::new(
            notifications::CHAT_MESSAGE,
            &ChatMessageEvent {
                pairing_id: pairing.id,
                from: user,
                text,
            },
        ),
    );
    Ok(pairing)
}
