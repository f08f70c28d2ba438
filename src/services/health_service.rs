use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report degraded mode and live engine load, pinging the store on the way.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.require_store().await {
        Ok(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "session store health check failed");
            }
        }
        Err(_) => warn!("session store unavailable (degraded mode)"),
    }

    let live_sessions =
        state.quiz_sessions().len() + state.tod_games().len() + state.group_sessions().len();
    let searches = state.searches().len();

    if state.is_degraded() {
        HealthResponse::degraded(live_sessions, searches)
    } else {
        HealthResponse::ok(live_sessions, searches)
    }
}
