//! Periodic catch-up work: orphaned searches, pairing windows, game deadlines whose timers
//! were lost, idle quizzes and the action token log.

use std::sync::Weak;

use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::{
    services::{matchmaking, pairing, quiz_service, tod_service},
    state::{AppState, SharedState},
};

/// Totals of one sweep pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Orphaned searches restarted or expired.
    pub searches_recovered: usize,
    pub pairings_timed_out: usize,
    /// Quiz deadlines fired without their timer.
    pub quiz_deadlines: usize,
    pub tod_deadlines: usize,
    /// Idle quizzes timed out.
    pub quizzes_closed: usize,
    pub actions_purged: u64,
}

/// Run every sweep once. Failures are logged and the remaining sweeps still run.
pub async fn sweep_once(state: &SharedState) -> SweepReport {
    let mut report = SweepReport::default();

    match matchmaking::resume_searches(state).await {
        Ok(recovered) => report.searches_recovered = recovered,
        Err(err) => warn!(error = %err, "search recovery sweep failed"),
    }
    match pairing::sweep_timeouts(state).await {
        Ok(moved) => report.pairings_timed_out = moved,
        Err(err) => warn!(error = %err, "pairing timeout sweep failed"),
    }
    match quiz_service::sweep_due(state).await {
        Ok(handled) => report.quiz_deadlines = handled,
        Err(err) => warn!(error = %err, "quiz deadline sweep failed"),
    }
    match tod_service::sweep_due(state).await {
        Ok(handled) => report.tod_deadlines = handled,
        Err(err) => warn!(error = %err, "truth-or-dare deadline sweep failed"),
    }
    match quiz_service::sweep_inactive(state).await {
        Ok(closed) => report.quizzes_closed = closed,
        Err(err) => warn!(error = %err, "quiz inactivity sweep failed"),
    }
    match tod_service::purge_actions(state).await {
        Ok(purged) => report.actions_purged = purged,
        Err(err) => warn!(error = %err, "action log purge failed"),
    }
    report
}

/// Sweep on the configured interval until the state is dropped. The first pass runs
/// immediately, which re-arms whatever a previous process left behind.
pub async fn run(state: Weak<AppState>) {
    let Some(period) = state
        .upgrade()
        .map(|state| state.config().dispatch.sweep_interval)
    else {
        return;
    };
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_ms = period.as_millis() as u64, "sweepers started");

    loop {
        ticker.tick().await;
        let Some(state) = state.upgrade() else {
            debug!("state dropped; stopping sweepers");
            return;
        };
        if state.is_degraded() {
            debug!("skipping sweep in degraded mode");
            continue;
        }
        let report = sweep_once(&state).await;
        if report != SweepReport::default() {
            debug!(?report, "sweep pass finished");
        }
    }
}
