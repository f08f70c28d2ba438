use serde::Serialize;
use utoipa::ToSchema;

/// Simple health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Live quiz, truth-or-dare and group sessions cached in memory.
    pub live_sessions: usize,
    /// Matchmaking searches currently running.
    pub searches: usize,
}

impl HealthResponse {
    /// Create a health response indicating the system is operational.
    pub fn ok(live_sessions: usize, searches: usize) -> Self {
        Self {
            status: "ok".to_string(),
            live_sessions,
            searches,
        }
    }

    /// Create a health response indicating the system is in degraded mode.
    pub fn degraded(live_sessions: usize, searches: usize) -> Self {
        Self {
            status: "degraded".to_string(),
            live_sessions,
            searches,
        }
    }
}
