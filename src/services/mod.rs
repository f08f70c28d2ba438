/// OpenAPI documentation generation.
pub mod documentation;
/// Worker pool applying user commands in per-user order.
pub mod dispatch;
/// Coin and stats side effects.
pub mod economy;
/// Per-user server-sent event streams.
pub mod event_stream;
/// Room-wide games.
pub mod group_service;
/// Health check service.
pub mod health_service;
/// Matchmaking queue and search loops.
pub mod matchmaking;
/// Event names delivered through the messaging gateway.
pub mod notifications;
/// Pairing lifecycle.
pub mod pairing;
/// 1v1 quiz sessions.
pub mod quiz_service;
/// Storage connection supervisor toggling degraded mode.
pub mod storage_supervisor;
/// Periodic timeout and retention sweeps.
pub mod sweepers;
/// 1v1 truth-or-dare games.
pub mod tod_service;
