/// Persisted entity definitions.
pub mod models;
/// Session store trait and its memory and MongoDB backends.
pub mod session_store;
/// Backend-agnostic storage errors.
pub mod storage;
