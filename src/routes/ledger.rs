use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dao::models::{TxType, UserId},
    dto::ledger::{BalanceResponse, GrantRequest, HistoryQuery, LedgerTxView},
    error::{AppError, ServiceError},
    state::SharedState,
};

/// Coin balance and history routes.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/users/{user_id}/balance", get(balance))
        .route("/users/{user_id}/transactions", get(history))
        .route("/users/{user_id}/grants", post(grant))
}

#[utoipa::path(
    get,
    path = "/users/{user_id}/balance",
    tag = "ledger",
    params(("user_id" = i64, Path, description = "User")),
    responses(
        (status = 200, description = "Current balance", body = BalanceResponse),
        (status = 503, description = "Degraded mode")
    )
)]
pub async fn balance(
    State(state): State<SharedState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<BalanceResponse>, AppError> {
    let balance = state
        .ledger()
        .balance(user_id)
        .await
        .map_err(ServiceError::from)?;
    Ok(Json(BalanceResponse { user_id, balance }))
}

/// Most recent transactions first.
#[utoipa::path(
    get,
    path = "/users/{user_id}/transactions",
    tag = "ledger",
    params(("user_id" = i64, Path, description = "User"), HistoryQuery),
    responses((status = 200, description = "Ledger rows", body = [LedgerTxView]))
)]
pub async fn history(
    State(state): State<SharedState>,
    Path(user_id): Path<UserId>,
    Valid(Query(query)): Valid<Query<HistoryQuery>>,
) -> Result<Json<Vec<LedgerTxView>>, AppError> {
    let rows = state
        .ledger()
        .history(user_id, query.limit)
        .await
        .map_err(ServiceError::from)?;
    Ok(Json(rows.iter().map(LedgerTxView::from).collect()))
}

/// Operator credit, recorded as a grant.
#[utoipa::path(
    post,
    path = "/users/{user_id}/grants",
    tag = "ledger",
    params(("user_id" = i64, Path, description = "User")),
    request_body = GrantRequest,
    responses((status = 200, description = "Balance after the grant", body = BalanceResponse))
)]
pub async fn grant(
    State(state): State<SharedState>,
    Path(user_id): Path<UserId>,
    Valid(Json(payload)): Valid<Json<GrantRequest>>,
) -> Result<Json<BalanceResponse>, AppError> {
    let reason = if payload.reason.is_empty() {
        "operator grant".to_owned()
    } else {
        payload.reason
    };
    let balance = state
        .ledger()
        .credit(user_id, payload.amount, TxType::Grant, reason)
        .await
        .map_err(ServiceError::from)?;
    Ok(Json(BalanceResponse { user_id, balance }))
}
