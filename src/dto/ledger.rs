use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{LedgerTxEntity, TxType, UserId},
    dto::format_system_time,
};

/// Current coin balance of a user.
#[derive(Debug, Serialize, ToSchema)]
pub struct BalanceResponse {
    pub user_id: UserId,
    pub balance: i64,
}

/// One ledger row.
#[derive(Debug, Serialize, ToSchema)]
pub struct LedgerTxView {
    pub id: Uuid,
    pub amount: i64,
    pub tx_type: TxType,
    pub reason: String,
    pub balance_after: i64,
    pub created_at: String,
}

impl From<&LedgerTxEntity> for LedgerTxView {
    fn from(tx: &LedgerTxEntity) -> Self {
        Self {
            id: tx.id,
            amount: tx.amount,
            tx_type: tx.tx_type,
            reason: tx.reason.clone(),
            balance_after: tx.balance_after,
            created_at: format_system_time(tx.created_at),
        }
    }
}

/// Operator grant of coins.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct GrantRequest {
    #[validate(range(min = 1, max = 1_000_000))]
    pub amount: i64,
    #[serde(default)]
    #[validate(length(max = 200))]
    pub reason: String,
}

/// Query parameters of the history route.
#[derive(Debug, Deserialize, utoipa::IntoParams, Validate)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 200))]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}
