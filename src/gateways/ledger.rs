use futures::future::BoxFuture;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    dao::{
        models::{LedgerOutcome, LedgerTxEntity, TxType, UserId},
        storage::StorageError,
    },
    state::store::StoreSlot,
};

/// Errors surfaced by the coin ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The debit would overdraw the balance.
    #[error("insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds { balance: i64, required: i64 },
    /// Movements must be strictly positive; the direction is given by the call.
    #[error("invalid amount {0}")]
    InvalidAmount(i64),
    /// The backing store failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// No storage backend is installed.
    #[error("ledger unavailable in degraded mode")]
    Degraded,
}

/// Coin balances. Every mutation writes exactly one transaction row.
pub trait LedgerGateway: Send + Sync {
    fn balance(&self, user: UserId) -> BoxFuture<'static, Result<i64, LedgerError>>;
    /// Take `amount` coins from `user`; returns the new balance.
    fn debit(
        &self,
        user: UserId,
        amount: i64,
        tx_type: TxType,
        reason: String,
    ) -> BoxFuture<'static, Result<i64, LedgerError>>;
    /// Give `amount` coins to `user`; returns the new balance.
    fn credit(
        &self,
        user: UserId,
        amount: i64,
        tx_type: TxType,
        reason: String,
    ) -> BoxFuture<'static, Result<i64, LedgerError>>;
    fn history(
        &self,
        user: UserId,
        limit: usize,
    ) -> BoxFuture<'static, Result<Vec<LedgerTxEntity>, LedgerError>>;
}

/// Ledger backed by the installed session store.
#[derive(Clone)]
pub struct StoreLedger {
    slot: StoreSlot,
}

impl StoreLedger {
    pub fn new(slot: StoreSlot) -> Self {
        Self { slot }
    }

    fn apply(
        &self,
        user: UserId,
        amount: i64,
        tx_type: TxType,
        reason: String,
    ) -> BoxFuture<'static, Result<i64, LedgerError>> {
        let slot = self.slot.clone();
        Box::pin(async move {
            let store = slot.get().await.ok_or(LedgerError::Degraded)?;
            match store.ledger_apply(user, amount, tx_type, reason).await? {
                LedgerOutcome::Applied { balance } => {
                    debug!(user_id = user, amount, ?tx_type, balance, "ledger movement applied");
                    Ok(balance)
                }
                LedgerOutcome::InsufficientFunds { balance } => {
                    warn!(user_id = user, amount, balance, "debit refused");
                    Err(LedgerError::InsufficientFunds {
                        balance,
                        required: -amount,
                    })
                }
            }
        })
    }
}

fn positive(amount: i64) -> Result<i64, LedgerError> {
    if amount > 0 {
        Ok(amount)
    } else {
        Err(LedgerError::InvalidAmount(amount))
    }
}

impl LedgerGateway for StoreLedger {
    fn balance(&self, user: UserId) -> BoxFuture<'static, Result<i64, LedgerError>> {
        let slot = self.slot.clone();
        Box::pin(async move {
            let store = slot.get().await.ok_or(LedgerError::Degraded)?;
            Ok(store.ledger_balance(user).await?)
        })
    }

    fn debit(
        &self,
        user: UserId,
        amount: i64,
        tx_type: TxType,
        reason: String,
    ) -> BoxFuture<'static, Result<i64, LedgerError>> {
        match positive(amount) {
            Ok(amount) => self.apply(user, -amount, tx_type, reason),
            Err(err) => Box::pin(async move { Err(err) }),
        }
    }

    fn credit(
        &self,
        user: UserId,
        amount: i64,
        tx_type: TxType,
        reason: String,
    ) -> BoxFuture<'static, Result<i64, LedgerError>> {
        match positive(amount) {
            Ok(amount) => self.apply(user, amount, tx_type, reason),
            Err(err) => Box::pin(async move { Err(err) }),
        }
    }

    fn history(
        &self,
        user: UserId,
        limit: usize,
    ) -> BoxFuture<'static, Result<Vec<LedgerTxEntity>, LedgerError>> {
        let slot = self.slot.clone();
        Box::pin(async move {
            let store = slot.get().await.ok_or(LedgerError::Degraded)?;
            Ok(store.ledger_history(user, limit).await?)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::dao::session_store::MemorySessionStore;

    fn ledger() -> StoreLedger {
        StoreLedger::new(StoreSlot::with_store(Arc::new(MemorySessionStore::new())))
    }

    #[tokio::test]
    async fn debit_refused_without_funds() {
        let ledger = ledger();
        ledger
            .credit(1, 4, TxType::Grant, "welcome".into())
            .await
            .unwrap();

        let err = ledger
            .debit(1, 5, TxType::Matchmaking, "search".into())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientFunds {
                balance: 4,
                required: 5
            }
        ));
        assert_eq!(ledger.balance(1).await.unwrap(), 4);
        assert_eq!(ledger.history(1, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn zero_and_negative_amounts_are_rejected() {
        let ledger = ledger();
        assert!(matches!(
            ledger.credit(1, 0, TxType::Grant, String::new()).await,
            Err(LedgerError::InvalidAmount(0))
        ));
        assert!(matches!(
            ledger.debit(1, -3, TxType::Penalty, String::new()).await,
            Err(LedgerError::InvalidAmount(-3))
        ));
    }

    #[tokio::test]
    async fn empty_slot_is_degraded() {
        let ledger = StoreLedger::new(StoreSlot::default());
        assert!(matches!(
            ledger.balance(1).await,
            Err(LedgerError::Degraded)
        ));
    }
}
