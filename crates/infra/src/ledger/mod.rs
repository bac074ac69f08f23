//! Credit ledger: per-user usage counter with a guarded decrement.
//!
//! The streaming path checks with [`CreditLedger::reserve`] before anything is
//! written and decrements with [`CreditLedger::commit`] only after the model
//! call completed and its content was stored. Concurrent requests from one
//! user may both pass the check; the decrement itself never takes a balance
//! below zero.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use vectorsmith_core::UserId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("user not found")]
    UserNotFound,

    #[error("insufficient credit")]
    InsufficientCredit,

    #[error("ledger storage error: {0}")]
    Storage(String),
}

/// Proof that a pre-check passed for one request.
///
/// Not `Clone`: committing consumes it, so a request can decrement at most
/// once.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a reservation that is never committed does not charge the user"]
pub struct Reservation {
    user_id: UserId,
    balance_at_check: i64,
}

impl Reservation {
    pub fn new(user_id: UserId, balance_at_check: i64) -> Self {
        Self {
            user_id,
            balance_at_check,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn balance_at_check(&self) -> i64 {
        self.balance_at_check
    }
}

#[async_trait]
pub trait CreditLedger: Send + Sync {
    async fn balance(&self, user_id: UserId) -> Result<i64, LedgerError>;

    /// Pre-check: the user exists and has a positive balance. Writes nothing.
    async fn reserve(&self, user_id: UserId) -> Result<Reservation, LedgerError> {
        let balance = self.balance(user_id).await?;
        if balance <= 0 {
            return Err(LedgerError::InsufficientCredit);
        }
        Ok(Reservation::new(user_id, balance))
    }

    /// Guarded decrement by one; returns the new balance.
    ///
    /// Fails with `InsufficientCredit` instead of going negative.
    async fn commit(&self, reservation: Reservation) -> Result<i64, LedgerError>;
}

#[async_trait]
impl<L> CreditLedger for Arc<L>
where
    L: CreditLedger + ?Sized,
{
    async fn balance(&self, user_id: UserId) -> Result<i64, LedgerError> {
        (**self).balance(user_id).await
    }

    async fn reserve(&self, user_id: UserId) -> Result<Reservation, LedgerError> {
        (**self).reserve(user_id).await
    }

    async fn commit(&self, reservation: Reservation) -> Result<i64, LedgerError> {
        (**self).commit(reservation).await
    }
}
