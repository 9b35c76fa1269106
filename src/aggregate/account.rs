//! Account Aggregate
//!
//! Balance state derived from the account's event history.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{AccountEvent, AccountId, Amount, DomainError};

use super::Aggregate;

/// Account state.
///
/// Never persisted as a mutable record in the log; it is either freshly
/// replayed, a cached copy, or a read-model row. `balance` is whatever the
/// history implies and may be negative if the history says so.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account ID (matches the aggregate id of its events)
    pub id: AccountId,

    /// Sum of deposits minus sum of withdrawals
    pub balance: Decimal,

    /// Number of events applied
    #[serde(default)]
    pub version: u64,
}

impl Account {
    /// Check the no-overdraft rule for a withdrawal
    pub fn ensure_can_withdraw(&self, amount: &Amount) -> Result<(), DomainError> {
        if self.balance < amount.value() {
            return Err(DomainError::insufficient_funds(amount.value(), self.balance));
        }
        Ok(())
    }
}

impl Aggregate for Account {
    type Id = AccountId;
    type Event = AccountEvent;

    fn new(id: AccountId) -> Self {
        Self {
            id,
            balance: Decimal::ZERO,
            version: 0,
        }
    }

    fn id(&self) -> &AccountId {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn apply(mut self, event: &AccountEvent) -> Self {
        match event {
            AccountEvent::AccountCreated { .. } => {
                // A repeated creation is a no-op on a fresh account
                self.balance = Decimal::ZERO;
            }
            AccountEvent::MoneyDeposited { amount, .. } => {
                self.balance += *amount;
            }
            AccountEvent::MoneyWithdrawn { amount, .. } => {
                self.balance -= *amount;
            }
        }

        if event.account_id() != &self.id {
            tracing::warn!(
                aggregate_id = %self.id,
                event_account_id = %event.account_id(),
                event_id = %event.event_id(),
                "Replaying event recorded under a different account id"
            );
        }

        self.version += 1;
        self
    }
}
