//! Per-aggregate command serialization.
//!
//! Commands against one account id run one at a time, so a withdrawal's
//! balance check and its append cannot interleave with another command on
//! the same account. Different ids never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::domain::AccountId;

type Slot = Arc<AsyncMutex<()>>;

/// Map of account id to its command lock. Entries are removed once no
/// command holds or waits on them.
#[derive(Debug, Default)]
pub struct AggregateLocks {
    slots: Mutex<HashMap<AccountId, Slot>>,
}

/// Held for the duration of one command
#[derive(Debug)]
pub struct AggregateGuard<'a> {
    locks: &'a AggregateLocks,
    account_id: AccountId,
    slot: Slot,
    guard: Option<OwnedMutexGuard<()>>,
}

impl AggregateLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `account_id`
    pub async fn lock(&self, account_id: &AccountId) -> AggregateGuard<'_> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.entry(account_id.clone()).or_default().clone()
        };

        let guard = slot.clone().lock_owned().await;

        AggregateGuard {
            locks: self,
            account_id: account_id.clone(),
            slot,
            guard: Some(guard),
        }
    }

    /// Number of ids with a live lock entry
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for AggregateGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();

        let mut slots = self.locks.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one here: nobody else is waiting
        if Arc::strong_count(&self.slot) == 2 {
            slots.remove(&self.account_id);
        }
    }
}
