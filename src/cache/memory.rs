//! In-process account cache

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::aggregate::Account;
use crate::domain::AccountId;

use super::{AccountCache, CacheError};

#[derive(Debug, Clone)]
struct Entry {
    account: Account,
    expires_at: Instant,
}

/// HashMap cache with per-entry expiry, for tests and single-node runs
#[derive(Debug, Default)]
pub struct InMemoryAccountCache {
    entries: RwLock<HashMap<AccountId, Entry>>,
}

impl InMemoryAccountCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl AccountCache for InMemoryAccountCache {
    async fn get(&self, account_id: &AccountId) -> Result<Option<Account>, CacheError> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(account_id) {
                Some(entry) if entry.expires_at > now => return Ok(Some(entry.account.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // Expired: drop it so the map does not grow with dead entries
        let mut entries = self.entries.write().await;
        if entries.get(account_id).is_some_and(|e| e.expires_at <= now) {
            entries.remove(account_id);
        }
        Ok(None)
    }

    async fn set(
        &self,
        account_id: &AccountId,
        account: &Account,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let entry = Entry {
            account: account.clone(),
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().await.insert(account_id.clone(), entry);
        Ok(())
    }

    async fn invalidate(&self, account_id: &AccountId) -> Result<(), CacheError> {
        self.entries.write().await.remove(account_id);
        Ok(())
    }
}
