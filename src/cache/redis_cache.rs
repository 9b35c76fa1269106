//! Redis-backed account cache
//!
//! Key = prefix + account id, value = JSON-encoded [`Account`], expiry via
//! `SET EX`. The prefix keeps account keys apart from the event streams
//! when both live in one Redis database.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::time::Duration;

use crate::aggregate::Account;
use crate::domain::AccountId;

use super::{AccountCache, CacheError};

/// Account cache stored in Redis
#[derive(Clone)]
pub struct RedisAccountCache {
    conn_manager: ConnectionManager,
    key_prefix: String,
}

impl RedisAccountCache {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns error if the URL is invalid or the first connection fails.
    pub async fn connect(redis_url: &str, key_prefix: impl Into<String>) -> Result<Self, CacheError> {
        let client = Client::open(redis_url)
            .map_err(|e| CacheError::Backend(format!("Failed to create Redis client: {e}")))?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            CacheError::Backend(format!("Failed to create Redis connection manager: {e}"))
        })?;

        Ok(Self::from_manager(conn_manager, key_prefix))
    }

    pub fn from_manager(conn_manager: ConnectionManager, key_prefix: impl Into<String>) -> Self {
        Self {
            conn_manager,
            key_prefix: key_prefix.into(),
        }
    }

    fn key_for(&self, account_id: &AccountId) -> String {
        format!("{}{}", self.key_prefix, account_id)
    }
}

#[async_trait]
impl AccountCache for RedisAccountCache {
    async fn get(&self, account_id: &AccountId) -> Result<Option<Account>, CacheError> {
        let mut conn = self.conn_manager.clone();

        let raw: Option<String> = conn
            .get(self.key_for(account_id))
            .await
            .map_err(|e| CacheError::Backend(format!("GET failed: {e}")))?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        account_id: &AccountId,
        account: &Account,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut conn = self.conn_manager.clone();
        let json = serde_json::to_string(account)?;
        let ttl_seconds = ttl.as_secs().max(1);

        let _: () = conn
            .set_ex(self.key_for(account_id), json, ttl_seconds)
            .await
            .map_err(|e| CacheError::Backend(format!("SET EX failed: {e}")))?;

        tracing::trace!(account_id = %account_id, ttl_seconds, "Cached account");
        Ok(())
    }

    async fn invalidate(&self, account_id: &AccountId) -> Result<(), CacheError> {
        let mut conn = self.conn_manager.clone();

        let _: () = conn
            .del(self.key_for(account_id))
            .await
            .map_err(|e| CacheError::Backend(format!("DEL failed: {e}")))?;

        Ok(())
    }
}
