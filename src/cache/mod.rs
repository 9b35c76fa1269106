//! Read-through cache module
//!
//! Time-bounded snapshots of account state. Purely an optimization: a miss
//! never means "account does not exist", callers fall through to replay.

mod memory;
mod redis_cache;

use async_trait::async_trait;
use std::time::Duration;

use crate::aggregate::Account;
use crate::domain::AccountId;

pub use self::memory::InMemoryAccountCache;
pub use self::redis_cache::RedisAccountCache;

/// Default lifetime of a cached account
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(10 * 60);

/// Cache errors. Callers log these and carry on.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache call timed out")]
    Timeout,
}

/// Keyed account snapshots with TTL
#[async_trait]
pub trait AccountCache: Send + Sync {
    async fn get(&self, account_id: &AccountId) -> Result<Option<Account>, CacheError>;

    async fn set(&self, account_id: &AccountId, account: &Account, ttl: Duration)
        -> Result<(), CacheError>;

    async fn invalidate(&self, account_id: &AccountId) -> Result<(), CacheError>;
}
