//! Account Command Service
//!
//! One pipeline for every state change:
//! validate, stamp the event, take the aggregate lock, check the balance
//! (withdrawals only), append to the log, invalidate the cache, publish.
//!
//! The log is the only durable write. The cache and the transport are
//! downstream of it; a failure there never rolls the append back.

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::aggregate::{replay, Account};
use crate::cache::{AccountCache, CacheError, DEFAULT_CACHE_TTL};
use crate::domain::{AccountEvent, AccountId, Amount, DomainError};
use crate::error::{AppError, AppResult};
use crate::event_log::EventLog;
use crate::transport::EventPublisher;

use super::locks::AggregateLocks;
use super::{CommandResult, CreateAccountCommand, DepositCommand, WithdrawCommand};

/// Service tuning
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Lifetime of cached snapshots
    pub cache_ttl: Duration,
    /// Deadline for each log, cache and transport call
    pub io_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            io_timeout: Duration::from_secs(5),
        }
    }
}

/// Handles account commands and the authoritative balance query
pub struct AccountService {
    log: Arc<dyn EventLog>,
    cache: Arc<dyn AccountCache>,
    publisher: Arc<dyn EventPublisher>,
    locks: AggregateLocks,
    config: ServiceConfig,
}

impl AccountService {
    pub fn new(
        log: Arc<dyn EventLog>,
        cache: Arc<dyn AccountCache>,
        publisher: Arc<dyn EventPublisher>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            log,
            cache,
            publisher,
            locks: AggregateLocks::new(),
            config,
        }
    }

    /// Record an `AccountCreated` event.
    ///
    /// Creating an id that already has history is accepted; replay treats
    /// repeated creation events as no-ops.
    pub async fn create_account(&self, command: CreateAccountCommand) -> AppResult<CommandResult> {
        let account_id = AccountId::new(command.account_id)?;
        let event = AccountEvent::created(account_id.clone(), Utc::now());

        let _guard = self.locks.lock(&account_id).await;
        self.commit(&account_id, &event).await?;

        tracing::info!(account_id = %account_id, event_id = %event.event_id(), "Account created");
        Ok(CommandResult::from(&event))
    }

    /// Record a deposit. Never rejected for balance reasons.
    pub async fn deposit(&self, command: DepositCommand) -> AppResult<CommandResult> {
        let account_id = AccountId::new(command.account_id)?;
        let amount = Amount::new(command.amount).map_err(DomainError::from)?;
        let event = AccountEvent::deposited(account_id.clone(), amount, Utc::now());

        let _guard = self.locks.lock(&account_id).await;
        self.commit(&account_id, &event).await?;

        tracing::info!(account_id = %account_id, amount = %amount, "Deposit recorded");
        Ok(CommandResult::from(&event))
    }

    /// Record a withdrawal if the current balance covers it.
    ///
    /// # Errors
    ///
    /// `InsufficientFunds` when it does not; nothing is appended then.
    pub async fn withdraw(&self, command: WithdrawCommand) -> AppResult<CommandResult> {
        let account_id = AccountId::new(command.account_id)?;
        let amount = Amount::new(command.amount).map_err(DomainError::from)?;
        let event = AccountEvent::withdrawn(account_id.clone(), amount, Utc::now());

        let _guard = self.locks.lock(&account_id).await;

        // Checked against the log, not the cache: a snapshot can be stale
        let account = self.replay_and_cache(&account_id).await?;
        if let Err(e) = account.ensure_can_withdraw(&amount) {
            tracing::info!(account_id = %account_id, error = %e, "Withdrawal rejected");
            return Err(e.into());
        }

        self.commit(&account_id, &event).await?;

        tracing::info!(account_id = %account_id, amount = %amount, "Withdrawal recorded");
        Ok(CommandResult::from(&event))
    }

    /// Current state: cached snapshot if present, otherwise replayed from
    /// the log and cached.
    pub async fn get_account(&self, account_id: &str) -> AppResult<Account> {
        let account_id = AccountId::new(account_id)?;

        if let Some(Some(account)) = self.best_effort("get", &account_id, self.cache.get(&account_id)).await {
            return Ok(account);
        }

        // A fill must not land after the invalidate of a commit it did not see
        let _guard = self.locks.lock(&account_id).await;
        self.replay_and_cache(&account_id).await
    }

    /// Replay the full history and refresh the cache. Callers hold the
    /// aggregate lock.
    async fn replay_and_cache(&self, account_id: &AccountId) -> AppResult<Account> {
        let events = self
            .within("event log read", self.log.read_all(account_id))
            .await?
            .unwrap_or_default();
        if events.is_empty() {
            return Err(DomainError::AccountNotFound(account_id.to_string()).into());
        }

        let account: Account = replay(account_id.clone(), &events);
        tracing::debug!(
            account_id = %account_id,
            events = events.len(),
            balance = %account.balance,
            "Account replayed"
        );

        self.best_effort(
            "set",
            account_id,
            self.cache.set(account_id, &account, self.config.cache_ttl),
        )
        .await;

        Ok(account)
    }

    /// Append, then invalidate, then publish
    async fn commit(&self, account_id: &AccountId, event: &AccountEvent) -> AppResult<()> {
        self.within("event log append", self.log.append(account_id, event))
            .await?;

        self.best_effort("invalidate", account_id, self.cache.invalidate(account_id))
            .await;

        if let Err(e) = self.within("event publish", self.publisher.publish(event)).await {
            // Appended but not published: the read model lags until a rebuild
            tracing::error!(
                account_id = %account_id,
                event_id = %event.event_id(),
                error = %e,
                "Event appended but not published"
            );
            return Err(e);
        }

        Ok(())
    }

    /// Run a log or transport call under the I/O deadline
    async fn within<T, E, F>(&self, what: &'static str, call: F) -> AppResult<T>
    where
        F: Future<Output = Result<T, E>>,
        AppError: From<E>,
    {
        match tokio::time::timeout(self.config.io_timeout, call).await {
            Ok(result) => result.map_err(AppError::from),
            Err(_) => Err(AppError::DependencyUnavailable(format!(
                "{what} timed out after {:?}",
                self.config.io_timeout
            ))),
        }
    }

    /// Run a cache call; failures are logged and turn into `None`
    async fn best_effort<T, F>(&self, op: &'static str, account_id: &AccountId, call: F) -> Option<T>
    where
        F: Future<Output = Result<T, CacheError>>,
    {
        let error = match tokio::time::timeout(self.config.io_timeout, call).await {
            Ok(Ok(value)) => return Some(value),
            Ok(Err(e)) => e,
            Err(_) => CacheError::Timeout,
        };

        tracing::warn!(account_id = %account_id, op, error = %error, "Cache call failed");
        None
    }
}
