//! Read Model
//!
//! Query-optimized account balances derived from events.
//! This is the "Q" side of CQRS: never authoritative, always rebuildable.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::aggregate::Account;
use crate::domain::{AccountEvent, AccountId};

/// Result of applying one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Balance updated
    Applied,
    /// Event id already projected; nothing changed
    Duplicate,
}

/// Projection errors
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Read model unavailable: {0}")]
    Unavailable(String),
}

/// Sink the projection consumer folds events into
#[async_trait]
pub trait ReadModel: Send + Sync {
    /// Apply one event. Re-applying an event id already seen is a no-op.
    async fn apply(&self, event: &AccountEvent) -> Result<ApplyOutcome, ProjectionError>;

    /// Projected balance, `None` if no row exists yet
    async fn balance(&self, account_id: &AccountId) -> Result<Option<Decimal>, ProjectionError>;

    /// Replace a row with replayed state and mark its events as projected
    async fn overwrite(&self, account: &Account, event_ids: &[Uuid]) -> Result<(), ProjectionError>;
}

// =========================================================================
// Postgres
// =========================================================================

/// Read model over two tables: `accounts(id, balance)` and the dedup table
/// `projected_events(event_id)`.
#[derive(Debug, Clone)]
pub struct PgReadModel {
    pool: PgPool,
}

impl PgReadModel {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record the event id; false if it was already there
    async fn mark_projected(
        tx: &mut Transaction<'_, Postgres>,
        event_id: Uuid,
        account_id: &AccountId,
    ) -> Result<bool, ProjectionError> {
        let rows_affected = sqlx::query(
            r#"
            INSERT INTO projected_events (event_id, account_id)
            VALUES ($1, $2)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(account_id.as_str())
        .execute(&mut **tx)
        .await?
        .rows_affected();

        Ok(rows_affected == 1)
    }

    /// Insert the row at zero if absent
    async fn create_row(
        tx: &mut Transaction<'_, Postgres>,
        account_id: &AccountId,
    ) -> Result<(), ProjectionError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, balance)
            VALUES ($1, 0)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(account_id.as_str())
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Add a signed change, creating the row when a deposit or withdrawal
    /// is delivered before the account's creation event
    async fn update_balance(
        tx: &mut Transaction<'_, Postgres>,
        account_id: &AccountId,
        balance_change: Decimal,
    ) -> Result<(), ProjectionError> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, balance)
            VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE
            SET
                balance = accounts.balance + EXCLUDED.balance,
                updated_at = NOW()
            "#,
        )
        .bind(account_id.as_str())
        .bind(balance_change)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ReadModel for PgReadModel {
    async fn apply(&self, event: &AccountEvent) -> Result<ApplyOutcome, ProjectionError> {
        let account_id = event.account_id();
        let mut tx = self.pool.begin().await?;

        if !Self::mark_projected(&mut tx, event.event_id(), account_id).await? {
            tx.rollback().await?;
            return Ok(ApplyOutcome::Duplicate);
        }

        match event {
            AccountEvent::AccountCreated { .. } => Self::create_row(&mut tx, account_id).await?,
            AccountEvent::MoneyDeposited { amount, .. } => {
                Self::update_balance(&mut tx, account_id, *amount).await?
            }
            AccountEvent::MoneyWithdrawn { amount, .. } => {
                Self::update_balance(&mut tx, account_id, -*amount).await?
            }
        }

        tx.commit().await?;

        tracing::debug!(
            event_id = %event.event_id(),
            account_id = %account_id,
            event_type = %event.event_type(),
            "Projection updated"
        );

        Ok(ApplyOutcome::Applied)
    }

    async fn balance(&self, account_id: &AccountId) -> Result<Option<Decimal>, ProjectionError> {
        let balance: Option<Decimal> = sqlx::query_scalar(
            r#"
            SELECT balance FROM accounts WHERE id = $1
            "#,
        )
        .bind(account_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(balance)
    }

    async fn overwrite(&self, account: &Account, event_ids: &[Uuid]) -> Result<(), ProjectionError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO accounts (id, balance)
            VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE
            SET
                balance = EXCLUDED.balance,
                updated_at = NOW()
            "#,
        )
        .bind(account.id.as_str())
        .bind(account.balance)
        .execute(&mut *tx)
        .await?;

        for event_id in event_ids {
            Self::mark_projected(&mut tx, *event_id, &account.id).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

// =========================================================================
// In-memory
// =========================================================================

#[derive(Debug, Default)]
struct MemoryState {
    balances: HashMap<AccountId, Decimal>,
    seen: HashSet<Uuid>,
}

/// Same semantics as [`PgReadModel`], held in process
#[derive(Debug, Default)]
pub struct InMemoryReadModel {
    state: Mutex<MemoryState>,
}

impl InMemoryReadModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct event ids applied
    pub async fn applied_count(&self) -> usize {
        self.state.lock().await.seen.len()
    }
}

#[async_trait]
impl ReadModel for InMemoryReadModel {
    async fn apply(&self, event: &AccountEvent) -> Result<ApplyOutcome, ProjectionError> {
        let mut state = self.state.lock().await;
        if !state.seen.insert(event.event_id()) {
            return Ok(ApplyOutcome::Duplicate);
        }

        let balance = state
            .balances
            .entry(event.account_id().clone())
            .or_insert(Decimal::ZERO);
        match event {
            AccountEvent::AccountCreated { .. } => {}
            AccountEvent::MoneyDeposited { amount, .. } => *balance += *amount,
            AccountEvent::MoneyWithdrawn { amount, .. } => *balance -= *amount,
        }

        Ok(ApplyOutcome::Applied)
    }

    async fn balance(&self, account_id: &AccountId) -> Result<Option<Decimal>, ProjectionError> {
        Ok(self.state.lock().await.balances.get(account_id).copied())
    }

    async fn overwrite(&self, account: &Account, event_ids: &[Uuid]) -> Result<(), ProjectionError> {
        let mut state = self.state.lock().await;
        state.balances.insert(account.id.clone(), account.balance);
        state.seen.extend(event_ids.iter().copied());
        Ok(())
    }
}
