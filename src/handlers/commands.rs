//! Command definitions
//!
//! Commands represent intentions to change the system state. Fields carry
//! raw caller input; the service validates them before any I/O.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{AccountEvent, AccountId, EventType};

/// Command to open an account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountCommand {
    pub account_id: String,
}

impl CreateAccountCommand {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
        }
    }
}

/// Command to deposit money into an account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositCommand {
    pub account_id: String,
    pub amount: Decimal,
}

impl DepositCommand {
    pub fn new(account_id: impl Into<String>, amount: Decimal) -> Self {
        Self {
            account_id: account_id.into(),
            amount,
        }
    }
}

/// Command to withdraw money from an account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawCommand {
    pub account_id: String,
    pub amount: Decimal,
}

impl WithdrawCommand {
    pub fn new(account_id: impl Into<String>, amount: Decimal) -> Self {
        Self {
            account_id: account_id.into(),
            amount,
        }
    }
}

/// Result of a recorded command: the event that was appended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub account_id: AccountId,
    pub event_id: Uuid,
    pub event_type: EventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

impl From<&AccountEvent> for CommandResult {
    fn from(event: &AccountEvent) -> Self {
        let amount = match event {
            AccountEvent::AccountCreated { .. } => None,
            _ => Some(event.amount()),
        };

        Self {
            account_id: event.account_id().clone(),
            event_id: event.event_id(),
            event_type: event.event_type(),
            amount,
            timestamp: event.timestamp(),
        }
    }
}
