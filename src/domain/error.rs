//! Domain Error Types
//!
//! Business-rule and input failures. Independent of storage and HTTP.

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors raised by command validation and the account invariants.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Amount is zero, negative, too precise or too large
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Account id is empty or unusable as a key
    #[error("Invalid account id: {0}")]
    InvalidAccountId(String),

    /// Withdrawal larger than the current balance
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        required: Decimal,
        available: Decimal,
    },

    /// No events exist for the account
    #[error("Account not found: {0}")]
    AccountNotFound(String),
}

impl DomainError {
    pub fn insufficient_funds(required: Decimal, available: Decimal) -> Self {
        Self::InsufficientFunds {
            required,
            available,
        }
    }

    /// Rejected before any I/O; retrying the same input cannot succeed
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidAmount(_) | Self::InvalidAccountId(_))
    }

    /// Check if this is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        self.is_invalid_input() || matches!(self, Self::InsufficientFunds { .. })
    }
}

impl From<super::AmountError> for DomainError {
    fn from(err: super::AmountError) -> Self {
        Self::InvalidAmount(err.to_string())
    }
}
