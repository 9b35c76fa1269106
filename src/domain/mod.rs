//! Domain module
//!
//! Core domain types: identifiers, validated amounts, events and errors.

pub mod account_id;
pub mod amount;
pub mod error;
pub mod events;

pub use account_id::AccountId;
pub use amount::{Amount, AmountError};
pub use error::DomainError;
pub use events::{AccountEvent, EventType};
