//! Command Handlers module
//!
//! CQRS command side: validates commands against current state and records
//! the resulting events.

mod account_service;
mod commands;
mod locks;


pub use account_service::{AccountService, ServiceConfig};
pub use commands::*;
pub use locks::{AggregateGuard, AggregateLocks};
