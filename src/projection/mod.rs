//! Projection module
//!
//! Keeps the query-side read model eventually consistent with the event log.
//! Events arrive over the transport, at least once and possibly out of order
//! across accounts, and are folded into the read model idempotently.

mod consumer;
mod read_model;

pub use consumer::{BatchReport, ConsumerConfig, ProjectionConsumer};
pub use read_model::{ApplyOutcome, InMemoryReadModel, PgReadModel, ProjectionError, ReadModel};
