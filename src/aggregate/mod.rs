//! Aggregate module
//!
//! Aggregate Root pattern and the replay engine for Event Sourcing.

pub mod account;

pub use account::Account;

/// Aggregate trait that all aggregates must implement
pub trait Aggregate: Sized {
    /// Identifier type of the aggregate
    type Id;

    /// The type of events this aggregate handles
    type Event;

    /// Empty state the fold starts from
    fn new(id: Self::Id) -> Self;

    /// Get the aggregate ID
    fn id(&self) -> &Self::Id;

    /// Get the current version (number of events applied)
    fn version(&self) -> u64;

    /// Apply an event to update the aggregate state.
    ///
    /// Must be total: every event is valid to apply, invariants are the
    /// command side's business.
    fn apply(self, event: &Self::Event) -> Self;
}

/// Rebuild an aggregate by folding its history, oldest event first.
///
/// Pure and deterministic: no I/O, no clock, no hidden state, so the same
/// sequence always yields the same state. Cache fills and read-model
/// rebuilds both rely on that.
pub fn replay<'a, A, I>(id: A::Id, events: I) -> A
where
    A: Aggregate,
    A::Event: 'a,
    I: IntoIterator<Item = &'a A::Event>,
{
    events.into_iter().fold(A::new(id), |state, event| state.apply(event))
}
