//! Aggregate module
//!
//! Aggregate Root pattern implementation for Event Sourcing.

pub mod loan;
pub mod transaction;

pub use loan::{ContributionDecision, LateFeePolicy, Loan, LoanFigures};
pub use transaction::{NewTransaction, Transaction};

/// Aggregate trait that all aggregates must implement
pub trait Aggregate: Sized + Default {
    /// The type of events this aggregate handles
    type Event;

    /// Get the aggregate type name (for storage)
    fn aggregate_type() -> &'static str;

    /// Get the aggregate ID
    fn id(&self) -> uuid::Uuid;

    /// Get the current version (number of events applied)
    fn version(&self) -> i64;

    /// Apply an event to update the aggregate state
    fn apply(self, event: Self::Event) -> Self;

    /// Apply a sequence of events in order
    fn apply_all<I>(self, events: I) -> Self
    where
        I: IntoIterator<Item = Self::Event>,
    {
        events.into_iter().fold(self, |agg, event| agg.apply(event))
    }
}
