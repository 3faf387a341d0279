//! Projection module
//!
//! Read models derived from events. Projections are caches: each can be
//! rebuilt exactly by replaying the event stream.

mod balance;

pub use balance::BalanceEngine;
