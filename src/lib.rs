//! loan_ledger Library
//!
//! Peer-to-peer loan funding and settlement ledger. Re-exports modules for
//! the server binary, integration tests and the load test.

pub mod aggregate;
pub mod amortization;
pub mod api;
pub mod audit;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod event_store;
pub mod funding;
pub mod gateway;
pub mod handlers;
pub mod idempotency;
pub mod jobs;
pub mod ledger;
pub mod projection;
pub mod retry;
pub mod state;

pub use config::{Config, LedgerSettings};
pub use error::{AppError, AppResult};
pub use domain::{Currency, DomainError, Money, OperationContext, Principal, Role};
pub use state::AppState;
