//! Command Handlers module
//!
//! Command and query handlers that orchestrate business operations.
//! Each handler checks the caller, coordinates aggregates and the event
//! store, and keeps balances current.

mod commands;
mod funding_handler;
mod idempotent;
mod late_fee_handler;
mod loan_handler;
mod queries;
mod repayment_handler;
mod transaction_handler;
mod views;


pub use commands::*;
pub use funding_handler::FundLoanHandler;
pub use late_fee_handler::AssessLateFeesHandler;
pub use loan_handler::{CreateLoanHandler, LoanLifecycleHandler};
pub use queries::{LoanFilter, LoanQueryHandler, TransactionQuery, TransactionQueryHandler};
pub use repayment_handler::RecordRepaymentHandler;
pub use transaction_handler::{CreateTransactionHandler, TransactionStatusHandler};
pub use views::{BalanceView, LoanPage, LoanView, RepaymentResult, TransactionView};
