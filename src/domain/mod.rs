//! Domain module
//!
//! Core domain types and business rules.

pub mod clock;
pub mod context;
pub mod error;
pub mod events;
pub mod money;
pub mod types;
pub mod validation;

pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{OperationContext, Principal, Role};
pub use error::{DomainError, FieldViolation};
pub use events::{DomainEvent, LoanEvent, TransactionEvent};
pub use money::{Currency, Money, MoneyError};
pub use types::{
    Collateral, CollateralKind, FundingContribution, Installment, InstallmentStatus,
    LoanCategory, LoanPurpose, LoanStatus, LoanTerms, PaymentMethod, TenureUnit,
    TimelineEntry, TransactionStatus, TransactionType,
};
pub use validation::{validate_terms, CollateralInput, LoanTermsInput};
