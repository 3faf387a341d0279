//! API Routes
//!
//! HTTP endpoint definitions. The caller's identity arrives as an
//! `OperationContext` extension installed by the principal middleware.

use axum::{
    extract::{Extension, Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use uuid::Uuid;

use crate::audit::ChainVerificationResult;
use crate::domain::{LoanTermsInput, OperationContext, PaymentMethod};
use crate::error::AppError;
use crate::funding::FundingResult;
use crate::handlers::{
    ApproveLoanCommand, AssessLateFeesCommand, AssessLateFeesHandler, BalanceView,
    CompleteTransactionCommand, CreateLoanCommand, CreateLoanHandler, CreateTransactionCommand,
    CreateTransactionHandler, FundLoanCommand, FundLoanHandler, LateFeeReport, LoanFilter,
    LoanLifecycleHandler, LoanPage, LoanQueryHandler, LoanReasonCommand, LoanView,
    RecordRepaymentCommand, RecordRepaymentHandler, RepaymentResult, TransactionQuery,
    TransactionQueryHandler, TransactionReasonCommand, TransactionStatusHandler,
    TransactionView, UpdateDraftLoanCommand,
};
use crate::ledger::TransactionStats;
use crate::state::AppState;

use super::middleware::idempotency_key;

// =========================================================================
// Request types
// =========================================================================

#[derive(Debug, Deserialize)]
pub struct UpdateDraftRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApproveRequest {
    #[serde(default)]
    pub risk_score: Option<u8>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReasonRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct FundRequest {
    pub amount: String,
}

#[derive(Debug, Deserialize)]
pub struct RepaymentRequest {
    pub installment_number: u32,
    pub amount: String,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompleteRequest {
    #[serde(default)]
    pub gateway_ref: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PartyQuery {
    #[serde(default)]
    pub party: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LateFeeRequest {
    /// Defaults to today
    #[serde(default)]
    pub as_of: Option<NaiveDate>,
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<AppState> {
    Router::new()
        // Loans
        .route("/loans", post(create_loan).get(list_loans))
        .route(
            "/loans/:loan_id",
            get(get_loan).patch(update_draft).delete(delete_draft),
        )
        .route("/loans/:loan_id/submit", post(submit_loan))
        .route("/loans/:loan_id/approve", post(approve_loan))
        .route("/loans/:loan_id/reject", post(reject_loan))
        .route("/loans/:loan_id/default", post(default_loan))
        .route("/loans/:loan_id/fund", post(fund_loan))
        .route("/loans/:loan_id/repayments", post(record_repayment))
        // Transactions
        .route(
            "/transactions",
            post(create_transaction).get(list_transactions),
        )
        .route("/transactions/stats", get(transaction_stats))
        .route("/transactions/:transaction_id", get(get_transaction))
        .route(
            "/transactions/:transaction_id/complete",
            post(complete_transaction),
        )
        .route(
            "/transactions/:transaction_id/settle",
            post(settle_transaction),
        )
        .route(
            "/transactions/:transaction_id/cancel",
            post(cancel_transaction),
        )
        .route(
            "/transactions/:transaction_id/refund",
            post(refund_transaction),
        )
        .route(
            "/transactions/:transaction_id/audit",
            get(verify_audit_trail),
        )
        // Balances
        .route("/balance", get(get_balance))
        // Admin
        .route("/admin/late-fees", post(assess_late_fees))
}

// =========================================================================
// Loans
// =========================================================================

async fn create_loan(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Json(terms): Json<LoanTermsInput>,
) -> Result<(StatusCode, Json<LoanView>), AppError> {
    let view = CreateLoanHandler::new(state)
        .execute(CreateLoanCommand::new(terms), &context)
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn list_loans(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Query(filter): Query<LoanFilter>,
) -> Result<Json<LoanPage>, AppError> {
    let page = LoanQueryHandler::new(state).list(&filter, &context).await?;
    Ok(Json(page))
}

async fn get_loan(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(loan_id): Path<Uuid>,
) -> Result<Json<LoanView>, AppError> {
    let view = LoanQueryHandler::new(state).get(loan_id, &context).await?;
    Ok(Json(view))
}

async fn update_draft(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(loan_id): Path<Uuid>,
    Json(request): Json<UpdateDraftRequest>,
) -> Result<Json<LoanView>, AppError> {
    let mut command = UpdateDraftLoanCommand::new(loan_id);
    if let Some(title) = request.title {
        command = command.with_title(title);
    }
    if let Some(description) = request.description {
        command = command.with_description(description);
    }
    let view = LoanLifecycleHandler::new(state)
        .update_draft(command, &context)
        .await?;
    Ok(Json(view))
}

async fn delete_draft(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(loan_id): Path<Uuid>,
) -> Result<Json<LoanView>, AppError> {
    let view = LoanLifecycleHandler::new(state)
        .delete_draft(loan_id, &context)
        .await?;
    Ok(Json(view))
}

async fn submit_loan(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(loan_id): Path<Uuid>,
) -> Result<Json<LoanView>, AppError> {
    let view = LoanLifecycleHandler::new(state)
        .submit(loan_id, &context)
        .await?;
    Ok(Json(view))
}

async fn approve_loan(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(loan_id): Path<Uuid>,
    request: Option<Json<ApproveRequest>>,
) -> Result<Json<LoanView>, AppError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let mut command = ApproveLoanCommand::new(loan_id);
    if let Some(score) = request.risk_score {
        command = command.with_risk_score(score);
    }
    if let Some(note) = request.note {
        command = command.with_note(note);
    }
    let view = LoanLifecycleHandler::new(state)
        .approve(command, &context)
        .await?;
    Ok(Json(view))
}

async fn reject_loan(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(loan_id): Path<Uuid>,
    Json(request): Json<ReasonRequest>,
) -> Result<Json<LoanView>, AppError> {
    let view = LoanLifecycleHandler::new(state)
        .reject(LoanReasonCommand::new(loan_id, request.reason), &context)
        .await?;
    Ok(Json(view))
}

async fn default_loan(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(loan_id): Path<Uuid>,
    Json(request): Json<ReasonRequest>,
) -> Result<Json<LoanView>, AppError> {
    let view = LoanLifecycleHandler::new(state)
        .mark_defaulted(LoanReasonCommand::new(loan_id, request.reason), &context)
        .await?;
    Ok(Json(view))
}

/// The caller funds as themselves
async fn fund_loan(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(loan_id): Path<Uuid>,
    Json(request): Json<FundRequest>,
) -> Result<(StatusCode, Json<FundingResult>), AppError> {
    let lender_id = context.principal()?.user_id;
    let result = FundLoanHandler::new(state)
        .execute(
            FundLoanCommand::new(loan_id, lender_id, request.amount),
            &context,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(result)))
}

/// 201 for a new repayment, 200 when an idempotent retry is replayed
async fn record_repayment(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(loan_id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<RepaymentRequest>,
) -> Result<(StatusCode, Json<RepaymentResult>), AppError> {
    let key = idempotency_key(&headers)?;
    let command = RecordRepaymentCommand::new(
        loan_id,
        request.installment_number,
        request.amount,
        request.payment_method,
    );
    let result = RecordRepaymentHandler::new(state)
        .execute(command, key, &context)
        .await?;
    let status = if result.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(result)))
}

// =========================================================================
// Transactions
// =========================================================================

async fn create_transaction(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    headers: HeaderMap,
    Json(command): Json<CreateTransactionCommand>,
) -> Result<(StatusCode, Json<TransactionView>), AppError> {
    let key = idempotency_key(&headers)?;
    let view = CreateTransactionHandler::new(state)
        .execute(command, key, &context)
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

async fn list_transactions(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Query(query): Query<TransactionQuery>,
) -> Result<Json<Vec<TransactionView>>, AppError> {
    let views = TransactionQueryHandler::new(state)
        .list(&query, &context)
        .await?;
    Ok(Json(views))
}

async fn transaction_stats(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Query(query): Query<PartyQuery>,
) -> Result<Json<TransactionStats>, AppError> {
    let stats = TransactionQueryHandler::new(state)
        .stats(query.party, &context)
        .await?;
    Ok(Json(stats))
}

async fn get_transaction(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<TransactionView>, AppError> {
    let view = TransactionQueryHandler::new(state)
        .get(transaction_id, &context)
        .await?;
    Ok(Json(view))
}

async fn complete_transaction(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(transaction_id): Path<Uuid>,
    request: Option<Json<CompleteRequest>>,
) -> Result<Json<TransactionView>, AppError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let view = TransactionStatusHandler::new(state)
        .complete(
            CompleteTransactionCommand::new(transaction_id, request.gateway_ref),
            &context,
        )
        .await?;
    Ok(Json(view))
}

async fn settle_transaction(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<TransactionView>, AppError> {
    let view = TransactionStatusHandler::new(state)
        .settle(transaction_id, &context)
        .await?;
    Ok(Json(view))
}

async fn cancel_transaction(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(transaction_id): Path<Uuid>,
    Json(request): Json<ReasonRequest>,
) -> Result<Json<TransactionView>, AppError> {
    let view = TransactionStatusHandler::new(state)
        .cancel(
            TransactionReasonCommand::new(transaction_id, request.reason),
            &context,
        )
        .await?;
    Ok(Json(view))
}

async fn refund_transaction(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(transaction_id): Path<Uuid>,
    Json(request): Json<ReasonRequest>,
) -> Result<Json<TransactionView>, AppError> {
    let view = TransactionStatusHandler::new(state)
        .refund(
            TransactionReasonCommand::new(transaction_id, request.reason),
            &context,
        )
        .await?;
    Ok(Json(view))
}

async fn verify_audit_trail(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<ChainVerificationResult>, AppError> {
    let result = TransactionQueryHandler::new(state)
        .verify_audit(transaction_id, &context)
        .await?;
    Ok(Json(result))
}

// =========================================================================
// Balances and administration
// =========================================================================

async fn get_balance(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    Query(query): Query<PartyQuery>,
) -> Result<Json<BalanceView>, AppError> {
    let view = TransactionQueryHandler::new(state)
        .balance(query.party, &context)
        .await?;
    Ok(Json(view))
}

async fn assess_late_fees(
    State(state): State<AppState>,
    Extension(context): Extension<OperationContext>,
    request: Option<Json<LateFeeRequest>>,
) -> Result<Json<LateFeeReport>, AppError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let as_of = request.as_of.unwrap_or_else(|| state.clock.today());
    let report = AssessLateFeesHandler::new(state)
        .execute(AssessLateFeesCommand::new(as_of), &context)
        .await?;
    Ok(Json(report))
}
