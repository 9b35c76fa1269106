//! API Routes
//!
//! HTTP endpoint definitions.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::aggregate::Account;
use crate::domain::{AccountId, DomainError};
use crate::error::AppError;
use crate::handlers::{CommandResult, CreateAccountCommand, DepositCommand, WithdrawCommand};

use super::AppState;

// =========================================================================
// Request/Response types
// =========================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateAccountRequest {
    #[serde(alias = "ID")]
    pub id: String,
}

/// Body of deposit and withdraw. `amount` may be a JSON number or a
/// decimal string.
#[derive(Debug, Serialize, Deserialize)]
pub struct AmountRequest {
    #[serde(alias = "Amount")]
    pub amount: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProjectionResponse {
    pub account_id: AccountId,
    pub balance: Decimal,
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/accounts", post(create_account))
        .route("/accounts/:id/deposit", post(deposit))
        .route("/accounts/:id/withdraw", post(withdraw))
        .route("/accounts/:id/balance", get(get_balance))
        .route("/accounts/:id/projection", get(get_projection))
}

/// POST /accounts
async fn create_account(
    State(state): State<AppState>,
    Json(request): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<CommandResult>), AppError> {
    let result = state
        .service
        .create_account(CreateAccountCommand::new(request.id))
        .await?;

    Ok((StatusCode::CREATED, Json(result)))
}

/// POST /accounts/:id/deposit
async fn deposit(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<AmountRequest>,
) -> Result<Json<CommandResult>, AppError> {
    let result = state
        .service
        .deposit(DepositCommand::new(id, request.amount))
        .await?;

    Ok(Json(result))
}

/// POST /accounts/:id/withdraw
async fn withdraw(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<AmountRequest>,
) -> Result<Json<CommandResult>, AppError> {
    let result = state
        .service
        .withdraw(WithdrawCommand::new(id, request.amount))
        .await?;

    Ok(Json(result))
}

/// GET /accounts/:id/balance
///
/// Authoritative: served from the cache or replayed from the log.
async fn get_balance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Account>, AppError> {
    let account = state.service.get_account(&id).await?;
    Ok(Json(account))
}

/// GET /accounts/:id/projection
///
/// Eventually consistent: whatever the projection has applied so far.
async fn get_projection(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProjectionResponse>, AppError> {
    let account_id = AccountId::new(id)?;

    let balance = state
        .read_model
        .balance(&account_id)
        .await?
        .ok_or_else(|| DomainError::AccountNotFound(account_id.to_string()))?;

    Ok(Json(ProjectionResponse {
        account_id,
        balance,
    }))
}
