use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    middleware,
    routing::{get, post},
};
use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{
    ApiError, ApiErrorWithMeta, E_BAD_SIGNATURE, E_DB_FAILURE, E_NOT_FOUND, E_SWEEP_FAILURE,
    E_VALIDATION,
};
use crate::payments::{
    self, CreateOrderError, CreateOrderRequest, CreatedOrder, NextPayment, OrderPaymentStatus,
    Verification, VerifyError, VerifyRequest,
};
use crate::responses::{ApiOk, RequestMeta, meta_middleware};
use crate::schedule::{InstallmentOption, generate_installment_options};
use crate::sweep::{self, SweepReport};
use crate::types::{DailyCommission, ReferralStatus};
use crate::{referral, store};

/// The application state.
#[derive(Clone)]
pub struct AppState {
    /// The database pool.
    pub pool: PgPool,
    /// The application configuration.
    pub config: Config,
}

pub fn init_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/installments/{price}", get(installment_options_handler))
        .route("/orders", post(create_order_handler))
        .route("/orders/{id}/payment-status", get(payment_status_handler))
        .route("/orders/{id}/next-payment", get(next_payment_handler))
        .route("/payments/verify", post(verify_payment_handler))
        .route("/sweep/run", post(run_sweep_handler))
        .route("/referrals/{id}", get(referral_details_handler))
        .route("/referrals/{id}/missed-days", get(missed_days_handler))
        .route("/balances/{user_id}", get(get_balance_handler))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(middleware::from_fn(meta_middleware))
}

async fn installment_options_handler(
    Path(price): Path<i64>,
    Extension(meta): Extension<RequestMeta>,
) -> ApiOk<Vec<InstallmentOption>> {
    // an empty menu means "no installment plans available", not an error
    let options = generate_installment_options(price, Utc::now());
    ApiOk::ok("installment options", options, meta)
}

async fn create_order_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<ApiOk<CreatedOrder>, ApiErrorWithMeta> {
    let created = payments::create_order(&st.pool, req, Utc::now())
        .await
        .map_err(|e| match e {
            CreateOrderError::ProductNotFound => ApiError::NotFound("product not found".into())
                .with_meta(meta.clone())
                .with_code(E_NOT_FOUND),
            CreateOrderError::Validation(msg) => ApiError::BadRequest(msg)
                .with_meta(meta.clone())
                .with_code(E_VALIDATION),
            CreateOrderError::Db(e) => ApiError::Internal(e)
                .with_meta(meta.clone())
                .with_code(E_DB_FAILURE),
        })?;

    Ok(ApiOk::created("order created", created, meta))
}

async fn verify_payment_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<VerifyRequest>,
) -> Result<ApiOk<Verification>, ApiErrorWithMeta> {
    let verification = payments::verify_payment(
        &st.pool,
        &st.config.gateway_webhook_secret,
        req,
        Utc::now(),
    )
    .await
    .map_err(|e| match e {
        VerifyError::BadSignature => ApiError::Unprocessable("invalid gateway signature".into())
            .with_meta(meta.clone())
            .with_code(E_BAD_SIGNATURE),
        VerifyError::UserRequired => ApiError::BadRequest("user id required".into())
            .with_meta(meta.clone())
            .with_code(E_VALIDATION),
        VerifyError::Db(e) => ApiError::Internal(e)
            .with_meta(meta.clone())
            .with_code(E_DB_FAILURE),
    })?;

    Ok(ApiOk::ok("payment verified", verification, meta))
}

async fn payment_status_handler(
    State(st): State<AppState>,
    Path(order_id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<OrderPaymentStatus>, ApiErrorWithMeta> {
    let status = payments::order_payment_status(&st.pool, order_id, Utc::now())
        .await
        .map_err(|e| {
            ApiError::Internal(e)
                .with_meta(meta.clone())
                .with_code(E_DB_FAILURE)
        })?
        .ok_or_else(|| {
            ApiError::NotFound("order not found".into())
                .with_meta(meta.clone())
                .with_code(E_NOT_FOUND)
        })?;

    Ok(ApiOk::ok("payment status", status, meta))
}

async fn next_payment_handler(
    State(st): State<AppState>,
    Path(order_id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<NextPayment>, ApiErrorWithMeta> {
    let next = payments::next_payment(&st.pool, order_id, Utc::now())
        .await
        .map_err(|e| {
            ApiError::Internal(e)
                .with_meta(meta.clone())
                .with_code(E_DB_FAILURE)
        })?
        .ok_or_else(|| {
            ApiError::NotFound("order not found".into())
                .with_meta(meta.clone())
                .with_code(E_NOT_FOUND)
        })?;

    Ok(ApiOk::ok("next payment", next, meta))
}

async fn run_sweep_handler(
    State(st): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<SweepReport>, ApiErrorWithMeta> {
    let report = sweep::run_daily_sweep(&st.pool, Utc::now()).await.map_err(|e| {
        ApiError::Internal(e)
            .with_meta(meta.clone())
            .with_code(E_SWEEP_FAILURE)
    })?;

    Ok(ApiOk::ok("sweep finished", report, meta))
}

/// The response for a referral's schedule progress.
#[derive(Serialize)]
pub struct ReferralDetails {
    pub referral_id: Uuid,
    pub status: ReferralStatus,
    /// Integer percentage of the schedule paid out, capped at 100.
    pub progress: i64,
    pub days_paid: i64,
    pub days_remaining: i64,
    pub commission_earned: i64,
    pub transactions: Vec<DailyCommission>,
}

async fn referral_details_handler(
    State(st): State<AppState>,
    Path(referral_id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<ReferralDetails>, ApiErrorWithMeta> {
    let r = store::get_referral(&st.pool, referral_id)
        .await
        .map_err(|e| {
            ApiError::Internal(e)
                .with_meta(meta.clone())
                .with_code(E_DB_FAILURE)
        })?
        .ok_or_else(|| {
            ApiError::NotFound("referral not found".into())
                .with_meta(meta.clone())
                .with_code(E_NOT_FOUND)
        })?;

    let transactions = store::list_commissions(&st.pool, referral_id)
        .await
        .map_err(|e| {
            ApiError::Internal(e)
                .with_meta(meta.clone())
                .with_code(E_DB_FAILURE)
        })?;

    let details = ReferralDetails {
        referral_id: r.id,
        status: r.status,
        progress: referral::progress_percent(r.days_paid, r.days),
        days_paid: r.days_paid,
        days_remaining: (r.days as i64 - r.days_paid).max(0),
        commission_earned: r.commission_earned,
        transactions,
    };
    Ok(ApiOk::ok("referral details", details, meta))
}

async fn missed_days_handler(
    State(st): State<AppState>,
    Path(referral_id): Path<Uuid>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<referral::MissedDays>, ApiErrorWithMeta> {
    let r = store::get_referral(&st.pool, referral_id)
        .await
        .map_err(|e| {
            ApiError::Internal(e)
                .with_meta(meta.clone())
                .with_code(E_DB_FAILURE)
        })?
        .ok_or_else(|| {
            ApiError::NotFound("referral not found".into())
                .with_meta(meta.clone())
                .with_code(E_NOT_FOUND)
        })?;

    let missed = referral::missed_payment_days(&r, Utc::now());
    Ok(ApiOk::ok("missed payment days", missed, meta))
}

/// The response for a user's wallet balance.
#[derive(Serialize)]
pub struct BalanceResponse {
    pub user_id: i64,
    pub balance: i64,
}

async fn get_balance_handler(
    State(st): State<AppState>,
    Path(user_id): Path<i64>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<BalanceResponse>, ApiErrorWithMeta> {
    let balance = store::wallet_balance(&st.pool, user_id).await.map_err(|e| {
        ApiError::Internal(e)
            .with_meta(meta.clone())
            .with_code(E_DB_FAILURE)
    })?;

    Ok(ApiOk::ok(
        "balance fetched",
        BalanceResponse { user_id, balance },
        meta,
    ))
}
