//! Payment verification and order creation.
//!
//! Verification has one primary contract: mark the pending transaction
//! completed and move the order's payment status. Everything downstream
//! (commission crediting, plan reconciliation) is best-effort; its failures
//! are logged and never surface in the verification response.

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::gateway::{self, ChargeIntent, GatewayConfirmation};
use crate::types::{
    Order, OrderStatus, PaymentOption, PaymentStatus, Txn, TxnStatus, TxnType,
};
use crate::{plan, referral, store};

#[derive(Debug)]
pub enum VerifyError {
    /// The confirmation failed the signature check; nothing was touched.
    BadSignature,
    /// No pending transaction and no fallback user id supplied.
    UserRequired,
    Db(anyhow::Error),
}

impl From<anyhow::Error> for VerifyError {
    fn from(e: anyhow::Error) -> Self {
        VerifyError::Db(e)
    }
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub transaction_id: Option<Uuid>,
    /// Compatibility fallback for flows that never opened a pending
    /// transaction. Requires `amount` to mean anything.
    pub user_id: Option<i64>,
    pub amount: Option<i64>,
    #[serde(flatten)]
    pub confirmation: GatewayConfirmation,
}

#[derive(Debug, Serialize)]
pub struct Verification {
    pub success: bool,
    pub payment_status: PaymentStatus,
    pub total_paid: i64,
    pub remaining_amount: i64,
    pub is_first_payment: bool,
}

/// Verifies a gateway confirmation and cascades it through the ledger.
pub async fn verify_payment(
    pool: &PgPool,
    webhook_secret: &str,
    req: VerifyRequest,
    now: DateTime<Utc>,
) -> Result<Verification, VerifyError> {
    if !gateway::verify_confirmation(webhook_secret, &req.confirmation) {
        return Err(VerifyError::BadSignature);
    }

    let txn = match req.transaction_id {
        Some(id) => store::get_txn(pool, id).await?,
        None => None,
    };

    let (user_id, amount, product_id, freshly_completed) = match &txn {
        Some(t) => {
            let won = store::complete_txn(
                pool,
                t.id,
                &req.confirmation.payment_id,
                &req.confirmation.signature,
            )
            .await?;
            // losing the guard means the transaction was already verified;
            // that is an expected race outcome and resolves to a no-op
            (t.user_id, t.amount, t.product_id, won)
        }
        None => {
            let user_id = req.user_id.ok_or(VerifyError::UserRequired)?;
            (user_id, req.amount.unwrap_or(0), None, true)
        }
    };

    let order = match product_id {
        Some(pid) => store::find_order_for(pool, user_id, pid).await?,
        None => None,
    };

    let (payment_status, total_paid, remaining_amount, is_first_payment) = match (&order, product_id)
    {
        (Some(order), Some(pid)) => {
            let total_paid = store::sum_completed_payments(pool, user_id, pid).await?;
            let completed_count = store::count_completed_payments(pool, user_id, pid).await?;
            let status = order.payment_status.advanced(total_paid, order.order_amount);
            store::set_order_payment_status(pool, order.id, status)
                .await
                .map_err(VerifyError::Db)?;
            let is_first = freshly_completed && completed_count == 1;
            (
                status,
                total_paid,
                (order.order_amount - total_paid).max(0),
                is_first,
            )
        }
        // no order to reconcile against: the payment stands on its own
        _ => (PaymentStatus::Completed, amount, 0, false),
    };

    if freshly_completed {
        // best-effort from here on; the payment itself has already succeeded
        if let Err(e) = referral::credit_commission(pool, user_id, amount, now).await {
            warn!(user_id, error = ?e, "commission crediting failed; payment stays verified");
        }

        if is_first_payment {
            if let Some(order) = &order {
                if let Err(e) = plan::reconcile_first_payment(pool, user_id, order, amount, now).await
                {
                    warn!(user_id, order_id = %order.id, error = ?e,
                        "plan reconciliation failed; payment stays verified");
                }
            }
        }
    }

    Ok(Verification {
        success: true,
        payment_status,
        total_paid,
        remaining_amount,
        is_first_payment,
    })
}

#[derive(Debug)]
pub enum CreateOrderError {
    ProductNotFound,
    Validation(String),
    Db(anyhow::Error),
}

impl From<anyhow::Error> for CreateOrderError {
    fn from(e: anyhow::Error) -> Self {
        CreateOrderError::Db(e)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub user_id: i64,
    pub product_id: i64,
    pub payment_option: PaymentOption,
    pub daily_amount: Option<i64>,
    #[serde(default)]
    pub delivery_address: String,
}

#[derive(Debug, Serialize)]
pub struct CreatedOrder {
    pub order: Order,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charge_intent: Option<ChargeIntent>,
}

/// Creates a purchase order for a catalog product. Daily orders also open a
/// pending ledger transaction carrying a freshly minted charge intent for
/// the first installment.
pub async fn create_order(
    pool: &PgPool,
    req: CreateOrderRequest,
    now: DateTime<Utc>,
) -> Result<CreatedOrder, CreateOrderError> {
    let product = store::get_product(pool, req.product_id)
        .await?
        .ok_or(CreateOrderError::ProductNotFound)?;

    let (daily_amount, total_duration, end_date) = match req.payment_option {
        PaymentOption::Daily => {
            let daily = req
                .daily_amount
                .filter(|&d| d > 0)
                .ok_or_else(|| CreateOrderError::Validation("daily_amount is required".into()))?;
            let periods = plan::payoff_days(product.price, daily);
            (
                Some(daily),
                Some(periods as i32),
                Some(now + Duration::days(periods)),
            )
        }
        PaymentOption::Monthly => {
            let monthly = req
                .daily_amount
                .filter(|&d| d > 0)
                .ok_or_else(|| CreateOrderError::Validation("daily_amount is required".into()))?;
            let periods = plan::payoff_days(product.price, monthly);
            (
                Some(monthly),
                Some(periods as i32),
                Some(now + Duration::days(periods * 30)),
            )
        }
        PaymentOption::Upfront => (None, None, None),
    };

    let order = Order {
        id: Uuid::new_v4(),
        user_id: req.user_id,
        product_id: product.id,
        order_amount: product.price,
        payment_option: req.payment_option,
        daily_amount,
        total_duration,
        start_date: now,
        end_date,
        order_status: OrderStatus::Pending,
        payment_status: PaymentStatus::Pending,
        delivery_address: req.delivery_address,
        created_at: now,
    };
    store::insert_order(pool, &order)
        .await
        .map_err(|e| CreateOrderError::Db(e.into()))?;

    let charge_intent = if order.payment_option == PaymentOption::Daily {
        let intent = gateway::create_charge_intent(
            daily_amount.unwrap_or(order.order_amount),
            "INR",
        );
        let txn = Txn {
            id: Uuid::new_v4(),
            user_id: order.user_id,
            txn_type: TxnType::Purchase,
            amount: intent.amount,
            status: TxnStatus::Pending,
            payment_method: order.payment_option.as_str().to_string(),
            gateway_order_id: Some(intent.gateway_order_id.clone()),
            gateway_payment_id: None,
            gateway_signature: None,
            product_id: Some(order.product_id),
            plan_id: None,
            created_at: now,
        };
        store::insert_txn(pool, &txn)
            .await
            .map_err(|e| CreateOrderError::Db(e.into()))?;
        Some(intent)
    } else {
        None
    };

    Ok(CreatedOrder {
        order,
        charge_intent,
    })
}

#[derive(Debug, Serialize)]
pub struct OrderPaymentStatus {
    pub order_amount: i64,
    pub payment_status: PaymentStatus,
    pub total_paid: i64,
    pub remaining_amount: i64,
    pub transactions: Vec<Txn>,
    pub next_payment_due: Option<NaiveDate>,
}

pub async fn order_payment_status(
    pool: &PgPool,
    order_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<OrderPaymentStatus>> {
    let Some(order) = store::get_order(pool, order_id).await? else {
        return Ok(None);
    };

    let total_paid = store::sum_completed_payments(pool, order.user_id, order.product_id).await?;
    let remaining = (order.order_amount - total_paid).max(0);
    let transactions = store::list_payment_txns(pool, order.user_id, order.product_id).await?;
    let last_paid_at = store::last_payment_at(pool, order.user_id, order.product_id).await?;

    let next_payment_due = if remaining > 0 {
        Some(next_payment_date(now, last_paid_at))
    } else {
        None
    };

    Ok(Some(OrderPaymentStatus {
        order_amount: order.order_amount,
        payment_status: order.payment_status.advanced(total_paid, order.order_amount),
        total_paid,
        remaining_amount: remaining,
        transactions,
        next_payment_due,
    }))
}

#[derive(Debug, Serialize)]
pub struct NextPayment {
    pub can_make_payment: bool,
    pub next_payment_date: NaiveDate,
    pub suggested_amount: i64,
    pub total_paid: i64,
    pub remaining_amount: i64,
}

/// Today if no installment has cleared today yet, otherwise tomorrow.
pub fn next_payment_date(now: DateTime<Utc>, last_paid_at: Option<DateTime<Utc>>) -> NaiveDate {
    let today = now.date_naive();
    match last_paid_at {
        Some(t) if t.date_naive() == today => today + Duration::days(1),
        _ => today,
    }
}

/// The daily rate, except when less than one full installment remains.
pub fn suggested_amount(daily_amount: Option<i64>, order_amount: i64, remaining: i64) -> i64 {
    daily_amount.unwrap_or(order_amount).min(remaining).max(0)
}

pub async fn next_payment(
    pool: &PgPool,
    order_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<NextPayment>> {
    let Some(order) = store::get_order(pool, order_id).await? else {
        return Ok(None);
    };

    let total_paid = store::sum_completed_payments(pool, order.user_id, order.product_id).await?;
    let remaining = (order.order_amount - total_paid).max(0);
    let last_paid_at = store::last_payment_at(pool, order.user_id, order.product_id).await?;

    let paid_today = last_paid_at
        .map(|t| t.date_naive() == now.date_naive())
        .unwrap_or(false);

    Ok(Some(NextPayment {
        can_make_payment: remaining > 0 && !paid_today,
        next_payment_date: next_payment_date(now, last_paid_at),
        suggested_amount: suggested_amount(order.daily_amount, order.order_amount, remaining),
        total_paid,
        remaining_amount: remaining,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_payment_is_today_until_an_installment_clears() {
        let now = Utc::now();
        assert_eq!(next_payment_date(now, None), now.date_naive());
        assert_eq!(
            next_payment_date(now, Some(now - Duration::days(1))),
            now.date_naive()
        );
    }

    #[test]
    fn next_payment_moves_to_tomorrow_after_todays_installment() {
        let now = Utc::now();
        assert_eq!(
            next_payment_date(now, Some(now)),
            now.date_naive() + Duration::days(1)
        );
    }

    #[test]
    fn suggested_amount_never_exceeds_the_remainder() {
        assert_eq!(suggested_amount(Some(100), 3399, 3299), 100);
        assert_eq!(suggested_amount(Some(100), 3399, 99), 99);
        assert_eq!(suggested_amount(Some(100), 3399, 0), 0);
        // upfront order with no daily rate: the whole remainder
        assert_eq!(suggested_amount(None, 900, 900), 900);
    }
}
