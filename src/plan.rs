//! Plan reconciliation: on a user's first payment for a product, fold the
//! purchase into their single cross-product plan aggregate.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::store;
use crate::types::{Order, PlanProduct, PlanProductStatus, Product};

/// Days needed to pay `price` off at `daily_payment` per day, rounded up.
pub fn payoff_days(price: i64, daily_payment: i64) -> i64 {
    if daily_payment <= 0 {
        return 0;
    }
    (price + daily_payment - 1) / daily_payment
}

/// Builds the plan entry materialized by a first payment.
pub fn new_plan_entry(
    plan_id: Uuid,
    product: &Product,
    order: &Order,
    payment_amount: i64,
    now: DateTime<Utc>,
) -> PlanProduct {
    // order payment details first, actual payment as the fallback
    let daily_payment = order
        .daily_amount
        .filter(|&d| d > 0)
        .unwrap_or_else(|| payment_amount.max(1));

    let status = if payment_amount >= product.price {
        PlanProductStatus::Completed
    } else if payment_amount > 0 {
        PlanProductStatus::Partial
    } else {
        PlanProductStatus::Pending
    };

    PlanProduct {
        id: Uuid::new_v4(),
        plan_id,
        product_id: product.id,
        daily_payment,
        total_product_amount: product.price,
        paid_amount: payment_amount,
        status,
        is_active: true,
        start_date: now,
        end_date: Some(now + Duration::days(payoff_days(product.price, daily_payment))),
        delivery_address: order.delivery_address.clone(),
        payment_method: order.payment_option.as_str().to_string(),
        last_payment_date: Some(now),
    }
}

/// Materializes or updates the payer's plan for the order's product, then
/// recomputes the plan-level totals. Called on first payments only; a
/// re-entrant call (verify retry) reactivates the entry without
/// double-crediting `paid_amount`.
pub async fn reconcile_first_payment(
    pool: &PgPool,
    user_id: i64,
    order: &Order,
    payment_amount: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    let product = store::get_product(pool, order.product_id)
        .await?
        .with_context(|| format!("product {} not found", order.product_id))?;

    let mut tx = pool.begin().await?;

    let plan = store::ensure_plan(&mut tx, user_id).await?;

    match store::get_plan_product(&mut tx, plan.id, product.id).await? {
        None => {
            let entry = new_plan_entry(plan.id, &product, order, payment_amount, now);
            if !store::insert_plan_product(&mut tx, &entry).await? {
                // a concurrent first payment won the insert; fall through to
                // the re-entrant path against the surviving row
                if let Some(existing) = store::get_plan_product(&mut tx, plan.id, product.id).await?
                {
                    store::reactivate_plan_product(&mut tx, existing.id, payment_amount, now)
                        .await?;
                }
            }
        }
        Some(existing) => {
            store::reactivate_plan_product(&mut tx, existing.id, payment_amount, now).await?;
        }
    }

    // mandatory on every save: plan totals are derived from the entries
    store::recompute_plan_totals(&mut tx, plan.id).await?;

    tx.commit().await?;

    info!(user_id, plan_id = %plan.id, product_id = product.id, "plan reconciled");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderStatus, PaymentOption, PaymentStatus};

    fn order_for(product_id: i64, daily_amount: Option<i64>) -> Order {
        let now = Utc::now();
        Order {
            id: Uuid::new_v4(),
            user_id: 7,
            product_id,
            order_amount: 3399,
            payment_option: PaymentOption::Daily,
            daily_amount,
            total_duration: None,
            start_date: now,
            end_date: None,
            order_status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            delivery_address: "12 Hill Road".to_string(),
            created_at: now,
        }
    }

    #[test]
    fn payoff_days_rounds_up() {
        assert_eq!(payoff_days(3399, 100), 34);
        assert_eq!(payoff_days(3400, 100), 34);
        assert_eq!(payoff_days(50, 100), 1);
        assert_eq!(payoff_days(100, 0), 0);
    }

    #[test]
    fn first_payment_materializes_an_active_partial_entry() {
        let now = Utc::now();
        let product = Product {
            id: 11,
            name: "phone".to_string(),
            price: 3399,
        };
        let entry = new_plan_entry(Uuid::new_v4(), &product, &order_for(11, Some(100)), 100, now);

        assert!(entry.is_active);
        assert_eq!(entry.paid_amount, 100);
        assert_eq!(entry.total_product_amount, 3399);
        assert_eq!(entry.status, PlanProductStatus::Partial);
        assert_eq!(entry.daily_payment, 100);
        assert_eq!(entry.end_date, Some(now + Duration::days(34)));
        assert_eq!(entry.last_payment_date, Some(now));
    }

    #[test]
    fn payment_amount_backfills_a_missing_daily_rate() {
        let product = Product {
            id: 11,
            name: "phone".to_string(),
            price: 3399,
        };
        let entry = new_plan_entry(
            Uuid::new_v4(),
            &product,
            &order_for(11, None),
            250,
            Utc::now(),
        );
        assert_eq!(entry.daily_payment, 250);
    }

    #[test]
    fn upfront_payment_completes_the_entry_immediately() {
        let product = Product {
            id: 4,
            name: "kettle".to_string(),
            price: 900,
        };
        let entry = new_plan_entry(
            Uuid::new_v4(),
            &product,
            &order_for(4, None),
            900,
            Utc::now(),
        );
        assert_eq!(entry.status, PlanProductStatus::Completed);
    }
}
