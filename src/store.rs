//! All Postgres access for the ledger: orders, transactions, plans,
//! referrals, daily commissions and the user wallet.
//!
//! The idempotency-critical writes live here: guarded status updates that
//! report whether this caller won, and `ON CONFLICT DO NOTHING` inserts whose
//! row count resolves races at the storage layer instead of in application
//! code.

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::types::{
    CommissionStatus, DailyCommission, Order, PaymentStatus, Plan, PlanProduct, Product, Referral,
    ReferralStatus, Txn,
};

// ---------------------------------------------------------------------------
// users / wallet

/// The payer's referrer, if the payer was referred and the referrer account
/// is still active.
pub async fn active_referrer(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i64,
) -> Result<Option<i64>> {
    let row = sqlx::query(r#"SELECT referred_by FROM users WHERE id = $1"#)
        .bind(user_id)
        .fetch_optional(tx.as_mut())
        .await?;

    let referred_by: Option<i64> = match row {
        Some(r) => r.try_get("referred_by")?,
        None => return Ok(None),
    };
    if let Some(rid) = referred_by {
        if let Some(r2) = sqlx::query(r#"SELECT is_active FROM users WHERE id = $1"#)
            .bind(rid)
            .fetch_optional(tx.as_mut())
            .await?
        {
            if r2.try_get::<bool, _>("is_active")? {
                return Ok(Some(rid));
            }
        }
    }
    Ok(None)
}

/// Credits a wallet as a single atomic increment and appends the matching
/// wallet log entry. Never read-modify-write.
pub async fn credit_wallet(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i64,
    amount: i64,
    entry_type: &str,
    description: &str,
) -> Result<()> {
    sqlx::query(r#"UPDATE users SET wallet_balance = wallet_balance + $2 WHERE id = $1"#)
        .bind(user_id)
        .bind(amount)
        .execute(tx.as_mut())
        .await?;

    sqlx::query(
        r#"INSERT INTO wallet_entries (id, user_id, entry_type, amount, description)
           VALUES ($1, $2, $3, $4, $5)"#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(entry_type)
    .bind(amount)
    .bind(description)
    .execute(tx.as_mut())
    .await?;

    Ok(())
}

pub async fn wallet_balance(pool: &PgPool, user_id: i64) -> Result<i64> {
    let row = sqlx::query(r#"SELECT wallet_balance FROM users WHERE id = $1"#)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| r.get("wallet_balance")).unwrap_or(0))
}

// ---------------------------------------------------------------------------
// products

pub async fn get_product(pool: &PgPool, product_id: i64) -> Result<Option<Product>> {
    let product = sqlx::query_as::<_, Product>(
        r#"SELECT id, name, price FROM products WHERE id = $1"#,
    )
    .bind(product_id)
    .fetch_optional(pool)
    .await?;
    Ok(product)
}

// ---------------------------------------------------------------------------
// orders

pub async fn insert_order(pool: &PgPool, order: &Order) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO orders
               (id, user_id, product_id, order_amount, payment_option, daily_amount,
                total_duration, start_date, end_date, order_status, payment_status,
                delivery_address, created_at)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"#,
    )
    .bind(order.id)
    .bind(order.user_id)
    .bind(order.product_id)
    .bind(order.order_amount)
    .bind(order.payment_option.as_str())
    .bind(order.daily_amount)
    .bind(order.total_duration)
    .bind(order.start_date)
    .bind(order.end_date)
    .bind(order.order_status.as_str())
    .bind(order.payment_status.as_str())
    .bind(&order.delivery_address)
    .bind(order.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_order(pool: &PgPool, order_id: Uuid) -> Result<Option<Order>> {
    let order = sqlx::query_as::<_, Order>(r#"SELECT * FROM orders WHERE id = $1"#)
        .bind(order_id)
        .fetch_optional(pool)
        .await?;
    Ok(order)
}

/// The most recent non-cancelled order for (user, product).
pub async fn find_order_for(
    pool: &PgPool,
    user_id: i64,
    product_id: i64,
) -> Result<Option<Order>> {
    let order = sqlx::query_as::<_, Order>(
        r#"SELECT * FROM orders
           WHERE user_id = $1 AND product_id = $2 AND order_status <> 'cancelled'
           ORDER BY created_at DESC
           LIMIT 1"#,
    )
    .bind(user_id)
    .bind(product_id)
    .fetch_optional(pool)
    .await?;
    Ok(order)
}

/// Moves the order's payment status. The guard keeps the transition
/// monotonic: a completed order is never written over.
pub async fn set_order_payment_status(
    pool: &PgPool,
    order_id: Uuid,
    status: PaymentStatus,
) -> Result<()> {
    sqlx::query(
        r#"UPDATE orders
           SET payment_status = $2,
               order_status = CASE WHEN order_status = 'pending' THEN 'confirmed'
                                   ELSE order_status END
           WHERE id = $1 AND payment_status <> 'completed'"#,
    )
    .bind(order_id)
    .bind(status.as_str())
    .execute(pool)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// transactions

pub async fn insert_txn(pool: &PgPool, txn: &Txn) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO transactions
               (id, user_id, txn_type, amount, status, payment_method, gateway_order_id,
                gateway_payment_id, gateway_signature, product_id, plan_id, created_at)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"#,
    )
    .bind(txn.id)
    .bind(txn.user_id)
    .bind(txn.txn_type.as_str())
    .bind(txn.amount)
    .bind(txn.status.as_str())
    .bind(&txn.payment_method)
    .bind(&txn.gateway_order_id)
    .bind(&txn.gateway_payment_id)
    .bind(&txn.gateway_signature)
    .bind(txn.product_id)
    .bind(txn.plan_id)
    .bind(txn.created_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_txn(pool: &PgPool, txn_id: Uuid) -> Result<Option<Txn>> {
    let txn = sqlx::query_as::<_, Txn>(r#"SELECT * FROM transactions WHERE id = $1"#)
        .bind(txn_id)
        .fetch_optional(pool)
        .await?;
    Ok(txn)
}

/// Marks a pending transaction completed and attaches the gateway audit
/// fields. Returns whether this call did the completion; `false` means the
/// transaction was not pending anymore (or does not exist) and the caller
/// must not count the payment again.
pub async fn complete_txn(
    pool: &PgPool,
    txn_id: Uuid,
    gateway_payment_id: &str,
    gateway_signature: &str,
) -> Result<bool> {
    let res = sqlx::query(
        r#"UPDATE transactions
           SET status = 'completed', gateway_payment_id = $2, gateway_signature = $3
           WHERE id = $1 AND status = 'pending'"#,
    )
    .bind(txn_id)
    .bind(gateway_payment_id)
    .bind(gateway_signature)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// Sum of all completed payment-type transactions for (user, product).
pub async fn sum_completed_payments(
    pool: &PgPool,
    user_id: i64,
    product_id: i64,
) -> Result<i64> {
    let row = sqlx::query(
        r#"SELECT COALESCE(SUM(amount), 0)::BIGINT AS total
           FROM transactions
           WHERE user_id = $1 AND product_id = $2
             AND status = 'completed'
             AND txn_type IN ('purchase', 'plan_payment')"#,
    )
    .bind(user_id)
    .bind(product_id)
    .fetch_one(pool)
    .await?;
    Ok(row.get("total"))
}

pub async fn count_completed_payments(
    pool: &PgPool,
    user_id: i64,
    product_id: i64,
) -> Result<i64> {
    let row = sqlx::query(
        r#"SELECT COUNT(*) AS n
           FROM transactions
           WHERE user_id = $1 AND product_id = $2
             AND status = 'completed'
             AND txn_type IN ('purchase', 'plan_payment')"#,
    )
    .bind(user_id)
    .bind(product_id)
    .fetch_one(pool)
    .await?;
    Ok(row.get("n"))
}

pub async fn list_payment_txns(
    pool: &PgPool,
    user_id: i64,
    product_id: i64,
) -> Result<Vec<Txn>> {
    let txns = sqlx::query_as::<_, Txn>(
        r#"SELECT * FROM transactions
           WHERE user_id = $1 AND product_id = $2
             AND txn_type IN ('purchase', 'plan_payment')
           ORDER BY created_at ASC"#,
    )
    .bind(user_id)
    .bind(product_id)
    .fetch_all(pool)
    .await?;
    Ok(txns)
}

/// When the user last completed a payment toward this product, if ever.
pub async fn last_payment_at(
    pool: &PgPool,
    user_id: i64,
    product_id: i64,
) -> Result<Option<DateTime<Utc>>> {
    let row = sqlx::query(
        r#"SELECT MAX(created_at) AS last_at
           FROM transactions
           WHERE user_id = $1 AND product_id = $2
             AND status = 'completed'
             AND txn_type IN ('purchase', 'plan_payment')"#,
    )
    .bind(user_id)
    .bind(product_id)
    .fetch_one(pool)
    .await?;
    Ok(row.try_get("last_at")?)
}

/// Whether the user completed any qualifying payment inside [from, to).
/// Used by the sweep to decide credit-vs-extend for the day.
pub async fn has_payment_between(
    pool: &PgPool,
    user_id: i64,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<bool> {
    let row = sqlx::query(
        r#"SELECT EXISTS (
               SELECT 1 FROM transactions
               WHERE user_id = $1
                 AND status = 'completed'
                 AND txn_type IN ('purchase', 'plan_payment')
                 AND created_at >= $2 AND created_at < $3
           ) AS found"#,
    )
    .bind(user_id)
    .bind(from)
    .bind(to)
    .fetch_one(pool)
    .await?;
    Ok(row.get("found"))
}

// ---------------------------------------------------------------------------
// plans

/// Find-or-create the user's single plan. The unique constraint on user_id
/// makes the create side race-safe; the loser re-fetches.
pub async fn ensure_plan(tx: &mut Transaction<'_, Postgres>, user_id: i64) -> Result<Plan> {
    sqlx::query(
        r#"INSERT INTO plans (id, user_id) VALUES ($1, $2)
           ON CONFLICT (user_id) DO NOTHING"#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .execute(tx.as_mut())
    .await?;

    let plan = sqlx::query_as::<_, Plan>(r#"SELECT * FROM plans WHERE user_id = $1"#)
        .bind(user_id)
        .fetch_one(tx.as_mut())
        .await?;
    Ok(plan)
}

pub async fn get_plan_product(
    tx: &mut Transaction<'_, Postgres>,
    plan_id: Uuid,
    product_id: i64,
) -> Result<Option<PlanProduct>> {
    let entry = sqlx::query_as::<_, PlanProduct>(
        r#"SELECT * FROM plan_products WHERE plan_id = $1 AND product_id = $2"#,
    )
    .bind(plan_id)
    .bind(product_id)
    .fetch_optional(tx.as_mut())
    .await?;
    Ok(entry)
}

/// Appends a product entry. Returns false when the (plan, product) entry
/// already exists, which is how a concurrent first-payment race resolves.
pub async fn insert_plan_product(
    tx: &mut Transaction<'_, Postgres>,
    entry: &PlanProduct,
) -> Result<bool> {
    let res = sqlx::query(
        r#"INSERT INTO plan_products
               (id, plan_id, product_id, daily_payment, total_product_amount, paid_amount,
                status, is_active, start_date, end_date, delivery_address, payment_method,
                last_payment_date)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
           ON CONFLICT (plan_id, product_id) DO NOTHING"#,
    )
    .bind(entry.id)
    .bind(entry.plan_id)
    .bind(entry.product_id)
    .bind(entry.daily_payment)
    .bind(entry.total_product_amount)
    .bind(entry.paid_amount)
    .bind(entry.status.as_str())
    .bind(entry.is_active)
    .bind(entry.start_date)
    .bind(entry.end_date)
    .bind(&entry.delivery_address)
    .bind(&entry.payment_method)
    .bind(entry.last_payment_date)
    .execute(tx.as_mut())
    .await?;
    Ok(res.rows_affected() == 1)
}

/// Re-entrant first-payment call: reactivate the entry and touch the payment
/// timestamp. `paid_amount` is only written if it is still zero, so a retry
/// cannot double-credit.
pub async fn reactivate_plan_product(
    tx: &mut Transaction<'_, Postgres>,
    entry_id: Uuid,
    paid_amount: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"UPDATE plan_products
           SET is_active = TRUE,
               last_payment_date = $3,
               paid_amount = CASE WHEN paid_amount = 0 THEN $2 ELSE paid_amount END,
               status = CASE WHEN paid_amount = 0 AND $2 > 0 THEN 'partial' ELSE status END
           WHERE id = $1"#,
    )
    .bind(entry_id)
    .bind(paid_amount)
    .bind(now)
    .execute(tx.as_mut())
    .await?;
    Ok(())
}

/// Recomputes the plan-level totals from the product entries. Mandatory
/// after every write that touches an entry.
pub async fn recompute_plan_totals(
    tx: &mut Transaction<'_, Postgres>,
    plan_id: Uuid,
) -> Result<()> {
    sqlx::query(
        r#"UPDATE plans
           SET total_amount = (SELECT COALESCE(SUM(total_product_amount), 0)::BIGINT
                               FROM plan_products WHERE plan_id = $1),
               completed_amount = (SELECT COALESCE(SUM(paid_amount), 0)::BIGINT
                                   FROM plan_products WHERE plan_id = $1)
           WHERE id = $1"#,
    )
    .bind(plan_id)
    .execute(tx.as_mut())
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// referrals

const REFERRAL_COLUMNS: &str = r#"
    r.id, r.referrer_id, r.referred_user_id, r.status, r.start_date, r.end_date,
    r.daily_amount, r.days, r.total_amount, r.commission_percentage, r.last_payment_date,
    (SELECT COUNT(*) FROM daily_commissions dc WHERE dc.referral_id = r.id) AS days_paid,
    (SELECT COALESCE(SUM(dc.amount), 0)::BIGINT
     FROM daily_commissions dc WHERE dc.referral_id = r.id) AS commission_earned
"#;

pub async fn get_referral(pool: &PgPool, referral_id: Uuid) -> Result<Option<Referral>> {
    let sql = format!("SELECT {REFERRAL_COLUMNS} FROM referrals r WHERE r.id = $1");
    let referral = sqlx::query_as::<_, Referral>(&sql)
        .bind(referral_id)
        .fetch_optional(pool)
        .await?;
    Ok(referral)
}

pub async fn find_referral_pair(
    tx: &mut Transaction<'_, Postgres>,
    referrer_id: i64,
    referred_user_id: i64,
) -> Result<Option<Referral>> {
    let sql = format!(
        "SELECT {REFERRAL_COLUMNS} FROM referrals r
         WHERE r.referrer_id = $1 AND r.referred_user_id = $2"
    );
    let referral = sqlx::query_as::<_, Referral>(&sql)
        .bind(referrer_id)
        .bind(referred_user_id)
        .fetch_optional(tx.as_mut())
        .await?;
    Ok(referral)
}

/// Materializes a referral with the given terms unless one already exists
/// for the pair, then returns the surviving row either way.
#[allow(clippy::too_many_arguments)]
pub async fn ensure_referral(
    tx: &mut Transaction<'_, Postgres>,
    referrer_id: i64,
    referred_user_id: i64,
    daily_amount: i64,
    days: i32,
    total_amount: i64,
    commission_percentage: i32,
    now: DateTime<Utc>,
) -> Result<Referral> {
    sqlx::query(
        r#"INSERT INTO referrals
               (id, referrer_id, referred_user_id, status, start_date, end_date,
                daily_amount, days, total_amount, commission_percentage)
           VALUES ($1, $2, $3, 'active', $4, $5, $6, $7, $8, $9)
           ON CONFLICT (referrer_id, referred_user_id) DO NOTHING"#,
    )
    .bind(Uuid::new_v4())
    .bind(referrer_id)
    .bind(referred_user_id)
    .bind(now)
    .bind(now + chrono::Duration::days(days as i64))
    .bind(daily_amount)
    .bind(days)
    .bind(total_amount)
    .bind(commission_percentage)
    .execute(tx.as_mut())
    .await?;

    let referral = find_referral_pair(tx, referrer_id, referred_user_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("referral vanished after upsert"))?;
    Ok(referral)
}

/// All referrals the sweep must visit: active, with a schedule still open.
pub async fn list_active_referrals(pool: &PgPool, now: DateTime<Utc>) -> Result<Vec<Referral>> {
    let sql = format!(
        "SELECT {REFERRAL_COLUMNS} FROM referrals r
         WHERE r.status = 'active' AND r.end_date > $1
         ORDER BY r.start_date ASC"
    );
    let referrals = sqlx::query_as::<_, Referral>(&sql)
        .bind(now)
        .fetch_all(pool)
        .await?;
    Ok(referrals)
}

pub async fn set_referral_status(
    tx: &mut Transaction<'_, Postgres>,
    referral_id: Uuid,
    status: ReferralStatus,
    end_date: DateTime<Utc>,
    last_payment_date: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"UPDATE referrals
           SET status = $2, end_date = $3, last_payment_date = $4
           WHERE id = $1"#,
    )
    .bind(referral_id)
    .bind(status.as_str())
    .bind(end_date)
    .bind(last_payment_date)
    .execute(tx.as_mut())
    .await?;
    Ok(())
}

/// One-day penalty extension for a missed installment.
pub async fn extend_referral_by_one_day(pool: &PgPool, referral_id: Uuid) -> Result<()> {
    sqlx::query(r#"UPDATE referrals SET end_date = end_date + INTERVAL '1 day' WHERE id = $1"#)
        .bind(referral_id)
        .execute(pool)
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// daily commissions

/// Inserts the pending commission row for (referral, day). Returns the new
/// row's id, or None when a row for that day already exists -- the losing
/// side of the inline-credit vs. sweep race, which must skip silently.
pub async fn insert_daily_commission(
    tx: &mut Transaction<'_, Postgres>,
    referral_id: Uuid,
    referrer_id: i64,
    amount: i64,
    day: NaiveDate,
) -> Result<Option<Uuid>> {
    let id = Uuid::new_v4();
    let row = sqlx::query(
        r#"INSERT INTO daily_commissions (id, referral_id, referrer_id, amount, commission_date)
           VALUES ($1, $2, $3, $4, $5)
           ON CONFLICT (referral_id, commission_date) DO NOTHING
           RETURNING id"#,
    )
    .bind(id)
    .bind(referral_id)
    .bind(referrer_id)
    .bind(amount)
    .bind(day)
    .fetch_optional(tx.as_mut())
    .await?;
    Ok(row.map(|r| r.get("id")))
}

pub async fn set_commission_status(
    tx: &mut Transaction<'_, Postgres>,
    commission_id: Uuid,
    status: CommissionStatus,
) -> Result<()> {
    sqlx::query(r#"UPDATE daily_commissions SET status = $2 WHERE id = $1"#)
        .bind(commission_id)
        .bind(status.as_str())
        .execute(tx.as_mut())
        .await?;
    Ok(())
}

/// Count of commission events for the referral, the ground truth behind
/// `days_paid`.
pub async fn count_days_paid(
    tx: &mut Transaction<'_, Postgres>,
    referral_id: Uuid,
) -> Result<i64> {
    let row = sqlx::query(r#"SELECT COUNT(*) AS n FROM daily_commissions WHERE referral_id = $1"#)
        .bind(referral_id)
        .fetch_one(tx.as_mut())
        .await?;
    Ok(row.get("n"))
}

pub async fn list_commissions(pool: &PgPool, referral_id: Uuid) -> Result<Vec<DailyCommission>> {
    let commissions = sqlx::query_as::<_, DailyCommission>(
        r#"SELECT * FROM daily_commissions
           WHERE referral_id = $1
           ORDER BY commission_date ASC"#,
    )
    .bind(referral_id)
    .fetch_all(pool)
    .await?;
    Ok(commissions)
}

/// Whether a commission row exists for (referral, day) -- read-only probe
/// used by the sweep to avoid pointless credit attempts. The unique index
/// stays the actual arbiter.
pub async fn commission_exists_for_day(
    pool: &PgPool,
    referral_id: Uuid,
    day: NaiveDate,
) -> Result<bool> {
    let row = sqlx::query(
        r#"SELECT EXISTS (
               SELECT 1 FROM daily_commissions
               WHERE referral_id = $1 AND commission_date = $2
           ) AS found"#,
    )
    .bind(referral_id)
    .bind(day)
    .fetch_one(pool)
    .await?;
    Ok(row.get("found"))
}
