//! Referral commission engine: turns a referred user's verified payment into
//! a daily commission for the referrer.
//!
//! The whole credit path runs inside one Postgres transaction, and the
//! unique index on (referral, commission_date) is the arbiter for every race
//! this engine can lose: a second same-day payment, a verify retry, or the
//! daily sweep running after an inline credit. The loser skips silently.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::store;
use crate::types::{CommissionStatus, Referral, ReferralStatus};

/// Fallback terms used when a referral is materialized lazily, with no
/// explicit installment plan to copy from.
#[derive(Clone, Copy, Debug)]
pub struct ReferralTerms {
    pub daily_amount: i64,
    pub days: i32,
    pub commission_percentage: i32,
}

pub const DEFAULT_TERMS: ReferralTerms = ReferralTerms {
    daily_amount: 100,
    days: 30,
    commission_percentage: 30,
};

/// What happened to a single credit attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommissionOutcome {
    /// The payer has no (active) referrer.
    NotReferred,
    /// The referral schedule is already completed or cancelled.
    ScheduleClosed,
    /// The rounded commission came out to zero.
    NothingToCredit,
    /// A commission for (referral, today) already exists.
    AlreadyCreditedToday,
    Credited {
        amount: i64,
        /// True when this credit was the one that finished the schedule.
        completed: bool,
    },
}

/// Commission for a payment, rounded half-up.
pub fn commission_amount(payment_amount: i64, percentage: i32) -> i64 {
    ((payment_amount as i128 * percentage as i128 + 50) / 100) as i64
}

/// A referral is done exactly when it has accumulated `days` commission
/// events, never before.
pub fn completion_reached(days_paid: i64, days: i32) -> bool {
    days_paid >= days as i64
}

/// Credits the payer's referrer for today's payment. Callers treat this as
/// best-effort: the payment that triggered it has already succeeded.
pub async fn credit_commission(
    pool: &PgPool,
    payer_id: i64,
    payment_amount: i64,
    now: DateTime<Utc>,
) -> Result<CommissionOutcome> {
    let mut tx = pool.begin().await?;

    let Some(referrer_id) = store::active_referrer(&mut tx, payer_id).await? else {
        tx.commit().await?;
        return Ok(CommissionOutcome::NotReferred);
    };

    let referral = match store::find_referral_pair(&mut tx, referrer_id, payer_id).await? {
        Some(r) => r,
        None => {
            let t = DEFAULT_TERMS;
            store::ensure_referral(
                &mut tx,
                referrer_id,
                payer_id,
                t.daily_amount,
                t.days,
                t.daily_amount * t.days as i64,
                t.commission_percentage,
                now,
            )
            .await?
        }
    };

    if matches!(
        referral.status,
        ReferralStatus::Completed | ReferralStatus::Cancelled
    ) {
        tx.commit().await?;
        return Ok(CommissionOutcome::ScheduleClosed);
    }

    let amount = commission_amount(payment_amount, referral.commission_percentage);
    if amount <= 0 {
        tx.commit().await?;
        return Ok(CommissionOutcome::NothingToCredit);
    }

    let Some(commission_id) =
        store::insert_daily_commission(&mut tx, referral.id, referrer_id, amount, now.date_naive())
            .await?
    else {
        // lost the (referral, day) race to another payment or the sweep
        tx.commit().await?;
        return Ok(CommissionOutcome::AlreadyCreditedToday);
    };

    store::credit_wallet(
        &mut tx,
        referrer_id,
        amount,
        "referral",
        &format!("daily commission for referral {}", referral.id),
    )
    .await?;
    store::set_commission_status(&mut tx, commission_id, CommissionStatus::Paid).await?;

    let days_paid = store::count_days_paid(&mut tx, referral.id).await?;
    let completed = completion_reached(days_paid, referral.days);
    if completed {
        store::set_referral_status(&mut tx, referral.id, ReferralStatus::Completed, now, now)
            .await?;
    } else {
        // re-derive rather than extend, correcting any prior drift
        let end_date = referral.start_date + Duration::days(referral.days as i64);
        store::set_referral_status(&mut tx, referral.id, ReferralStatus::Active, end_date, now)
            .await?;
    }

    tx.commit().await?;

    info!(
        referral_id = %referral.id,
        referrer_id,
        amount,
        days_paid,
        completed,
        "commission credited"
    );
    Ok(CommissionOutcome::Credited { amount, completed })
}

/// Progress of a referral schedule as an integer percentage, capped at 100.
pub fn progress_percent(days_paid: i64, days: i32) -> i64 {
    if days <= 0 {
        return 100;
    }
    (days_paid * 100 / days as i64).min(100)
}

/// Day-level accounting for a referral schedule.
#[derive(Clone, Debug, Serialize)]
pub struct MissedDays {
    pub referral_id: Uuid,
    pub total_days_since_start: i64,
    pub expected_payment_days: i64,
    pub actual_paid_days: i64,
    pub missed_days: i64,
    pub original_end_date: DateTime<Utc>,
    pub current_end_date: DateTime<Utc>,
}

/// How many scheduled payment days the referred user has missed so far.
/// Day zero counts as an expected payment day; the expectation is capped at
/// the schedule length.
pub fn missed_payment_days(referral: &Referral, now: DateTime<Utc>) -> MissedDays {
    let total_days_since_start = (now.date_naive() - referral.start_date.date_naive())
        .num_days()
        .max(0);
    let expected_payment_days = (total_days_since_start + 1).min(referral.days as i64);
    let missed_days = (expected_payment_days - referral.days_paid).max(0);

    MissedDays {
        referral_id: referral.id,
        total_days_since_start,
        expected_payment_days,
        actual_paid_days: referral.days_paid,
        missed_days,
        original_end_date: referral.start_date + Duration::days(referral.days as i64),
        current_end_date: referral.end_date,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn referral_with(days: i32, days_paid: i64, start: DateTime<Utc>) -> Referral {
        Referral {
            id: Uuid::new_v4(),
            referrer_id: 1,
            referred_user_id: 2,
            status: ReferralStatus::Active,
            start_date: start,
            end_date: start + Duration::days(days as i64),
            daily_amount: 100,
            days,
            total_amount: 100 * days as i64,
            commission_percentage: 30,
            last_payment_date: None,
            days_paid,
            commission_earned: 30 * days_paid,
        }
    }

    #[test]
    fn thirty_percent_of_a_hundred_is_thirty() {
        assert_eq!(commission_amount(100, 30), 30);
    }

    #[test]
    fn commission_rounds_half_up() {
        assert_eq!(commission_amount(101, 30), 30); // 30.3
        assert_eq!(commission_amount(105, 30), 32); // 31.5
        assert_eq!(commission_amount(1, 30), 0); // 0.3
        assert_eq!(commission_amount(2, 30), 1); // 0.6
    }

    #[test]
    fn default_terms_are_the_documented_fallback() {
        assert_eq!(DEFAULT_TERMS.daily_amount, 100);
        assert_eq!(DEFAULT_TERMS.days, 30);
        assert_eq!(DEFAULT_TERMS.commission_percentage, 30);
    }

    #[test]
    fn completion_fires_exactly_at_the_target() {
        assert!(!completion_reached(6, 7));
        assert!(completion_reached(7, 7));
        assert!(completion_reached(8, 7));
    }

    #[test]
    fn progress_is_capped() {
        assert_eq!(progress_percent(0, 30), 0);
        assert_eq!(progress_percent(15, 30), 50);
        assert_eq!(progress_percent(30, 30), 100);
        assert_eq!(progress_percent(31, 30), 100);
    }

    #[test]
    fn missed_days_on_day_zero() {
        let now = Utc::now();
        let r = referral_with(30, 0, now);
        let m = missed_payment_days(&r, now);
        assert_eq!(m.total_days_since_start, 0);
        assert_eq!(m.expected_payment_days, 1);
        assert_eq!(m.missed_days, 1);
    }

    #[test]
    fn missed_days_accumulate_with_silence() {
        let now = Utc::now();
        let r = referral_with(30, 3, now - Duration::days(9));
        let m = missed_payment_days(&r, now);
        assert_eq!(m.total_days_since_start, 9);
        assert_eq!(m.expected_payment_days, 10);
        assert_eq!(m.actual_paid_days, 3);
        assert_eq!(m.missed_days, 7);
    }

    #[test]
    fn expectation_caps_at_schedule_length() {
        let now = Utc::now();
        let r = referral_with(7, 7, now - Duration::days(40));
        let m = missed_payment_days(&r, now);
        assert_eq!(m.expected_payment_days, 7);
        assert_eq!(m.missed_days, 0);
        assert_eq!(m.original_end_date, r.start_date + Duration::days(7));
    }
}
