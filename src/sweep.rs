//! Daily commission sweep: the durability backstop behind the inline
//! per-payment credit. Once per day it visits every open referral, credits
//! commission where the referred user paid today, and extends the schedule
//! by one day where they did not.

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tracing::{error, info};

use crate::referral::{self, CommissionOutcome};
use crate::store;
use crate::types::Referral;

/// UTC midnight-to-midnight window containing `now`. The same window is
/// what `commission_date` keys on, so the sweep and the inline credit agree
/// on what "today" means.
pub fn day_window(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time")
        .and_utc();
    (start, start + Duration::days(1))
}

/// What the sweep decided for one referral.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweepAction {
    Credit,
    AlreadyCredited,
    Extend,
}

/// Decide per referral: a qualifying payment today without a commission row
/// yet means credit; a payment already covered means leave it alone; no
/// payment means a one-day penalty extension.
pub fn decide(paid_today: bool, commission_exists: bool) -> SweepAction {
    match (paid_today, commission_exists) {
        (true, false) => SweepAction::Credit,
        (true, true) => SweepAction::AlreadyCredited,
        (false, _) => SweepAction::Extend,
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub credited: usize,
    pub extended: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Runs one sweep tick over all active referrals with open schedules.
/// Individual failures are logged and counted; they never abort the batch.
pub async fn run_daily_sweep(pool: &PgPool, now: DateTime<Utc>) -> Result<SweepReport> {
    let (day_start, day_end) = day_window(now);
    let today: NaiveDate = now.date_naive();

    let referrals = store::list_active_referrals(pool, now).await?;
    let mut report = SweepReport {
        scanned: referrals.len(),
        ..Default::default()
    };

    for r in &referrals {
        match sweep_one(pool, r, today, day_start, day_end, now).await {
            Ok(SweepAction::Credit) => report.credited += 1,
            Ok(SweepAction::AlreadyCredited) => report.skipped += 1,
            Ok(SweepAction::Extend) => report.extended += 1,
            Err(e) => {
                report.failed += 1;
                error!(referral_id = %r.id, error = ?e, "sweep step failed");
            }
        }
    }

    info!(
        scanned = report.scanned,
        credited = report.credited,
        extended = report.extended,
        skipped = report.skipped,
        failed = report.failed,
        "daily sweep finished"
    );
    Ok(report)
}

async fn sweep_one(
    pool: &PgPool,
    r: &Referral,
    today: NaiveDate,
    day_start: DateTime<Utc>,
    day_end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<SweepAction> {
    let paid_today =
        store::has_payment_between(pool, r.referred_user_id, day_start, day_end).await?;
    let covered = store::commission_exists_for_day(pool, r.id, today).await?;

    let action = decide(paid_today, covered);
    match action {
        SweepAction::Credit => {
            // same credit path as the inline trigger; if an inline credit
            // lands between our probe and this call, the unique index turns
            // it into AlreadyCreditedToday and nothing is double-paid
            let outcome =
                referral::credit_commission(pool, r.referred_user_id, r.daily_amount, now).await?;
            if outcome == CommissionOutcome::AlreadyCreditedToday {
                return Ok(SweepAction::AlreadyCredited);
            }
        }
        SweepAction::AlreadyCredited => {}
        SweepAction::Extend => {
            store::extend_referral_by_one_day(pool, r.id).await?;
        }
    }
    Ok(action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn window_covers_one_utc_day() {
        let now = Utc.with_ymd_and_hms(2026, 8, 27, 15, 42, 7).unwrap();
        let (start, end) = day_window(now);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 8, 27, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 8, 28, 0, 0, 0).unwrap());
        assert!(start <= now && now < end);
    }

    #[test]
    fn payment_without_commission_credits() {
        assert_eq!(decide(true, false), SweepAction::Credit);
    }

    #[test]
    fn inline_credit_already_done_is_left_alone() {
        assert_eq!(decide(true, true), SweepAction::AlreadyCredited);
    }

    #[test]
    fn missed_day_extends_regardless_of_history() {
        assert_eq!(decide(false, false), SweepAction::Extend);
        assert_eq!(decide(false, true), SweepAction::Extend);
    }
}
