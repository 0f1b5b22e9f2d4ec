use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Daily rates offered to buyers, in whole currency units.
pub const INSTALLMENT_RATES: [i64; 4] = [100, 200, 300, 500];

/// One entry in the installment menu for a given price.
#[derive(Clone, Debug, Serialize)]
pub struct InstallmentOption {
    /// Daily rate.
    pub amount: i64,
    /// Number of payments, final one included.
    pub periods: i64,
    pub period_unit: &'static str,
    pub total_amount: i64,
    /// The last payment absorbs the remainder so the schedule sums to the
    /// price exactly. Always in (0, amount].
    pub final_payment: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_recommended: bool,
}

/// Builds the installment menu for a price. Pure and deterministic given
/// `now`. A non-positive price yields an empty menu, meaning "no installment
/// plans available", not an error.
pub fn generate_installment_options(price: i64, now: DateTime<Utc>) -> Vec<InstallmentOption> {
    if price <= 0 {
        return Vec::new();
    }

    INSTALLMENT_RATES
        .iter()
        .map(|&rate| {
            let periods = ((price + rate - 1) / rate).max(1);
            let final_payment = price - rate * (periods - 1);
            InstallmentOption {
                amount: rate,
                periods,
                period_unit: "day",
                total_amount: price,
                final_payment,
                start_date: now,
                end_date: now + Duration::days(periods),
                // the menu is sorted by rate ascending, so the first entry
                // is the cheapest daily commitment
                is_recommended: rate == INSTALLMENT_RATES[0],
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_sums_to_price_exactly() {
        let now = Utc::now();
        for price in [1, 99, 100, 101, 3399, 12_500, 999_983] {
            for opt in generate_installment_options(price, now) {
                assert_eq!(
                    opt.amount * (opt.periods - 1) + opt.final_payment,
                    price,
                    "rate {} for price {}",
                    opt.amount,
                    price
                );
                assert!(opt.final_payment > 0);
                assert!(opt.final_payment <= opt.amount);
                assert_eq!(opt.end_date, now + Duration::days(opt.periods));
            }
        }
    }

    #[test]
    fn price_3399_at_rate_100_takes_34_days() {
        let opts = generate_installment_options(3399, Utc::now());
        let opt = opts.iter().find(|o| o.amount == 100).unwrap();
        assert_eq!(opt.periods, 34);
        assert_eq!(opt.final_payment, 99);
    }

    #[test]
    fn lowest_rate_is_recommended() {
        let opts = generate_installment_options(5000, Utc::now());
        assert!(opts[0].is_recommended);
        assert_eq!(opts[0].amount, 100);
        assert!(opts[1..].iter().all(|o| !o.is_recommended));
    }

    #[test]
    fn price_below_rate_is_a_single_payment() {
        let opts = generate_installment_options(50, Utc::now());
        for opt in &opts {
            assert_eq!(opt.periods, 1);
            assert_eq!(opt.final_payment, 50);
        }
    }

    #[test]
    fn non_positive_price_yields_no_options() {
        assert!(generate_installment_options(0, Utc::now()).is_empty());
        assert!(generate_installment_options(-250, Utc::now()).is_empty());
    }
}
