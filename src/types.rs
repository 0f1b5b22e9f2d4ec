use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use uuid::Uuid;

/// How the buyer pays the order off.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOption {
    Daily,
    Monthly,
    Upfront,
}

/// Order lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

/// How much of the order has been paid. Transitions are monotonic:
/// pending -> partial -> completed, never backwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Partial,
    Completed,
}

/// Ledger transaction kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnType {
    Purchase,
    Deposit,
    Withdrawal,
    Refund,
    PlanPayment,
    Referral,
}

/// Ledger transaction status. One-way: pending -> completed is terminal
/// success, pending -> failed/cancelled is terminal failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

/// Per-product payment progress inside a plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanProductStatus {
    Pending,
    Partial,
    Completed,
}

/// Referral schedule status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferralStatus {
    Pending,
    Active,
    Completed,
    Cancelled,
}

/// Daily commission status. Immutable once paid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionStatus {
    Pending,
    Paid,
    Failed,
}

macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!("unknown {}: {other:?}", stringify!($ty))),
                }
            }
        }
    };
}

text_enum!(PaymentOption {
    Daily => "daily",
    Monthly => "monthly",
    Upfront => "upfront",
});

text_enum!(OrderStatus {
    Pending => "pending",
    Confirmed => "confirmed",
    Completed => "completed",
    Cancelled => "cancelled",
});

text_enum!(PaymentStatus {
    Pending => "pending",
    Partial => "partial",
    Completed => "completed",
});

text_enum!(TxnType {
    Purchase => "purchase",
    Deposit => "deposit",
    Withdrawal => "withdrawal",
    Refund => "refund",
    PlanPayment => "plan_payment",
    Referral => "referral",
});

text_enum!(TxnStatus {
    Pending => "pending",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
});

text_enum!(PlanProductStatus {
    Pending => "pending",
    Partial => "partial",
    Completed => "completed",
});

text_enum!(ReferralStatus {
    Pending => "pending",
    Active => "active",
    Completed => "completed",
    Cancelled => "cancelled",
});

text_enum!(CommissionStatus {
    Pending => "pending",
    Paid => "paid",
    Failed => "failed",
});

impl PaymentStatus {
    /// Status an order should carry once `total_paid` of `order_amount` has
    /// cleared. Never regresses: a `Completed` order stays `Completed` no
    /// matter what the totals say.
    pub fn advanced(self, total_paid: i64, order_amount: i64) -> PaymentStatus {
        if self == PaymentStatus::Completed {
            return PaymentStatus::Completed;
        }
        if total_paid >= order_amount {
            PaymentStatus::Completed
        } else if total_paid > 0 {
            PaymentStatus::Partial
        } else {
            self
        }
    }
}

fn parse_col<T>(row: &PgRow, col: &str) -> Result<T, sqlx::Error>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.try_get(col)?;
    raw.parse()
        .map_err(|e: String| sqlx::Error::Decode(format!("column {col}: {e}").into()))
}

/// A catalog product. Read-only as far as this service is concerned.
#[derive(Clone, Debug, Serialize, FromRow)]
pub struct Product {
    pub id: i64,
    pub name: String,
    /// Price in whole currency units.
    pub price: i64,
}

/// One purchase intent for one product by one user.
#[derive(Clone, Debug, Serialize)]
pub struct Order {
    pub id: Uuid,
    pub user_id: i64,
    pub product_id: i64,
    /// Total price, fixed at creation.
    pub order_amount: i64,
    pub payment_option: PaymentOption,
    pub daily_amount: Option<i64>,
    pub total_duration: Option<i32>,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub order_status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub delivery_address: String,
    pub created_at: DateTime<Utc>,
}

impl FromRow<'_, PgRow> for Order {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            product_id: row.try_get("product_id")?,
            order_amount: row.try_get("order_amount")?,
            payment_option: parse_col(row, "payment_option")?,
            daily_amount: row.try_get("daily_amount")?,
            total_duration: row.try_get("total_duration")?,
            start_date: row.try_get("start_date")?,
            end_date: row.try_get("end_date")?,
            order_status: parse_col(row, "order_status")?,
            payment_status: parse_col(row, "payment_status")?,
            delivery_address: row.try_get("delivery_address")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// One money movement, attempted or completed. Append-only once terminal.
#[derive(Clone, Debug, Serialize)]
pub struct Txn {
    pub id: Uuid,
    pub user_id: i64,
    pub txn_type: TxnType,
    pub amount: i64,
    pub status: TxnStatus,
    pub payment_method: String,
    pub gateway_order_id: Option<String>,
    pub gateway_payment_id: Option<String>,
    pub gateway_signature: Option<String>,
    pub product_id: Option<i64>,
    pub plan_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl FromRow<'_, PgRow> for Txn {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            txn_type: parse_col(row, "txn_type")?,
            amount: row.try_get("amount")?,
            status: parse_col(row, "status")?,
            payment_method: row.try_get("payment_method")?,
            gateway_order_id: row.try_get("gateway_order_id")?,
            gateway_payment_id: row.try_get("gateway_payment_id")?,
            gateway_signature: row.try_get("gateway_signature")?,
            product_id: row.try_get("product_id")?,
            plan_id: row.try_get("plan_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// A user's cross-product installment aggregate. One per user, created on
/// their first installment payment.
#[derive(Clone, Debug, Serialize, FromRow)]
pub struct Plan {
    pub id: Uuid,
    pub user_id: i64,
    /// Derived: sum of `plan_products.total_product_amount`.
    pub total_amount: i64,
    /// Derived: sum of `plan_products.paid_amount`.
    pub completed_amount: i64,
    pub created_at: DateTime<Utc>,
}

/// One product entry inside a plan.
#[derive(Clone, Debug, Serialize)]
pub struct PlanProduct {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub product_id: i64,
    pub daily_payment: i64,
    pub total_product_amount: i64,
    pub paid_amount: i64,
    pub status: PlanProductStatus,
    /// Flips true on the first payment, never by any other means.
    pub is_active: bool,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub delivery_address: String,
    pub payment_method: String,
    pub last_payment_date: Option<DateTime<Utc>>,
}

impl FromRow<'_, PgRow> for PlanProduct {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            plan_id: row.try_get("plan_id")?,
            product_id: row.try_get("product_id")?,
            daily_payment: row.try_get("daily_payment")?,
            total_product_amount: row.try_get("total_product_amount")?,
            paid_amount: row.try_get("paid_amount")?,
            status: parse_col(row, "status")?,
            is_active: row.try_get("is_active")?,
            start_date: row.try_get("start_date")?,
            end_date: row.try_get("end_date")?,
            delivery_address: row.try_get("delivery_address")?,
            payment_method: row.try_get("payment_method")?,
            last_payment_date: row.try_get("last_payment_date")?,
        })
    }
}

/// One referrer <-> referred-user relationship with its commission schedule.
///
/// `days_paid` and `commission_earned` are not stored columns; every read
/// computes them from `daily_commissions`, which is the sole source of truth
/// for commission history.
#[derive(Clone, Debug, Serialize)]
pub struct Referral {
    pub id: Uuid,
    pub referrer_id: i64,
    pub referred_user_id: i64,
    pub status: ReferralStatus,
    pub start_date: DateTime<Utc>,
    /// Extends by one day for every day the referred user misses a payment.
    pub end_date: DateTime<Utc>,
    pub daily_amount: i64,
    pub days: i32,
    pub total_amount: i64,
    pub commission_percentage: i32,
    pub last_payment_date: Option<DateTime<Utc>>,
    pub days_paid: i64,
    pub commission_earned: i64,
}

impl FromRow<'_, PgRow> for Referral {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            referrer_id: row.try_get("referrer_id")?,
            referred_user_id: row.try_get("referred_user_id")?,
            status: parse_col(row, "status")?,
            start_date: row.try_get("start_date")?,
            end_date: row.try_get("end_date")?,
            daily_amount: row.try_get("daily_amount")?,
            days: row.try_get("days")?,
            total_amount: row.try_get("total_amount")?,
            commission_percentage: row.try_get("commission_percentage")?,
            last_payment_date: row.try_get("last_payment_date")?,
            days_paid: row.try_get("days_paid")?,
            commission_earned: row.try_get("commission_earned")?,
        })
    }
}

/// One commission event for one referral on one calendar day. At most one
/// per (referral, day), enforced by a unique index.
#[derive(Clone, Debug, Serialize)]
pub struct DailyCommission {
    pub id: Uuid,
    pub referral_id: Uuid,
    pub referrer_id: i64,
    pub amount: i64,
    pub commission_date: NaiveDate,
    pub status: CommissionStatus,
    pub created_at: DateTime<Utc>,
}

impl FromRow<'_, PgRow> for DailyCommission {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            referral_id: row.try_get("referral_id")?,
            referrer_id: row.try_get("referrer_id")?,
            amount: row.try_get("amount")?,
            commission_date: row.try_get("commission_date")?,
            status: parse_col(row, "status")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_status_advances_with_totals() {
        let s = PaymentStatus::Pending;
        assert_eq!(s.advanced(0, 1000), PaymentStatus::Pending);
        assert_eq!(s.advanced(100, 1000), PaymentStatus::Partial);
        assert_eq!(s.advanced(1000, 1000), PaymentStatus::Completed);
        assert_eq!(s.advanced(1500, 1000), PaymentStatus::Completed);
    }

    #[test]
    fn payment_status_never_regresses() {
        // a refund or a miscounted total must not pull a completed order back
        let s = PaymentStatus::Completed;
        assert_eq!(s.advanced(0, 1000), PaymentStatus::Completed);
        assert_eq!(s.advanced(500, 1000), PaymentStatus::Completed);

        let s = PaymentStatus::Partial;
        assert_eq!(s.advanced(0, 1000), PaymentStatus::Partial);
    }

    #[test]
    fn statuses_round_trip_through_text() {
        assert_eq!("plan_payment".parse::<TxnType>(), Ok(TxnType::PlanPayment));
        assert_eq!(TxnType::PlanPayment.as_str(), "plan_payment");
        assert_eq!(
            "active".parse::<ReferralStatus>(),
            Ok(ReferralStatus::Active)
        );
        assert!("authorized".parse::<TxnStatus>().is_err());
    }
}
