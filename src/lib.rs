//! Installment ledger: buy-now-pay-later order tracking plus the referral
//! commission engine that rides on every verified payment.

pub mod api;
pub mod config;
pub mod error;
pub mod gateway;
pub mod payments;
pub mod plan;
pub mod referral;
pub mod responses;
pub mod schedule;
pub mod store;
pub mod sweep;
pub mod types;

use anyhow::Context;
use anyhow::Result;
pub use api::{AppState, init_router};
use sqlx::{PgPool, postgres::PgPoolOptions};

/// Initializes the database pool.
pub async fn init_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(database_url)
        .await
        .context("Failed to connect to Postgres")?;
    Ok(pool)
}
