use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use installment_ledger::config::Config;
use installment_ledger::{AppState, init_pool, init_router, sweep};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    let pool = init_pool(&config.database_url).await?;
    sqlx::migrate!().run(&pool).await?;

    // the sweep also runs in-process so a bare deployment still settles
    // commissions; an external scheduler can hit POST /sweep/run instead
    let sweep_pool = pool.clone();
    let sweep_interval = config.sweep_interval_secs;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(sweep_interval));
        ticker.tick().await; // the first tick fires immediately
        loop {
            ticker.tick().await;
            if let Err(e) = sweep::run_daily_sweep(&sweep_pool, Utc::now()).await {
                error!(error = ?e, "scheduled sweep failed");
            }
        }
    });

    let state = AppState {
        pool,
        config: config.clone(),
    };

    let addr: SocketAddr = ([0, 0, 0, 0], config.server_port).into();
    let listener = TcpListener::bind(addr).await?;
    info!("listening on {addr}");
    axum::serve(listener, init_router(state)).await?;
    Ok(())
}
