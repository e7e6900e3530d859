// =============================================================================
// Persistence layer — repository traits and their Postgres implementations
// =============================================================================
//
// Each entity family has a repository trait with a single relational
// implementation. Tests substitute in-memory fakes that uphold the same
// `DbError::NotFound` sentinel contract. High-volume time series (odds
// snapshots, race results) insert through the COPY bulk path.
// =============================================================================

mod backtests;
mod bets;
mod odds;
mod races;
mod results;
mod strategies;

pub use backtests::{BacktestRepository, PgBacktestRepository};
pub use bets::{BetRepository, PgBetRepository};
pub use odds::{OddsRepository, PgOddsRepository};
pub use races::{PgRaceRepository, RaceRepository};
pub use results::{PgResultRepository, ResultRepository};
pub use strategies::{PgStrategyRepository, StrategyRepository};

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::info;

/// Maximum connections in the shared pool.
const MAX_CONNECTIONS: u32 = 10;

/// Connect-phase timeout; an unreachable database is fatal at startup.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the single shared connection pool.
pub async fn connect(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(CONNECT_TIMEOUT)
        .connect(database_url)
        .await
        .context("failed to connect to database")?;

    info!(max_connections = MAX_CONNECTIONS, "database pool ready");
    Ok(pool)
}
