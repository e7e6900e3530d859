// =============================================================================
// Backtest result & strategy performance repository
// =============================================================================

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::DbError;
use crate::types::{BacktestRecord, StrategyPerformance};

/// Persistence contract for backtest output and the monitor's performance
/// rollups.
#[async_trait]
pub trait BacktestRepository: Send + Sync {
    /// Append a completed backtest run. Records are never updated.
    async fn insert(&self, record: &BacktestRecord) -> Result<(), DbError>;

    /// Upsert the monthly rollup keyed by `(strategy_name, period_start)`.
    async fn upsert_performance(&self, perf: &StrategyPerformance) -> Result<(), DbError>;
}

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

pub struct PgBacktestRepository {
    pool: PgPool,
}

impl PgBacktestRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BacktestRepository for PgBacktestRepository {
    async fn insert(&self, record: &BacktestRecord) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO backtest_results
                (id, strategy_name, run_at, window_start, window_end,
                 initial_capital, final_capital, total_return, sharpe_ratio,
                 max_drawdown, profit_factor, win_rate, method,
                 composite_score, recommendation, ml_features, full_results,
                 processed)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(record.id)
        .bind(&record.strategy_name)
        .bind(record.run_at)
        .bind(record.window_start)
        .bind(record.window_end)
        .bind(record.initial_capital)
        .bind(record.final_capital)
        .bind(record.total_return)
        .bind(record.sharpe_ratio)
        .bind(record.max_drawdown)
        .bind(record.profit_factor)
        .bind(record.win_rate)
        .bind(&record.method)
        .bind(record.composite_score)
        .bind(&record.recommendation)
        .bind(&record.ml_features)
        .bind(&record.full_results)
        .bind(record.processed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_performance(&self, perf: &StrategyPerformance) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO strategy_performance
                (strategy_name, period_start, total_bets, settled_bets,
                 winning_bets, total_staked, total_profit_loss, win_rate,
                 roi, average_stake, largest_win, largest_loss, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (strategy_name, period_start) DO UPDATE SET
                total_bets = EXCLUDED.total_bets,
                settled_bets = EXCLUDED.settled_bets,
                winning_bets = EXCLUDED.winning_bets,
                total_staked = EXCLUDED.total_staked,
                total_profit_loss = EXCLUDED.total_profit_loss,
                win_rate = EXCLUDED.win_rate,
                roi = EXCLUDED.roi,
                average_stake = EXCLUDED.average_stake,
                largest_win = EXCLUDED.largest_win,
                largest_loss = EXCLUDED.largest_loss,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&perf.strategy_name)
        .bind(perf.period_start)
        .bind(perf.total_bets)
        .bind(perf.settled_bets)
        .bind(perf.winning_bets)
        .bind(perf.total_staked)
        .bind(perf.total_profit_loss)
        .bind(perf.win_rate)
        .bind(perf.roi)
        .bind(perf.average_stake)
        .bind(perf.largest_win)
        .bind(perf.largest_loss)
        .bind(perf.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
