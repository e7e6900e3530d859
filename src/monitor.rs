// =============================================================================
// Monitor — periodic performance rollup and breaker feed
// =============================================================================
//
// Each pass:
//   1. Settle paper bets (no exchange id) whose race result has arrived —
//      paper bets move forward through the settlement path, not the order
//      manager.
//   2. Aggregate the current month's bets per active strategy into a
//      StrategyPerformance row (per-strategy errors are non-fatal).
//   3. Feed newly settled bets, ordered by settled_at (placed_at when
//      null), into the circuit breaker with the running bankroll. A
//      watermark prevents re-feeding the same bets on later passes.
// =============================================================================

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Datelike, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::breaker::CircuitBreaker;
use crate::db::{BacktestRepository, BetRepository, RaceRepository, ResultRepository, StrategyRepository};
use crate::error::DbError;
use crate::settlement::settle_bet;
use crate::types::{Bet, BetStatus, StrategyPerformance};

pub struct Monitor {
    bets: Arc<dyn BetRepository>,
    races: Arc<dyn RaceRepository>,
    results: Arc<dyn ResultRepository>,
    strategy_rows: Arc<dyn StrategyRepository>,
    performance: Arc<dyn BacktestRepository>,
    breaker: Arc<CircuitBreaker>,
    base_bankroll: f64,
    commission_rate: f64,
    interval: StdDuration,
    /// Settled-at watermark so each settled bet feeds the breaker once.
    fed_through: Mutex<Option<DateTime<Utc>>>,
}

/// First instant of the month containing `now`.
fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let first = now
        .date_naive()
        .with_day(1)
        .expect("day 1 exists in every month")
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid");
    DateTime::from_naive_utc_and_offset(first, Utc)
}

impl Monitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bets: Arc<dyn BetRepository>,
        races: Arc<dyn RaceRepository>,
        results: Arc<dyn ResultRepository>,
        strategy_rows: Arc<dyn StrategyRepository>,
        performance: Arc<dyn BacktestRepository>,
        breaker: Arc<CircuitBreaker>,
        base_bankroll: f64,
        commission_rate: f64,
        interval: StdDuration,
    ) -> Self {
        Self {
            bets,
            races,
            results,
            strategy_rows,
            performance,
            breaker,
            base_bankroll,
            commission_rate,
            interval,
            fed_through: Mutex::new(None),
        }
    }

    /// Run the rollup loop until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_s = self.interval.as_secs(), "monitor started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("monitor stopping");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.rollup_once().await {
                        warn!(error = %e, "monitor pass failed");
                    }
                }
            }
        }
    }

    /// One full monitor pass.
    pub async fn rollup_once(&self) -> anyhow::Result<()> {
        let settled_paper = self.settle_paper_bets().await?;
        if settled_paper > 0 {
            info!(count = settled_paper, "paper bets settled");
        }

        let now = Utc::now();
        let start = month_start(now);

        let strategies = self.strategy_rows.active().await?;
        for record in &strategies {
            if let Err(e) = self.rollup_strategy(&record.name, start, now).await {
                // Per-strategy errors are non-fatal.
                warn!(strategy = %record.name, error = %e, "performance rollup failed");
            }
        }

        self.feed_breaker(start, now).await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Paper settlement
    // -------------------------------------------------------------------------

    /// Settle pending bets that never went to the exchange, once their race
    /// result is known.
    async fn settle_paper_bets(&self) -> Result<usize, DbError> {
        let pending = self.bets.pending().await?;
        let mut settled = 0usize;

        for mut bet in pending {
            if bet.external_bet_id.is_some() {
                continue;
            }
            let result = match self.results.for_race(bet.race_id).await {
                Ok(result) => result,
                Err(DbError::NotFound) => continue,
                Err(e) => return Err(e),
            };
            let runners = self.races.runners(bet.race_id).await?;
            let Some(runner) = runners.iter().find(|r| r.id == bet.runner_id) else {
                warn!(bet_id = %bet.id, "paper bet references unknown runner");
                continue;
            };

            settle_bet(&mut bet, runner, &result, self.commission_rate, Utc::now());
            self.bets.update(&bet).await?;
            settled += 1;
        }

        Ok(settled)
    }

    // -------------------------------------------------------------------------
    // Performance rollup
    // -------------------------------------------------------------------------

    async fn rollup_strategy(
        &self,
        strategy_name: &str,
        start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let bets = self.bets.by_strategy_between(strategy_name, start, now).await?;
        if bets.is_empty() {
            return Ok(());
        }

        let perf = aggregate_performance(strategy_name, start, &bets, now);
        self.performance.upsert_performance(&perf).await?;
        debug!(
            strategy = strategy_name,
            bets = perf.total_bets,
            win_rate = perf.win_rate,
            roi = perf.roi,
            "performance row updated"
        );
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Breaker feed
    // -------------------------------------------------------------------------

    /// Feed newly settled bets into the breaker in settlement order with
    /// the running bankroll.
    async fn feed_breaker(
        &self,
        start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let mut settled = self.bets.settled_between(start, now).await?;
        settled.sort_by_key(|b| b.settled_at.unwrap_or(b.placed_at));

        let watermark = *self.fed_through.lock();
        let mut cumulative = 0.0;
        let mut latest = watermark;

        for bet in &settled {
            let pnl = bet.profit_loss.unwrap_or(0.0);
            cumulative += pnl;

            let at = bet.settled_at.unwrap_or(bet.placed_at);
            if let Some(mark) = watermark {
                if at <= mark {
                    continue;
                }
            }

            self.breaker
                .record_bet_result(bet, self.base_bankroll + cumulative);
            if latest.map(|l| at > l).unwrap_or(true) {
                latest = Some(at);
            }
        }

        *self.fed_through.lock() = latest;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Roll a month of bets into a performance row.
pub fn aggregate_performance(
    strategy_name: &str,
    period_start: DateTime<Utc>,
    bets: &[Bet],
    updated_at: DateTime<Utc>,
) -> StrategyPerformance {
    let total_bets = bets.len() as i64;
    let settled: Vec<&Bet> = bets
        .iter()
        .filter(|b| b.status == BetStatus::Settled)
        .collect();
    let settled_bets = settled.len() as i64;

    let winning_bets = settled
        .iter()
        .filter(|b| b.profit_loss.unwrap_or(0.0) > 0.0)
        .count() as i64;

    let total_staked: f64 = bets.iter().map(|b| b.stake).sum();
    let total_profit_loss: f64 = settled.iter().filter_map(|b| b.profit_loss).sum();

    let win_rate = if settled_bets > 0 {
        winning_bets as f64 / settled_bets as f64
    } else {
        0.0
    };
    let settled_staked: f64 = settled.iter().map(|b| b.stake).sum();
    let roi = if settled_staked > 0.0 {
        total_profit_loss / settled_staked
    } else {
        0.0
    };
    let average_stake = if total_bets > 0 {
        total_staked / total_bets as f64
    } else {
        0.0
    };

    let largest_win = settled
        .iter()
        .filter_map(|b| b.profit_loss)
        .fold(0.0f64, f64::max);
    let largest_loss = settled
        .iter()
        .filter_map(|b| b.profit_loss)
        .fold(0.0f64, f64::min);

    StrategyPerformance {
        strategy_name: strategy_name.to_string(),
        period_start,
        total_bets,
        settled_bets,
        winning_bets,
        total_staked,
        total_profit_loss,
        win_rate,
        roi,
        average_stake,
        largest_win,
        largest_loss,
        updated_at,
    }
}
