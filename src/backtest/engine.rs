// =============================================================================
// Backtest Engine — deterministic historical replay
// =============================================================================
//
// Replays races in scheduled-start order. For each race the strategy sees
// only snapshots up to the scheduled start (the pre-race cutoff) and
// `current_time` is the scheduled start, exactly as the live path would
// have seen it. Simulated executions apply slippage, mark the bet matched
// at decision time, and settle against the stored race result with the same
// math as live settlement.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::db::{OddsRepository, RaceRepository, ResultRepository};
use crate::error::DbError;
use crate::settlement::{apply_slippage, settle_bet};
use crate::strategy::{Signal, Strategy, StrategyContext};
use crate::types::{Bet, BetStatus, OddsSnapshot, Race};

/// Simulation parameters for one replay.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    pub initial_bankroll: f64,
    pub commission_rate: f64,
    pub slippage_ticks: u32,
    /// Minimum available size on the taken side; 0 disables the filter.
    pub min_liquidity: f64,
}

/// Mutable state threaded through a replay.
#[derive(Debug, Clone)]
pub struct BacktestState {
    pub initial_bankroll: f64,
    pub bankroll: f64,
    pub peak_bankroll: f64,
    pub bets: Vec<Bet>,
    pub equity_curve: Vec<(DateTime<Utc>, f64)>,
}

impl BacktestState {
    pub fn new(initial_bankroll: f64, at: DateTime<Utc>) -> Self {
        Self {
            initial_bankroll,
            bankroll: initial_bankroll,
            peak_bankroll: initial_bankroll,
            bets: Vec::new(),
            equity_curve: vec![(at, initial_bankroll)],
        }
    }

    fn apply_settlement(&mut self, bet: Bet, at: DateTime<Utc>) {
        if let Some(pnl) = bet.profit_loss {
            self.bankroll += pnl;
            if self.bankroll > self.peak_bankroll {
                self.peak_bankroll = self.bankroll;
            }
            self.equity_curve.push((at, self.bankroll));
        }
        self.bets.push(bet);
    }
}

pub struct BacktestEngine {
    races: Arc<dyn RaceRepository>,
    odds: Arc<dyn OddsRepository>,
    results: Arc<dyn ResultRepository>,
    strategy: Arc<dyn Strategy>,
    config: ReplayConfig,
}

impl BacktestEngine {
    pub fn new(
        races: Arc<dyn RaceRepository>,
        odds: Arc<dyn OddsRepository>,
        results: Arc<dyn ResultRepository>,
        strategy: Arc<dyn Strategy>,
        config: ReplayConfig,
    ) -> Self {
        Self {
            races,
            odds,
            results,
            strategy,
            config,
        }
    }

    pub fn strategy(&self) -> &Arc<dyn Strategy> {
        &self.strategy
    }

    /// Replay `[start, end)` and return the finished state.
    pub async fn historical_replay(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<BacktestState> {
        let races = self.races.in_range(start, end).await?;
        info!(
            races = races.len(),
            start = %start,
            end = %end,
            strategy = self.strategy.name(),
            "historical replay starting"
        );

        let mut state = BacktestState::new(self.config.initial_bankroll, start);

        for race in &races {
            if let Err(e) = self.replay_race(race, start, &mut state).await {
                // Per-race errors are non-fatal, matching the live loop.
                warn!(race_id = %race.id, error = %e, "race replay failed");
            }
        }

        info!(
            bets = state.bets.len(),
            final_bankroll = state.bankroll,
            "historical replay complete"
        );
        Ok(state)
    }

    async fn replay_race(
        &self,
        race: &Race,
        window_start: DateTime<Utc>,
        state: &mut BacktestState,
    ) -> anyhow::Result<()> {
        let runners = self.races.runners(race.id).await?;
        // Pre-race cutoff: nothing after the scheduled start is consulted.
        let history = self
            .odds
            .by_race(race.id, window_start, race.scheduled_start)
            .await?;

        let ctx = StrategyContext {
            race,
            runners: &runners,
            odds_history: &history,
            current_time: race.scheduled_start,
        };
        let signals = self.strategy.evaluate(&ctx).await?;

        for signal in signals {
            if !self.strategy.should_bet(&signal) {
                continue;
            }
            let stake = self.strategy.calculate_stake(&signal, state.bankroll);
            if stake <= 0.0 {
                continue;
            }
            if !self.liquidity_ok(&signal, &history) {
                debug!(
                    race_id = %race.id,
                    runner_id = %signal.runner_id,
                    "signal skipped: insufficient pre-race liquidity"
                );
                continue;
            }

            self.simulate_execution(race, &runners, &signal, stake, state)
                .await?;
        }

        Ok(())
    }

    /// The freshest pre-race snapshot must offer at least `min_liquidity`
    /// on the side the signal takes.
    fn liquidity_ok(&self, signal: &Signal, history: &[OddsSnapshot]) -> bool {
        if self.config.min_liquidity <= 0.0 {
            return true;
        }
        let latest = history
            .iter()
            .rev()
            .find(|s| s.runner_id == signal.runner_id);
        let Some(snapshot) = latest else {
            return false;
        };
        let available = match signal.side {
            crate::types::BetSide::Back => snapshot.back_size,
            crate::types::BetSide::Lay => snapshot.lay_size,
        };
        available.unwrap_or(0.0) >= self.config.min_liquidity
    }

    /// Simulate one execution: slippage, matched-at-decision-time bet,
    /// settlement against the stored result.
    async fn simulate_execution(
        &self,
        race: &Race,
        runners: &[crate::types::Runner],
        signal: &Signal,
        stake: f64,
        state: &mut BacktestState,
    ) -> anyhow::Result<()> {
        let executed_odds = apply_slippage(signal.side, signal.odds, self.config.slippage_ticks);

        let mut bet = Bet::new_pending(
            signal.market_id.clone(),
            signal.race_id,
            signal.runner_id,
            signal.strategy_name.clone(),
            signal.market_type,
            signal.side,
            signal.odds,
            stake,
        );
        // Simulation executes at decision time.
        bet.placed_at = race.scheduled_start;
        bet.status = BetStatus::Matched;
        bet.matched_at = Some(race.scheduled_start);
        bet.matched_price = Some(executed_odds);
        bet.matched_size = Some(stake);

        match self.results.for_race(race.id).await {
            Ok(result) => {
                let Some(runner) = runners.iter().find(|r| r.id == signal.runner_id) else {
                    warn!(race_id = %race.id, "signal references unknown runner");
                    return Ok(());
                };
                let settled_at = result.time.max(race.scheduled_start);
                settle_bet(
                    &mut bet,
                    runner,
                    &result,
                    self.config.commission_rate,
                    settled_at,
                );
                state.apply_settlement(bet, settled_at);
            }
            Err(DbError::NotFound) => {
                // No result recorded: the bet stays matched and unsettled.
                state.bets.push(bet);
            }
            Err(e) => return Err(e.into()),
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{
        InMemoryOddsRepository, InMemoryRaceRepository, InMemoryResultRepository,
    };
    use crate::types::{BetSide, MarketType, RaceResult, RaceStatus, Runner};
    use async_trait::async_trait;
    use chrono::Duration;
    use uuid::Uuid;

    const EPS: f64 = 1e-9;

    /// Strategy fixture that backs trap 1 at the latest observed price with
    /// a fixed stake.
    struct FixedBackStrategy {
        stake: f64,
    }

    #[async_trait]
    impl Strategy for FixedBackStrategy {
        fn name(&self) -> &str {
            "fixed-back"
        }

        async fn evaluate(&self, ctx: &StrategyContext<'_>) -> anyhow::Result<Vec<Signal>> {
            let Some(runner) = ctx.runners.first() else {
                return Ok(Vec::new());
            };
            let Some(odds) = ctx
                .odds_history
                .iter()
                .rev()
                .find(|s| s.runner_id == runner.id)
                .and_then(|s| s.back_price)
            else {
                return Ok(Vec::new());
            };
            Ok(vec![Signal {
                race_id: ctx.race.id,
                runner_id: runner.id,
                market_id: "1.234".to_string(),
                selection_id: 42,
                market_type: MarketType::Win,
                side: BetSide::Back,
                odds,
                confidence: 0.5,
                strategy_name: self.name().to_string(),
            }])
        }

        fn should_bet(&self, _signal: &Signal) -> bool {
            true
        }

        fn calculate_stake(&self, _signal: &Signal, _bankroll: f64) -> f64 {
            self.stake
        }

        fn parameters(&self) -> serde_json::Value {
            serde_json::Value::Null
        }
    }

    struct Scenario {
        engine: BacktestEngine,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    }

    fn scenario(winner_trap: i32, slippage_ticks: u32) -> Scenario {
        let start = Utc::now() - Duration::days(2);
        let scheduled_start = Utc::now() - Duration::hours(1);
        let end = Utc::now();

        let race = Race {
            id: Uuid::new_v4(),
            scheduled_start,
            actual_start: None,
            track: "Monmore".to_string(),
            race_type: "flat".to_string(),
            distance_m: Some(480),
            grade: None,
            conditions: serde_json::json!({ "market_id": "1.234" }),
            status: RaceStatus::Completed,
        };
        let runner = Runner {
            id: Uuid::new_v4(),
            race_id: race.id,
            trap_number: 1,
            name: "Trap 1".to_string(),
            form_rating: None,
            weight_kg: None,
            trainer: None,
            metadata: serde_json::Value::Null,
        };
        let snapshot = OddsSnapshot {
            time: scheduled_start - Duration::hours(24),
            race_id: race.id,
            runner_id: runner.id,
            back_price: Some(3.0),
            back_size: Some(100.0),
            lay_price: Some(3.1),
            lay_size: Some(100.0),
            last_traded_price: Some(3.0),
            total_matched: Some(1000.0),
        };
        let result = RaceResult {
            race_id: race.id,
            time: scheduled_start + Duration::minutes(2),
            winner_trap: Some(winner_trap),
            positions: serde_json::Value::Null,
            status: "official".to_string(),
        };

        let engine = BacktestEngine::new(
            Arc::new(InMemoryRaceRepository::with_races(
                vec![race],
                vec![runner],
            )),
            Arc::new(InMemoryOddsRepository::with_snapshots(vec![snapshot])),
            Arc::new(InMemoryResultRepository::with_results(vec![result])),
            Arc::new(FixedBackStrategy { stake: 10.0 }),
            ReplayConfig {
                initial_bankroll: 100.0,
                commission_rate: 0.05,
                slippage_ticks,
                min_liquidity: 10.0,
            },
        );

        Scenario { engine, start, end }
    }

    #[tokio::test]
    async fn back_win_settles_with_commission() {
        let s = scenario(1, 0);
        let state = s.engine.historical_replay(s.start, s.end).await.unwrap();

        assert_eq!(state.bets.len(), 1);
        let bet = &state.bets[0];
        assert_eq!(bet.status, BetStatus::Settled);
        // (3.0 - 1) * 10 = 20 gross, 1.0 commission, 19.0 net.
        assert!((bet.profit_loss.unwrap() - 19.0).abs() < EPS);
        assert!((bet.commission.unwrap() - 1.0).abs() < EPS);
        assert!((state.bankroll - 119.0).abs() < EPS);
    }

    #[tokio::test]
    async fn back_loss_settles_without_commission() {
        let s = scenario(2, 0);
        let state = s.engine.historical_replay(s.start, s.end).await.unwrap();

        assert_eq!(state.bets.len(), 1);
        let bet = &state.bets[0];
        assert!((bet.profit_loss.unwrap() - (-10.0)).abs() < EPS);
        assert!(bet.commission.unwrap().abs() < EPS);
        assert!((state.bankroll - 90.0).abs() < EPS);
    }

    #[tokio::test]
    async fn replay_respects_the_pre_race_cutoff_and_ordering() {
        let s = scenario(1, 0);
        let state = s.engine.historical_replay(s.start, s.end).await.unwrap();

        for bet in &state.bets {
            assert!(bet.placed_at <= bet.settled_at.unwrap());
            assert!(bet.matched_at.is_some());
        }
    }

    #[tokio::test]
    async fn slippage_adjusts_the_executed_price() {
        // 5 ticks on the back side: executed at 3.05 instead of 3.0.
        let s = scenario(1, 5);
        let state = s.engine.historical_replay(s.start, s.end).await.unwrap();

        let bet = &state.bets[0];
        assert!((bet.matched_price.unwrap() - 3.05).abs() < EPS);
        // (3.05 - 1) * 10 = 20.5 gross, 1.025 commission, 19.475 net.
        assert!((bet.profit_loss.unwrap() - 19.475).abs() < EPS);
    }

    #[tokio::test]
    async fn illiquid_markets_are_skipped() {
        let s = scenario(1, 0);
        // Rebuild with a liquidity floor above the snapshot's 100.0.
        let mut config = s.engine.config.clone();
        config.min_liquidity = 500.0;
        let engine = BacktestEngine {
            config,
            ..s.engine
        };

        let state = engine.historical_replay(s.start, s.end).await.unwrap();
        assert!(state.bets.is_empty());
        assert!((state.bankroll - 100.0).abs() < EPS);
    }
}
