// =============================================================================
// Backtesting — replay, Monte-Carlo, walk-forward, aggregation
// =============================================================================

pub mod aggregate;
pub mod engine;
pub mod metrics;
pub mod monte_carlo;
pub mod walk_forward;

pub use engine::{BacktestEngine, BacktestState, ReplayConfig};
pub use metrics::Metrics;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::config::BacktestConfig;
use crate::db::BacktestRepository;
use crate::types::BacktestRecord;

use aggregate::aggregate;
use monte_carlo::{run_monte_carlo, MonteCarloConfig};
use walk_forward::run_walk_forward;

/// Runs the full evaluation pipeline — historical replay, Monte-Carlo
/// resampling, walk-forward windows — and persists one aggregated,
/// composite-scored record.
pub struct BacktestRunner {
    engine: BacktestEngine,
    repository: Arc<dyn BacktestRepository>,
    config: BacktestConfig,
}

impl BacktestRunner {
    pub fn new(
        engine: BacktestEngine,
        repository: Arc<dyn BacktestRepository>,
        config: BacktestConfig,
    ) -> Self {
        Self {
            engine,
            repository,
            config,
        }
    }

    pub async fn run_full(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<BacktestRecord> {
        let strategy_name = self.engine.strategy().name().to_string();

        // 1. Full-range historical replay.
        let state = self.engine.historical_replay(start, end).await?;
        let metrics = Metrics::from_state(&state, self.config.risk_free_rate);

        // 2. Monte-Carlo over the simulated bet sequence. Win probabilities
        //    default to each bet's implied probability.
        let win_probabilities: HashMap<Uuid, f64> = state
            .bets
            .iter()
            .map(|bet| (bet.id, (1.0 / bet.effective_odds()).clamp(0.0, 1.0)))
            .collect();
        let mc = run_monte_carlo(
            &state.bets,
            &win_probabilities,
            &MonteCarloConfig {
                iterations: self.config.monte_carlo_iterations,
                seed: self.config.monte_carlo_seed,
                initial_bankroll: self.config.initial_bankroll,
                commission_rate: self.config.commission_rate,
            },
        );

        // 3. Walk-forward windows over the same range.
        let wf = run_walk_forward(
            &self.engine,
            start,
            end,
            &self.config.walk_forward_windows,
            self.config.risk_free_rate,
        )
        .await?;

        // 4. Composite score and recommendation.
        let score = aggregate(&metrics, &mc, &wf, &self.config.score_weights);

        info!(
            strategy = %strategy_name,
            composite = score.composite,
            recommendation = %score.recommendation,
            "backtest pipeline complete"
        );

        let ml_features = if self.config.ml_export_enabled {
            serde_json::json!({
                "total_bets": metrics.total_bets,
                "win_rate": metrics.win_rate,
                "sharpe_ratio": metrics.sharpe_ratio,
                "max_drawdown": metrics.max_drawdown,
                "mc_mean_return": mc.mean_return,
                "mc_probability_of_ruin": mc.probability_of_ruin,
                "wf_consistency": wf.consistency,
                "wf_overfit_ratio": wf.overfit_ratio,
            })
        } else {
            serde_json::Value::Null
        };

        let record = BacktestRecord {
            id: Uuid::new_v4(),
            strategy_name,
            run_at: Utc::now(),
            window_start: start,
            window_end: end,
            initial_capital: state.initial_bankroll,
            final_capital: state.bankroll,
            total_return: metrics.total_return,
            sharpe_ratio: metrics.sharpe_ratio,
            max_drawdown: metrics.max_drawdown,
            profit_factor: metrics.profit_factor,
            win_rate: metrics.win_rate,
            method: "historical+monte_carlo+walk_forward".to_string(),
            composite_score: score.composite,
            recommendation: score.recommendation.to_string(),
            ml_features,
            full_results: serde_json::json!({
                "historical": metrics,
                "scores": score,
                "monte_carlo": {
                    "seed": mc.seed,
                    "mean_return": mc.mean_return,
                    "std_return": mc.std_return,
                    "var_95": mc.var_95,
                    "var_99": mc.var_99,
                    "probability_of_profit": mc.probability_of_profit,
                    "probability_of_ruin": mc.probability_of_ruin,
                    "confidence_intervals": mc.confidence_intervals,
                },
                "walk_forward": {
                    "total_windows": wf.total_windows,
                    "consistency": wf.consistency,
                    "overfit_ratio": wf.overfit_ratio,
                    "aggregated": wf.aggregated,
                },
            }),
            processed: false,
        };

        self.repository.insert(&record).await?;
        Ok(record)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{SteamerParams, SteamerStrategy};
    use crate::testutil::{
        InMemoryBacktestRepository, InMemoryOddsRepository, InMemoryRaceRepository,
        InMemoryResultRepository,
    };
    use crate::types::{OddsSnapshot, Race, RaceResult, RaceStatus, Runner};
    use chrono::Duration;

    /// A month of daily races where trap 1 steams in and wins every time.
    fn steady_winner_fixture() -> (
        Arc<InMemoryRaceRepository>,
        Arc<InMemoryOddsRepository>,
        Arc<InMemoryResultRepository>,
        DateTime<Utc>,
        DateTime<Utc>,
    ) {
        let start = Utc::now() - Duration::days(30);
        let mut races = Vec::new();
        let mut runners = Vec::new();
        let mut snapshots = Vec::new();
        let mut results = Vec::new();

        for day in 0..28 {
            let scheduled = start + Duration::days(day) + Duration::hours(18);
            let race = Race {
                id: Uuid::new_v4(),
                scheduled_start: scheduled,
                actual_start: None,
                track: "Monmore".to_string(),
                race_type: "flat".to_string(),
                distance_m: Some(480),
                grade: None,
                conditions: serde_json::json!({ "market_id": format!("1.{day}") }),
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
                metadata: serde_json::json!({ "selection_id": 100 + day }),
            };
            for (hours_before, back) in [(6i64, 2.6f64), (1, 2.0)] {
                snapshots.push(OddsSnapshot {
                    time: scheduled - Duration::hours(hours_before),
                    race_id: race.id,
                    runner_id: runner.id,
                    back_price: Some(back),
                    back_size: Some(200.0),
                    lay_price: Some(back + 0.1),
                    lay_size: Some(150.0),
                    last_traded_price: Some(back),
                    total_matched: Some(5000.0),
                });
            }
            results.push(RaceResult {
                race_id: race.id,
                time: scheduled + Duration::minutes(2),
                winner_trap: Some(1),
                positions: serde_json::Value::Null,
                status: "official".to_string(),
            });
            races.push(race);
            runners.push(runner);
        }

        (
            Arc::new(InMemoryRaceRepository::with_races(races, runners)),
            Arc::new(InMemoryOddsRepository::with_snapshots(snapshots)),
            Arc::new(InMemoryResultRepository::with_results(results)),
            start,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn run_full_persists_a_scored_record() {
        let (races, odds, results, start, end) = steady_winner_fixture();
        let repository = Arc::new(InMemoryBacktestRepository::new());

        let mut config = BacktestConfig::default();
        config.monte_carlo_seed = Some(42);
        config.monte_carlo_iterations = 200;
        // Short windows so the 30-day fixture yields several.
        config.walk_forward_windows.training_days = 7;
        config.walk_forward_windows.validation_days = 3;
        config.walk_forward_windows.test_days = 3;
        config.walk_forward_windows.step_days = 5;
        config.walk_forward_windows.min_trades_per_window = 1;

        let engine = BacktestEngine::new(
            races,
            odds,
            results,
            Arc::new(SteamerStrategy::new(SteamerParams::default())),
            ReplayConfig {
                initial_bankroll: config.initial_bankroll,
                commission_rate: config.commission_rate,
                slippage_ticks: 0,
                min_liquidity: config.min_liquidity,
            },
        );
        let runner = BacktestRunner::new(engine, repository.clone(), config);

        let record = runner.run_full(start, end).await.unwrap();

        // Every simulated bet won, so the run must look good.
        assert!(record.total_return > 0.0);
        assert!(record.win_rate > 0.99);
        assert!(record.composite_score > 0.0);
        assert!(!record.recommendation.is_empty());
        assert_eq!(repository.records().len(), 1);
        assert_eq!(record.method, "historical+monte_carlo+walk_forward");
    }
}
