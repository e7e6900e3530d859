// =============================================================================
// Walk-forward evaluation — rolling train / validate / test windows
// =============================================================================
//
// For each step start `s`:
//   train = [s, s+T)   validate = [s+T, s+T+V)   test = [s+T+V, s+T+V+Ts)
// Windows whose test range would overrun the overall end are skipped, and a
// window only counts when every sub-range produced enough bets.
// =============================================================================

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backtest::engine::BacktestEngine;
use crate::backtest::metrics::Metrics;
use crate::config::WalkForwardConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowResult {
    pub window_start: DateTime<Utc>,
    pub train: Metrics,
    pub validation: Metrics,
    pub test: Metrics,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregatedMetrics {
    pub total_return: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalkForwardResult {
    pub windows: Vec<WindowResult>,
    pub total_windows: usize,
    /// Fraction of test windows with strictly positive total return.
    pub consistency: f64,
    /// (Σ train_return − Σ test_return) / Σ train_return; 0 when the train
    /// sum is 0.
    pub overfit_ratio: f64,
    /// Arithmetic means over test windows.
    pub aggregated: AggregatedMetrics,
}

/// Run the rolling-window evaluation over `[start, end)`.
pub async fn run_walk_forward(
    engine: &BacktestEngine,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    config: &WalkForwardConfig,
    risk_free_rate: f64,
) -> anyhow::Result<WalkForwardResult> {
    let training = Duration::days(config.training_days);
    let validation = Duration::days(config.validation_days);
    let test = Duration::days(config.test_days);
    let step = Duration::days(config.step_days.max(1));

    let mut windows = Vec::new();
    let mut window_start = start;

    loop {
        let train_end = window_start + training;
        let validation_end = train_end + validation;
        let test_end = validation_end + test;
        if test_end > end {
            break;
        }

        let train_state = engine.historical_replay(window_start, train_end).await?;
        let validation_state = engine.historical_replay(train_end, validation_end).await?;
        let test_state = engine.historical_replay(validation_end, test_end).await?;

        let enough = [&train_state, &validation_state, &test_state]
            .iter()
            .all(|state| state.bets.len() >= config.min_trades_per_window);

        if enough {
            windows.push(WindowResult {
                window_start,
                train: Metrics::from_state(&train_state, risk_free_rate),
                validation: Metrics::from_state(&validation_state, risk_free_rate),
                test: Metrics::from_state(&test_state, risk_free_rate),
            });
        } else {
            debug!(
                window_start = %window_start,
                train_bets = train_state.bets.len(),
                validation_bets = validation_state.bets.len(),
                test_bets = test_state.bets.len(),
                min = config.min_trades_per_window,
                "walk-forward window skipped: not enough trades"
            );
        }

        window_start += step;
    }

    let result = summarise(windows);
    info!(
        windows = result.total_windows,
        consistency = result.consistency,
        overfit = result.overfit_ratio,
        "walk-forward evaluation complete"
    );
    Ok(result)
}

fn summarise(windows: Vec<WindowResult>) -> WalkForwardResult {
    let total_windows = windows.len();
    if total_windows == 0 {
        return WalkForwardResult::default();
    }
    let n = total_windows as f64;

    let positive_tests = windows
        .iter()
        .filter(|w| w.test.total_return > 0.0)
        .count();
    let consistency = positive_tests as f64 / n;

    let train_sum: f64 = windows.iter().map(|w| w.train.total_return).sum();
    let test_sum: f64 = windows.iter().map(|w| w.test.total_return).sum();
    let overfit_ratio = if train_sum != 0.0 {
        (train_sum - test_sum) / train_sum
    } else {
        0.0
    };

    let aggregated = AggregatedMetrics {
        total_return: test_sum / n,
        sharpe_ratio: windows.iter().map(|w| w.test.sharpe_ratio).sum::<f64>() / n,
        max_drawdown: windows.iter().map(|w| w.test.max_drawdown).sum::<f64>() / n,
    };

    WalkForwardResult {
        windows,
        total_windows,
        consistency,
        overfit_ratio,
        aggregated,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn window(train_return: f64, test_return: f64) -> WindowResult {
        WindowResult {
            window_start: Utc::now(),
            train: Metrics {
                total_return: train_return,
                ..Metrics::default()
            },
            validation: Metrics::default(),
            test: Metrics {
                total_return: test_return,
                sharpe_ratio: 1.0,
                max_drawdown: 0.1,
                ..Metrics::default()
            },
        }
    }

    #[test]
    fn consistency_counts_positive_test_windows() {
        let result = summarise(vec![
            window(0.2, 0.1),
            window(0.3, -0.05),
            window(0.1, 0.02),
            window(0.2, 0.0),
        ]);
        assert_eq!(result.total_windows, 4);
        assert!((result.consistency - 0.5).abs() < 1e-9);
    }

    #[test]
    fn overfit_compares_train_and_test_sums() {
        // Train sum 0.6, test sum 0.15 -> overfit 0.75.
        let result = summarise(vec![window(0.3, 0.10), window(0.3, 0.05)]);
        assert!((result.overfit_ratio - 0.75).abs() < 1e-9);
    }

    #[test]
    fn overfit_is_zero_when_train_sum_is_zero() {
        let result = summarise(vec![window(0.2, 0.1), window(-0.2, 0.1)]);
        assert!(result.overfit_ratio.abs() < 1e-9);
    }

    #[test]
    fn aggregated_metrics_are_test_window_means() {
        let result = summarise(vec![window(0.2, 0.10), window(0.2, 0.30)]);
        assert!((result.aggregated.total_return - 0.20).abs() < 1e-9);
        assert!((result.aggregated.sharpe_ratio - 1.0).abs() < 1e-9);
        assert!((result.aggregated.max_drawdown - 0.1).abs() < 1e-9);
    }

    #[test]
    fn empty_window_set_summarises_to_defaults() {
        let result = summarise(Vec::new());
        assert_eq!(result.total_windows, 0);
        assert!(result.consistency.abs() < 1e-9);
        assert!(result.overfit_ratio.abs() < 1e-9);
    }
}
