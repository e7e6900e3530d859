// =============================================================================
// Backtest metrics — return, Sharpe, drawdown, profit factor, win rate
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::backtest::engine::BacktestState;

/// Trading days used to scale the annual risk-free rate onto per-bet
/// returns.
const TRADING_DAYS: f64 = 252.0;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metrics {
    pub total_return: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub profit_factor: f64,
    pub win_rate: f64,
    pub total_bets: usize,
    pub winning_bets: usize,
    pub final_bankroll: f64,
}

impl Metrics {
    /// Compute metrics over a finished replay state. `risk_free_rate` is
    /// annual and is scaled down to the per-bet horizon.
    pub fn from_state(state: &BacktestState, risk_free_rate: f64) -> Self {
        let initial = state.initial_bankroll;
        let total_return = if initial > 0.0 {
            (state.bankroll - initial) / initial
        } else {
            0.0
        };

        let settled: Vec<f64> = state
            .bets
            .iter()
            .filter_map(|b| b.profit_loss)
            .collect();
        let total_bets = settled.len();
        let winning_bets = settled.iter().filter(|&&pnl| pnl > 0.0).count();

        let win_rate = if total_bets > 0 {
            winning_bets as f64 / total_bets as f64
        } else {
            0.0
        };

        // Per-bet returns normalised to the initial bankroll.
        let returns: Vec<f64> = settled.iter().map(|pnl| pnl / initial).collect();
        let sharpe_ratio = sharpe(&returns, risk_free_rate / TRADING_DAYS);

        let gross_win: f64 = settled.iter().filter(|&&p| p > 0.0).sum();
        let gross_loss: f64 = settled.iter().filter(|&&p| p < 0.0).sum::<f64>().abs();
        let profit_factor = if gross_loss > 0.0 {
            gross_win / gross_loss
        } else {
            gross_win
        };

        Self {
            total_return,
            sharpe_ratio,
            max_drawdown: max_drawdown(&state.equity_curve),
            profit_factor,
            win_rate,
            total_bets,
            winning_bets,
            final_bankroll: state.bankroll,
        }
    }
}

/// Sharpe over a series of per-period returns against a per-period
/// risk-free return. Zero when the series is too short or flat.
pub fn sharpe(returns: &[f64], risk_free_per_period: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std = variance.sqrt();
    if std == 0.0 {
        return 0.0;
    }
    (mean - risk_free_per_period) / std
}

/// Largest peak-to-trough fall over an equity curve, as a fraction of the
/// peak.
pub fn max_drawdown(equity: &[(chrono::DateTime<chrono::Utc>, f64)]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst = 0.0f64;
    for &(_, value) in equity {
        if value > peak {
            peak = value;
        }
        if peak > 0.0 {
            let drawdown = (peak - value) / peak;
            if drawdown > worst {
                worst = drawdown;
            }
        }
    }
    worst
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const EPS: f64 = 1e-9;

    #[test]
    fn sharpe_is_zero_for_flat_or_short_series() {
        assert_eq!(sharpe(&[], 0.0), 0.0);
        assert_eq!(sharpe(&[0.1], 0.0), 0.0);
        assert_eq!(sharpe(&[0.05, 0.05, 0.05], 0.0), 0.0);
    }

    #[test]
    fn sharpe_rewards_steady_positive_returns() {
        let steady = sharpe(&[0.02, 0.03, 0.025, 0.022], 0.0);
        let choppy = sharpe(&[0.10, -0.08, 0.12, -0.05], 0.0);
        assert!(steady > choppy);
        assert!(steady > 0.0);
    }

    #[test]
    fn drawdown_tracks_the_worst_fall_from_a_peak() {
        let now = Utc::now();
        let equity = vec![
            (now, 100.0),
            (now, 120.0),
            (now, 90.0),  // 25% down from 120
            (now, 110.0),
            (now, 99.0),  // 17.5% down from 120 — not the worst
        ];
        assert!((max_drawdown(&equity) - 0.25).abs() < EPS);
    }

    #[test]
    fn drawdown_is_zero_for_a_rising_curve() {
        let now = Utc::now();
        let equity = vec![(now, 100.0), (now, 110.0), (now, 125.0)];
        assert!(max_drawdown(&equity).abs() < EPS);
    }
}
