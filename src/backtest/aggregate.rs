// =============================================================================
// Aggregator — normalised composite score and recommendation
// =============================================================================
//
// Each metric is clipped into [0, 1] against fixed bounds, blended into a
// historical composite, then combined with the Monte-Carlo and walk-forward
// scores under user-supplied weights.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::backtest::metrics::Metrics;
use crate::backtest::monte_carlo::MonteCarloResult;
use crate::backtest::walk_forward::WalkForwardResult;
use crate::config::ScoreWeights;

// Fixed normalisation bounds.
const SHARPE_BOUNDS: (f64, f64) = (-2.0, 3.0);
const RETURN_BOUNDS: (f64, f64) = (-0.5, 1.0);
const PROFIT_FACTOR_BOUNDS: (f64, f64) = (0.0, 3.0);
const DRAWDOWN_BOUNDS: (f64, f64) = (0.0, 0.5);

// Historical composite weights.
const W_SHARPE: f64 = 0.30;
const W_RETURN: f64 = 0.20;
const W_PROFIT_FACTOR: f64 = 0.20;
const W_DRAWDOWN: f64 = 0.15;
const W_WIN_RATE: f64 = 0.15;

/// Final verdict on a strategy's backtest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    Accept,
    NeedsReview,
    Reject,
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accept => write!(f, "ACCEPT"),
            Self::NeedsReview => write!(f, "NEEDS_REVIEW"),
            Self::Reject => write!(f, "REJECT"),
        }
    }
}

/// Scores feeding the final composite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeScore {
    pub historical: f64,
    pub monte_carlo: f64,
    pub walk_forward: f64,
    pub composite: f64,
    pub recommendation: Recommendation,
}

/// Clip `(v - min) / (max - min)` into [0, 1].
pub fn normalise(value: f64, min: f64, max: f64) -> f64 {
    ((value - min) / (max - min)).clamp(0.0, 1.0)
}

/// Blend historical metrics into one [0, 1] score. Drawdown is inverted:
/// less is better.
pub fn historical_score(metrics: &Metrics) -> f64 {
    let sharpe = normalise(metrics.sharpe_ratio, SHARPE_BOUNDS.0, SHARPE_BOUNDS.1);
    let ret = normalise(metrics.total_return, RETURN_BOUNDS.0, RETURN_BOUNDS.1);
    let profit_factor = normalise(
        metrics.profit_factor,
        PROFIT_FACTOR_BOUNDS.0,
        PROFIT_FACTOR_BOUNDS.1,
    );
    let drawdown = normalise(metrics.max_drawdown, DRAWDOWN_BOUNDS.0, DRAWDOWN_BOUNDS.1);
    let win_rate = metrics.win_rate.clamp(0.0, 1.0);

    W_SHARPE * sharpe
        + W_RETURN * ret
        + W_PROFIT_FACTOR * profit_factor
        + W_DRAWDOWN * (1.0 - drawdown)
        + W_WIN_RATE * win_rate
}

pub fn monte_carlo_score(mc: &MonteCarloResult) -> f64 {
    normalise(mc.mean_return, RETURN_BOUNDS.0, RETURN_BOUNDS.1)
}

pub fn walk_forward_score(wf: &WalkForwardResult) -> f64 {
    normalise(wf.aggregated.total_return, RETURN_BOUNDS.0, RETURN_BOUNDS.1)
}

/// Combine the three scores under user weights and derive the
/// recommendation.
pub fn aggregate(
    historical_metrics: &Metrics,
    mc: &MonteCarloResult,
    wf: &WalkForwardResult,
    weights: &ScoreWeights,
) -> CompositeScore {
    let historical = historical_score(historical_metrics);
    let monte_carlo = monte_carlo_score(mc);
    let walk_forward = walk_forward_score(wf);

    let weight_sum = weights.historical + weights.monte_carlo + weights.walk_forward;
    let composite = if weight_sum > 0.0 {
        (weights.historical * historical
            + weights.monte_carlo * monte_carlo
            + weights.walk_forward * walk_forward)
            / weight_sum
    } else {
        0.0
    };

    let recommendation = recommend(
        composite,
        historical_metrics.total_return,
        wf.aggregated.total_return,
        wf.consistency,
    );

    CompositeScore {
        historical,
        monte_carlo,
        walk_forward,
        composite,
        recommendation,
    }
}

/// ACCEPT requires a strong composite and positive returns on both the
/// historical and walk-forward axes; REJECT fires on any clearly bad axis;
/// everything in between needs a human.
pub fn recommend(
    composite: f64,
    historical_return: f64,
    walk_forward_return: f64,
    consistency: f64,
) -> Recommendation {
    if composite > 0.7
        && historical_return > 0.0
        && walk_forward_return > 0.0
        && consistency > 0.6
    {
        return Recommendation::Accept;
    }
    if composite < 0.4
        || historical_return < 0.0
        || walk_forward_return < 0.0
        || consistency < 0.4
    {
        return Recommendation::Reject;
    }
    Recommendation::NeedsReview
}
