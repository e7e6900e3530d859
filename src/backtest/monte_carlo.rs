// =============================================================================
// Monte-Carlo simulation — outcome resampling over a fixed bet sequence
// =============================================================================
//
// Every iteration samples each bet independently from its win probability,
// applies the shared PnL + commission math, and stops early on ruin. The
// RNG is ChaCha8 seeded from the configured seed, so identical seeds give
// identical distributions on every platform.
// =============================================================================

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::settlement::settle;
use crate::types::Bet;

#[derive(Debug, Clone)]
pub struct MonteCarloConfig {
    pub iterations: u32,
    /// Unset means seed from the nanosecond clock.
    pub seed: Option<u64>,
    pub initial_bankroll: f64,
    pub commission_rate: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonteCarloResult {
    /// Final bankroll per iteration.
    pub distribution: Vec<f64>,
    pub mean_return: f64,
    pub std_return: f64,
    /// 5th percentile of normalised returns.
    pub var_95: f64,
    /// 1st percentile of normalised returns.
    pub var_99: f64,
    pub probability_of_profit: f64,
    pub probability_of_ruin: f64,
    /// (level, high − low percentile spread) at 90/95/99%.
    pub confidence_intervals: Vec<(u8, f64)>,
    /// The seed actually used, recorded for reproducibility.
    pub seed: u64,
}

/// Run the simulation over `bets` with per-bet win probabilities. Bets
/// missing from `win_probabilities` fall back to the implied probability of
/// their effective odds.
pub fn run_monte_carlo(
    bets: &[Bet],
    win_probabilities: &HashMap<Uuid, f64>,
    config: &MonteCarloConfig,
) -> MonteCarloResult {
    let seed = config.seed.unwrap_or_else(nanosecond_seed);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let iterations = config.iterations.max(1) as usize;
    let mut distribution = Vec::with_capacity(iterations);

    for _ in 0..iterations {
        let mut bankroll = config.initial_bankroll;

        for bet in bets {
            let odds = bet.effective_odds();
            let probability = win_probabilities
                .get(&bet.id)
                .copied()
                .unwrap_or_else(|| (1.0 / odds).clamp(0.0, 1.0));

            let won = rng.gen::<f64>() < probability;
            let settlement = settle(bet.side, bet.stake, odds, won, config.commission_rate);
            bankroll += settlement.profit_loss;

            if bankroll <= 0.0 {
                // Ruin: this path is finished.
                break;
            }
        }

        distribution.push(bankroll);
    }

    let result = summarise(distribution, config.initial_bankroll, seed);
    info!(
        iterations,
        seed,
        mean_return = result.mean_return,
        probability_of_profit = result.probability_of_profit,
        probability_of_ruin = result.probability_of_ruin,
        "monte-carlo simulation complete"
    );
    result
}

fn nanosecond_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before UNIX epoch")
        .as_nanos() as u64
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

fn summarise(distribution: Vec<f64>, initial: f64, seed: u64) -> MonteCarloResult {
    let n = distribution.len() as f64;

    let returns: Vec<f64> = distribution
        .iter()
        .map(|&final_bankroll| (final_bankroll - initial) / initial)
        .collect();

    let mean_return = returns.iter().sum::<f64>() / n;
    let variance = returns
        .iter()
        .map(|r| (r - mean_return).powi(2))
        .sum::<f64>()
        / n;
    let std_return = variance.sqrt();

    let mut sorted_returns = returns.clone();
    sorted_returns.sort_by(|a, b| a.partial_cmp(b).expect("returns are finite"));

    let probability_of_profit =
        distribution.iter().filter(|&&f| f > initial).count() as f64 / n;
    let probability_of_ruin = distribution.iter().filter(|&&f| f <= 0.0).count() as f64 / n;

    let confidence_intervals = [90u8, 95, 99]
        .iter()
        .map(|&level| {
            let half = (100.0 - f64::from(level)) / 2.0;
            let low = percentile(&sorted_returns, half);
            let high = percentile(&sorted_returns, 100.0 - half);
            (level, high - low)
        })
        .collect();

    MonteCarloResult {
        var_95: percentile(&sorted_returns, 5.0),
        var_99: percentile(&sorted_returns, 1.0),
        distribution,
        mean_return,
        std_return,
        probability_of_profit,
        probability_of_ruin,
        confidence_intervals,
        seed,
    }
}

/// Nearest-rank percentile over an ascending slice.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (q / 100.0 * (sorted.len() - 1) as f64).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BetSide, MarketType};

    fn single_bet(odds: f64, stake: f64) -> Bet {
        Bet::new_pending(
            "1.234",
            Uuid::new_v4(),
            Uuid::new_v4(),
            "steamer",
            MarketType::Win,
            BetSide::Back,
            odds,
            stake,
        )
    }

    fn config(seed: u64) -> MonteCarloConfig {
        MonteCarloConfig {
            iterations: 1000,
            seed: Some(seed),
            initial_bankroll: 100.0,
            commission_rate: 0.05,
        }
    }

    #[test]
    fn identical_seeds_give_identical_distributions() {
        let bet = single_bet(2.0, 10.0);
        let probs: HashMap<Uuid, f64> = [(bet.id, 0.6)].into_iter().collect();
        let bets = vec![bet];

        let first = run_monte_carlo(&bets, &probs, &config(42));
        let second = run_monte_carlo(&bets, &probs, &config(42));

        assert_eq!(first.distribution.len(), 1000);
        assert_eq!(first.distribution, second.distribution);
        assert_eq!(first.seed, 42);
    }

    #[test]
    fn probability_of_profit_tracks_the_win_probability() {
        let bet = single_bet(2.0, 10.0);
        let probs: HashMap<Uuid, f64> = [(bet.id, 0.6)].into_iter().collect();
        let bets = vec![bet];

        let result = run_monte_carlo(&bets, &probs, &config(42));
        // One winning back bet at 2.0 is the only profitable path.
        assert!((result.probability_of_profit - 0.6).abs() <= 0.03);
        assert!(result.probability_of_ruin.abs() < 1e-9);
    }

    #[test]
    fn different_seeds_give_different_paths() {
        let bet = single_bet(2.0, 10.0);
        let probs: HashMap<Uuid, f64> = [(bet.id, 0.6)].into_iter().collect();
        let bets = vec![bet];

        let a = run_monte_carlo(&bets, &probs, &config(1));
        let b = run_monte_carlo(&bets, &probs, &config(2));
        assert_ne!(a.distribution, b.distribution);
    }

    #[test]
    fn ruin_stops_an_iteration_early() {
        // Stake the whole bankroll on a certain loser.
        let bet = single_bet(2.0, 100.0);
        let probs: HashMap<Uuid, f64> = [(bet.id, 0.0)].into_iter().collect();
        let bets = vec![bet.clone(), bet];

        let result = run_monte_carlo(&bets, &probs, &config(7));
        assert!((result.probability_of_ruin - 1.0).abs() < 1e-9);
        // The second bet never runs; everything ends exactly at zero.
        assert!(result.distribution.iter().all(|&f| f == 0.0));
    }

    #[test]
    fn missing_probabilities_fall_back_to_implied() {
        let bet = single_bet(2.0, 10.0);
        let bets = vec![bet];
        let result = run_monte_carlo(&bets, &HashMap::new(), &config(42));
        // Implied probability at 2.0 is 0.5.
        assert!((result.probability_of_profit - 0.5).abs() <= 0.04);
    }

    #[test]
    fn confidence_intervals_widen_with_level() {
        let bets: Vec<Bet> = (0..20).map(|_| single_bet(3.0, 10.0)).collect();
        let probs: HashMap<Uuid, f64> = bets.iter().map(|b| (b.id, 0.4)).collect();

        let result = run_monte_carlo(&bets, &probs, &config(42));
        let spreads: Vec<f64> = result.confidence_intervals.iter().map(|&(_, s)| s).collect();
        assert!(spreads[0] <= spreads[1]);
        assert!(spreads[1] <= spreads[2]);
    }
}
