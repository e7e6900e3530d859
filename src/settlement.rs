// =============================================================================
// Settlement math — shared by the live path, the monitor, and the backtester
// =============================================================================
//
// Payoff rules (decimal odds `o`, stake `s`):
//   back + win   ->  (o - 1) * s
//   back + loss  ->  -s
//   lay  + win   ->  -(o - 1) * s     (the laid selection won; the lay loses)
//   lay  + loss  ->  +s
//
// Commission applies only to positive PnL.
// =============================================================================

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::types::{Bet, BetSide, BetStatus, RaceResult, Runner};

/// Floor for any decimal price on the exchange.
pub const MIN_ODDS: f64 = 1.01;

/// Maximum decimal price on the exchange.
pub const MAX_ODDS: f64 = 1000.0;

/// Price adjustment per slippage tick.
const TICK_SIZE: f64 = 0.01;

// ---------------------------------------------------------------------------
// Slippage
// ---------------------------------------------------------------------------

/// Apply slippage to a requested price. The adjustment is `ticks * 0.01`,
/// added for backs and subtracted for lays, floored at the exchange minimum
/// price.
pub fn apply_slippage(side: BetSide, odds: f64, ticks: u32) -> f64 {
    let adjustment = TICK_SIZE * f64::from(ticks);
    let adjusted = match side {
        BetSide::Back => odds + adjustment,
        BetSide::Lay => odds - adjustment,
    };
    adjusted.max(MIN_ODDS)
}

// ---------------------------------------------------------------------------
// Winner determination
// ---------------------------------------------------------------------------

/// Decide whether `runner` won the race described by `result`.
///
/// The winner trap takes precedence; when absent, the positions blob is
/// consulted and position 1 wins. Positions are keyed by trap number.
pub fn runner_won(runner: &Runner, result: &RaceResult) -> bool {
    if let Some(winner_trap) = result.winner_trap {
        return runner.trap_number == winner_trap;
    }

    result
        .positions
        .get(runner.trap_number.to_string())
        .and_then(|v| v.as_i64())
        .map(|position| position == 1)
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// PnL
// ---------------------------------------------------------------------------

/// Outcome of settling a single bet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Settlement {
    /// Realised profit or loss after commission.
    pub profit_loss: f64,
    /// Commission charged (zero for losing bets).
    pub commission: f64,
}

/// Compute PnL and commission for a bet with known side, stake, odds, and
/// outcome. `selection_won` refers to the runner the bet names, regardless
/// of side.
pub fn settle(
    side: BetSide,
    stake: f64,
    odds: f64,
    selection_won: bool,
    commission_rate: f64,
) -> Settlement {
    let gross = match (side, selection_won) {
        (BetSide::Back, true) => (odds - 1.0) * stake,
        (BetSide::Back, false) => -stake,
        (BetSide::Lay, true) => -(odds - 1.0) * stake,
        (BetSide::Lay, false) => stake,
    };

    let commission = if gross > 0.0 {
        gross * commission_rate
    } else {
        0.0
    };

    Settlement {
        profit_loss: gross - commission,
        commission,
    }
}

// ---------------------------------------------------------------------------
// Bet transition
// ---------------------------------------------------------------------------

/// Settle `bet` in place against `result` at `settled_at`, using the bet's
/// effective odds. Returns the settlement applied.
pub fn settle_bet(
    bet: &mut Bet,
    runner: &Runner,
    result: &RaceResult,
    commission_rate: f64,
    settled_at: DateTime<Utc>,
) -> Settlement {
    let won = runner_won(runner, result);
    let settlement = settle(bet.side, bet.stake, bet.effective_odds(), won, commission_rate);

    bet.status = BetStatus::Settled;
    bet.settled_at = Some(settled_at);
    bet.profit_loss = Some(settlement.profit_loss);
    bet.commission = Some(settlement.commission);

    debug!(
        bet_id = %bet.id,
        side = %bet.side,
        odds = bet.effective_odds(),
        stake = bet.stake,
        won,
        pnl = settlement.profit_loss,
        commission = settlement.commission,
        "bet settled"
    );

    settlement
}
