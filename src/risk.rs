// =============================================================================
// Risk Manager — position sizing and hard limits protecting capital
// =============================================================================
//
// Tracks (current_exposure, daily_loss, daily_reset) behind an RwLock.
// Exposure is the sum of stakes over non-terminal bets; daily loss is the
// realised loss since UTC midnight. Limits checked before every placement:
//   1. Stake        — proposed stake vs max_stake_per_bet
//   2. Exposure     — current exposure + proposed vs max_exposure
//   3. Daily loss   — realised daily loss vs max_daily_loss
//
// Sizing uses fractional Kelly (quarter Kelly) with a dust filter.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::db::BetRepository;
use crate::error::{DbError, RiskError};

/// Fractional Kelly multiplier.
const KELLY_FRACTION: f64 = 0.25;

/// Stakes below this are noise and are never placed.
const MIN_STAKE: f64 = 2.0;

// ---------------------------------------------------------------------------
// Kelly sizing
// ---------------------------------------------------------------------------

/// Quarter-Kelly stake for decimal odds `odds`, bankroll `bankroll`, and win
/// probability `confidence`. Returns 0.0 when the edge is not worth betting
/// (negative Kelly or a stake under the dust filter).
pub fn kelly_stake(odds: f64, bankroll: f64, confidence: f64, max_stake: f64) -> f64 {
    if odds <= 1.0 || !(0.0..=1.0).contains(&confidence) || bankroll <= 0.0 {
        return 0.0;
    }

    let b = odds - 1.0;
    let p = confidence;
    let q = 1.0 - p;
    let full_kelly = (b * p - q) / b;

    let stake = bankroll * (full_kelly * KELLY_FRACTION).max(0.0);
    let stake = stake.min(max_stake);

    if stake < MIN_STAKE {
        return 0.0;
    }
    stake
}

// ---------------------------------------------------------------------------
// Internal mutable state (behind RwLock)
// ---------------------------------------------------------------------------

struct Inner {
    current_exposure: f64,
    daily_loss: f64,
    daily_reset: DateTime<Utc>,
}

/// First instant of the next UTC day after `now`.
fn next_utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = (now + Duration::days(1)).date_naive();
    let midnight = tomorrow.and_hms_opt(0, 0, 0).expect("midnight is always valid");
    DateTime::from_naive_utc_and_offset(midnight, Utc)
}

// ---------------------------------------------------------------------------
// Risk Manager
// ---------------------------------------------------------------------------

pub struct RiskManager {
    state: RwLock<Inner>,
    bets: Arc<dyn BetRepository>,
    max_stake_per_bet: f64,
    max_exposure: f64,
    max_daily_loss: f64,
}

impl RiskManager {
    pub fn new(
        bets: Arc<dyn BetRepository>,
        max_stake_per_bet: f64,
        max_exposure: f64,
        max_daily_loss: f64,
    ) -> Self {
        let now = Utc::now();
        info!(
            max_stake_per_bet,
            max_exposure, max_daily_loss, "risk manager initialised"
        );

        Self {
            state: RwLock::new(Inner {
                current_exposure: 0.0,
                daily_loss: 0.0,
                daily_reset: next_utc_midnight(now),
            }),
            bets,
            max_stake_per_bet,
            max_exposure,
            max_daily_loss,
        }
    }

    // -------------------------------------------------------------------------
    // Refresh
    // -------------------------------------------------------------------------

    /// Recompute exposure as the sum of stakes over pending bets.
    /// The repository call runs outside the lock.
    pub async fn update_exposure(&self) -> Result<f64, DbError> {
        let pending = self.bets.pending().await?;
        let exposure: f64 = pending.iter().map(|b| b.stake).sum();

        self.state.write().current_exposure = exposure;
        debug!(exposure, pending = pending.len(), "exposure refreshed");
        Ok(exposure)
    }

    /// Recompute the realised loss over settled bets in `[UTC midnight, now)`.
    pub async fn update_daily_loss(&self) -> Result<f64, DbError> {
        let now = Utc::now();
        let midnight = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
            .expect("midnight is always valid");

        let settled = self.bets.settled_between(midnight, now).await?;
        let net: f64 = settled.iter().filter_map(|b| b.profit_loss).sum();
        let loss = (-net).max(0.0);

        self.state.write().daily_loss = loss;
        debug!(daily_loss = loss, settled = settled.len(), "daily loss refreshed");
        Ok(loss)
    }

    // -------------------------------------------------------------------------
    // Limit enforcement
    // -------------------------------------------------------------------------

    /// Check a proposed stake against all limits. Rejections name the
    /// breached limit. The first check past the reset instant zeroes the
    /// daily loss and advances the schedule; the next refresh recomputes it.
    pub fn check_limits(&self, proposed: f64) -> Result<(), RiskError> {
        self.maybe_reset_daily();
        let state = self.state.read();

        if proposed > self.max_stake_per_bet {
            return Err(RiskError::StakeLimit {
                proposed,
                max: self.max_stake_per_bet,
            });
        }

        if state.current_exposure + proposed > self.max_exposure {
            return Err(RiskError::ExposureLimit {
                current: state.current_exposure,
                proposed,
                max: self.max_exposure,
            });
        }

        if state.daily_loss >= self.max_daily_loss {
            return Err(RiskError::DailyLossLimit {
                loss: state.daily_loss,
                max: self.max_daily_loss,
            });
        }

        Ok(())
    }

    /// Whether any standing limit is already breached (ignoring new stakes).
    /// The orchestrator skips the whole tick when this is true.
    pub fn any_limit_reached(&self) -> bool {
        self.maybe_reset_daily();
        let state = self.state.read();
        state.current_exposure >= self.max_exposure || state.daily_loss >= self.max_daily_loss
    }

    pub fn current_exposure(&self) -> f64 {
        self.state.read().current_exposure
    }

    pub fn daily_loss(&self) -> f64 {
        self.state.read().daily_loss
    }

    pub fn max_stake_per_bet(&self) -> f64 {
        self.max_stake_per_bet
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn maybe_reset_daily(&self) {
        let now = Utc::now();
        {
            let state = self.state.read();
            if now < state.daily_reset {
                return;
            }
        }
        let mut state = self.state.write();
        // Double-check after acquiring the write lock.
        if now >= state.daily_reset {
            info!(previous_loss = state.daily_loss, "daily risk counters reset");
            state.daily_loss = 0.0;
            state.daily_reset = next_utc_midnight(now);
        }
    }
}
