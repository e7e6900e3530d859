// =============================================================================
// Circuit Breaker — emergency shutdown on loss, drawdown, or failure density
// =============================================================================
//
// States: Closed -> Open (on any trip) -> HalfOpen (after the cooldown).
// Trips:
//   - consecutive losing bets reaching the configured maximum
//   - peak-to-current drawdown reaching the configured fraction
//   - failure count reaching the maximum inside a rolling window
//
// A trip invokes every registered shutdown callback in registration order;
// callback errors are logged and never abort the sequence. Callbacks run
// after the state lock is released and should re-enter the breaker's public
// API rather than assume uncontended access.
// =============================================================================

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::types::Bet;

/// Shutdown callback invoked with the trip reason.
pub type ShutdownCallback = Box<dyn Fn(&str) -> anyhow::Result<()> + Send + Sync>;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

struct Inner {
    state: BreakerState,
    opened_at: Option<DateTime<Utc>>,
    peak_bankroll: f64,
    drawdown: f64,
    consecutive_losses: u32,
    failure_count: u32,
    last_failure: Option<DateTime<Utc>>,
}

pub struct CircuitBreaker {
    inner: RwLock<Inner>,
    callbacks: Mutex<Vec<ShutdownCallback>>,
    max_consecutive_losses: u32,
    /// Peak-to-current drawdown fraction that trips the breaker.
    max_drawdown: f64,
    max_failures: u32,
    failure_window: Duration,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(
        max_consecutive_losses: u32,
        max_drawdown: f64,
        max_failures: u32,
        failure_window: Duration,
        cooldown: Duration,
    ) -> Self {
        info!(
            max_consecutive_losses,
            max_drawdown,
            max_failures,
            failure_window_s = failure_window.num_seconds(),
            cooldown_s = cooldown.num_seconds(),
            "circuit breaker initialised"
        );

        Self {
            inner: RwLock::new(Inner {
                state: BreakerState::Closed,
                opened_at: None,
                peak_bankroll: 0.0,
                drawdown: 0.0,
                consecutive_losses: 0,
                failure_count: 0,
                last_failure: None,
            }),
            callbacks: Mutex::new(Vec::new()),
            max_consecutive_losses,
            max_drawdown,
            max_failures,
            failure_window,
            cooldown,
        }
    }

    /// Register a shutdown callback. Callbacks fire in registration order on
    /// every trip.
    pub fn register_shutdown(&self, callback: ShutdownCallback) {
        self.callbacks.lock().push(callback);
    }

    // -------------------------------------------------------------------------
    // Inputs
    // -------------------------------------------------------------------------

    /// Record a settled bet and the bankroll after it. Updates the peak,
    /// drawdown, and consecutive-loss counter, tripping when either
    /// threshold is reached.
    pub fn record_bet_result(&self, bet: &Bet, current_bankroll: f64) {
        let trip_reason = {
            let mut inner = self.inner.write();

            if current_bankroll > inner.peak_bankroll {
                inner.peak_bankroll = current_bankroll;
            }
            inner.drawdown = if inner.peak_bankroll > 0.0 {
                ((inner.peak_bankroll - current_bankroll) / inner.peak_bankroll).max(0.0)
            } else {
                0.0
            };

            let pnl = bet.profit_loss.unwrap_or(0.0);
            if pnl > 0.0 {
                inner.consecutive_losses = 0;
            } else if pnl < 0.0 {
                inner.consecutive_losses += 1;
            }

            debug!(
                bet_id = %bet.id,
                pnl,
                bankroll = current_bankroll,
                drawdown = inner.drawdown,
                consecutive_losses = inner.consecutive_losses,
                "bet result recorded"
            );

            self.trip_reason_locked(&mut inner)
        };

        if let Some(reason) = trip_reason {
            self.fire_callbacks(&reason);
        }
    }

    /// Record an operational failure. The counter is window-relative: a
    /// failure outside the window resets the count before incrementing.
    pub fn record_failure(&self, err: &str) {
        let now = Utc::now();
        let trip_reason = {
            let mut inner = self.inner.write();

            if let Some(last) = inner.last_failure {
                if now - last > self.failure_window {
                    inner.failure_count = 0;
                }
            }
            inner.failure_count += 1;
            inner.last_failure = Some(now);

            warn!(
                error = err,
                failure_count = inner.failure_count,
                max = self.max_failures,
                "failure recorded"
            );

            if inner.state == BreakerState::Closed && inner.failure_count >= self.max_failures {
                let reason = format!(
                    "Failure threshold reached: {} failures within window ({err})",
                    inner.failure_count
                );
                Some(self.open_locked(&mut inner, reason))
            } else {
                None
            }
        };

        if let Some(reason) = trip_reason {
            self.fire_callbacks(&reason);
        }
    }

    /// Clear the failure counter after a fully successful cycle.
    pub fn record_success(&self) {
        let mut inner = self.inner.write();
        if inner.failure_count > 0 {
            debug!(cleared = inner.failure_count, "failure count cleared");
        }
        inner.failure_count = 0;
    }

    // -------------------------------------------------------------------------
    // State
    // -------------------------------------------------------------------------

    /// Whether trading must halt. Promotes Open to HalfOpen once the
    /// cooldown has elapsed.
    pub fn is_open(&self) -> bool {
        {
            let inner = self.inner.read();
            match inner.state {
                BreakerState::Closed | BreakerState::HalfOpen => return false,
                BreakerState::Open => {
                    let elapsed_cooldown = inner
                        .opened_at
                        .map(|at| Utc::now() - at > self.cooldown)
                        .unwrap_or(false);
                    if !elapsed_cooldown {
                        return true;
                    }
                }
            }
        }

        let mut inner = self.inner.write();
        if inner.state == BreakerState::Open {
            let elapsed = inner
                .opened_at
                .map(|at| Utc::now() - at > self.cooldown)
                .unwrap_or(false);
            if elapsed {
                inner.state = BreakerState::HalfOpen;
                info!("circuit breaker cooled down: open -> half-open");
                return false;
            }
            return true;
        }
        false
    }

    pub fn state(&self) -> BreakerState {
        self.inner.read().state
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.inner.read().consecutive_losses
    }

    pub fn drawdown(&self) -> f64 {
        self.inner.read().drawdown
    }

    /// Manual forced transition back to Closed, clearing the counters.
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        inner.state = BreakerState::Closed;
        inner.opened_at = None;
        inner.consecutive_losses = 0;
        inner.failure_count = 0;
        warn!("circuit breaker manually reset to closed");
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// Check bet-driven thresholds; opens and returns the reason when one is
    /// reached while closed.
    fn trip_reason_locked(&self, inner: &mut Inner) -> Option<String> {
        if inner.state != BreakerState::Closed {
            return None;
        }
        if self.max_consecutive_losses > 0
            && inner.consecutive_losses >= self.max_consecutive_losses
        {
            let reason = format!(
                "Max consecutive losses reached: {} (limit {})",
                inner.consecutive_losses, self.max_consecutive_losses
            );
            return Some(self.open_locked(inner, reason));
        }
        if self.max_drawdown > 0.0 && inner.drawdown >= self.max_drawdown {
            let reason = format!(
                "Max drawdown reached: {:.1}% (limit {:.1}%)",
                inner.drawdown * 100.0,
                self.max_drawdown * 100.0
            );
            return Some(self.open_locked(inner, reason));
        }
        None
    }

    fn open_locked(&self, inner: &mut Inner, reason: String) -> String {
        inner.state = BreakerState::Open;
        inner.opened_at = Some(Utc::now());
        error!(reason = %reason, "CIRCUIT BREAKER TRIPPED — trading halted");
        reason
    }

    /// Invoke shutdown callbacks in registration order. Runs with the state
    /// lock released.
    fn fire_callbacks(&self, reason: &str) {
        let callbacks = self.callbacks.lock();
        for (index, callback) in callbacks.iter().enumerate() {
            if let Err(e) = callback(reason) {
                error!(index, error = %e, "shutdown callback failed");
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Bet, BetSide, MarketType};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use uuid::Uuid;

    fn settled_bet(pnl: f64) -> Bet {
        let mut bet = Bet::new_pending(
            "1.1",
            Uuid::new_v4(),
            Uuid::new_v4(),
            "steamer",
            MarketType::Win,
            BetSide::Back,
            3.0,
            10.0,
        );
        bet.profit_loss = Some(pnl);
        bet
    }

    fn breaker(max_losses: u32, max_drawdown: f64) -> CircuitBreaker {
        CircuitBreaker::new(
            max_losses,
            max_drawdown,
            10,
            Duration::minutes(5),
            Duration::minutes(30),
        )
    }

    #[test]
    fn trips_after_max_consecutive_losses() {
        let cb = breaker(3, 0.5);
        let fired = Arc::new(AtomicU32::new(0));
        let fired_clone = fired.clone();
        let reasons = Arc::new(Mutex::new(Vec::new()));
        let reasons_clone = reasons.clone();

        cb.register_shutdown(Box::new(move |reason| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
            reasons_clone.lock().push(reason.to_string());
            Ok(())
        }));

        cb.record_bet_result(&settled_bet(-10.0), 90.0);
        assert_eq!(cb.state(), BreakerState::Closed);
        cb.record_bet_result(&settled_bet(-10.0), 80.0);
        assert_eq!(cb.state(), BreakerState::Closed);
        cb.record_bet_result(&settled_bet(-10.0), 70.0);

        assert_eq!(cb.state(), BreakerState::Open);
        assert!(cb.is_open());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(reasons.lock()[0].contains("Max consecutive losses"));
    }

    #[test]
    fn winning_bet_resets_consecutive_losses() {
        let cb = breaker(3, 0.9);
        cb.record_bet_result(&settled_bet(-10.0), 90.0);
        cb.record_bet_result(&settled_bet(-10.0), 80.0);
        assert_eq!(cb.consecutive_losses(), 2);
        cb.record_bet_result(&settled_bet(15.0), 95.0);
        assert_eq!(cb.consecutive_losses(), 0);
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn trips_on_drawdown_from_peak() {
        let cb = breaker(100, 0.5);
        cb.record_bet_result(&settled_bet(50.0), 200.0);
        assert_eq!(cb.state(), BreakerState::Closed);
        // 200 -> 95 is a 52.5% drawdown.
        cb.record_bet_result(&settled_bet(-105.0), 95.0);
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(cb.drawdown() >= 0.5);
    }

    #[test]
    fn failure_density_trips_within_window() {
        let cb = CircuitBreaker::new(
            100,
            0.99,
            3,
            Duration::minutes(5),
            Duration::minutes(30),
        );
        cb.record_failure("rpc timeout");
        cb.record_failure("rpc timeout");
        assert_eq!(cb.state(), BreakerState::Closed);
        cb.record_failure("rpc timeout");
        assert_eq!(cb.state(), BreakerState::Open);
    }

    #[test]
    fn success_clears_failure_count() {
        let cb = CircuitBreaker::new(
            100,
            0.99,
            3,
            Duration::minutes(5),
            Duration::minutes(30),
        );
        cb.record_failure("x");
        cb.record_failure("x");
        cb.record_success();
        cb.record_failure("x");
        cb.record_failure("x");
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn callback_errors_do_not_abort_the_sequence() {
        let cb = breaker(1, 0.9);
        let second_fired = Arc::new(AtomicU32::new(0));
        let second = second_fired.clone();

        cb.register_shutdown(Box::new(|_| anyhow::bail!("callback exploded")));
        cb.register_shutdown(Box::new(move |_| {
            second.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        cb.record_bet_result(&settled_bet(-10.0), 90.0);
        assert_eq!(second_fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn manual_reset_closes_the_breaker() {
        let cb = breaker(1, 0.9);
        cb.record_bet_result(&settled_bet(-10.0), 90.0);
        assert_eq!(cb.state(), BreakerState::Open);
        cb.reset();
        assert_eq!(cb.state(), BreakerState::Closed);
        assert!(!cb.is_open());
    }

    #[test]
    fn zero_pnl_bet_neither_increments_nor_resets() {
        let cb = breaker(3, 0.9);
        cb.record_bet_result(&settled_bet(-10.0), 90.0);
        cb.record_bet_result(&settled_bet(0.0), 90.0);
        assert_eq!(cb.consecutive_losses(), 1);
    }
}
