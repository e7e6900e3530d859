// =============================================================================
// Executor — one contract serving paper and live modes, hard-gated
// =============================================================================
//
// Gate layers between a signal and real money:
//   1. The exchange client is only constructed when live trading is enabled
//      (initialisation gate, main.rs).
//   2. The order manager only starts when live trading is enabled
//      (orchestration gate, main.rs).
//   3. This executor forces paper mode when live trading is disabled; the
//      live path refuses with a typed error (execution gate).
//   4. Config validation rejects a config with neither mode enabled
//      (validation gate, config.rs).
//
// The bet row is created with status pending BEFORE any network call, so a
// crash mid-placement leaves an auditable row, never an untracked order.
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::betting::BettingService;
use crate::db::BetRepository;
use crate::error::ExecutionError;
use crate::risk::RiskManager;
use crate::strategy::{Signal, Strategy};
use crate::types::{Bet, BetStatus};

/// Which path a signal takes to the market.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Paper,
    Live,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Paper => write!(f, "paper"),
            Self::Live => write!(f, "live"),
        }
    }
}

/// Result of a batch execution: successes plus per-signal failures.
#[derive(Default)]
pub struct BatchOutcome {
    pub placed: Vec<Bet>,
    pub errors: Vec<ExecutionError>,
}

impl BatchOutcome {
    /// Summary error text when any signal failed.
    pub fn summary(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        Some(format!(
            "{} of {} signals failed (first: {})",
            self.errors.len(),
            self.errors.len() + self.placed.len(),
            self.errors[0]
        ))
    }
}

pub struct Executor {
    bets: Arc<dyn BetRepository>,
    risk: Arc<RiskManager>,
    /// Present only when live trading is enabled (initialisation gate).
    betting: Option<Arc<BettingService>>,
    mode: ExecutionMode,
    /// Base bankroll used for strategy stake sizing.
    bankroll: f64,
}

impl Executor {
    /// Build an executor. Live mode requires both the feature flag and a
    /// betting service; anything else forces paper.
    pub fn new(
        bets: Arc<dyn BetRepository>,
        risk: Arc<RiskManager>,
        betting: Option<Arc<BettingService>>,
        live_trading_enabled: bool,
        bankroll: f64,
    ) -> Self {
        let mode = if live_trading_enabled && betting.is_some() {
            ExecutionMode::Live
        } else {
            ExecutionMode::Paper
        };
        info!(%mode, bankroll, "executor initialised");

        Self {
            bets,
            risk,
            betting,
            mode,
            bankroll,
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    // -------------------------------------------------------------------------
    // Single signal
    // -------------------------------------------------------------------------

    /// Execute one signal with an already-sized stake. Risk limits are
    /// checked first; the pending bet row is created before any network
    /// call; a live placement failure cancels the row and surfaces the
    /// error.
    pub async fn execute_signal(
        &self,
        signal: &Signal,
        stake: f64,
    ) -> Result<Bet, ExecutionError> {
        self.risk.check_limits(stake)?;

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
        self.bets.create(&bet).await?;

        match self.mode {
            ExecutionMode::Paper => {
                info!(
                    bet_id = %bet.id,
                    market_id = %bet.market_id,
                    side = %bet.side,
                    odds = bet.requested_odds,
                    stake = bet.stake,
                    "paper bet placed (simulated)"
                );
                Ok(bet)
            }
            ExecutionMode::Live => {
                let betting = self
                    .betting
                    .as_ref()
                    .ok_or(ExecutionError::LiveTradingDisabled)?;

                match betting
                    .place_bet(
                        &signal.market_id,
                        signal.selection_id,
                        signal.side,
                        signal.odds,
                        stake,
                    )
                    .await
                {
                    Ok(external_id) => {
                        bet.external_bet_id = Some(external_id);
                        self.bets.update(&bet).await?;
                        Ok(bet)
                    }
                    Err(e) => {
                        bet.status = BetStatus::Cancelled;
                        bet.cancelled_at = Some(Utc::now());
                        self.bets.update(&bet).await?;
                        warn!(bet_id = %bet.id, error = %e, "live placement failed — bet cancelled");
                        Err(e.into())
                    }
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Batch
    // -------------------------------------------------------------------------

    /// Size and execute a batch of signals sequentially, collecting errors
    /// without aborting the batch. Signals failing `should_bet` or sizing
    /// to zero are skipped silently — they are non-bets, not failures.
    pub async fn execute_batch(
        &self,
        signals: &[(Signal, Arc<dyn Strategy>)],
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for (signal, strategy) in signals {
            if !strategy.should_bet(signal) {
                continue;
            }
            let stake = strategy.calculate_stake(signal, self.bankroll);
            if stake <= 0.0 {
                continue;
            }

            match self.execute_signal(signal, stake).await {
                Ok(bet) => outcome.placed.push(bet),
                Err(e) => {
                    warn!(
                        market_id = %signal.market_id,
                        strategy = %signal.strategy_name,
                        error = %e,
                        "signal execution failed"
                    );
                    outcome.errors.push(e);
                }
            }
        }

        outcome
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::ExchangeClient;
    use crate::testutil::InMemoryBetRepository;
    use crate::types::{BetSide, MarketType};
    use uuid::Uuid;

    fn signal() -> Signal {
        Signal {
            race_id: Uuid::new_v4(),
            runner_id: Uuid::new_v4(),
            market_id: "1.234".to_string(),
            selection_id: 42,
            market_type: MarketType::Win,
            side: BetSide::Back,
            odds: 3.0,
            confidence: 0.5,
            strategy_name: "steamer".to_string(),
        }
    }

    fn risk_manager(bets: Arc<InMemoryBetRepository>) -> Arc<RiskManager> {
        Arc::new(RiskManager::new(bets, 100.0, 500.0, 200.0))
    }

    #[tokio::test]
    async fn paper_mode_creates_a_pending_bet_without_external_id() {
        let bets = Arc::new(InMemoryBetRepository::new());
        let executor = Executor::new(bets.clone(), risk_manager(bets.clone()), None, false, 1000.0);
        assert_eq!(executor.mode(), ExecutionMode::Paper);

        let bet = executor.execute_signal(&signal(), 10.0).await.unwrap();
        assert_eq!(bet.status, BetStatus::Pending);
        assert!(bet.external_bet_id.is_none());

        let stored = bets.get(bet.id).await.unwrap();
        assert_eq!(stored.status, BetStatus::Pending);
    }

    #[tokio::test]
    async fn live_mode_is_forced_to_paper_when_the_flag_is_off() {
        let bets = Arc::new(InMemoryBetRepository::new());
        let client = Arc::new(ExchangeClient::new("https://exchange.test/rpc", "key"));
        let betting = Some(Arc::new(BettingService::new(client, 2.0, 100.0)));

        // Service supplied but flag off: execution gate forces paper.
        let executor = Executor::new(bets.clone(), risk_manager(bets.clone()), betting, false, 1000.0);
        assert_eq!(executor.mode(), ExecutionMode::Paper);
    }

    #[tokio::test]
    async fn risk_rejection_creates_no_bet_row() {
        let bets = Arc::new(InMemoryBetRepository::new());
        let executor = Executor::new(bets.clone(), risk_manager(bets.clone()), None, false, 1000.0);

        let result = executor.execute_signal(&signal(), 150.0).await;
        assert!(matches!(result, Err(ExecutionError::Risk(_))));
        assert!(bets.all().is_empty());
    }

    #[tokio::test]
    async fn live_placement_failure_cancels_the_bet_row() {
        let bets = Arc::new(InMemoryBetRepository::new());
        // Client with no session token: the place call fails before dispatch.
        let client = Arc::new(ExchangeClient::new("https://exchange.test/rpc", "key"));
        let betting = Some(Arc::new(BettingService::new(client, 2.0, 100.0)));
        let executor = Executor::new(bets.clone(), risk_manager(bets.clone()), betting, true, 1000.0);
        assert_eq!(executor.mode(), ExecutionMode::Live);

        let result = executor.execute_signal(&signal(), 10.0).await;
        assert!(result.is_err());

        let all = bets.all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, BetStatus::Cancelled);
        assert!(all[0].cancelled_at.is_some());
    }

    #[tokio::test]
    async fn batch_collects_errors_without_aborting() {
        struct FixedStakeStrategy(f64);

        #[async_trait::async_trait]
        impl Strategy for FixedStakeStrategy {
            fn name(&self) -> &str {
                "fixed"
            }
            async fn evaluate(
                &self,
                _ctx: &crate::strategy::StrategyContext<'_>,
            ) -> anyhow::Result<Vec<Signal>> {
                Ok(Vec::new())
            }
            fn should_bet(&self, _signal: &Signal) -> bool {
                true
            }
            fn calculate_stake(&self, _signal: &Signal, _bankroll: f64) -> f64 {
                self.0
            }
            fn parameters(&self) -> serde_json::Value {
                serde_json::Value::Null
            }
        }

        let bets = Arc::new(InMemoryBetRepository::new());
        let executor = Executor::new(bets.clone(), risk_manager(bets.clone()), None, false, 1000.0);

        let over_limit: Arc<dyn Strategy> = Arc::new(FixedStakeStrategy(150.0));
        let fine: Arc<dyn Strategy> = Arc::new(FixedStakeStrategy(10.0));
        let skipped: Arc<dyn Strategy> = Arc::new(FixedStakeStrategy(0.0));

        let batch = vec![
            (signal(), over_limit),
            (signal(), fine),
            (signal(), skipped),
        ];

        let outcome = executor.execute_batch(&batch).await;
        assert_eq!(outcome.placed.len(), 1);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.summary().unwrap().contains("1 of 2"));
    }
}
