// =============================================================================
// Live Orchestrator — the periodic trading loop
// =============================================================================
//
// Each tick, in order:
//   1. Skip when the circuit breaker is open.
//   2. Refresh risk exposure; a failure records to the breaker and ends
//      the tick.
//   3. Skip when any risk limit is already reached.
//   4. Load races starting inside [now + min_time_to_start, now + window].
//   5. Evaluate every active strategy per race (per-strategy errors are
//      non-fatal).
//   6. Pass signals through the ML filter (default pass-through).
//   7. Hand the batch to the executor.
//   8. Record success / failure with the breaker.
//
// The active-strategy map is rebuilt from the strategy repository at
// startup and on explicit refresh, never per tick.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::breaker::CircuitBreaker;
use crate::db::{OddsRepository, RaceRepository, StrategyRepository};
use crate::executor::Executor;
use crate::risk::RiskManager;
use crate::strategy::{build_strategy_map, Signal, Strategy, StrategyContext};

/// How far back pre-race odds history reaches when building a context,
/// hours.
const ODDS_HISTORY_LOOKBACK_HOURS: i64 = 24;

pub struct Orchestrator {
    races: Arc<dyn RaceRepository>,
    odds: Arc<dyn OddsRepository>,
    strategy_rows: Arc<dyn StrategyRepository>,
    risk: Arc<RiskManager>,
    executor: Arc<Executor>,
    breaker: Arc<CircuitBreaker>,
    strategies: RwLock<HashMap<String, Arc<dyn Strategy>>>,
    evaluation_interval: StdDuration,
    min_time_to_start: Duration,
    pre_race_window: Duration,
    ml_filter_enabled: bool,
    done: watch::Sender<bool>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        races: Arc<dyn RaceRepository>,
        odds: Arc<dyn OddsRepository>,
        strategy_rows: Arc<dyn StrategyRepository>,
        risk: Arc<RiskManager>,
        executor: Arc<Executor>,
        breaker: Arc<CircuitBreaker>,
        evaluation_interval: StdDuration,
        min_time_to_start: Duration,
        pre_race_window: Duration,
        ml_filter_enabled: bool,
    ) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            races,
            odds,
            strategy_rows,
            risk,
            executor,
            breaker,
            strategies: RwLock::new(HashMap::new()),
            evaluation_interval,
            min_time_to_start,
            pre_race_window,
            ml_filter_enabled,
            done,
        }
    }

    // -------------------------------------------------------------------------
    // Strategy map
    // -------------------------------------------------------------------------

    /// Rebuild the active-strategy map from storage. Fatal on unknown
    /// names: a typo'd row should stop startup rather than silently drop.
    pub async fn refresh_strategies(&self) -> anyhow::Result<usize> {
        let records = self.strategy_rows.active().await?;
        let map = build_strategy_map(&records)?;
        let count = map.len();
        *self.strategies.write() = map;
        info!(count, "active strategies loaded");
        Ok(count)
    }

    pub fn active_strategy_count(&self) -> usize {
        self.strategies.read().len()
    }

    // -------------------------------------------------------------------------
    // Loop
    // -------------------------------------------------------------------------

    /// Run the evaluation loop until `stop` is called or the root shutdown
    /// signal fires.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_s = self.evaluation_interval.as_secs(),
            "orchestrator started"
        );

        let mut done = self.done.subscribe();
        let mut ticker = tokio::time::interval(self.evaluation_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("orchestrator stopping (root shutdown)");
                    return;
                }
                _ = done.changed() => {
                    info!("orchestrator stopping (done channel closed)");
                    return;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// Request the loop to exit. Safe to call from a breaker shutdown
    /// callback.
    pub fn stop(&self) {
        let _ = self.done.send(true);
    }

    // -------------------------------------------------------------------------
    // One tick
    // -------------------------------------------------------------------------

    pub async fn tick(&self) {
        // 1. Breaker gate.
        if self.breaker.is_open() {
            warn!("circuit breaker open — skipping evaluation tick");
            return;
        }

        // 2. Refresh exposure.
        if let Err(e) = self.risk.update_exposure().await {
            error!(error = %e, "exposure refresh failed");
            self.breaker.record_failure(&format!("exposure refresh: {e}"));
            return;
        }

        // 3. Risk limits.
        if self.risk.any_limit_reached() {
            warn!(
                exposure = self.risk.current_exposure(),
                daily_loss = self.risk.daily_loss(),
                "risk limit reached — skipping evaluation tick"
            );
            return;
        }

        // 4. Upcoming races.
        let now = Utc::now();
        let races = match self
            .races
            .upcoming(now + self.min_time_to_start, now + self.pre_race_window)
            .await
        {
            Ok(races) => races,
            Err(e) => {
                error!(error = %e, "failed to load upcoming races");
                self.breaker.record_failure(&format!("race load: {e}"));
                return;
            }
        };

        if races.is_empty() {
            debug!("no upcoming races in the evaluation window");
            self.breaker.record_success();
            return;
        }

        // 5. Evaluate strategies per race. Per-race errors are non-fatal.
        let strategies: Vec<Arc<dyn Strategy>> =
            self.strategies.read().values().cloned().collect();
        let mut batch: Vec<(Signal, Arc<dyn Strategy>)> = Vec::new();

        for race in &races {
            match self.evaluate_race(race, &strategies, now).await {
                Ok(mut signals) => batch.append(&mut signals),
                Err(e) => {
                    warn!(race_id = %race.id, error = %e, "race evaluation failed");
                }
            }
        }

        // 6. ML filter (default pass-through; the prediction service is an
        //    external collaborator).
        let batch = self.filter_signals(batch);

        if batch.is_empty() {
            self.breaker.record_success();
            return;
        }

        // 7. Execute.
        info!(signals = batch.len(), races = races.len(), "executing signal batch");
        let outcome = self.executor.execute_batch(&batch).await;

        // 8. Outcome accounting.
        match outcome.summary() {
            Some(summary) => self.breaker.record_failure(&summary),
            None => self.breaker.record_success(),
        }
    }

    async fn evaluate_race(
        &self,
        race: &crate::types::Race,
        strategies: &[Arc<dyn Strategy>],
        now: chrono::DateTime<Utc>,
    ) -> anyhow::Result<Vec<(Signal, Arc<dyn Strategy>)>> {
        let runners = self.races.runners(race.id).await?;
        let history = self
            .odds
            .by_race(
                race.id,
                race.scheduled_start - Duration::hours(ODDS_HISTORY_LOOKBACK_HOURS),
                now,
            )
            .await?;

        let ctx = StrategyContext {
            race,
            runners: &runners,
            odds_history: &history,
            current_time: now,
        };

        let mut out = Vec::new();
        for strategy in strategies {
            match strategy.evaluate(&ctx).await {
                Ok(signals) => {
                    for signal in signals {
                        out.push((signal, strategy.clone()));
                    }
                }
                Err(e) => {
                    // Per-strategy, non-fatal.
                    warn!(
                        race_id = %race.id,
                        strategy = strategy.name(),
                        error = %e,
                        "strategy evaluation failed"
                    );
                }
            }
        }
        Ok(out)
    }

    fn filter_signals(
        &self,
        signals: Vec<(Signal, Arc<dyn Strategy>)>,
    ) -> Vec<(Signal, Arc<dyn Strategy>)> {
        if self.ml_filter_enabled {
            debug!(count = signals.len(), "ml filter enabled — passing signals through");
        }
        signals
    }
}
