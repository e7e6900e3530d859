// =============================================================================
// Order Manager — poll-based reconciliation of pending bets
// =============================================================================
//
// Each tick (serialised against itself — one in-flight reconciliation at a
// time):
//   1. Load pending bets that hold an exchange bet id, group by market.
//   2. listCurrentOrders over those markets and diff against our rows:
//        - reported MATCHED      -> pending -> matched (average price, size)
//        - absent from the reply -> logged for investigation, not mutated
//          (a just-placed bet may not have appeared remotely yet)
//   3. Settle matched bets whose race result has arrived.
//
// Failed ticks increment a counter and are retried on the next interval.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::db::{BetRepository, RaceRepository, ResultRepository};
use crate::error::DbError;
use crate::exchange::wire::CurrentOrder;
use crate::exchange::ExchangeClient;
use crate::settlement::settle_bet;
use crate::types::{Bet, BetStatus};

/// Exchange-reported order status that completes the match.
const ORDER_MATCHED: &str = "MATCHED";

/// Counts of what one reconciliation pass did.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReconcileStats {
    pub matched: usize,
    pub settled: usize,
    pub missing: usize,
}

// ---------------------------------------------------------------------------
// Pure transition helpers
// ---------------------------------------------------------------------------

/// Apply the exchange's view of one order to our bet row. Returns true when
/// the row changed.
pub fn apply_current_order(bet: &mut Bet, order: &CurrentOrder) -> bool {
    if bet.status != BetStatus::Pending || order.status != ORDER_MATCHED {
        return false;
    }
    bet.status = BetStatus::Matched;
    bet.matched_at = Some(Utc::now());
    bet.matched_price = order.average_price_matched;
    bet.matched_size = order.size_matched;
    true
}

/// Settle every matched bet whose race result is known. Shared with the
/// order-manager tick and exercised directly by tests.
pub async fn settle_matched_bets(
    bets: &dyn BetRepository,
    races: &dyn RaceRepository,
    results: &dyn ResultRepository,
    commission_rate: f64,
) -> Result<usize, DbError> {
    let matched = bets.matched().await?;
    let mut settled = 0usize;

    for mut bet in matched {
        let result = match results.for_race(bet.race_id).await {
            Ok(result) => result,
            Err(DbError::NotFound) => continue,
            Err(e) => return Err(e),
        };

        let runners = races.runners(bet.race_id).await?;
        let Some(runner) = runners.iter().find(|r| r.id == bet.runner_id) else {
            warn!(bet_id = %bet.id, race_id = %bet.race_id, "bet references unknown runner");
            continue;
        };

        settle_bet(&mut bet, runner, &result, commission_rate, Utc::now());
        bets.update(&bet).await?;
        settled += 1;
    }

    Ok(settled)
}

// ---------------------------------------------------------------------------
// Order Manager
// ---------------------------------------------------------------------------

pub struct OrderManager {
    client: Arc<ExchangeClient>,
    bets: Arc<dyn BetRepository>,
    races: Arc<dyn RaceRepository>,
    results: Arc<dyn ResultRepository>,
    commission_rate: f64,
    poll_interval: Duration,
    failed_ticks: AtomicU64,
}

impl OrderManager {
    pub fn new(
        client: Arc<ExchangeClient>,
        bets: Arc<dyn BetRepository>,
        races: Arc<dyn RaceRepository>,
        results: Arc<dyn ResultRepository>,
        commission_rate: f64,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client,
            bets,
            races,
            results,
            commission_rate,
            poll_interval,
            failed_ticks: AtomicU64::new(0),
        }
    }

    pub fn failed_ticks(&self) -> u64 {
        self.failed_ticks.load(Ordering::Relaxed)
    }

    /// Run the reconciliation loop until shutdown. Ticks never overlap: the
    /// next tick waits for the previous reconcile to finish.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_s = self.poll_interval.as_secs(),
            "order manager started"
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("order manager stopping");
                    return;
                }
                _ = ticker.tick() => {
                    match self.reconcile_once().await {
                        Ok(stats) => {
                            if stats.matched + stats.settled + stats.missing > 0 {
                                info!(
                                    matched = stats.matched,
                                    settled = stats.settled,
                                    missing = stats.missing,
                                    "reconciliation pass complete"
                                );
                            }
                        }
                        Err(e) => {
                            self.failed_ticks.fetch_add(1, Ordering::Relaxed);
                            warn!(error = %e, "reconciliation tick failed — retrying next interval");
                        }
                    }
                }
            }
        }
    }

    /// One reconciliation pass.
    pub async fn reconcile_once(&self) -> anyhow::Result<ReconcileStats> {
        let mut stats = ReconcileStats::default();

        let pending: Vec<Bet> = self
            .bets
            .pending()
            .await?
            .into_iter()
            .filter(|b| b.external_bet_id.is_some())
            .collect();

        if !pending.is_empty() {
            let mut markets: Vec<String> =
                pending.iter().map(|b| b.market_id.clone()).collect();
            markets.sort();
            markets.dedup();

            let orders = self.client.list_current_orders(markets).await?;
            let by_bet_id: HashMap<&str, &CurrentOrder> = orders
                .iter()
                .map(|order| (order.bet_id.as_str(), order))
                .collect();

            for mut bet in pending {
                let Some(external_id) = bet.external_bet_id.clone() else {
                    continue;
                };

                match by_bet_id.get(external_id.as_str()) {
                    Some(order) => {
                        if apply_current_order(&mut bet, order) {
                            self.bets.update(&bet).await?;
                            stats.matched += 1;
                            debug!(
                                bet_id = %bet.id,
                                external_id,
                                price = ?bet.matched_price,
                                "bet matched"
                            );
                        }
                    }
                    None => {
                        // Deliberately not mutated: a just-placed bet may not
                        // have appeared in the exchange's view yet.
                        stats.missing += 1;
                        warn!(
                            bet_id = %bet.id,
                            external_id,
                            market_id = %bet.market_id,
                            "pending bet absent from current orders"
                        );
                    }
                }
            }
        }

        stats.settled = settle_matched_bets(
            self.bets.as_ref(),
            self.races.as_ref(),
            self.results.as_ref(),
            self.commission_rate,
        )
        .await?;

        Ok(stats)
    }
}
