// =============================================================================
// Strategies — capability trait, constructor table, built-in steamer
// =============================================================================
//
// A strategy is any value satisfying the capability set {name, evaluate,
// should_bet, calculate_stake, parameters}. Variants register in a constant
// constructor table keyed by name; the orchestrator resolves stored strategy
// rows through it and treats unknown names as fatal at startup.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::risk::kelly_stake;
use crate::types::{BetSide, MarketType, OddsSnapshot, Race, Runner, StrategyRecord};

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Everything a strategy sees for one race at decision time. In live
/// trading `current_time` is now; in replay it is the race's scheduled
/// start.
pub struct StrategyContext<'a> {
    pub race: &'a Race,
    pub runners: &'a [Runner],
    pub odds_history: &'a [OddsSnapshot],
    pub current_time: DateTime<Utc>,
}

/// A proposed bet emitted by a strategy.
#[derive(Debug, Clone)]
pub struct Signal {
    pub race_id: Uuid,
    pub runner_id: Uuid,
    pub market_id: String,
    pub selection_id: i64,
    pub market_type: MarketType,
    pub side: BetSide,
    pub odds: f64,
    /// Estimated win probability for the named runner.
    pub confidence: f64,
    pub strategy_name: String,
}

#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// Evaluate one race and emit zero or more signals. Errors are
    /// per-strategy and non-fatal to the orchestrator tick.
    async fn evaluate(&self, ctx: &StrategyContext<'_>) -> Result<Vec<Signal>>;

    /// Final gate on an emitted signal.
    fn should_bet(&self, signal: &Signal) -> bool;

    /// Stake for a signal given the current bankroll; 0.0 means no bet.
    fn calculate_stake(&self, signal: &Signal, bankroll: f64) -> f64;

    /// The strategy's effective parameters as stored-row JSON.
    fn parameters(&self) -> serde_json::Value;
}

// ---------------------------------------------------------------------------
// Constructor table
// ---------------------------------------------------------------------------

type Constructor = fn(&serde_json::Value) -> Result<Arc<dyn Strategy>>;

/// Known strategy variants. Adding a variant is one row here.
const CONSTRUCTORS: &[(&str, Constructor)] = &[("steamer", build_steamer)];

/// Resolve a stored strategy row into a live strategy value.
pub fn build_strategy(record: &StrategyRecord) -> Result<Arc<dyn Strategy>> {
    for (name, construct) in CONSTRUCTORS {
        if *name == record.name {
            return construct(&record.parameters);
        }
    }
    bail!("unknown strategy '{}'", record.name);
}

fn build_steamer(parameters: &serde_json::Value) -> Result<Arc<dyn Strategy>> {
    let params: SteamerParams = serde_json::from_value(parameters.clone())
        .unwrap_or_default();
    Ok(Arc::new(SteamerStrategy::new(params)))
}

// ---------------------------------------------------------------------------
// Steamer strategy
// ---------------------------------------------------------------------------

/// Backs runners whose best-back price has shortened ("steamed") over the
/// pre-race odds history. A shortening price signals informed money; the
/// strategy takes the current price when the drift is large enough and the
/// odds are inside its band.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SteamerParams {
    /// Shortest current price the strategy will back.
    pub min_odds: f64,
    /// Longest current price the strategy will back.
    pub max_odds: f64,
    /// Minimum fractional shortening from the earliest observed price.
    pub min_drift: f64,
    /// Cap applied inside the strategy's own Kelly sizing.
    pub max_stake: f64,
}

impl Default for SteamerParams {
    fn default() -> Self {
        Self {
            min_odds: 1.5,
            max_odds: 10.0,
            min_drift: 0.10,
            max_stake: 100.0,
        }
    }
}

pub struct SteamerStrategy {
    params: SteamerParams,
}

impl SteamerStrategy {
    pub fn new(params: SteamerParams) -> Self {
        Self { params }
    }

    /// Fractional price shortening between the earliest and latest back
    /// prices, per runner. Positive means the price came in.
    fn drift(history: &[OddsSnapshot], runner_id: Uuid) -> Option<(f64, f64)> {
        let mut earliest: Option<f64> = None;
        let mut latest: Option<f64> = None;

        for snapshot in history.iter().filter(|s| s.runner_id == runner_id) {
            if let Some(price) = snapshot.back_price {
                if earliest.is_none() {
                    earliest = Some(price);
                }
                latest = Some(price);
            }
        }

        let (first, last) = (earliest?, latest?);
        if first <= 1.0 {
            return None;
        }
        Some(((first - last) / first, last))
    }
}

#[async_trait]
impl Strategy for SteamerStrategy {
    fn name(&self) -> &str {
        "steamer"
    }

    async fn evaluate(&self, ctx: &StrategyContext<'_>) -> Result<Vec<Signal>> {
        let Some(market_id) = ctx.race.market_id() else {
            // No exchange market attached; nothing to bet into.
            return Ok(Vec::new());
        };

        let mut signals = Vec::new();

        for runner in ctx.runners {
            let Some((drift, current_odds)) = Self::drift(ctx.odds_history, runner.id) else {
                continue;
            };

            if drift < self.params.min_drift {
                continue;
            }
            if current_odds < self.params.min_odds || current_odds > self.params.max_odds {
                continue;
            }

            let implied = 1.0 / current_odds;
            let confidence = (implied * (1.0 + drift)).min(0.95);

            debug!(
                race_id = %ctx.race.id,
                runner = %runner.name,
                drift,
                current_odds,
                confidence,
                "steamer signal"
            );

            signals.push(Signal {
                race_id: ctx.race.id,
                runner_id: runner.id,
                market_id: market_id.to_string(),
                selection_id: runner.selection_id().unwrap_or(i64::from(runner.trap_number)),
                market_type: MarketType::Win,
                side: BetSide::Back,
                odds: current_odds,
                confidence,
                strategy_name: self.name().to_string(),
            });
        }

        Ok(signals)
    }

    fn should_bet(&self, signal: &Signal) -> bool {
        // Only bet when the estimated probability beats the implied one.
        signal.confidence > 1.0 / signal.odds
    }

    fn calculate_stake(&self, signal: &Signal, bankroll: f64) -> f64 {
        kelly_stake(signal.odds, bankroll, signal.confidence, self.params.max_stake)
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::to_value(&self.params).unwrap_or(serde_json::Value::Null)
    }
}

// ---------------------------------------------------------------------------
// Strategy set helper
// ---------------------------------------------------------------------------

/// Build the active-strategy map from stored rows. Any unknown name fails
/// the whole build — a typo'd row should stop startup, not silently drop.
pub fn build_strategy_map(
    records: &[StrategyRecord],
) -> Result<HashMap<String, Arc<dyn Strategy>>> {
    let mut map = HashMap::new();
    for record in records {
        let strategy = build_strategy(record)?;
        map.insert(record.name.clone(), strategy);
    }
    Ok(map)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn race_with_market() -> Race {
        Race {
            id: Uuid::new_v4(),
            scheduled_start: Utc::now() + Duration::minutes(10),
            actual_start: None,
            track: "Monmore".to_string(),
            race_type: "flat".to_string(),
            distance_m: Some(480),
            grade: Some("A3".to_string()),
            conditions: serde_json::json!({ "market_id": "1.23456789" }),
            status: crate::types::RaceStatus::Scheduled,
        }
    }

    fn runner_for(race: &Race, trap: i32) -> Runner {
        Runner {
            id: Uuid::new_v4(),
            race_id: race.id,
            trap_number: trap,
            name: format!("Trap {trap}"),
            form_rating: None,
            weight_kg: None,
            trainer: None,
            metadata: serde_json::json!({ "selection_id": 1000 + i64::from(trap) }),
        }
    }

    fn snapshot(race: &Race, runner: &Runner, minutes_ago: i64, back: f64) -> OddsSnapshot {
        OddsSnapshot {
            time: Utc::now() - Duration::minutes(minutes_ago),
            race_id: race.id,
            runner_id: runner.id,
            back_price: Some(back),
            back_size: Some(100.0),
            lay_price: Some(back + 0.1),
            lay_size: Some(80.0),
            last_traded_price: Some(back),
            total_matched: Some(1000.0),
        }
    }

    #[tokio::test]
    async fn steamer_backs_a_shortening_price() {
        let race = race_with_market();
        let runner = runner_for(&race, 1);
        let runners = vec![runner.clone()];
        // 4.0 -> 3.0 is a 25% drift.
        let history = vec![
            snapshot(&race, &runner, 60, 4.0),
            snapshot(&race, &runner, 30, 3.5),
            snapshot(&race, &runner, 5, 3.0),
        ];

        let strategy = SteamerStrategy::new(SteamerParams::default());
        let ctx = StrategyContext {
            race: &race,
            runners: &runners,
            odds_history: &history,
            current_time: Utc::now(),
        };

        let signals = strategy.evaluate(&ctx).await.unwrap();
        assert_eq!(signals.len(), 1);
        let signal = &signals[0];
        assert_eq!(signal.side, BetSide::Back);
        assert!((signal.odds - 3.0).abs() < 1e-9);
        assert_eq!(signal.selection_id, 1001);
        assert!(strategy.should_bet(signal));
        assert!(strategy.calculate_stake(signal, 1000.0) > 0.0);
    }

    #[tokio::test]
    async fn steamer_ignores_stable_and_drifting_prices() {
        let race = race_with_market();
        let stable = runner_for(&race, 1);
        let drifter = runner_for(&race, 2);
        let runners = vec![stable.clone(), drifter.clone()];
        let history = vec![
            snapshot(&race, &stable, 60, 3.0),
            snapshot(&race, &stable, 5, 2.95),
            // Price lengthening — the opposite of a steamer.
            snapshot(&race, &drifter, 60, 3.0),
            snapshot(&race, &drifter, 5, 4.5),
        ];

        let strategy = SteamerStrategy::new(SteamerParams::default());
        let ctx = StrategyContext {
            race: &race,
            runners: &runners,
            odds_history: &history,
            current_time: Utc::now(),
        };

        assert!(strategy.evaluate(&ctx).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn steamer_skips_races_without_a_market() {
        let mut race = race_with_market();
        race.conditions = serde_json::Value::Null;
        let runner = runner_for(&race, 1);
        let runners = vec![runner.clone()];
        let history = vec![
            snapshot(&race, &runner, 60, 4.0),
            snapshot(&race, &runner, 5, 3.0),
        ];

        let strategy = SteamerStrategy::new(SteamerParams::default());
        let ctx = StrategyContext {
            race: &race,
            runners: &runners,
            odds_history: &history,
            current_time: Utc::now(),
        };

        assert!(strategy.evaluate(&ctx).await.unwrap().is_empty());
    }

    #[test]
    fn constructor_table_resolves_known_names() {
        let record = StrategyRecord {
            id: Uuid::new_v4(),
            name: "steamer".to_string(),
            description: None,
            parameters: serde_json::json!({ "min_drift": 0.2 }),
            active: true,
        };
        let strategy = build_strategy(&record).unwrap();
        assert_eq!(strategy.name(), "steamer");
        assert_eq!(strategy.parameters()["min_drift"], 0.2);
    }

    #[test]
    fn unknown_strategy_names_fail_the_build() {
        let record = StrategyRecord {
            id: Uuid::new_v4(),
            name: "definitely-not-registered".to_string(),
            description: None,
            parameters: serde_json::Value::Null,
            active: true,
        };
        assert!(build_strategy(&record).is_err());

        let records = vec![record];
        assert!(build_strategy_map(&records).is_err());
    }
}
