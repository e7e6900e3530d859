// =============================================================================
// Shared domain types used across the Paddock betting engine
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Races & runners
// ---------------------------------------------------------------------------

/// Lifecycle status of a race.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaceStatus {
    Scheduled,
    Running,
    Completed,
    Abandoned,
}

impl Default for RaceStatus {
    fn default() -> Self {
        Self::Scheduled
    }
}

impl std::fmt::Display for RaceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scheduled => write!(f, "scheduled"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Abandoned => write!(f, "abandoned"),
        }
    }
}

impl std::str::FromStr for RaceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "abandoned" => Ok(Self::Abandoned),
            other => Err(format!("unknown race status '{other}'")),
        }
    }
}

/// A single race card entry. Created by ingestion, mutated to `Completed`
/// when a result arrives, immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Race {
    pub id: Uuid,
    pub scheduled_start: DateTime<Utc>,
    #[serde(default)]
    pub actual_start: Option<DateTime<Utc>>,
    pub track: String,
    pub race_type: String,
    #[serde(default)]
    pub distance_m: Option<i32>,
    #[serde(default)]
    pub grade: Option<String>,
    /// Opaque conditions blob (going, weather, exchange market id, ...).
    #[serde(default)]
    pub conditions: serde_json::Value,
    #[serde(default)]
    pub status: RaceStatus,
}

impl Race {
    /// Exchange market id carried inside the conditions blob, when the race
    /// has been matched to a market by ingestion.
    pub fn market_id(&self) -> Option<&str> {
        self.conditions.get("market_id").and_then(|v| v.as_str())
    }
}

/// A runner in a race. Unique under `(race_id, trap_number)`; immutable once
/// the race is completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runner {
    pub id: Uuid,
    pub race_id: Uuid,
    pub trap_number: i32,
    pub name: String,
    #[serde(default)]
    pub form_rating: Option<f64>,
    #[serde(default)]
    pub weight_kg: Option<f64>,
    #[serde(default)]
    pub trainer: Option<String>,
    /// Opaque metadata blob; carries the exchange's selection id.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Runner {
    /// Exchange selection id from the metadata blob.
    pub fn selection_id(&self) -> Option<i64> {
        self.metadata.get("selection_id").and_then(|v| v.as_i64())
    }
}

// ---------------------------------------------------------------------------
// Odds time series
// ---------------------------------------------------------------------------

/// A single point in the odds time series. Append-only — never updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OddsSnapshot {
    pub time: DateTime<Utc>,
    pub race_id: Uuid,
    pub runner_id: Uuid,
    #[serde(default)]
    pub back_price: Option<f64>,
    #[serde(default)]
    pub back_size: Option<f64>,
    #[serde(default)]
    pub lay_price: Option<f64>,
    #[serde(default)]
    pub lay_size: Option<f64>,
    #[serde(default)]
    pub last_traded_price: Option<f64>,
    #[serde(default)]
    pub total_matched: Option<f64>,
}

// ---------------------------------------------------------------------------
// Bets
// ---------------------------------------------------------------------------

/// Which side of the market a bet takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetSide {
    Back,
    Lay,
}

impl std::fmt::Display for BetSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Back => write!(f, "back"),
            Self::Lay => write!(f, "lay"),
        }
    }
}

impl std::str::FromStr for BetSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "back" => Ok(Self::Back),
            "lay" => Ok(Self::Lay),
            other => Err(format!("unknown bet side '{other}'")),
        }
    }
}

/// Win or place market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketType {
    Win,
    Place,
}

impl std::fmt::Display for MarketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Win => write!(f, "win"),
            Self::Place => write!(f, "place"),
        }
    }
}

impl std::str::FromStr for MarketType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "win" => Ok(Self::Win),
            "place" => Ok(Self::Place),
            other => Err(format!("unknown market type '{other}'")),
        }
    }
}

/// Bet lifecycle:
///
/// ```text
/// pending ──► matched ──► settled
///    │           │          ▲
///    └─► cancelled          └─ (on race result)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetStatus {
    Pending,
    Matched,
    Settled,
    Cancelled,
}

impl BetStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Settled | Self::Cancelled)
    }
}

impl std::fmt::Display for BetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Matched => write!(f, "matched"),
            Self::Settled => write!(f, "settled"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for BetStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "matched" => Ok(Self::Matched),
            "settled" => Ok(Self::Settled),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown bet status '{other}'")),
        }
    }
}

/// A bet placed (or simulated) by the engine. Created by the executor,
/// mutated by the order manager and settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bet {
    pub id: Uuid,
    /// Exchange bet id — `None` for paper and backtest bets.
    #[serde(default)]
    pub external_bet_id: Option<String>,
    pub market_id: String,
    pub race_id: Uuid,
    pub runner_id: Uuid,
    pub strategy_name: String,
    pub market_type: MarketType,
    pub side: BetSide,
    pub requested_odds: f64,
    pub stake: f64,
    #[serde(default)]
    pub matched_price: Option<f64>,
    #[serde(default)]
    pub matched_size: Option<f64>,
    pub status: BetStatus,
    pub placed_at: DateTime<Utc>,
    #[serde(default)]
    pub matched_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub settled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub profit_loss: Option<f64>,
    #[serde(default)]
    pub commission: Option<f64>,
}

impl Bet {
    /// Build a fresh pending bet at `placed_at = now`.
    #[allow(clippy::too_many_arguments)]
    pub fn new_pending(
        market_id: impl Into<String>,
        race_id: Uuid,
        runner_id: Uuid,
        strategy_name: impl Into<String>,
        market_type: MarketType,
        side: BetSide,
        requested_odds: f64,
        stake: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            external_bet_id: None,
            market_id: market_id.into(),
            race_id,
            runner_id,
            strategy_name: strategy_name.into(),
            market_type,
            side,
            requested_odds,
            stake,
            matched_price: None,
            matched_size: None,
            status: BetStatus::Pending,
            placed_at: Utc::now(),
            matched_at: None,
            settled_at: None,
            cancelled_at: None,
            profit_loss: None,
            commission: None,
        }
    }

    /// Odds the bet was effectively struck at: matched price when the
    /// exchange reported one, otherwise the requested odds.
    pub fn effective_odds(&self) -> f64 {
        self.matched_price.unwrap_or(self.requested_odds)
    }
}

// ---------------------------------------------------------------------------
// Race results
// ---------------------------------------------------------------------------

/// Outcome of a race. One logical result per race; append-only after the
/// first write except for late-arriving corrections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceResult {
    pub race_id: Uuid,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub winner_trap: Option<i32>,
    /// Positions blob keyed by trap number: `{"1": 3, "2": 1, ...}`.
    #[serde(default)]
    pub positions: serde_json::Value,
    pub status: String,
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// A strategy row as stored. The orchestrator treats only active rows as
/// candidates and resolves `name` through the constructor table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyRecord {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: serde_json::Value,
    pub active: bool,
}

// ---------------------------------------------------------------------------
// Backtest output
// ---------------------------------------------------------------------------

/// Persisted, append-only record of a completed backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestRecord {
    pub id: Uuid,
    pub strategy_name: String,
    pub run_at: DateTime<Utc>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub initial_capital: f64,
    pub final_capital: f64,
    pub total_return: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub profit_factor: f64,
    pub win_rate: f64,
    pub method: String,
    pub composite_score: f64,
    pub recommendation: String,
    #[serde(default)]
    pub ml_features: serde_json::Value,
    #[serde(default)]
    pub full_results: serde_json::Value,
    #[serde(default)]
    pub processed: bool,
}

// ---------------------------------------------------------------------------
// Strategy performance rollup
// ---------------------------------------------------------------------------

/// Monthly per-strategy performance aggregate maintained by the monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyPerformance {
    pub strategy_name: String,
    /// First instant of the month this row aggregates.
    pub period_start: DateTime<Utc>,
    pub total_bets: i64,
    pub settled_bets: i64,
    pub winning_bets: i64,
    pub total_staked: f64,
    pub total_profit_loss: f64,
    pub win_rate: f64,
    pub roi: f64,
    pub average_stake: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bet_status_terminality() {
        assert!(!BetStatus::Pending.is_terminal());
        assert!(!BetStatus::Matched.is_terminal());
        assert!(BetStatus::Settled.is_terminal());
        assert!(BetStatus::Cancelled.is_terminal());
    }

    #[test]
    fn new_pending_bet_has_no_settlement_fields() {
        let bet = Bet::new_pending(
            "1.234",
            Uuid::new_v4(),
            Uuid::new_v4(),
            "steamer",
            MarketType::Win,
            BetSide::Back,
            3.5,
            10.0,
        );
        assert_eq!(bet.status, BetStatus::Pending);
        assert!(bet.external_bet_id.is_none());
        assert!(bet.profit_loss.is_none());
        assert!(bet.commission.is_none());
        assert!((bet.effective_odds() - 3.5).abs() < f64::EPSILON);
    }

    #[test]
    fn effective_odds_prefers_matched_price() {
        let mut bet = Bet::new_pending(
            "1.234",
            Uuid::new_v4(),
            Uuid::new_v4(),
            "steamer",
            MarketType::Win,
            BetSide::Lay,
            4.0,
            25.0,
        );
        bet.matched_price = Some(3.8);
        assert!((bet.effective_odds() - 3.8).abs() < f64::EPSILON);
    }

    #[test]
    fn runner_selection_id_round_trip() {
        let runner = Runner {
            id: Uuid::new_v4(),
            race_id: Uuid::new_v4(),
            trap_number: 3,
            name: "Swift Arrow".to_string(),
            form_rating: Some(72.0),
            weight_kg: Some(31.4),
            trainer: None,
            metadata: serde_json::json!({ "selection_id": 47112233 }),
        };
        assert_eq!(runner.selection_id(), Some(47112233));
    }

    #[test]
    fn race_market_id_from_conditions() {
        let race = Race {
            id: Uuid::new_v4(),
            scheduled_start: Utc::now(),
            actual_start: None,
            track: "Monmore".to_string(),
            race_type: "flat".to_string(),
            distance_m: Some(480),
            grade: Some("A3".to_string()),
            conditions: serde_json::json!({ "market_id": "1.23456789" }),
            status: RaceStatus::Scheduled,
        };
        assert_eq!(race.market_id(), Some("1.23456789"));
    }
}
