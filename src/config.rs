// =============================================================================
// Engine configuration — recognised options with serde defaults
// =============================================================================
//
// Every field carries `#[serde(default)]` so that adding new fields never
// breaks loading an older config file. Validation runs once at startup and
// is fatal on failure; in particular a config where neither paper nor live
// trading is enabled is rejected outright.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_max_stake_per_bet() -> f64 {
    100.0
}

fn default_max_exposure() -> f64 {
    500.0
}

fn default_max_daily_loss() -> f64 {
    200.0
}

fn default_strategy_evaluation_interval_s() -> u64 {
    60
}

fn default_pre_race_window_min() -> i64 {
    30
}

fn default_min_time_to_start_s() -> i64 {
    120
}

fn default_true() -> bool {
    true
}

fn default_max_consecutive_losses() -> u32 {
    5
}

fn default_max_drawdown_percent() -> f64 {
    20.0
}

fn default_performance_update_interval_s() -> u64 {
    300
}

fn default_initial_bankroll() -> f64 {
    1000.0
}

fn default_commission_rate() -> f64 {
    0.05
}

fn default_min_liquidity() -> f64 {
    10.0
}

fn default_monte_carlo_iterations() -> u32 {
    1000
}

fn default_risk_free_rate() -> f64 {
    0.02
}

fn default_output_path() -> String {
    "backtest_results".to_string()
}

fn default_training_days() -> i64 {
    90
}

fn default_validation_days() -> i64 {
    30
}

fn default_test_days() -> i64 {
    30
}

fn default_step_days() -> i64 {
    30
}

fn default_min_trades_per_window() -> usize {
    10
}

fn default_score_weight_historical() -> f64 {
    0.4
}

fn default_score_weight_monte_carlo() -> f64 {
    0.3
}

fn default_score_weight_walk_forward() -> f64 {
    0.3
}

// =============================================================================
// Sections
// =============================================================================

/// Live-trading limits and loop timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    #[serde(default = "default_max_stake_per_bet")]
    pub max_stake_per_bet: f64,

    /// Maximum total stake across all non-terminal bets.
    #[serde(default = "default_max_exposure")]
    pub max_exposure: f64,

    /// Maximum realised loss per UTC day before trading halts.
    #[serde(default = "default_max_daily_loss")]
    pub max_daily_loss: f64,

    #[serde(default = "default_strategy_evaluation_interval_s")]
    pub strategy_evaluation_interval_s: u64,

    /// Races are considered up to this many minutes before their start.
    #[serde(default = "default_pre_race_window_min")]
    pub pre_race_window_min: i64,

    /// Races closer to the off than this are left alone.
    #[serde(default = "default_min_time_to_start_s")]
    pub min_time_to_start_s: i64,

    #[serde(default = "default_true")]
    pub emergency_shutdown_enabled: bool,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            max_stake_per_bet: default_max_stake_per_bet(),
            max_exposure: default_max_exposure(),
            max_daily_loss: default_max_daily_loss(),
            strategy_evaluation_interval_s: default_strategy_evaluation_interval_s(),
            pre_race_window_min: default_pre_race_window_min(),
            min_time_to_start_s: default_min_time_to_start_s(),
            emergency_shutdown_enabled: true,
        }
    }
}

/// Circuit breaker and monitor cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: u32,

    /// Peak-to-current drawdown that trips the breaker, in percent.
    #[serde(default = "default_max_drawdown_percent")]
    pub max_drawdown_percent: f64,

    #[serde(default = "default_performance_update_interval_s")]
    pub performance_update_interval_s: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            max_consecutive_losses: default_max_consecutive_losses(),
            max_drawdown_percent: default_max_drawdown_percent(),
            performance_update_interval_s: default_performance_update_interval_s(),
        }
    }
}

/// Feature gates. Live trading stays off unless explicitly enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_true")]
    pub paper_trading_enabled: bool,

    #[serde(default)]
    pub live_trading_enabled: bool,

    #[serde(default)]
    pub ml_predictions_enabled: bool,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            paper_trading_enabled: true,
            live_trading_enabled: false,
            ml_predictions_enabled: false,
        }
    }
}

/// Walk-forward window lengths, all in whole days.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardConfig {
    #[serde(default = "default_training_days")]
    pub training_days: i64,

    #[serde(default = "default_validation_days")]
    pub validation_days: i64,

    #[serde(default = "default_test_days")]
    pub test_days: i64,

    #[serde(default = "default_step_days")]
    pub step_days: i64,

    /// A window is admitted only if every sub-range produced at least this
    /// many bets.
    #[serde(default = "default_min_trades_per_window")]
    pub min_trades_per_window: usize,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self {
            training_days: default_training_days(),
            validation_days: default_validation_days(),
            test_days: default_test_days(),
            step_days: default_step_days(),
            min_trades_per_window: default_min_trades_per_window(),
        }
    }
}

/// Weights for blending historical / Monte-Carlo / walk-forward scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreWeights {
    #[serde(default = "default_score_weight_historical")]
    pub historical: f64,

    #[serde(default = "default_score_weight_monte_carlo")]
    pub monte_carlo: f64,

    #[serde(default = "default_score_weight_walk_forward")]
    pub walk_forward: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            historical: default_score_weight_historical(),
            monte_carlo: default_score_weight_monte_carlo(),
            walk_forward: default_score_weight_walk_forward(),
        }
    }
}

/// Backtest window and simulation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// ISO-8601 date, parsed at UTC midnight.
    #[serde(default)]
    pub start_date: Option<String>,

    /// ISO-8601 date, parsed at UTC midnight.
    #[serde(default)]
    pub end_date: Option<String>,

    #[serde(default = "default_initial_bankroll")]
    pub initial_bankroll: f64,

    /// Proportion of positive PnL retained by the exchange.
    #[serde(default = "default_commission_rate")]
    pub commission_rate: f64,

    /// Adverse 0.01-unit price adjustments applied per simulated execution.
    #[serde(default)]
    pub slippage_ticks: u32,

    /// Minimum available size on the taken side for a simulated bet.
    #[serde(default = "default_min_liquidity")]
    pub min_liquidity: f64,

    #[serde(default = "default_monte_carlo_iterations")]
    pub monte_carlo_iterations: u32,

    /// RNG seed for Monte-Carlo sampling. Unset means the nanosecond clock.
    #[serde(default)]
    pub monte_carlo_seed: Option<u64>,

    #[serde(default)]
    pub walk_forward_windows: WalkForwardConfig,

    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,

    #[serde(default = "default_output_path")]
    pub output_path: String,

    #[serde(default)]
    pub ml_export_enabled: bool,

    #[serde(default)]
    pub score_weights: ScoreWeights,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            start_date: None,
            end_date: None,
            initial_bankroll: default_initial_bankroll(),
            commission_rate: default_commission_rate(),
            slippage_ticks: 0,
            min_liquidity: default_min_liquidity(),
            monte_carlo_iterations: default_monte_carlo_iterations(),
            monte_carlo_seed: None,
            walk_forward_windows: WalkForwardConfig::default(),
            risk_free_rate: default_risk_free_rate(),
            output_path: default_output_path(),
            ml_export_enabled: false,
            score_weights: ScoreWeights::default(),
        }
    }
}

// =============================================================================
// Top-level config
// =============================================================================

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub trading: TradingConfig,

    #[serde(default)]
    pub bot: BotConfig,

    #[serde(default)]
    pub features: FeaturesConfig,

    #[serde(default)]
    pub backtest: BacktestConfig,
}

impl Config {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(
            path = %path.display(),
            paper = config.features.paper_trading_enabled,
            live = config.features.live_trading_enabled,
            "config loaded"
        );

        Ok(config)
    }

    /// Validate the configuration. Called once at startup; any error here is
    /// fatal (non-zero exit).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.features.paper_trading_enabled && !self.features.live_trading_enabled {
            return Err(ConfigError::NoTradingMode);
        }
        if self.trading.max_stake_per_bet <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "trading.max_stake_per_bet",
                reason: "must be positive".to_string(),
            });
        }
        if self.trading.max_exposure <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "trading.max_exposure",
                reason: "must be positive".to_string(),
            });
        }
        if self.trading.strategy_evaluation_interval_s == 0 {
            return Err(ConfigError::InvalidValue {
                field: "trading.strategy_evaluation_interval_s",
                reason: "must be at least 1 second".to_string(),
            });
        }
        if !(0.0..1.0).contains(&self.backtest.commission_rate) {
            return Err(ConfigError::InvalidValue {
                field: "backtest.commission_rate",
                reason: "must be in [0, 1)".to_string(),
            });
        }
        if self.bot.max_drawdown_percent <= 0.0 || self.bot.max_drawdown_percent > 100.0 {
            return Err(ConfigError::InvalidValue {
                field: "bot.max_drawdown_percent",
                reason: "must be in (0, 100]".to_string(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Date parsing
// ---------------------------------------------------------------------------

/// Parse an ISO-8601 `YYYY-MM-DD` boundary as UTC midnight.
pub fn parse_utc_date(s: &str) -> Result<DateTime<Utc>, ConfigError> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| ConfigError::InvalidValue {
        field: "date",
        reason: format!("'{s}' is not a YYYY-MM-DD date: {e}"),
    })?;
    let midnight = date.and_hms_opt(0, 0, 0).expect("midnight is always valid");
    Ok(DateTime::from_naive_utc_and_offset(midnight, Utc))
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert!(cfg.features.paper_trading_enabled);
        assert!(!cfg.features.live_trading_enabled);
        assert!((cfg.trading.max_stake_per_bet - 100.0).abs() < f64::EPSILON);
        assert_eq!(cfg.backtest.monte_carlo_iterations, 1000);
    }

    #[test]
    fn rejects_config_with_no_trading_mode() {
        let mut cfg = Config::default();
        cfg.features.paper_trading_enabled = false;
        cfg.features.live_trading_enabled = false;
        assert!(matches!(cfg.validate(), Err(ConfigError::NoTradingMode)));
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert!(cfg.features.paper_trading_enabled);
        assert_eq!(cfg.bot.max_consecutive_losses, 5);
        assert_eq!(cfg.backtest.walk_forward_windows.training_days, 90);
        assert!((cfg.backtest.commission_rate - 0.05).abs() < f64::EPSILON);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{
            "trading": { "max_stake_per_bet": 50.0 },
            "features": { "live_trading_enabled": true }
        }"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert!((cfg.trading.max_stake_per_bet - 50.0).abs() < f64::EPSILON);
        assert!(cfg.features.live_trading_enabled);
        assert!((cfg.trading.max_exposure - 500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_bad_commission_rate() {
        let mut cfg = Config::default();
        cfg.backtest.commission_rate = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_iso_date_at_utc_midnight() {
        let dt = parse_utc_date("2024-03-01").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-03-01T00:00:00+00:00");
        assert!(parse_utc_date("01/03/2024").is_err());
    }
}
