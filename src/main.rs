// =============================================================================
// Paddock Engine — Main Entry Point
// =============================================================================
//
// Wiring order matters for the live-trading gates: the exchange client is
// only constructed when live trading is enabled, and the order manager only
// starts in live mode. The engine therefore cannot reach the exchange at
// all in paper mode.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod backtest;
mod betting;
mod breaker;
mod config;
mod db;
mod error;
mod exchange;
mod executor;
mod monitor;
mod orchestrator;
mod risk;
mod settlement;
mod strategy;
#[cfg(test)]
mod testutil;
mod types;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Context;
use chrono::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::betting::{BettingService, OrderManager};
use crate::breaker::CircuitBreaker;
use crate::config::Config;
use crate::db::{
    PgBacktestRepository, PgBetRepository, PgOddsRepository, PgRaceRepository,
    PgResultRepository, PgStrategyRepository, RaceRepository,
};
use crate::exchange::{ExchangeClient, SelectionMap, StreamCollector};
use crate::executor::Executor;
use crate::monitor::Monitor;
use crate::orchestrator::Orchestrator;
use crate::risk::RiskManager;

/// Session tokens installed from the environment are assumed valid this
/// long; the external login flow refreshes them.
const SESSION_TTL_HOURS: i64 = 8;

/// Order-manager reconciliation cadence.
const ORDER_POLL_INTERVAL: StdDuration = StdDuration::from_secs(10);

/// Breaker failure-density window and threshold.
const FAILURE_WINDOW_MINUTES: i64 = 5;
const MAX_FAILURES_IN_WINDOW: u32 = 10;

/// Cooldown before an open breaker half-opens.
const BREAKER_COOLDOWN_MINUTES: i64 = 30;

/// Conflation requested from the market stream.
const STREAM_CONFLATE_MS: u64 = 500;

/// Exchange minimum stake; also the risk manager's dust floor.
const MIN_STAKE: f64 = 2.0;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path =
        std::env::var("PADDOCK_CONFIG").unwrap_or_else(|_| "paddock_config.json".into());
    let config = Config::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        Config::default()
    });
    config.validate().context("invalid configuration")?;

    info!(
        paper = config.features.paper_trading_enabled,
        live = config.features.live_trading_enabled,
        "Paddock engine starting"
    );

    // ── 2. Database ──────────────────────────────────────────────────────
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
    let pool = db::connect(&database_url).await?;

    let races: Arc<dyn db::RaceRepository> = Arc::new(PgRaceRepository::new(pool.clone()));
    let odds: Arc<dyn db::OddsRepository> = Arc::new(PgOddsRepository::new(pool.clone()));
    let results: Arc<dyn db::ResultRepository> = Arc::new(PgResultRepository::new(pool.clone()));
    let bets: Arc<dyn db::BetRepository> = Arc::new(PgBetRepository::new(pool.clone()));
    let strategies: Arc<dyn db::StrategyRepository> =
        Arc::new(PgStrategyRepository::new(pool.clone()));
    let backtests: Arc<dyn db::BacktestRepository> =
        Arc::new(PgBacktestRepository::new(pool.clone()));

    // ── 3. Exchange client (initialisation gate: live only) ──────────────
    let app_key = std::env::var("EXCHANGE_APP_KEY").unwrap_or_default();
    let exchange_client = if config.features.live_trading_enabled {
        let endpoint = std::env::var("EXCHANGE_RPC_URL")
            .context("EXCHANGE_RPC_URL is required for live trading")?;
        let client = Arc::new(ExchangeClient::new(endpoint, &app_key));
        if let Ok(token) = std::env::var("EXCHANGE_SESSION_TOKEN") {
            client.set_session(token, Duration::hours(SESSION_TTL_HOURS));
        }
        Some(client)
    } else {
        info!("live trading disabled — exchange client not constructed");
        None
    };

    // ── 4. Risk, breaker, executor ───────────────────────────────────────
    let risk = Arc::new(RiskManager::new(
        bets.clone(),
        config.trading.max_stake_per_bet,
        config.trading.max_exposure,
        config.trading.max_daily_loss,
    ));

    let circuit_breaker = Arc::new(CircuitBreaker::new(
        config.bot.max_consecutive_losses,
        config.bot.max_drawdown_percent / 100.0,
        MAX_FAILURES_IN_WINDOW,
        Duration::minutes(FAILURE_WINDOW_MINUTES),
        Duration::minutes(BREAKER_COOLDOWN_MINUTES),
    ));

    let betting_service = exchange_client.as_ref().map(|client| {
        Arc::new(BettingService::new(
            client.clone(),
            MIN_STAKE,
            config.trading.max_stake_per_bet,
        ))
    });

    let executor = Arc::new(Executor::new(
        bets.clone(),
        risk.clone(),
        betting_service,
        config.features.live_trading_enabled,
        config.backtest.initial_bankroll,
    ));

    // ── 5. Orchestrator & strategies ─────────────────────────────────────
    let orchestrator = Arc::new(Orchestrator::new(
        races.clone(),
        odds.clone(),
        strategies.clone(),
        risk.clone(),
        executor,
        circuit_breaker.clone(),
        StdDuration::from_secs(config.trading.strategy_evaluation_interval_s),
        Duration::seconds(config.trading.min_time_to_start_s),
        Duration::minutes(config.trading.pre_race_window_min),
        config.features.ml_predictions_enabled,
    ));
    orchestrator
        .refresh_strategies()
        .await
        .context("failed to load active strategies")?;

    if config.trading.emergency_shutdown_enabled {
        let stop_target = orchestrator.clone();
        circuit_breaker.register_shutdown(Box::new(move |reason| {
            error!(reason, "emergency shutdown — stopping orchestrator");
            stop_target.stop();
            Ok(())
        }));
    }

    // ── 6. Root shutdown channel ─────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── 7. Stream collector ──────────────────────────────────────────────
    let (market_ids, selections) = subscription_set(races.as_ref(), &config).await?;
    let collector = Arc::new(StreamCollector::new(odds.clone(), selections));
    if market_ids.is_empty() {
        warn!("no upcoming markets to stream — collector idle");
    } else if let Ok(stream_url) = std::env::var("EXCHANGE_STREAM_URL") {
        let collector_task = collector.clone();
        let stream_shutdown = shutdown_rx.clone();
        let session_token = std::env::var("EXCHANGE_SESSION_TOKEN").unwrap_or_default();
        let stream_app_key = app_key.clone();
        tokio::spawn(async move {
            if let Err(e) = collector_task
                .run(
                    &stream_url,
                    &session_token,
                    &stream_app_key,
                    &market_ids,
                    STREAM_CONFLATE_MS,
                    stream_shutdown,
                )
                .await
            {
                error!(error = %e, "stream collector exited with error");
            }
        });
        info!("stream collector launched");
    } else {
        warn!("EXCHANGE_STREAM_URL not set — odds collection disabled");
    }

    // ── 8. Order manager (orchestration gate: live only) ─────────────────
    if let Some(client) = exchange_client.clone() {
        let order_manager = OrderManager::new(
            client,
            bets.clone(),
            races.clone(),
            results.clone(),
            config.backtest.commission_rate,
            ORDER_POLL_INTERVAL,
        );
        let om_shutdown = shutdown_rx.clone();
        tokio::spawn(async move { order_manager.run(om_shutdown).await });
        info!("order manager launched");
    }

    // ── 9. Monitor ───────────────────────────────────────────────────────
    let monitor = Monitor::new(
        bets,
        races,
        results,
        strategies,
        backtests,
        circuit_breaker,
        config.backtest.initial_bankroll,
        config.backtest.commission_rate,
        StdDuration::from_secs(config.bot.performance_update_interval_s),
    );
    let monitor_shutdown = shutdown_rx.clone();
    tokio::spawn(async move { monitor.run(monitor_shutdown).await });

    // ── 10. Orchestrator loop ────────────────────────────────────────────
    let orchestrator_task = orchestrator.clone();
    let orchestrator_shutdown = shutdown_rx.clone();
    let orchestrator_handle =
        tokio::spawn(async move { orchestrator_task.run(orchestrator_shutdown).await });

    info!("all subsystems running — press Ctrl+C to stop");

    // ── 11. Graceful shutdown ────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping gracefully");

    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(StdDuration::from_secs(10), orchestrator_handle).await;

    info!("Paddock engine shut down complete");
    Ok(())
}

/// Build the stream subscription set from races inside the pre-race window:
/// their market ids plus the selection-id map for snapshot conversion.
async fn subscription_set(
    races: &dyn RaceRepository,
    config: &Config,
) -> anyhow::Result<(Vec<String>, SelectionMap)> {
    let now = chrono::Utc::now();
    let upcoming = races
        .upcoming(now, now + Duration::minutes(config.trading.pre_race_window_min))
        .await?;

    let mut market_ids = Vec::new();
    let mut selections = SelectionMap::new();

    for race in &upcoming {
        let Some(market_id) = race.market_id() else {
            continue;
        };
        market_ids.push(market_id.to_string());

        for runner in races.runners(race.id).await? {
            if let Some(selection_id) = runner.selection_id() {
                selections.insert(selection_id, (race.id, runner.id));
            }
        }
    }

    info!(
        markets = market_ids.len(),
        selections = selections.len(),
        "stream subscription set built"
    );
    Ok((market_ids, selections))
}
