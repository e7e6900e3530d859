// =============================================================================
// Stream Collector — market subscription to buffered odds persistence
// =============================================================================
//
// Subscribes to market-change messages over the exchange's persistent
// channel and converts every runner change into an odds snapshot stamped
// now(UTC). Snapshots buffer in memory behind a mutex and flush:
//   - when the buffer reaches the configured threshold (default 1000)
//   - on a periodic ticker (default 5 s)
//   - on graceful stop
//
// A failed flush increments an error counter and puts the batch back at the
// front of the buffer; the next trigger retries. The handler path is
// single-threaded and never blocks the transport reader beyond the brief
// buffer append.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::OddsRepository;
use crate::error::ExchangeError;
use crate::types::OddsSnapshot;

/// Buffer size that forces a flush.
const DEFAULT_FLUSH_THRESHOLD: usize = 1000;

/// Periodic flush (and keep-alive ping) interval.
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Bound on a single batch insert, independent of the caller's context.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Stream wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionMessage<'a> {
    op: &'static str,
    auth_token: &'a str,
    app_key: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MarketSubscription<'a> {
    op: &'static str,
    auth_token: &'a str,
    app_key: &'a str,
    market_ids: &'a [String],
    conflate_ms: u64,
    price_projection: [&'static str; 2],
    heartbeat: bool,
}

#[derive(Debug, Serialize)]
struct Ping {
    op: &'static str,
}

/// Any server-to-client message; `op` discriminates.
#[derive(Debug, Deserialize)]
pub struct StreamMessage {
    pub op: String,
    #[serde(default, rename = "marketChanges")]
    pub market_changes: Vec<MarketChange>,
    #[serde(default, rename = "statusCode")]
    pub status_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MarketChange {
    pub id: String,
    #[serde(default)]
    pub runners: Vec<RunnerChange>,
}

#[derive(Debug, Deserialize)]
pub struct RunnerChange {
    #[serde(rename = "selectionId")]
    pub selection_id: i64,
    /// Back depth, best level first.
    #[serde(default)]
    pub b: Vec<PriceLevel>,
    /// Lay depth, best level first.
    #[serde(default)]
    pub l: Vec<PriceLevel>,
    /// Traded volume, head entry first.
    #[serde(default)]
    pub tv: Vec<PriceLevel>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PriceLevel {
    pub p: f64,
    pub s: f64,
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

/// Maps an exchange selection id to the (race, runner) pair it identifies.
pub type SelectionMap = HashMap<i64, (Uuid, Uuid)>;

pub struct StreamCollector {
    odds: Arc<dyn OddsRepository>,
    selections: SelectionMap,
    buffer: Mutex<Vec<OddsSnapshot>>,
    flush_threshold: usize,
    flush_interval: Duration,
    flush_errors: AtomicU64,
}

impl StreamCollector {
    pub fn new(odds: Arc<dyn OddsRepository>, selections: SelectionMap) -> Self {
        Self {
            odds,
            selections,
            buffer: Mutex::new(Vec::new()),
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            flush_errors: AtomicU64::new(0),
        }
    }

    /// Override flush tuning (used by tests and non-default deployments).
    pub fn with_flush(mut self, threshold: usize, interval: Duration) -> Self {
        self.flush_threshold = threshold;
        self.flush_interval = interval;
        self
    }

    pub fn flush_errors(&self) -> u64 {
        self.flush_errors.load(Ordering::Relaxed)
    }

    pub fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }

    // -------------------------------------------------------------------------
    // Handler path
    // -------------------------------------------------------------------------

    /// Convert one runner change into a snapshot stamped now(UTC). Unknown
    /// selection ids are dropped (the subscription list and the selection
    /// map are built together, so this indicates stale mapping).
    fn snapshot_from_change(&self, change: &RunnerChange) -> Option<OddsSnapshot> {
        let &(race_id, runner_id) = self.selections.get(&change.selection_id)?;

        let best_back = change.b.first();
        let best_lay = change.l.first();
        let traded = change.tv.first();

        Some(OddsSnapshot {
            time: Utc::now(),
            race_id,
            runner_id,
            back_price: best_back.map(|level| level.p),
            back_size: best_back.map(|level| level.s),
            lay_price: best_lay.map(|level| level.p),
            lay_size: best_lay.map(|level| level.s),
            last_traded_price: traded.map(|level| level.p),
            total_matched: traded.map(|level| level.s),
        })
    }

    /// Buffer every runner change in a market-change message. Returns true
    /// when the buffer has reached the flush threshold.
    pub fn handle_market_change(&self, change: &MarketChange) -> bool {
        let snapshots: Vec<OddsSnapshot> = change
            .runners
            .iter()
            .filter_map(|rc| self.snapshot_from_change(rc))
            .collect();

        if snapshots.is_empty() {
            return false;
        }

        let mut buffer = self.buffer.lock();
        buffer.extend(snapshots);
        buffer.len() >= self.flush_threshold
    }

    // -------------------------------------------------------------------------
    // Flush
    // -------------------------------------------------------------------------

    /// Drain the buffer and batch-insert it under the flush timeout. On
    /// failure the batch goes back to the front of the buffer, in order.
    pub async fn flush(&self) {
        let batch: Vec<OddsSnapshot> = {
            let mut buffer = self.buffer.lock();
            if buffer.is_empty() {
                return;
            }
            std::mem::take(&mut *buffer)
        };

        let count = batch.len();
        let result = tokio::time::timeout(FLUSH_TIMEOUT, self.odds.insert_batch(&batch)).await;

        match result {
            Ok(Ok(inserted)) => {
                debug!(inserted, "odds batch flushed");
            }
            Ok(Err(e)) => {
                self.flush_errors.fetch_add(1, Ordering::Relaxed);
                warn!(count, error = %e, "odds flush failed — batch retained for retry");
                self.requeue(batch);
            }
            Err(_) => {
                self.flush_errors.fetch_add(1, Ordering::Relaxed);
                warn!(count, "odds flush timed out — batch retained for retry");
                self.requeue(batch);
            }
        }
    }

    fn requeue(&self, mut batch: Vec<OddsSnapshot>) {
        let mut buffer = self.buffer.lock();
        batch.extend(buffer.drain(..));
        *buffer = batch;
    }

    // -------------------------------------------------------------------------
    // Run loop
    // -------------------------------------------------------------------------

    /// Connect, subscribe to `market_ids`, and pump the stream until the
    /// shutdown signal fires. Performs a final flush before releasing the
    /// transport.
    pub async fn run(
        &self,
        url: &str,
        auth_token: &str,
        app_key: &str,
        market_ids: &[String],
        conflate_ms: u64,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ExchangeError> {
        info!(url, markets = market_ids.len(), "connecting to market stream");

        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| ExchangeError::Stream(e.to_string()))?;
        let (mut write, mut read) = ws.split();

        let connect = serde_json::to_string(&ConnectionMessage {
            op: "connection",
            auth_token,
            app_key,
        })
        .expect("connection message serialises");
        write
            .send(Message::Text(connect))
            .await
            .map_err(|e| ExchangeError::Stream(e.to_string()))?;

        let subscribe = serde_json::to_string(&MarketSubscription {
            op: "mcm",
            auth_token,
            app_key,
            market_ids,
            conflate_ms,
            price_projection: ["EX_BEST_OFFERS", "EX_TRADED"],
            heartbeat: true,
        })
        .expect("subscription message serialises");
        write
            .send(Message::Text(subscribe))
            .await
            .map_err(|e| ExchangeError::Stream(e.to_string()))?;

        info!("market stream subscribed");

        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("stream collector stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let ping = serde_json::to_string(&Ping { op: "ping" })
                        .expect("ping serialises");
                    if let Err(e) = write.send(Message::Text(ping)).await {
                        error!(error = %e, "stream ping failed");
                        break;
                    }
                    self.flush().await;
                }
                message = read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            if self.handle_text(&text) {
                                self.flush().await;
                            }
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!(error = %e, "stream read error");
                            break;
                        }
                        None => {
                            warn!("market stream ended");
                            break;
                        }
                    }
                }
            }
        }

        // Final flush before releasing the transport.
        self.flush().await;
        Ok(())
    }

    /// Parse and dispatch one text frame. Returns true when a flush is due.
    fn handle_text(&self, text: &str) -> bool {
        let parsed: StreamMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "unparseable stream message");
                return false;
            }
        };

        match parsed.op.as_str() {
            "mcm" => {
                let mut flush_due = false;
                for change in &parsed.market_changes {
                    flush_due |= self.handle_market_change(change);
                }
                flush_due
            }
            "connection" => {
                info!("stream connection acknowledged");
                false
            }
            "status" => {
                if let Some(code) = parsed.status_code {
                    debug!(status = %code, "stream status");
                }
                false
            }
            other => {
                debug!(op = other, "ignoring stream op");
                false
            }
        }
    }
}
