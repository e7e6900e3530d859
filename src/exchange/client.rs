// =============================================================================
// Exchange JSON-RPC client — authenticated request/response with typed errors
// =============================================================================
//
// SECURITY: the session token is never logged or serialized. Every request
// carries X-Application and X-Authentication headers; an empty token fails
// before any bytes leave the process.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::error::{map_exchange_code, ExchangeError};
use crate::exchange::wire::{
    CancelExecutionReport, CancelOrdersParams, CurrentOrder, CurrentOrderSummaryReport,
    JsonRpcRequest, JsonRpcResponse, ListCurrentOrdersParams, ListMarketBookParams,
    ListMarketCatalogueParams, MarketBook, MarketCatalogue, MarketFilter, PlaceExecutionReport,
    PlaceInstruction, PlaceOrdersParams,
};

/// How close to expiry a session is considered due for refresh, minutes.
const REFRESH_LEAD_MINUTES: i64 = 5;

/// Per-request timeout on the betting endpoint.
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

struct Session {
    token: String,
    expiry: DateTime<Utc>,
}

/// JSON-RPC client for the exchange betting endpoint.
pub struct ExchangeClient {
    http: reqwest::Client,
    endpoint: String,
    session: RwLock<Option<Session>>,
    request_id: AtomicU64,
}

impl ExchangeClient {
    /// Build a client against `endpoint` using `app_key` for the
    /// X-Application header.
    pub fn new(endpoint: impl Into<String>, app_key: &str) -> Self {
        let mut default_headers = HeaderMap::new();
        default_headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        if let Ok(value) = HeaderValue::from_str(app_key) {
            default_headers.insert("X-Application", value);
        }

        let http = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build reqwest client");

        Self {
            http,
            endpoint: endpoint.into(),
            session: RwLock::new(None),
            request_id: AtomicU64::new(1),
        }
    }

    // -------------------------------------------------------------------------
    // Session lifecycle
    // -------------------------------------------------------------------------

    /// Install a session token valid for `ttl`. The login flow itself lives
    /// outside the core; this is where its output lands.
    pub fn set_session(&self, token: impl Into<String>, ttl: Duration) {
        let expiry = Utc::now() + ttl;
        *self.session.write() = Some(Session {
            token: token.into(),
            expiry,
        });
        debug!(expiry = %expiry, "session token installed");
    }

    /// Token present and unexpired.
    pub fn is_authenticated(&self) -> bool {
        self.session
            .read()
            .as_ref()
            .map(|s| !s.token.is_empty() && Utc::now() < s.expiry)
            .unwrap_or(false)
    }

    /// Within the refresh lead of expiry (or already expired / absent).
    pub fn needs_refresh(&self) -> bool {
        self.session
            .read()
            .as_ref()
            .map(|s| Utc::now() + Duration::minutes(REFRESH_LEAD_MINUTES) >= s.expiry)
            .unwrap_or(true)
    }

    /// Current token under shared lock; errors before dispatch when empty.
    fn current_token(&self) -> Result<String, ExchangeError> {
        let session = self.session.read();
        match session.as_ref() {
            Some(s) if !s.token.is_empty() => Ok(s.token.clone()),
            _ => Err(ExchangeError::NotAuthenticated(
                "no session token held".to_string(),
            )),
        }
    }

    // -------------------------------------------------------------------------
    // Request plumbing
    // -------------------------------------------------------------------------

    /// Send one JSON-RPC request and decode its envelope.
    async fn call<P, R>(&self, method: &str, params: P) -> Result<R, ExchangeError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let token = self.current_token()?;
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(method, params, id);

        debug!(method, id, "exchange request");

        let response = self
            .http
            .post(&self.endpoint)
            .header("X-Authentication", token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;

        if let Ok(envelope) = serde_json::from_slice::<JsonRpcResponse<R>>(&body) {
            if let Some(error) = envelope.error {
                warn!(method, code = %error.code, message = %error.message, "exchange error");
                return Err(map_exchange_code(&error.code, &error.message));
            }
            if let Some(result) = envelope.result {
                return Ok(result);
            }
        }

        if !status.is_success() {
            return Err(ExchangeError::HttpStatus(status.as_u16()));
        }

        Err(ExchangeError::Decode(format!(
            "response to {method} carried neither result nor error"
        )))
    }

    // -------------------------------------------------------------------------
    // Operations
    // -------------------------------------------------------------------------

    #[instrument(skip(self, filter), name = "exchange::list_market_catalogue")]
    pub async fn list_market_catalogue(
        &self,
        filter: MarketFilter,
        market_projection: Vec<String>,
        max_results: u32,
    ) -> Result<Vec<MarketCatalogue>, ExchangeError> {
        self.call(
            "listMarketCatalogue",
            ListMarketCatalogueParams {
                filter,
                market_projection,
                max_results,
            },
        )
        .await
    }

    #[instrument(skip(self), name = "exchange::list_market_book")]
    pub async fn list_market_book(
        &self,
        market_ids: Vec<String>,
        price_projection: Vec<String>,
        keep_alive: bool,
    ) -> Result<Vec<MarketBook>, ExchangeError> {
        self.call(
            "listMarketBook",
            ListMarketBookParams {
                market_ids,
                price_projection,
                keep_alive,
            },
        )
        .await
    }

    #[instrument(skip(self, instructions), name = "exchange::place_orders")]
    pub async fn place_orders(
        &self,
        market_id: &str,
        instructions: Vec<PlaceInstruction>,
    ) -> Result<PlaceExecutionReport, ExchangeError> {
        self.call(
            "placeOrders",
            PlaceOrdersParams {
                market_id: market_id.to_string(),
                instructions,
                order_mode: "EXECUTE".to_string(),
            },
        )
        .await
    }

    #[instrument(skip(self), name = "exchange::cancel_orders")]
    pub async fn cancel_orders(
        &self,
        market_id: &str,
        bet_ids: Vec<String>,
    ) -> Result<CancelExecutionReport, ExchangeError> {
        self.call(
            "cancelOrders",
            CancelOrdersParams {
                market_id: market_id.to_string(),
                bet_ids,
            },
        )
        .await
    }

    #[instrument(skip(self), name = "exchange::list_current_orders")]
    pub async fn list_current_orders(
        &self,
        market_ids: Vec<String>,
    ) -> Result<Vec<CurrentOrder>, ExchangeError> {
        let report: CurrentOrderSummaryReport = self
            .call(
                "listCurrentOrders",
                ListCurrentOrdersParams { market_ids },
            )
            .await?;
        Ok(report.current_orders)
    }
}

impl std::fmt::Debug for ExchangeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeClient")
            .field("endpoint", &self.endpoint)
            .field("session", &"<redacted>")
            .finish()
    }
}
