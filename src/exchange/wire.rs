// =============================================================================
// Exchange wire types — JSON-RPC envelope and method payloads
// =============================================================================

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// JSON-RPC 2.0 envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<P> {
    pub jsonrpc: &'static str,
    pub method: String,
    pub params: P,
    pub id: u64,
}

impl<P> JsonRpcRequest<P> {
    pub fn new(method: impl Into<String>, params: P, id: u64) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
            id,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "R: Deserialize<'de>"))]
pub struct JsonRpcResponse<R> {
    #[serde(default)]
    pub result: Option<R>,
    #[serde(default)]
    pub error: Option<JsonRpcErrorBody>,
    #[serde(default)]
    pub id: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcErrorBody {
    pub code: String,
    #[serde(default)]
    pub message: String,
}

// ---------------------------------------------------------------------------
// listMarketCatalogue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketFilter {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub event_type_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub market_types: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub venues: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMarketCatalogueParams {
    pub filter: MarketFilter,
    pub market_projection: Vec<String>,
    pub max_results: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketCatalogue {
    pub market_id: String,
    pub market_name: String,
    #[serde(default)]
    pub market_start_time: Option<String>,
    #[serde(default)]
    pub runners: Vec<RunnerCatalog>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerCatalog {
    pub selection_id: i64,
    pub runner_name: String,
    #[serde(default)]
    pub sort_priority: Option<i32>,
}

// ---------------------------------------------------------------------------
// listMarketBook
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMarketBookParams {
    pub market_ids: Vec<String>,
    pub price_projection: Vec<String>,
    pub keep_alive: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketBook {
    pub market_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub total_matched: Option<f64>,
    #[serde(default)]
    pub runners: Vec<MarketBookRunner>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketBookRunner {
    pub selection_id: i64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub last_price_traded: Option<f64>,
    #[serde(default)]
    pub total_matched: Option<f64>,
    #[serde(default)]
    pub ex: Option<ExchangePrices>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangePrices {
    #[serde(default)]
    pub available_to_back: Vec<PriceSize>,
    #[serde(default)]
    pub available_to_lay: Vec<PriceSize>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceSize {
    pub price: f64,
    pub size: f64,
}

// ---------------------------------------------------------------------------
// placeOrders
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrdersParams {
    pub market_id: String,
    pub instructions: Vec<PlaceInstruction>,
    pub order_mode: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceInstruction {
    pub order_type: String,
    pub selection_id: i64,
    pub side: String,
    pub limit_order: LimitOrder,
}

impl PlaceInstruction {
    /// A single LIMIT instruction, the only order shape the engine submits.
    pub fn limit(selection_id: i64, side: &str, size: f64, price: f64) -> Self {
        Self {
            order_type: "LIMIT".to_string(),
            selection_id,
            side: side.to_string(),
            limit_order: LimitOrder { size, price },
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitOrder {
    pub size: f64,
    pub price: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceExecutionReport {
    pub status: String,
    #[serde(default)]
    pub instruction_reports: Vec<PlaceInstructionReport>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceInstructionReport {
    pub status: String,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub bet_id: Option<String>,
    #[serde(default)]
    pub average_price_matched: Option<f64>,
    #[serde(default)]
    pub size_matched: Option<f64>,
}

// ---------------------------------------------------------------------------
// cancelOrders
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrdersParams {
    pub market_id: String,
    pub bet_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelExecutionReport {
    pub status: String,
    #[serde(default)]
    pub instruction_reports: Vec<CancelInstructionReport>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelInstructionReport {
    pub status: String,
    #[serde(default)]
    pub bet_id: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
}

// ---------------------------------------------------------------------------
// listCurrentOrders
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListCurrentOrdersParams {
    pub market_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentOrderSummaryReport {
    #[serde(default)]
    pub current_orders: Vec<CurrentOrder>,
    #[serde(default)]
    pub more_available: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentOrder {
    pub bet_id: String,
    pub market_id: String,
    pub selection_id: i64,
    #[serde(default)]
    pub side: Option<String>,
    /// Order status as reported by the exchange (e.g. "PENDING", "MATCHED").
    pub status: String,
    #[serde(default)]
    pub average_price_matched: Option<f64>,
    #[serde(default)]
    pub size_matched: Option<f64>,
}
