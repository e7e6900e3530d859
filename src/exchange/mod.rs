// =============================================================================
// Exchange integration — JSON-RPC client, wire types, stream collector
// =============================================================================

pub mod client;
pub mod stream;
pub mod wire;

pub use client::ExchangeClient;
pub use stream::{SelectionMap, StreamCollector};
