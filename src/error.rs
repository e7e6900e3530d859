// =============================================================================
// Error taxonomy — typed kinds with cause chains
// =============================================================================
//
// Kinds map one-to-one onto how callers react:
//   - Config / Validation  -> fatal at startup or surfaced to the caller
//   - NotAuthenticated     -> aborts the current RPC
//   - Exchange domain      -> per-operation, carries the wire rejection
//   - Transport            -> counted by the circuit breaker
//   - Db (NotFound)        -> expected in queries, never a breaker signal
//   - Risk                 -> names the specific limit breached
// =============================================================================

use thiserror::Error;

// ---------------------------------------------------------------------------
// Exchange
// ---------------------------------------------------------------------------

/// Errors surfaced by the exchange JSON-RPC client and the stream transport.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// No session token held, or the exchange invalidated it.
    #[error("not authenticated: {0}")]
    NotAuthenticated(String),

    #[error("invalid session: {0}")]
    InvalidSession(String),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("market suspended: {0}")]
    MarketSuspended(String),

    #[error("order limit exceeded: {0}")]
    OrderLimitExceeded(String),

    #[error("persistence quota exceeded: {0}")]
    PersistenceQuotaExceeded(String),

    #[error("invalid bet size: {0}")]
    InvalidBetSize(String),

    #[error("operation not allowed: {0}")]
    OperationNotAllowed(String),

    /// Any exchange error code not in the known table; preserves the wire
    /// code and message verbatim.
    #[error("exchange error {code}: {message}")]
    Api { code: String, message: String },

    /// HTTP-level failure with no decodable error envelope.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-2xx HTTP status carrying no error envelope at all.
    #[error("http status {0} with no error envelope")]
    HttpStatus(u16),

    #[error("stream transport error: {0}")]
    Stream(String),

    /// Exchange replied with an envelope the client cannot decode.
    #[error("malformed exchange response: {0}")]
    Decode(String),
}

impl ExchangeError {
    /// True when the failure is at the transport layer rather than a domain
    /// rejection — the orchestrator counts these toward the breaker.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::HttpStatus(_) | Self::Stream(_))
    }
}

/// Known exchange status codes mapped to constructors. A table, so that new
/// codes are one row, not another branch.
pub const EXCHANGE_CODE_TABLE: &[(&str, fn(String) -> ExchangeError)] = &[
    ("INVALID_SESSION_INFORMATION", ExchangeError::InvalidSession),
    ("INSUFFICIENT_FUNDS", ExchangeError::InsufficientFunds),
    ("MARKET_SUSPENDED", ExchangeError::MarketSuspended),
    ("ORDER_LIMIT_EXCEEDED", ExchangeError::OrderLimitExceeded),
    (
        "PERSISTENCE_QUOTA_EXCEEDED",
        ExchangeError::PersistenceQuotaExceeded,
    ),
    ("INVALID_BET_SIZE", ExchangeError::InvalidBetSize),
    ("OPERATION_NOT_ALLOWED", ExchangeError::OperationNotAllowed),
];

/// Map a wire `{code, message}` pair to a typed error kind.
pub fn map_exchange_code(code: &str, message: &str) -> ExchangeError {
    for (known, construct) in EXCHANGE_CODE_TABLE {
        if *known == code {
            return construct(message.to_string());
        }
    }
    ExchangeError::Api {
        code: code.to_string(),
        message: message.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Storage failures. `NotFound` is a sentinel callers match on explicitly —
/// it is expected in queries and is not a failure signal to the breaker.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found")]
    NotFound,

    #[error("bulk insert count mismatch: expected {expected}, inserted {inserted}")]
    BulkCountMismatch { expected: u64, inserted: u64 },

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl DbError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

// ---------------------------------------------------------------------------
// Risk
// ---------------------------------------------------------------------------

/// Risk-limit rejections; each variant names the breached limit.
#[derive(Debug, Error)]
pub enum RiskError {
    #[error("stake {proposed:.2} exceeds max stake per bet {max:.2}")]
    StakeLimit { proposed: f64, max: f64 },

    #[error("exposure {current:.2} + stake {proposed:.2} exceeds max exposure {max:.2}")]
    ExposureLimit {
        current: f64,
        proposed: f64,
        max: f64,
    },

    #[error("daily loss {loss:.2} has reached max daily loss {max:.2}")]
    DailyLossLimit { loss: f64, max: f64 },
}

// ---------------------------------------------------------------------------
// Betting validation & placement
// ---------------------------------------------------------------------------

/// Caller-supplied parameters outside contractual bounds, or a placement
/// the exchange rejected at the instruction level.
#[derive(Debug, Error)]
pub enum BettingError {
    #[error("odds {0} outside valid range 1.01..=1000")]
    InvalidOdds(f64),

    #[error("stake {stake:.2} outside allowed range {min:.2}..={max:.2}")]
    InvalidStake { stake: f64, min: f64, max: f64 },

    /// The placeOrders instruction came back non-SUCCESS.
    #[error("order rejected: {0}")]
    Rejected(String),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Failures along the executor's single-signal path.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The live path was invoked while live trading is disabled.
    #[error("live trading is disabled")]
    LiveTradingDisabled,

    #[error(transparent)]
    Risk(#[from] RiskError),

    #[error(transparent)]
    Betting(#[from] BettingError),

    #[error(transparent)]
    Db(#[from] DbError),
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Fatal configuration problems detected at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("neither paper nor live trading is enabled")]
    NoTradingMode,

    #[error("invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_map_to_distinct_kinds() {
        assert!(matches!(
            map_exchange_code("INSUFFICIENT_FUNDS", "balance too low"),
            ExchangeError::InsufficientFunds(_)
        ));
        assert!(matches!(
            map_exchange_code("MARKET_SUSPENDED", "race off"),
            ExchangeError::MarketSuspended(_)
        ));
        assert!(matches!(
            map_exchange_code("INVALID_SESSION_INFORMATION", "expired"),
            ExchangeError::InvalidSession(_)
        ));
        assert!(matches!(
            map_exchange_code("ORDER_LIMIT_EXCEEDED", "too many"),
            ExchangeError::OrderLimitExceeded(_)
        ));
        assert!(matches!(
            map_exchange_code("PERSISTENCE_QUOTA_EXCEEDED", "quota"),
            ExchangeError::PersistenceQuotaExceeded(_)
        ));
        assert!(matches!(
            map_exchange_code("INVALID_BET_SIZE", "below minimum"),
            ExchangeError::InvalidBetSize(_)
        ));
        assert!(matches!(
            map_exchange_code("OPERATION_NOT_ALLOWED", "nope"),
            ExchangeError::OperationNotAllowed(_)
        ));
    }

    #[test]
    fn unknown_code_preserves_code_and_message() {
        let err = map_exchange_code("SOMETHING_NEW", "details here");
        match err {
            ExchangeError::Api { code, message } => {
                assert_eq!(code, "SOMETHING_NEW");
                assert_eq!(message, "details here");
            }
            other => panic!("expected Api catch-all, got {other:?}"),
        }
    }

    #[test]
    fn not_found_sentinel_is_distinguishable() {
        let err = DbError::NotFound;
        assert!(err.is_not_found());
        let err = DbError::BulkCountMismatch {
            expected: 10,
            inserted: 9,
        };
        assert!(!err.is_not_found());
    }

    #[test]
    fn risk_errors_name_the_limit() {
        let msg = RiskError::StakeLimit {
            proposed: 150.0,
            max: 100.0,
        }
        .to_string();
        assert!(msg.contains("max stake per bet"));

        let msg = RiskError::DailyLossLimit {
            loss: 95.0,
            max: 90.0,
        }
        .to_string();
        assert!(msg.contains("max daily loss"));
    }
}
