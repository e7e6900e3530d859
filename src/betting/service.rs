// =============================================================================
// Betting Service — validated order placement and cancellation
// =============================================================================

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::BettingError;
use crate::exchange::wire::PlaceInstruction;
use crate::exchange::ExchangeClient;
use crate::settlement::{MAX_ODDS, MIN_ODDS};
use crate::types::BetSide;

/// Instruction-level status the exchange reports on acceptance.
const INSTRUCTION_SUCCESS: &str = "SUCCESS";

pub struct BettingService {
    client: Arc<ExchangeClient>,
    min_stake: f64,
    max_stake: f64,
}

impl BettingService {
    pub fn new(client: Arc<ExchangeClient>, min_stake: f64, max_stake: f64) -> Self {
        Self {
            client,
            min_stake,
            max_stake,
        }
    }

    /// Validate order parameters without touching the network.
    pub fn validate(&self, odds: f64, stake: f64) -> Result<(), BettingError> {
        if !(MIN_ODDS..=MAX_ODDS).contains(&odds) {
            return Err(BettingError::InvalidOdds(odds));
        }
        if stake < self.min_stake || stake > self.max_stake {
            return Err(BettingError::InvalidStake {
                stake,
                min: self.min_stake,
                max: self.max_stake,
            });
        }
        Ok(())
    }

    /// Place a single limit order. Returns the exchange bet id on
    /// instruction status SUCCESS; every other outcome is a typed error
    /// carrying the rejection reason.
    pub async fn place_bet(
        &self,
        market_id: &str,
        selection_id: i64,
        side: BetSide,
        odds: f64,
        stake: f64,
    ) -> Result<String, BettingError> {
        self.validate(odds, stake)?;

        let side_str = match side {
            BetSide::Back => "BACK",
            BetSide::Lay => "LAY",
        };
        let instruction = PlaceInstruction::limit(selection_id, side_str, stake, odds);

        let report = self.client.place_orders(market_id, vec![instruction]).await?;

        let instruction_report = report
            .instruction_reports
            .first()
            .ok_or_else(|| BettingError::Rejected("empty instruction report".to_string()))?;

        if instruction_report.status != INSTRUCTION_SUCCESS {
            let reason = instruction_report
                .error_code
                .clone()
                .unwrap_or_else(|| instruction_report.status.clone());
            warn!(market_id, selection_id, %side, odds, stake, reason, "order rejected");
            return Err(BettingError::Rejected(reason));
        }

        let bet_id = instruction_report
            .bet_id
            .clone()
            .ok_or_else(|| BettingError::Rejected("SUCCESS without a bet id".to_string()))?;

        info!(market_id, selection_id, %side, odds, stake, bet_id, "order placed");
        Ok(bet_id)
    }

    /// Cancel an unmatched order.
    pub async fn cancel_bet(&self, market_id: &str, bet_id: &str) -> Result<(), BettingError> {
        let report = self
            .client
            .cancel_orders(market_id, vec![bet_id.to_string()])
            .await?;

        let ok = report
            .instruction_reports
            .first()
            .map(|r| r.status == INSTRUCTION_SUCCESS)
            .unwrap_or(report.status == INSTRUCTION_SUCCESS);

        if !ok {
            let reason = report
                .instruction_reports
                .first()
                .and_then(|r| r.error_code.clone())
                .unwrap_or_else(|| report.status.clone());
            return Err(BettingError::Rejected(reason));
        }

        info!(market_id, bet_id, "order cancelled");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> BettingService {
        let client = Arc::new(ExchangeClient::new("https://exchange.test/rpc", "key"));
        BettingService::new(client, 2.0, 100.0)
    }

    #[test]
    fn rejects_odds_outside_the_valid_range() {
        let svc = service();
        assert!(matches!(
            svc.validate(1.0, 10.0),
            Err(BettingError::InvalidOdds(_))
        ));
        assert!(matches!(
            svc.validate(1000.5, 10.0),
            Err(BettingError::InvalidOdds(_))
        ));
        assert!(svc.validate(1.01, 10.0).is_ok());
        assert!(svc.validate(1000.0, 10.0).is_ok());
    }

    #[test]
    fn rejects_stakes_outside_the_configured_bounds() {
        let svc = service();
        assert!(matches!(
            svc.validate(3.0, 1.5),
            Err(BettingError::InvalidStake { .. })
        ));
        assert!(matches!(
            svc.validate(3.0, 150.0),
            Err(BettingError::InvalidStake { .. })
        ));
        assert!(svc.validate(3.0, 2.0).is_ok());
        assert!(svc.validate(3.0, 100.0).is_ok());
    }
}
