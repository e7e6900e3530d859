// =============================================================================
// Bet repository
// =============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::DbError;
use crate::types::{Bet, BetSide, BetStatus, MarketType};

/// Persistence contract for bets. `external_bet_id` is unique where
/// non-null; the status machine lives in the callers, the repository only
/// records transitions.
#[async_trait]
pub trait BetRepository: Send + Sync {
    async fn create(&self, bet: &Bet) -> Result<(), DbError>;

    /// Persist every mutable field of an existing bet row.
    async fn update(&self, bet: &Bet) -> Result<(), DbError>;

    async fn get(&self, id: Uuid) -> Result<Bet, DbError>;

    /// All pending bets, oldest first.
    async fn pending(&self) -> Result<Vec<Bet>, DbError>;

    /// All matched (unsettled) bets, oldest first.
    async fn matched(&self) -> Result<Vec<Bet>, DbError>;

    /// Settled bets with `settled_at` in the half-open `[start, end)`.
    async fn settled_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bet>, DbError>;

    /// Bets for one strategy with `placed_at` in `[start, end)`.
    async fn by_strategy_between(
        &self,
        strategy_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bet>, DbError>;
}

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

pub struct PgBetRepository {
    pool: PgPool,
}

impl PgBetRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn bet_from_row(row: &sqlx::postgres::PgRow) -> Result<Bet, DbError> {
    let market_type: String = row.try_get("market_type")?;
    let side: String = row.try_get("side")?;
    let status: String = row.try_get("status")?;
    Ok(Bet {
        id: row.try_get("id")?,
        external_bet_id: row.try_get("external_bet_id")?,
        market_id: row.try_get("market_id")?,
        race_id: row.try_get("race_id")?,
        runner_id: row.try_get("runner_id")?,
        strategy_name: row.try_get("strategy_name")?,
        market_type: market_type.parse().unwrap_or(MarketType::Win),
        side: side.parse().unwrap_or(BetSide::Back),
        requested_odds: row.try_get("requested_odds")?,
        stake: row.try_get("stake")?,
        matched_price: row.try_get("matched_price")?,
        matched_size: row.try_get("matched_size")?,
        status: status.parse().unwrap_or(BetStatus::Pending),
        placed_at: row.try_get("placed_at")?,
        matched_at: row.try_get("matched_at")?,
        settled_at: row.try_get("settled_at")?,
        cancelled_at: row.try_get("cancelled_at")?,
        profit_loss: row.try_get("profit_loss")?,
        commission: row.try_get("commission")?,
    })
}

#[async_trait]
impl BetRepository for PgBetRepository {
    async fn create(&self, bet: &Bet) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO bets
                (id, external_bet_id, market_id, race_id, runner_id,
                 strategy_name, market_type, side, requested_odds, stake,
                 matched_price, matched_size, status, placed_at, matched_at,
                 settled_at, cancelled_at, profit_loss, commission)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(bet.id)
        .bind(&bet.external_bet_id)
        .bind(&bet.market_id)
        .bind(bet.race_id)
        .bind(bet.runner_id)
        .bind(&bet.strategy_name)
        .bind(bet.market_type.to_string())
        .bind(bet.side.to_string())
        .bind(bet.requested_odds)
        .bind(bet.stake)
        .bind(bet.matched_price)
        .bind(bet.matched_size)
        .bind(bet.status.to_string())
        .bind(bet.placed_at)
        .bind(bet.matched_at)
        .bind(bet.settled_at)
        .bind(bet.cancelled_at)
        .bind(bet.profit_loss)
        .bind(bet.commission)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, bet: &Bet) -> Result<(), DbError> {
        let updated = sqlx::query(
            r#"
            UPDATE bets SET
                external_bet_id = $2,
                matched_price = $3,
                matched_size = $4,
                status = $5,
                matched_at = $6,
                settled_at = $7,
                cancelled_at = $8,
                profit_loss = $9,
                commission = $10
            WHERE id = $1
            "#,
        )
        .bind(bet.id)
        .bind(&bet.external_bet_id)
        .bind(bet.matched_price)
        .bind(bet.matched_size)
        .bind(bet.status.to_string())
        .bind(bet.matched_at)
        .bind(bet.settled_at)
        .bind(bet.cancelled_at)
        .bind(bet.profit_loss)
        .bind(bet.commission)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Bet, DbError> {
        let row = sqlx::query("SELECT * FROM bets WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(DbError::NotFound)?;
        bet_from_row(&row)
    }

    async fn pending(&self) -> Result<Vec<Bet>, DbError> {
        let rows = sqlx::query("SELECT * FROM bets WHERE status = 'pending' ORDER BY placed_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(bet_from_row).collect()
    }

    async fn matched(&self) -> Result<Vec<Bet>, DbError> {
        let rows = sqlx::query("SELECT * FROM bets WHERE status = 'matched' ORDER BY placed_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(bet_from_row).collect()
    }

    async fn settled_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bet>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM bets
            WHERE status = 'settled' AND settled_at >= $1 AND settled_at < $2
            ORDER BY settled_at
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(bet_from_row).collect()
    }

    async fn by_strategy_between(
        &self,
        strategy_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bet>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM bets
            WHERE strategy_name = $1 AND placed_at >= $2 AND placed_at < $3
            ORDER BY placed_at
            "#,
        )
        .bind(strategy_name)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(bet_from_row).collect()
    }
}
