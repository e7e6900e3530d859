// =============================================================================
// Strategy repository
// =============================================================================

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::error::DbError;
use crate::types::StrategyRecord;

/// Persistence contract for strategy rows. Only active rows are candidates
/// for the live orchestrator.
#[async_trait]
pub trait StrategyRepository: Send + Sync {
    async fn active(&self) -> Result<Vec<StrategyRecord>, DbError>;

    async fn get_by_name(&self, name: &str) -> Result<StrategyRecord, DbError>;
}

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

pub struct PgStrategyRepository {
    pool: PgPool,
}

impl PgStrategyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn record_from_row(row: &sqlx::postgres::PgRow) -> Result<StrategyRecord, DbError> {
    Ok(StrategyRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        parameters: row.try_get("parameters")?,
        active: row.try_get("active")?,
    })
}

#[async_trait]
impl StrategyRepository for PgStrategyRepository {
    async fn active(&self) -> Result<Vec<StrategyRecord>, DbError> {
        let rows = sqlx::query("SELECT * FROM strategies WHERE active ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn get_by_name(&self, name: &str) -> Result<StrategyRecord, DbError> {
        let row = sqlx::query("SELECT * FROM strategies WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(DbError::NotFound)?;
        record_from_row(&row)
    }
}
