// =============================================================================
// Race result repository
// =============================================================================

use async_trait::async_trait;
use sqlx::postgres::PgPoolCopyExt;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::DbError;
use crate::types::RaceResult;

/// Persistence contract for race results.
#[async_trait]
pub trait ResultRepository: Send + Sync {
    /// Bulk-insert results through the COPY path with a count check.
    async fn insert_batch(&self, results: &[RaceResult]) -> Result<u64, DbError>;

    /// The one logical result for a race; `DbError::NotFound` when the race
    /// has not finished (or the result has not arrived yet). Late
    /// corrections append, so the latest row wins.
    async fn for_race(&self, race_id: Uuid) -> Result<RaceResult, DbError>;
}

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

pub struct PgResultRepository {
    pool: PgPool,
}

impl PgResultRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn csv_line(r: &RaceResult) -> String {
    // The positions blob is JSON with embedded commas; CSV-quote it.
    let positions = r.positions.to_string().replace('"', "\"\"");
    format!(
        "{},{},{},\"{}\",{}\n",
        r.race_id,
        r.time.to_rfc3339(),
        r.winner_trap.map(|t| t.to_string()).unwrap_or_default(),
        positions,
        r.status,
    )
}

fn result_from_row(row: &sqlx::postgres::PgRow) -> Result<RaceResult, DbError> {
    Ok(RaceResult {
        race_id: row.try_get("race_id")?,
        time: row.try_get("time")?,
        winner_trap: row.try_get("winner_trap")?,
        positions: row.try_get("positions")?,
        status: row.try_get("status")?,
    })
}

#[async_trait]
impl ResultRepository for PgResultRepository {
    async fn insert_batch(&self, results: &[RaceResult]) -> Result<u64, DbError> {
        if results.is_empty() {
            return Ok(0);
        }

        let mut copy_in = self
            .pool
            .copy_in_raw(
                r#"
                COPY race_results (race_id, time, winner_trap, positions, status)
                FROM STDIN WITH (FORMAT csv, NULL '')
                "#,
            )
            .await?;

        let mut payload = String::with_capacity(results.len() * 128);
        for result in results {
            payload.push_str(&csv_line(result));
        }
        copy_in.send(payload.into_bytes()).await?;

        let inserted = copy_in.finish().await?;
        let expected = results.len() as u64;
        if inserted != expected {
            return Err(DbError::BulkCountMismatch { expected, inserted });
        }
        Ok(inserted)
    }

    async fn for_race(&self, race_id: Uuid) -> Result<RaceResult, DbError> {
        let row = sqlx::query(
            "SELECT * FROM race_results WHERE race_id = $1 ORDER BY time DESC LIMIT 1",
        )
        .bind(race_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DbError::NotFound)?;
        result_from_row(&row)
    }
}
