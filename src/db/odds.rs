// =============================================================================
// Odds snapshot repository — append-only time series, COPY bulk inserts
// =============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolCopyExt;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::DbError;
use crate::types::OddsSnapshot;

/// Persistence contract for the odds time series.
#[async_trait]
pub trait OddsRepository: Send + Sync {
    /// Bulk-insert snapshots through the database's COPY path. Returns the
    /// number of rows the database reports inserted; a mismatch against
    /// `snapshots.len()` is a `BulkCountMismatch` error, never silent.
    async fn insert_batch(&self, snapshots: &[OddsSnapshot]) -> Result<u64, DbError>;

    /// Snapshots for one race with `time` in the inclusive `[start, end]`,
    /// ordered by time.
    async fn by_race(
        &self,
        race_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<OddsSnapshot>, DbError>;
}

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

pub struct PgOddsRepository {
    pool: PgPool,
}

impl PgOddsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Render one snapshot as a COPY CSV line. Empty fields are NULLs.
fn csv_line(s: &OddsSnapshot) -> String {
    fn opt(v: Option<f64>) -> String {
        v.map(|x| x.to_string()).unwrap_or_default()
    }
    format!(
        "{},{},{},{},{},{},{},{},{}\n",
        s.time.to_rfc3339(),
        s.race_id,
        s.runner_id,
        opt(s.back_price),
        opt(s.back_size),
        opt(s.lay_price),
        opt(s.lay_size),
        opt(s.last_traded_price),
        opt(s.total_matched),
    )
}

fn snapshot_from_row(row: &sqlx::postgres::PgRow) -> Result<OddsSnapshot, DbError> {
    Ok(OddsSnapshot {
        time: row.try_get("time")?,
        race_id: row.try_get("race_id")?,
        runner_id: row.try_get("runner_id")?,
        back_price: row.try_get("back_price")?,
        back_size: row.try_get("back_size")?,
        lay_price: row.try_get("lay_price")?,
        lay_size: row.try_get("lay_size")?,
        last_traded_price: row.try_get("last_traded_price")?,
        total_matched: row.try_get("total_matched")?,
    })
}

#[async_trait]
impl OddsRepository for PgOddsRepository {
    async fn insert_batch(&self, snapshots: &[OddsSnapshot]) -> Result<u64, DbError> {
        if snapshots.is_empty() {
            return Ok(0);
        }

        let mut copy_in = self
            .pool
            .copy_in_raw(
                r#"
                COPY odds_snapshots
                    (time, race_id, runner_id, back_price, back_size,
                     lay_price, lay_size, last_traded_price, total_matched)
                FROM STDIN WITH (FORMAT csv, NULL '')
                "#,
            )
            .await?;

        let mut payload = String::with_capacity(snapshots.len() * 96);
        for snapshot in snapshots {
            payload.push_str(&csv_line(snapshot));
        }
        copy_in.send(payload.into_bytes()).await?;

        let inserted = copy_in.finish().await?;
        let expected = snapshots.len() as u64;
        if inserted != expected {
            return Err(DbError::BulkCountMismatch { expected, inserted });
        }
        Ok(inserted)
    }

    async fn by_race(
        &self,
        race_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<OddsSnapshot>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM odds_snapshots
            WHERE race_id = $1 AND time >= $2 AND time <= $3
            ORDER BY time
            "#,
        )
        .bind(race_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(snapshot_from_row).collect()
    }
}
