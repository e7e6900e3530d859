// =============================================================================
// Race & runner repository
// =============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::DbError;
use crate::types::{Race, RaceStatus, Runner};

/// Persistence contract for races and their runners.
#[async_trait]
pub trait RaceRepository: Send + Sync {
    async fn create(&self, race: &Race) -> Result<(), DbError>;

    /// Fetch a single race; `DbError::NotFound` when absent.
    async fn get(&self, id: Uuid) -> Result<Race, DbError>;

    /// Scheduled races with `scheduled_start` in the half-open `[from, to)`.
    async fn upcoming(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Race>, DbError>;

    /// All races with `scheduled_start` in `[start, end)`, ordered by start.
    async fn in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Race>, DbError>;

    /// Transition a race to completed. Idempotent.
    async fn mark_completed(&self, id: Uuid) -> Result<(), DbError>;

    async fn insert_runners(&self, runners: &[Runner]) -> Result<(), DbError>;

    /// Runners for a race ordered by trap number.
    async fn runners(&self, race_id: Uuid) -> Result<Vec<Runner>, DbError>;
}

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

pub struct PgRaceRepository {
    pool: PgPool,
}

impl PgRaceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn race_from_row(row: &sqlx::postgres::PgRow) -> Result<Race, DbError> {
    let status: String = row.try_get("status")?;
    Ok(Race {
        id: row.try_get("id")?,
        scheduled_start: row.try_get("scheduled_start")?,
        actual_start: row.try_get("actual_start")?,
        track: row.try_get("track")?,
        race_type: row.try_get("race_type")?,
        distance_m: row.try_get("distance_m")?,
        grade: row.try_get("grade")?,
        conditions: row.try_get("conditions")?,
        status: status.parse().unwrap_or(RaceStatus::Scheduled),
    })
}

fn runner_from_row(row: &sqlx::postgres::PgRow) -> Result<Runner, DbError> {
    Ok(Runner {
        id: row.try_get("id")?,
        race_id: row.try_get("race_id")?,
        trap_number: row.try_get("trap_number")?,
        name: row.try_get("name")?,
        form_rating: row.try_get("form_rating")?,
        weight_kg: row.try_get("weight_kg")?,
        trainer: row.try_get("trainer")?,
        metadata: row.try_get("metadata")?,
    })
}

#[async_trait]
impl RaceRepository for PgRaceRepository {
    async fn create(&self, race: &Race) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO races
                (id, scheduled_start, actual_start, track, race_type,
                 distance_m, grade, conditions, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(race.id)
        .bind(race.scheduled_start)
        .bind(race.actual_start)
        .bind(&race.track)
        .bind(&race.race_type)
        .bind(race.distance_m)
        .bind(&race.grade)
        .bind(&race.conditions)
        .bind(race.status.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Race, DbError> {
        let row = sqlx::query("SELECT * FROM races WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(DbError::NotFound)?;
        race_from_row(&row)
    }

    async fn upcoming(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Race>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM races
            WHERE status = 'scheduled'
              AND scheduled_start >= $1 AND scheduled_start < $2
            ORDER BY scheduled_start
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(race_from_row).collect()
    }

    async fn in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Race>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM races
            WHERE scheduled_start >= $1 AND scheduled_start < $2
            ORDER BY scheduled_start
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(race_from_row).collect()
    }

    async fn mark_completed(&self, id: Uuid) -> Result<(), DbError> {
        sqlx::query("UPDATE races SET status = 'completed' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_runners(&self, runners: &[Runner]) -> Result<(), DbError> {
        for runner in runners {
            sqlx::query(
                r#"
                INSERT INTO runners
                    (id, race_id, trap_number, name, form_rating, weight_kg,
                     trainer, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (race_id, trap_number) DO NOTHING
                "#,
            )
            .bind(runner.id)
            .bind(runner.race_id)
            .bind(runner.trap_number)
            .bind(&runner.name)
            .bind(runner.form_rating)
            .bind(runner.weight_kg)
            .bind(&runner.trainer)
            .bind(&runner.metadata)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn runners(&self, race_id: Uuid) -> Result<Vec<Runner>, DbError> {
        let rows = sqlx::query("SELECT * FROM runners WHERE race_id = $1 ORDER BY trap_number")
            .bind(race_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(runner_from_row).collect()
    }
}
