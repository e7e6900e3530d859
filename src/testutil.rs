// =============================================================================
// In-memory repository fakes for tests
// =============================================================================
//
// Each fake upholds the real contract, including the NotFound sentinel and
// ordering guarantees, so components under test cannot tell the difference.
// =============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::db::{
    BacktestRepository, BetRepository, OddsRepository, RaceRepository, ResultRepository,
    StrategyRepository,
};
use crate::error::DbError;
use crate::types::{
    BacktestRecord, Bet, BetStatus, OddsSnapshot, Race, RaceResult, RaceStatus, Runner,
    StrategyPerformance, StrategyRecord,
};

// ---------------------------------------------------------------------------
// Bets
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryBetRepository {
    bets: Mutex<Vec<Bet>>,
}

impl InMemoryBetRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bets(bets: Vec<Bet>) -> Self {
        Self {
            bets: Mutex::new(bets),
        }
    }

    pub fn all(&self) -> Vec<Bet> {
        self.bets.lock().clone()
    }
}

#[async_trait]
impl BetRepository for InMemoryBetRepository {
    async fn create(&self, bet: &Bet) -> Result<(), DbError> {
        self.bets.lock().push(bet.clone());
        Ok(())
    }

    async fn update(&self, bet: &Bet) -> Result<(), DbError> {
        let mut bets = self.bets.lock();
        let existing = bets
            .iter_mut()
            .find(|b| b.id == bet.id)
            .ok_or(DbError::NotFound)?;
        *existing = bet.clone();
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Bet, DbError> {
        self.bets
            .lock()
            .iter()
            .find(|b| b.id == id)
            .cloned()
            .ok_or(DbError::NotFound)
    }

    async fn pending(&self) -> Result<Vec<Bet>, DbError> {
        let mut out: Vec<Bet> = self
            .bets
            .lock()
            .iter()
            .filter(|b| b.status == BetStatus::Pending)
            .cloned()
            .collect();
        out.sort_by_key(|b| b.placed_at);
        Ok(out)
    }

    async fn matched(&self) -> Result<Vec<Bet>, DbError> {
        let mut out: Vec<Bet> = self
            .bets
            .lock()
            .iter()
            .filter(|b| b.status == BetStatus::Matched)
            .cloned()
            .collect();
        out.sort_by_key(|b| b.placed_at);
        Ok(out)
    }

    async fn settled_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bet>, DbError> {
        let mut out: Vec<Bet> = self
            .bets
            .lock()
            .iter()
            .filter(|b| {
                b.status == BetStatus::Settled
                    && b.settled_at
                        .map(|at| at >= start && at < end)
                        .unwrap_or(false)
            })
            .cloned()
            .collect();
        out.sort_by_key(|b| b.settled_at);
        Ok(out)
    }

    async fn by_strategy_between(
        &self,
        strategy_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bet>, DbError> {
        let mut out: Vec<Bet> = self
            .bets
            .lock()
            .iter()
            .filter(|b| {
                b.strategy_name == strategy_name && b.placed_at >= start && b.placed_at < end
            })
            .cloned()
            .collect();
        out.sort_by_key(|b| b.placed_at);
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Races & runners
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryRaceRepository {
    races: Mutex<Vec<Race>>,
    runners: Mutex<Vec<Runner>>,
}

impl InMemoryRaceRepository {
    pub fn with_races(races: Vec<Race>, runners: Vec<Runner>) -> Self {
        Self {
            races: Mutex::new(races),
            runners: Mutex::new(runners),
        }
    }
}

#[async_trait]
impl RaceRepository for InMemoryRaceRepository {
    async fn create(&self, race: &Race) -> Result<(), DbError> {
        self.races.lock().push(race.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Race, DbError> {
        self.races
            .lock()
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(DbError::NotFound)
    }

    async fn upcoming(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Race>, DbError> {
        let mut out: Vec<Race> = self
            .races
            .lock()
            .iter()
            .filter(|r| {
                r.status == RaceStatus::Scheduled
                    && r.scheduled_start >= from
                    && r.scheduled_start < to
            })
            .cloned()
            .collect();
        out.sort_by_key(|r| r.scheduled_start);
        Ok(out)
    }

    async fn in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Race>, DbError> {
        let mut out: Vec<Race> = self
            .races
            .lock()
            .iter()
            .filter(|r| r.scheduled_start >= start && r.scheduled_start < end)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.scheduled_start);
        Ok(out)
    }

    async fn mark_completed(&self, id: Uuid) -> Result<(), DbError> {
        let mut races = self.races.lock();
        if let Some(race) = races.iter_mut().find(|r| r.id == id) {
            race.status = RaceStatus::Completed;
        }
        Ok(())
    }

    async fn insert_runners(&self, runners: &[Runner]) -> Result<(), DbError> {
        let mut stored = self.runners.lock();
        for runner in runners {
            let duplicate = stored
                .iter()
                .any(|r| r.race_id == runner.race_id && r.trap_number == runner.trap_number);
            if !duplicate {
                stored.push(runner.clone());
            }
        }
        Ok(())
    }

    async fn runners(&self, race_id: Uuid) -> Result<Vec<Runner>, DbError> {
        let mut out: Vec<Runner> = self
            .runners
            .lock()
            .iter()
            .filter(|r| r.race_id == race_id)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.trap_number);
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Odds snapshots
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryOddsRepository {
    snapshots: Mutex<Vec<OddsSnapshot>>,
}

impl InMemoryOddsRepository {
    pub fn with_snapshots(snapshots: Vec<OddsSnapshot>) -> Self {
        Self {
            snapshots: Mutex::new(snapshots),
        }
    }
}

#[async_trait]
impl OddsRepository for InMemoryOddsRepository {
    async fn insert_batch(&self, snapshots: &[OddsSnapshot]) -> Result<u64, DbError> {
        self.snapshots.lock().extend_from_slice(snapshots);
        Ok(snapshots.len() as u64)
    }

    async fn by_race(
        &self,
        race_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<OddsSnapshot>, DbError> {
        let mut out: Vec<OddsSnapshot> = self
            .snapshots
            .lock()
            .iter()
            .filter(|s| s.race_id == race_id && s.time >= start && s.time <= end)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.time);
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Race results
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryResultRepository {
    results: Mutex<Vec<RaceResult>>,
}

impl InMemoryResultRepository {
    pub fn with_results(results: Vec<RaceResult>) -> Self {
        Self {
            results: Mutex::new(results),
        }
    }
}

#[async_trait]
impl ResultRepository for InMemoryResultRepository {
    async fn insert_batch(&self, results: &[RaceResult]) -> Result<u64, DbError> {
        self.results.lock().extend_from_slice(results);
        Ok(results.len() as u64)
    }

    async fn for_race(&self, race_id: Uuid) -> Result<RaceResult, DbError> {
        // Latest row wins, matching the corrections contract.
        self.results
            .lock()
            .iter()
            .filter(|r| r.race_id == race_id)
            .max_by_key(|r| r.time)
            .cloned()
            .ok_or(DbError::NotFound)
    }
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryStrategyRepository {
    records: Mutex<Vec<StrategyRecord>>,
}

impl InMemoryStrategyRepository {
    pub fn with_records(records: Vec<StrategyRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }
}

#[async_trait]
impl StrategyRepository for InMemoryStrategyRepository {
    async fn active(&self) -> Result<Vec<StrategyRecord>, DbError> {
        let mut out: Vec<StrategyRecord> = self
            .records
            .lock()
            .iter()
            .filter(|r| r.active)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn get_by_name(&self, name: &str) -> Result<StrategyRecord, DbError> {
        self.records
            .lock()
            .iter()
            .find(|r| r.name == name)
            .cloned()
            .ok_or(DbError::NotFound)
    }
}

// ---------------------------------------------------------------------------
// Backtests & performance rollups
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryBacktestRepository {
    records: Mutex<Vec<BacktestRecord>>,
    performance: Mutex<Vec<StrategyPerformance>>,
}

impl InMemoryBacktestRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<BacktestRecord> {
        self.records.lock().clone()
    }

    pub fn performance_rows(&self) -> Vec<StrategyPerformance> {
        self.performance.lock().clone()
    }
}

#[async_trait]
impl BacktestRepository for InMemoryBacktestRepository {
    async fn insert(&self, record: &BacktestRecord) -> Result<(), DbError> {
        self.records.lock().push(record.clone());
        Ok(())
    }

    async fn upsert_performance(&self, perf: &StrategyPerformance) -> Result<(), DbError> {
        let mut rows = self.performance.lock();
        if let Some(existing) = rows.iter_mut().find(|p| {
            p.strategy_name == perf.strategy_name && p.period_start == perf.period_start
        }) {
            *existing = perf.clone();
        } else {
            rows.push(perf.clone());
        }
        Ok(())
    }
}
