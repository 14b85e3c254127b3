//! SQLite-backed store with durable persistence.

use crate::{
    accumulate_total, normalize_team, CycleKind, GoalKey, GoalStore, PageName, ReportTarget, SaleEvent,
    SalesLedger, StoreError, StoreResult, TeamDestination, TeamDirectory, TimeWindow,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use goalboard_core::unix_ms_from_utc;
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Persistent SQLite backend for the ledger, goals and team directory.
#[derive(Debug)]
pub struct SqliteBoardStore {
    db_path: PathBuf,
}

impl SqliteBoardStore {
    /// Creates a SQLite-backed store at `path`, creating schema if needed.
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self { db_path };
        let connection = store.open_connection()?;
        store.initialize_schema(&connection)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn open_connection(&self) -> StoreResult<Connection> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            "#,
        )?;
        Ok(connection)
    }

    fn initialize_schema(&self, connection: &Connection) -> StoreResult<()> {
        connection.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sales (
                sale_id INTEGER PRIMARY KEY AUTOINCREMENT,
                team TEXT NOT NULL,
                page TEXT NOT NULL,
                amount TEXT NOT NULL,
                ts_ms INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sales_team_ts ON sales (team, ts_ms);

            CREATE TABLE IF NOT EXISTS goals (
                page TEXT NOT NULL,
                cycle TEXT NOT NULL,
                amount TEXT NOT NULL,
                PRIMARY KEY (page, cycle)
            );

            CREATE TABLE IF NOT EXISTS overrides (
                page TEXT NOT NULL,
                cycle TEXT NOT NULL,
                amount TEXT NOT NULL,
                PRIMARY KEY (page, cycle)
            );

            CREATE TABLE IF NOT EXISTS teams (
                name TEXT PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS team_pages (
                team TEXT NOT NULL,
                page TEXT NOT NULL,
                PRIMARY KEY (team, page)
            );

            CREATE TABLE IF NOT EXISTS report_destinations (
                team TEXT PRIMARY KEY,
                channel_id TEXT NOT NULL,
                thread_id INTEGER NULL
            );

            CREATE TABLE IF NOT EXISTS global_destination (
                slot INTEGER PRIMARY KEY CHECK (slot = 1),
                channel_id TEXT NOT NULL,
                thread_id INTEGER NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn load_keyed_amounts(&self, table: &'static str) -> StoreResult<BTreeMap<GoalKey, Decimal>> {
        let connection = self.open_connection()?;
        let mut statement =
            connection.prepare(&format!("SELECT page, cycle, amount FROM {table}"))?;
        let rows = statement.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut values = BTreeMap::new();
        for row in rows {
            let (page, cycle, amount) = row?;
            let key = GoalKey::new(page, cycle_from_db(&cycle)?);
            values.insert(key, decimal_from_db(table, &amount)?);
        }
        Ok(values)
    }
}

#[async_trait]
impl SalesLedger for SqliteBoardStore {
    async fn append(&self, event: SaleEvent) -> StoreResult<()> {
        let connection = self.open_connection()?;
        connection.execute(
            "INSERT INTO sales (team, page, amount, ts_ms) VALUES (?1, ?2, ?3, ?4)",
            params![
                event.team(),
                event.page().as_str(),
                event.amount().to_string(),
                timestamp_to_db(event.timestamp()),
            ],
        )?;
        Ok(())
    }

    async fn sum_by_page(
        &self,
        team: &str,
        window: &TimeWindow,
    ) -> StoreResult<BTreeMap<PageName, Decimal>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare(
            r#"
            SELECT page, amount FROM sales
            WHERE team = ?1 AND ts_ms >= ?2 AND ts_ms < ?3
            "#,
        )?;
        let rows = statement.query_map(
            params![
                team,
                timestamp_to_db(window.start),
                timestamp_to_db(window.end)
            ],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )?;

        let mut totals = BTreeMap::new();
        for row in rows {
            let (page, amount) = row?;
            let amount = decimal_from_db("sales.amount", &amount)?;
            accumulate_total(&mut totals, PageName::from(page), amount)?;
        }
        Ok(totals)
    }

    async fn distinct_pages(&self, team: &str) -> StoreResult<BTreeSet<PageName>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare("SELECT DISTINCT page FROM sales WHERE team = ?1")?;
        let rows = statement.query_map(params![team], |row| row.get::<_, String>(0))?;
        let mut pages = BTreeSet::new();
        for row in rows {
            pages.insert(PageName::from(row?));
        }
        Ok(pages)
    }

    async fn delete_range(
        &self,
        team: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let connection = self.open_connection()?;
        let removed = connection.execute(
            "DELETE FROM sales WHERE team = ?1 AND ts_ms >= ?2 AND ts_ms < ?3",
            params![team, timestamp_to_db(since), timestamp_to_db(until)],
        )?;
        Ok(removed)
    }
}

#[async_trait]
impl GoalStore for SqliteBoardStore {
    async fn load_goals(&self) -> StoreResult<BTreeMap<GoalKey, Decimal>> {
        self.load_keyed_amounts("goals")
    }

    async fn upsert_goal(&self, key: &GoalKey, amount: Decimal) -> StoreResult<()> {
        let connection = self.open_connection()?;
        connection.execute(
            r#"
            INSERT INTO goals (page, cycle, amount) VALUES (?1, ?2, ?3)
            ON CONFLICT (page, cycle) DO UPDATE SET amount = excluded.amount
            "#,
            params![key.page.as_str(), cycle_to_db(key.cycle), amount.to_string()],
        )?;
        Ok(())
    }

    async fn clear_goals(&self, cycle: CycleKind) -> StoreResult<usize> {
        let connection = self.open_connection()?;
        let removed = connection.execute(
            "DELETE FROM goals WHERE cycle = ?1",
            params![cycle_to_db(cycle)],
        )?;
        Ok(removed)
    }

    async fn load_overrides(&self) -> StoreResult<BTreeMap<GoalKey, Decimal>> {
        self.load_keyed_amounts("overrides")
    }

    async fn upsert_override(&self, key: &GoalKey, amount: Decimal) -> StoreResult<()> {
        if amount.is_zero() {
            self.clear_override(key).await?;
            return Ok(());
        }
        let connection = self.open_connection()?;
        connection.execute(
            r#"
            INSERT INTO overrides (page, cycle, amount) VALUES (?1, ?2, ?3)
            ON CONFLICT (page, cycle) DO UPDATE SET amount = excluded.amount
            "#,
            params![key.page.as_str(), cycle_to_db(key.cycle), amount.to_string()],
        )?;
        Ok(())
    }

    async fn clear_override(&self, key: &GoalKey) -> StoreResult<bool> {
        let connection = self.open_connection()?;
        let removed = connection.execute(
            "DELETE FROM overrides WHERE page = ?1 AND cycle = ?2",
            params![key.page.as_str(), cycle_to_db(key.cycle)],
        )?;
        Ok(removed > 0)
    }
}

#[async_trait]
impl TeamDirectory for SqliteBoardStore {
    async fn register_team(&self, team: &str) -> StoreResult<()> {
        let team = normalize_team(team)?;
        let connection = self.open_connection()?;
        connection.execute(
            "INSERT INTO teams (name) VALUES (?1) ON CONFLICT (name) DO NOTHING",
            params![team],
        )?;
        Ok(())
    }

    async fn remove_team(&self, team: &str) -> StoreResult<bool> {
        let team = normalize_team(team)?;
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction()?;
        let removed = transaction.execute("DELETE FROM teams WHERE name = ?1", params![team])?;
        transaction.execute(
            "DELETE FROM report_destinations WHERE team = ?1",
            params![team],
        )?;
        transaction.execute("DELETE FROM team_pages WHERE team = ?1", params![team])?;
        transaction.commit()?;
        Ok(removed > 0)
    }

    async fn list_teams(&self) -> StoreResult<Vec<String>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare("SELECT name FROM teams ORDER BY name ASC")?;
        let rows = statement.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    async fn add_team_page(&self, team: &str, page: &PageName) -> StoreResult<()> {
        let team = normalize_team(team)?;
        let connection = self.open_connection()?;
        connection.execute(
            "INSERT INTO team_pages (team, page) VALUES (?1, ?2) ON CONFLICT (team, page) DO NOTHING",
            params![team, page.as_str()],
        )?;
        Ok(())
    }

    async fn team_pages(&self, team: &str) -> StoreResult<BTreeSet<PageName>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare("SELECT page FROM team_pages WHERE team = ?1")?;
        let rows = statement.query_map(params![team.trim()], |row| row.get::<_, String>(0))?;
        let mut pages = BTreeSet::new();
        for row in rows {
            pages.insert(PageName::from(row?));
        }
        Ok(pages)
    }

    async fn set_team_destination(&self, team: &str, target: &ReportTarget) -> StoreResult<()> {
        let team = normalize_team(team)?;
        let connection = self.open_connection()?;
        connection.execute(
            r#"
            INSERT INTO report_destinations (team, channel_id, thread_id) VALUES (?1, ?2, ?3)
            ON CONFLICT (team) DO UPDATE SET
                channel_id = excluded.channel_id,
                thread_id = excluded.thread_id
            "#,
            params![team, target.channel_id, target.thread_id],
        )?;
        Ok(())
    }

    async fn team_destinations(&self) -> StoreResult<Vec<TeamDestination>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare(
            "SELECT team, channel_id, thread_id FROM report_destinations ORDER BY team ASC",
        )?;
        let rows = statement.query_map([], |row| {
            Ok(TeamDestination {
                team: row.get(0)?,
                target: ReportTarget {
                    channel_id: row.get(1)?,
                    thread_id: row.get(2)?,
                },
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    async fn set_global_destination(&self, target: &ReportTarget) -> StoreResult<()> {
        let connection = self.open_connection()?;
        connection.execute(
            r#"
            INSERT INTO global_destination (slot, channel_id, thread_id) VALUES (1, ?1, ?2)
            ON CONFLICT (slot) DO UPDATE SET
                channel_id = excluded.channel_id,
                thread_id = excluded.thread_id
            "#,
            params![target.channel_id, target.thread_id],
        )?;
        Ok(())
    }

    async fn clear_global_destination(&self) -> StoreResult<bool> {
        let connection = self.open_connection()?;
        let removed = connection.execute("DELETE FROM global_destination WHERE slot = 1", [])?;
        Ok(removed > 0)
    }

    async fn global_destination(&self) -> StoreResult<Option<ReportTarget>> {
        let connection = self.open_connection()?;
        connection
            .query_row(
                "SELECT channel_id, thread_id FROM global_destination WHERE slot = 1",
                [],
                |row| {
                    Ok(ReportTarget {
                        channel_id: row.get(0)?,
                        thread_id: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
    }
}

fn timestamp_to_db(value: DateTime<Utc>) -> i64 {
    i64::try_from(unix_ms_from_utc(value)).unwrap_or(i64::MAX)
}

fn decimal_from_db(field: &'static str, value: &str) -> StoreResult<Decimal> {
    Decimal::from_str(value).map_err(|_| StoreError::InvalidPersistedValue {
        field,
        value: value.to_string(),
    })
}

fn cycle_to_db(cycle: CycleKind) -> &'static str {
    cycle.as_str()
}

fn cycle_from_db(value: &str) -> StoreResult<CycleKind> {
    match value {
        "shift" => Ok(CycleKind::Shift),
        "period" => Ok(CycleKind::Period),
        _ => Err(StoreError::InvalidPersistedValue {
            field: "cycle",
            value: value.to_string(),
        }),
    }
}
