use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;
use crate::calibration::metrics::CalibrationInput;
use crate::data::types::{Estimate, Event};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS events (
        id TEXT PRIMARY KEY,
        question TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        market_probability REAL,
        outcome INTEGER,
        is_resolved INTEGER NOT NULL DEFAULT 0,
        volume REAL NOT NULL DEFAULT 0,
        fetched_at TIMESTAMP NOT NULL
    );

    CREATE TABLE IF NOT EXISTS model_estimates (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        event_id TEXT NOT NULL,
        model_id TEXT NOT NULL,
        probability REAL NOT NULL,
        created_at TIMESTAMP NOT NULL,
        UNIQUE(event_id, model_id),
        FOREIGN KEY(event_id) REFERENCES events(id) ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_estimates_event ON model_estimates(event_id);
    CREATE INDEX IF NOT EXISTS idx_estimates_model ON model_estimates(model_id);
"#;

const EVENT_COLUMNS: &str =
    "id, question, description, market_probability, outcome, is_resolved, volume";

/// SQLite store for events and model estimates.
///
/// The connection sits behind a mutex so the store can be shared between
/// concurrently running estimate tasks; every call holds the lock only for
/// the duration of one statement or transaction.
pub struct CalibrationDatabase {
    conn: Mutex<Connection>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStats {
    pub total_events: usize,
    pub resolved_events: usize,
    pub total_estimates: usize,
    pub last_fetched: Option<DateTime<Utc>>,
}

impl CalibrationDatabase {
    pub fn new(db_path: &str) -> Result<Self> {
        if let Some(dir) = Path::new(db_path).parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create database directory: {}", dir.display()))?;
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database: {}", db_path))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;

        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)
            .context("Failed to create schema")?;

        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Insert or refresh a batch of events in one transaction
    pub fn upsert_events(&self, events: &[Event]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let fetched_at = Utc::now();

        {
            let mut stmt = tx.prepare(
                "INSERT INTO events (id, question, description, market_probability, outcome, is_resolved, volume, fetched_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                    question = excluded.question,
                    description = excluded.description,
                    market_probability = excluded.market_probability,
                    outcome = excluded.outcome,
                    is_resolved = excluded.is_resolved,
                    volume = excluded.volume,
                    fetched_at = excluded.fetched_at",
            )?;

            for event in events {
                // An outcome is only meaningful once the market has resolved
                let outcome = event.outcome.filter(|_| event.is_resolved);
                stmt.execute(params![
                    event.id,
                    event.question,
                    event.description,
                    event.market_probability,
                    outcome,
                    event.is_resolved,
                    event.volume,
                    fetched_at,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Store a model's forecast, replacing any previous one for the same pair
    pub fn upsert_estimate(&self, event_id: &str, model_id: &str, probability: f64) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO model_estimates (event_id, model_id, probability, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(event_id, model_id) DO UPDATE SET probability = excluded.probability",
            params![event_id, model_id, probability, Utc::now()],
        )?;
        Ok(())
    }

    pub fn has_estimate(&self, event_id: &str, model_id: &str) -> Result<bool> {
        let found = self.conn.lock()
            .query_row(
                "SELECT 1 FROM model_estimates WHERE event_id = ?1 AND model_id = ?2",
                params![event_id, model_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Resolved events first, then by volume
    pub fn get_events(&self, limit: usize) -> Result<Vec<Event>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM events ORDER BY is_resolved DESC, volume DESC LIMIT ?1",
            EVENT_COLUMNS
        ))?;

        let events = stmt.query_map(params![limit as i64], event_from_row)?;
        events.collect::<Result<Vec<_>, _>>().map_err(|e| e.into())
    }

    /// (probability, outcome) pairs for every resolved event the model has forecast
    pub fn get_calibration_inputs(&self, model_id: &str) -> Result<Vec<CalibrationInput>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT me.probability, e.outcome
             FROM model_estimates me
             JOIN events e ON e.id = me.event_id
             WHERE me.model_id = ?1
               AND e.is_resolved = 1
               AND e.outcome IS NOT NULL",
        )?;

        let inputs = stmt.query_map(params![model_id], |row| {
            Ok(CalibrationInput::new(row.get(0)?, row.get(1)?))
        })?;
        inputs.collect::<Result<Vec<_>, _>>().map_err(|e| e.into())
    }

    pub fn get_estimates_for_event(&self, event_id: &str) -> Result<Vec<Estimate>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT event_id, model_id, probability, created_at
             FROM model_estimates
             WHERE event_id = ?1
             ORDER BY model_id",
        )?;

        let estimates = stmt.query_map(params![event_id], |row| {
            Ok(Estimate {
                event_id: row.get(0)?,
                model_id: row.get(1)?,
                probability: row.get(2)?,
                created_at: row.get(3)?,
            })
        })?;
        estimates.collect::<Result<Vec<_>, _>>().map_err(|e| e.into())
    }

    pub fn get_stats(&self) -> Result<DatabaseStats> {
        let conn = self.conn.lock();

        let (total_events, resolved_events, last_fetched) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(is_resolved), 0), MAX(fetched_at) FROM events",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        let total_estimates = conn.query_row(
            "SELECT COUNT(*) FROM model_estimates",
            [],
            |row| row.get(0),
        )?;

        Ok(DatabaseStats {
            total_events,
            resolved_events,
            total_estimates,
            last_fetched,
        })
    }
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get(0)?,
        question: row.get(1)?,
        description: row.get(2)?,
        market_probability: row.get(3)?,
        outcome: row.get(4)?,
        is_resolved: row.get(5)?,
        volume: row.get(6)?,
    })
}

#[cfg(test)]
impl CalibrationDatabase {
    pub fn upsert_event(&self, event: &Event) -> Result<()> {
        self.upsert_events(std::slice::from_ref(event))
    }

    pub fn get_event(&self, id: &str) -> Result<Option<Event>> {
        let conn = self.conn.lock();
        let event = conn
            .query_row(
                &format!("SELECT {} FROM events WHERE id = ?1", EVENT_COLUMNS),
                params![id],
                event_from_row,
            )
            .optional()?;
        Ok(event)
    }
}
